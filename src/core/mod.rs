//! Core primitives shared by every team-ops subsystem.
//!
//! Storage layout, the durable record store, the cross-process lock, the
//! monitor log, configuration, errors, and time helpers all live here.

pub mod config;
pub mod error;
pub mod lock;
pub mod monitor;
pub mod output;
pub mod records;
pub mod store;
pub mod time;
