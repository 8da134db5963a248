//! Team-ops subsystems.
//!
//! - `team`: team record, membership rules, init/reset
//! - `tasks`: shared task board
//! - `messages`: direct messages and broadcasts
//! - `debate`: option debates, scoring, and decision apply
//! - `orchestrate`: one-step debate driver for external schedulers

pub mod debate;
pub mod messages;
pub mod orchestrate;
pub mod tasks;
pub mod team;
