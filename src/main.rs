use clap::Parser;
use colored::Colorize;
use team_ops::Cli;
use team_ops::core::output::OutputFormat;
use team_ops::core::time;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "TEAM_OPS_LOG";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let format = cli.format;
    if let Err(err) = team_ops::run(cli) {
        match format {
            OutputFormat::Json => {
                let envelope = time::command_envelope(
                    "error",
                    "error",
                    serde_json::json!({
                        "error": {
                            "kind": err.kind(),
                            "message": err.to_string(),
                            "retryable": err.is_retryable(),
                        }
                    }),
                );
                println!("{}", envelope);
            }
            OutputFormat::Text => {
                eprintln!("{} {}", "error:".red().bold(), err);
            }
        }
        std::process::exit(err.exit_code());
    }
}
