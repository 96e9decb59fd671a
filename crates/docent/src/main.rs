use clap::Parser;
use colored::Colorize;
use docent::cli::Cli;
use docent::repl::Repl;
use docent_core::config::Config;
use docent_core::preflight::{DEFAULT_PROBE_TIMEOUT, probe_runtime};
use docent_core::store::LoadOutcome;
use eyre::{Result, WrapErr};
use std::io::Write;
use tokio::io::BufReader;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // Load .env before reading any configuration
    let env_file = docent::cli::config::load_env()?;

    // Level configured via RUST_LOG
    let log_file = docent::logging::init_tracing()?;
    if let Some(path) = &env_file {
        debug!(target: "docent::cli", "Loaded environment from {}", path.display());
    }

    let config = cli.apply(Config::from_env()?);
    info!(target: "docent::cli", model = %config.model, history = %config.history_file.display(), "Starting docent");

    let mut stdout = std::io::stdout();

    if !cli.no_preflight {
        match probe_runtime(DEFAULT_PROBE_TIMEOUT).await {
            Ok(report) => writeln!(
                stdout,
                "{}",
                format!("Node.js {} and npx {} found", report.node, report.npx).green()
            )?,
            Err(err) => {
                writeln!(stdout, "{}", err.to_string().red())?;
                writeln!(
                    stdout,
                    "{}",
                    "Node.js 18+ is required for the Context7 tool server. Install it from https://nodejs.org/"
                        .yellow()
                )?;
                return Err(err).wrap_err("Runtime check failed");
            }
        }
    }

    let chat = docent::build_session(&config)?;
    if let LoadOutcome::Recovered { reason } = chat.initialize().await? {
        warn!(target: "docent::cli", "History reset: {}", reason);
        writeln!(
            stdout,
            "{}",
            format!(
                "Could not read {} ({reason}); starting with an empty history.",
                config.history_file.display()
            )
            .yellow()
        )?;
    }

    writeln!(
        stdout,
        "{}",
        format!("Docent ({}), type /help for commands.", config.model).bold()
    )?;
    if let Some(path) = log_file {
        writeln!(stdout, "{}", format!("Logging to {}", path.display()).dimmed())?;
    }

    let mut repl = Repl::new(chat, cli.stream, stdout);
    repl.run(BufReader::new(tokio::io::stdin())).await
}
