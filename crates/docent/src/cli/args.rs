use clap::Parser;
use docent_core::config::Config;
use std::path::PathBuf;

/// A terminal documentation assistant that looks things up through Context7.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Conversation store to use (defaults to ~/.context7_history.json)
    #[arg(long, value_name = "PATH")]
    pub history_file: Option<PathBuf>,

    /// Model to use (overrides OPENAI_MODEL)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Print replies as they arrive instead of all at once
    #[arg(long)]
    pub stream: bool,

    /// Skip the Node.js availability check at startup
    #[arg(long)]
    pub no_preflight: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the environment configuration.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(model) = &self.model {
            config = config.with_model(model.clone());
        }
        if let Some(path) = &self.history_file {
            config = config.with_history_file(path.clone());
        }
        config
    }
}
