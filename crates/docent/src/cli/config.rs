use dotenvy::dotenv;
use eyre::Result;
use std::path::PathBuf;

/// Load a `.env` file from the working directory or its parents, if any.
/// Returns the file that was loaded so it can be logged once tracing is up.
pub fn load_env() -> Result<Option<PathBuf>> {
    loaded_path(dotenv())
}

fn loaded_path(result: dotenvy::Result<PathBuf>) -> Result<Option<PathBuf>> {
    match result {
        Ok(path) => Ok(Some(path)),
        Err(err) if err.not_found() => Ok(None),
        Err(err) => Err(eyre::eyre!("Failed to read .env file: {}", err)),
    }
}
