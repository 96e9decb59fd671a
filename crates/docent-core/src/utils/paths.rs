use std::path::PathBuf;

/// File name of the conversation store inside the user's home directory.
pub const HISTORY_FILE_NAME: &str = ".context7_history.json";

/// Standardized locations for Docent's files.
///
/// - Conversation store: ~/.context7_history.json
/// - Logs: ~/.docent/logs
pub struct AppPaths;

impl AppPaths {
    /// Return the user's home directory, falling back to the working directory
    /// when the platform does not report one.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Return the user-level docent directory: ~/.docent
    pub fn user_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".docent"))
    }

    /// Return the default conversation store path.
    pub fn default_history_file() -> PathBuf {
        Self::home_dir().join(HISTORY_FILE_NAME)
    }

    /// Return the directory that receives log files, if a home directory exists.
    pub fn log_dir() -> Option<PathBuf> {
        Self::user_dir().map(|dir| dir.join("logs"))
    }
}
