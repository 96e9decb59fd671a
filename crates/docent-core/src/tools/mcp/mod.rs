mod error;
mod stdio;

pub use error::McpError;
pub use stdio::{McpToolServer, StdioLauncher};
