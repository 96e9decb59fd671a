//! Start-up check for the Node.js runtime the tool server needs.

use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreflightError {
    #[error("{program} was not found on PATH. Install Node.js (which provides {program}) and try again")]
    NotFound { program: String },

    #[error("{program} did not respond within {}s", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },

    #[error("{program} --version failed: {message}")]
    Failed { program: String, message: String },
}

/// Versions reported by the runtime tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeReport {
    pub node: String,
    pub npx: String,
}

/// Check `node` and then `npx`, each with its own bounded wait.
pub async fn probe_runtime(timeout: Duration) -> Result<RuntimeReport, PreflightError> {
    let node = probe_program("node", timeout).await?;
    let npx = probe_program("npx", timeout).await?;
    Ok(RuntimeReport { node, npx })
}

/// Run `<program> --version` and return its trimmed output.
pub async fn probe_program(program: &str, timeout: Duration) -> Result<String, PreflightError> {
    let mut command = Command::new(program);
    command.arg("--version").kill_on_drop(true);

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| PreflightError::TimedOut {
            program: program.to_string(),
            timeout,
        })?
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PreflightError::NotFound {
                    program: program.to_string(),
                }
            } else {
                PreflightError::Failed {
                    program: program.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

    if !output.status.success() {
        return Err(PreflightError::Failed {
            program: program.to_string(),
            message: format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    debug!(target: "docent::preflight", "{} {}", program, version);
    Ok(version)
}
