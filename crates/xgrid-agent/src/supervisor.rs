//! Control of the external proxy process.
//!
//! The agent never runs the proxy itself; it asks the host's service manager
//! to restart it and delegates installation to the [`Installer`].

use std::future::Future;
use std::pin::Pin;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{AgentError, AgentResult};
use crate::installer::Installer;

/// Boxed future returned by [`Supervisor`] operations.
pub type SupervisorFuture<'a> = Pin<Box<dyn Future<Output = AgentResult<()>> + Send + 'a>>;

/// Lifecycle operations on the supervised proxy.
pub trait Supervisor: Send + Sync {
    /// Restart the proxy so it reloads its configuration file.
    fn restart(&self) -> SupervisorFuture<'_>;

    /// Make sure the proxy binary is installed at the desired version.
    fn ensure_installed(&self) -> SupervisorFuture<'_>;
}

/// Supervises the proxy as a systemd unit.
pub struct SystemdSupervisor {
    service_name: String,
    installer: Installer,
}

impl SystemdSupervisor {
    pub fn new(service_name: impl Into<String>, installer: Installer) -> Self {
        Self {
            service_name: service_name.into(),
            installer,
        }
    }
}

impl Supervisor for SystemdSupervisor {
    fn restart(&self) -> SupervisorFuture<'_> {
        Box::pin(async move {
            run_command("systemctl", &["restart", &self.service_name]).await?;
            info!(service = %self.service_name, "proxy restarted");
            Ok(())
        })
    }

    fn ensure_installed(&self) -> SupervisorFuture<'_> {
        Box::pin(self.installer.ensure())
    }
}

/// Run `program` to completion, turning a non-zero exit into an error that
/// carries its stderr.
pub(crate) async fn run_command(program: &str, args: &[&str]) -> AgentResult<String> {
    debug!(program, ?args, "running command");
    let command = format!("{program} {}", args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| AgentError::Command {
            command: command.clone(),
            detail: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(AgentError::Command {
            command,
            detail: format!(
                "{} - {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn command_output_and_failure() {
        let out = run_command("sh", &["-c", "echo hello"]).await.unwrap();
        assert_eq!(out.trim(), "hello");

        let err = run_command("sh", &["-c", "echo broken >&2; exit 3"]).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("sh -c"), "{msg}");
        assert!(msg.contains("broken"), "{msg}");

        assert!(run_command("/nonexistent/binary", &[]).await.is_err());
    }
}
