use std::borrow::Cow;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use deployhook_config::Config;
use serde::Serialize;
use shell_escape::unix::escape;

use crate::DispatchError;

/// Extra argument passed to scripts started through the manual trigger.
pub const FORCE_MARKER: &str = "force";

/// Where and as whom deployment scripts run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteTarget {
    pub user: String,
    pub host: String,
    pub identity: PathBuf,
    pub scripts_path: String,
    pub connect_timeout: Duration,
    pub execution_timeout: Duration,
}

impl RemoteTarget {
    pub fn from_config(config: &Config) -> Result<Self, DispatchError> {
        let user = config.host_user.as_deref().filter(|s| !s.is_empty());
        let scripts_path = config.scripts_path.as_deref().filter(|s| !s.is_empty());

        let (Some(user), Some(scripts_path)) = (user, scripts_path) else {
            return Err(DispatchError::ServerMisconfigured(
                "SSH host details missing.",
            ));
        };

        Ok(Self {
            user: user.to_string(),
            host: config.ssh_host.clone(),
            identity: config.ssh_identity.clone(),
            scripts_path: scripts_path.to_string(),
            connect_timeout: config.connect_timeout,
            execution_timeout: config.execution_timeout,
        })
    }

    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// One script run: which script, for which branch, and whether it was forced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub script: String,
    pub branch: String,
    pub forced: bool,
}

impl Invocation {
    /// Command line handed to the remote shell, every argument quoted.
    pub fn remote_command(&self, target: &RemoteTarget) -> String {
        let script_path = format!(
            "{}/{}",
            target.scripts_path.trim_end_matches('/'),
            self.script
        );

        let mut command = format!(
            "bash {} {}",
            escape(Cow::from(script_path)),
            escape(Cow::from(self.branch.as_str()))
        );
        if self.forced {
            command.push(' ');
            command.push_str(FORCE_MARKER);
        }
        command
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    pub failure_detail: Option<String>,
    pub exit_code: Option<i32>,
    #[serde(skip)]
    pub duration: Duration,
}

impl ExecutionOutcome {
    fn failed(detail: String, duration: Duration) -> Self {
        Self {
            succeeded: false,
            stdout: String::new(),
            stderr: String::new(),
            failure_detail: Some(detail),
            exit_code: None,
            duration,
        }
    }
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, target: &RemoteTarget, invocation: &Invocation) -> ExecutionOutcome;
}

/// Runs scripts through the system `ssh` client.
#[derive(Clone, Debug)]
pub struct SshExecutor {
    program: PathBuf,
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ssh"),
        }
    }
}

impl SshExecutor {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn args(target: &RemoteTarget, invocation: &Invocation) -> Vec<String> {
        vec![
            "-i".to_string(),
            target.identity.display().to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", target.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            target.destination(),
            invocation.remote_command(target),
        ]
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, target: &RemoteTarget, invocation: &Invocation) -> ExecutionOutcome {
        let started = Instant::now();
        tracing::debug!(
            "Executing {} on {} for branch {}",
            invocation.script,
            target.destination(),
            invocation.branch
        );

        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(Self::args(target, invocation))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        let output = command.output();

        match tokio::time::timeout(target.execution_timeout, output).await {
            Ok(Ok(output)) => handle_command_output(&output, started.elapsed()),
            Ok(Err(error)) => ExecutionOutcome::failed(
                format!("Failed to start {:?}: {error}", self.program),
                started.elapsed(),
            ),
            Err(_) => ExecutionOutcome::failed(
                format!(
                    "Remote execution timed out after {}s",
                    target.execution_timeout.as_secs()
                ),
                started.elapsed(),
            ),
        }
    }
}

fn handle_command_output(output: &std::process::Output, duration: Duration) -> ExecutionOutcome {
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    let failure_detail = (!output.status.success())
        .then(|| format!("Command failed ({})", output.status));

    ExecutionOutcome {
        succeeded: output.status.success(),
        stdout,
        stderr,
        failure_detail,
        exit_code: output.status.code(),
        duration,
    }
}

#[cfg(test)]
#[path = "cmd_tests.rs"]
mod tests;
