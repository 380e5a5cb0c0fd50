//! Publishing the output tree.
//!
//! The git publisher commits everything under the repository root and pushes
//! it. Failures surface as [`PublishError`]; the pipeline logs them and keeps
//! going.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::PublishError;

/// Per-step git timeout.
const GIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Publish collaborator: `publish(commit_message)`.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, commit_message: &str) -> Result<(), PublishError>;
}

/// Used when publishing is disabled.
pub struct NoopPublisher;

#[async_trait]
impl Publisher for NoopPublisher {
    async fn publish(&self, commit_message: &str) -> Result<(), PublishError> {
        tracing::debug!(message = %commit_message, "Publishing disabled, skipping");
        Ok(())
    }
}

/// `git add` / `commit` / `pull --rebase` / `push` in the repository root.
pub struct GitPublisher {
    repo_dir: PathBuf,
    remote: String,
    branch: String,
    timeout: Duration,
}

impl GitPublisher {
    pub fn new(repo_dir: impl Into<PathBuf>, remote: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            remote: remote.into(),
            branch: branch.into(),
            timeout: GIT_TIMEOUT,
        }
    }

    /// Set the per-step timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn git(&self, step: &str, args: &[&str]) -> Result<(), PublishError> {
        let child = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(PublishError::Git {
                    step: step.to_string(),
                    stderr: format!("timed out after {:?}", self.timeout),
                });
            }
        };

        if output.status.success() {
            tracing::debug!(step, "git step OK");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Err(PublishError::Git {
            step: step.to_string(),
            stderr: if stderr.is_empty() { stdout } else { stderr },
        })
    }
}

#[async_trait]
impl Publisher for GitPublisher {
    async fn publish(&self, commit_message: &str) -> Result<(), PublishError> {
        self.git("add", &["add", "-A"]).await?;
        self.git("commit", &["commit", "-m", commit_message]).await?;
        self.git("pull", &["pull", "--rebase", &self.remote, &self.branch])
            .await?;
        self.git("push", &["push", &self.remote, &self.branch]).await?;
        tracing::info!(message = %commit_message, remote = %self.remote, branch = %self.branch, "Published");
        Ok(())
    }
}
