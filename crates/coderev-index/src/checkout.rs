//! Source checkout: clone on first use, pull afterwards.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use crate::error::{IndexError, Result};

/// What [`Checkout::ensure`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutStatus {
    Cloned,
    Pulled,
    /// Pull failed; the existing tree is used as-is.
    PullFailed,
    /// Directory exists but is not a git work tree.
    LocalTree,
}

#[derive(Debug, Clone)]
pub struct Checkout {
    url: String,
    dir: PathBuf,
    retries: u32,
    backoff: Duration,
}

impl Checkout {
    #[must_use]
    pub fn new(url: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            dir: dir.into(),
            retries: 2,
            backoff: Duration::from_secs(2),
        }
    }

    /// Extra clone attempts after the first failure.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Make sure the source tree is present and current.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Checkout`] when every clone attempt fails. The
    /// partially cloned directory is removed after each failed attempt.
    pub async fn ensure(&self) -> Result<CheckoutStatus> {
        if has_entries(&self.dir).await? {
            if !self.dir.join(".git").exists() {
                tracing::info!(dir = %self.dir.display(), "using local source tree");
                return Ok(CheckoutStatus::LocalTree);
            }
            return Ok(match self.pull().await {
                Ok(()) => CheckoutStatus::Pulled,
                Err(e) => {
                    tracing::warn!(dir = %self.dir.display(), "pull failed, indexing existing tree: {e}");
                    CheckoutStatus::PullFailed
                }
            });
        }

        let mut last_err = None;
        for attempt in 0..=self.retries {
            if attempt > 0 {
                tokio::time::sleep(self.backoff * attempt).await;
            }
            tracing::info!(url = %self.url, attempt = attempt + 1, "cloning repository");
            match self.clone_once().await {
                Ok(()) => return Ok(CheckoutStatus::Cloned),
                Err(e) => {
                    tracing::warn!(url = %self.url, attempt = attempt + 1, "clone failed: {e}");
                    remove_dir_if_exists(&self.dir).await?;
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| IndexError::Checkout(format!("clone of {} failed", self.url))))
    }

    async fn clone_once(&self) -> Result<()> {
        if let Some(parent) = self.dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let dir = self.dir.to_string_lossy();
        git(&["clone", "--recurse-submodules", &self.url, &dir], None).await
    }

    async fn pull(&self) -> Result<()> {
        git(&["pull", "--ff-only"], Some(&self.dir)).await?;
        git(
            &["submodule", "update", "--init", "--recursive"],
            Some(&self.dir),
        )
        .await
    }
}

async fn git(args: &[&str], cwd: Option<&Path>) -> Result<()> {
    let mut cmd = Command::new("git");
    cmd.args(args).env("GIT_TERMINAL_PROMPT", "0");
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd
        .output()
        .await
        .map_err(|e| IndexError::Checkout(format!("failed to run git {}: {e}", args[0])))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(IndexError::Checkout(format!(
            "git {} failed: {}",
            args[0],
            stderr.trim()
        )));
    }
    Ok(())
}

async fn has_entries(dir: &Path) -> Result<bool> {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => Ok(entries.next_entry().await?.is_some()),
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
