//! Fetching the repository under test.

use super::process::{run_captured, CaptureError};
use super::RunError;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

/// Puts a checkout of `repository` at `branch` into `dest`.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, repository: &str, branch: &str, dest: &Path) -> Result<(), RunError>;
}

/// Shallow `git clone` with a hard timeout.
pub struct GitFetcher {
    git: String,
    url_template: String,
    timeout: Duration,
}

impl GitFetcher {
    pub fn new(git: impl Into<String>, url_template: impl Into<String>, timeout: Duration) -> Self {
        Self {
            git: git.into(),
            url_template: url_template.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(&self, repository: &str, branch: &str, dest: &Path) -> Result<(), RunError> {
        let url = resolve_repository_url(repository, &self.url_template)?;
        validate_branch(branch)?;

        info!(%url, %branch, dest = %dest.display(), "cloning repository");

        let mut cmd = Command::new(&self.git);
        cmd.arg("clone")
            .arg("--depth")
            .arg("1")
            .arg("--single-branch")
            .arg("--branch")
            .arg(branch)
            .arg("--")
            .arg(&url)
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0");

        match run_captured(cmd, self.timeout).await {
            Ok(out) if out.status.success() => Ok(()),
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
                Err(RunError::CloneFailed(if stderr.is_empty() {
                    format!("git exited with {}", out.status)
                } else {
                    stderr
                }))
            }
            Err(CaptureError::Spawn(e)) => Err(RunError::CloneFailed(format!(
                "could not run '{}': {}",
                self.git, e
            ))),
            Err(CaptureError::TimedOut) => Err(RunError::CloneTimedOut(self.timeout.as_secs())),
        }
    }
}

/// URLs, scp-style remotes and paths are used verbatim; a bare `owner/name` is
/// expanded through `template`'s `{repo}` placeholder.
pub fn resolve_repository_url(repository: &str, template: &str) -> Result<String, RunError> {
    let repo = repository.trim();
    if repo.is_empty() || repo.starts_with('-') || repo.chars().any(char::is_whitespace) {
        return Err(RunError::InvalidRepository(repository.to_string()));
    }

    let verbatim = repo.contains("://")
        || repo.starts_with("git@")
        || repo.starts_with('/')
        || repo.starts_with("./")
        || repo.starts_with("../");
    if verbatim {
        return Ok(repo.to_string());
    }

    let mut parts = repo.split('/');
    let slug_ok = matches!((parts.next(), parts.next(), parts.next()), (Some(owner), Some(name), None)
        if is_slug_part(owner) && is_slug_part(name));
    if !slug_ok {
        return Err(RunError::InvalidRepository(repository.to_string()));
    }
    Ok(template.replace("{repo}", repo))
}

fn is_slug_part(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

pub fn validate_branch(branch: &str) -> Result<(), RunError> {
    let ok = !branch.is_empty()
        && !branch.starts_with('-')
        && !branch.contains("..")
        && branch
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(RunError::InvalidBranch(branch.to_string()))
    }
}
