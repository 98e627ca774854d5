//! Build-target checks and the test invocation.

use super::process::{run_captured, CaptureError};
use super::RunError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// First of `names` present at `root`.
pub fn find_manifest(root: &Path, names: &[String]) -> Option<PathBuf> {
    names
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
}

/// Target names end up as argv entries; keep them boring.
pub fn validate_target_name(target: &str) -> Result<(), RunError> {
    let reason = if target.is_empty() {
        Some("target name is empty")
    } else if target.starts_with('-') {
        Some("target name cannot start with a hyphen")
    } else if !target
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'))
    {
        Some("target name contains invalid characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(RunError::InvalidTarget {
            target: target.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// `smoke` and `@smoke` both become `@smoke`.
pub fn normalize_tag(tag: &str) -> Result<String, RunError> {
    let tag = tag.trim();
    let bare = tag.strip_prefix('@').unwrap_or(tag);
    let ok = !bare.is_empty()
        && bare
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.' | '/'));
    if ok {
        Ok(format!("@{}", bare))
    } else {
        Err(RunError::InvalidTag(tag.to_string()))
    }
}

/// Cucumber tag expression requiring every tag (`@a and @b`), or `None` when no tags were asked for.
pub fn tag_expression(tags: &[String]) -> Result<Option<String>, RunError> {
    let normalized = tags
        .iter()
        .filter(|t| !t.trim().is_empty())
        .map(|t| normalize_tag(t))
        .collect::<Result<Vec<_>, _>>()?;
    if normalized.is_empty() {
        Ok(None)
    } else {
        Ok(Some(normalized.join(" and ")))
    }
}

/// A fully-resolved command line. Arguments are passed without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn command(&self, cwd: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(cwd);
        cmd
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// `make <target> [TAGS=<expr>] [BRANCH=<branch>]`
pub fn build_invocation(
    tool: &str,
    target: &str,
    tags: &[String],
    branch: Option<&str>,
) -> Result<Invocation, RunError> {
    validate_target_name(target)?;

    let mut args = vec![target.to_string()];
    if let Some(expr) = tag_expression(tags)? {
        args.push(format!("TAGS={}", expr));
    }
    if let Some(branch) = branch.filter(|b| !b.is_empty()) {
        args.push(format!("BRANCH={}", branch));
    }

    Ok(Invocation {
        program: tool.to_string(),
        args,
    })
}

/// Ask the build tool whether `target` exists without running it (`make -n <target>`).
pub async fn dry_run(
    tool: &str,
    flag: &str,
    target: &str,
    cwd: &Path,
    timeout: Duration,
) -> Result<(), RunError> {
    validate_target_name(target)?;

    let mut cmd = Command::new(tool);
    cmd.arg(flag).arg(target).current_dir(cwd);

    match run_captured(cmd, timeout).await {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            Err(RunError::InvalidTarget {
                target: target.to_string(),
                reason: if stderr.is_empty() {
                    format!("{} {} exited with {}", tool, flag, out.status)
                } else {
                    stderr
                },
            })
        }
        Err(CaptureError::Spawn(e)) => Err(RunError::TargetCheckFailed(format!(
            "could not run '{}': {}",
            tool, e
        ))),
        Err(CaptureError::TimedOut) => Err(RunError::TargetCheckFailed(format!(
            "'{} {} {}' timed out after {}s",
            tool,
            flag,
            target,
            timeout.as_secs()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_invocation_without_tags() {
        let inv = build_invocation("make", "acceptance", &[], None).unwrap();
        assert_eq!(inv.program, "make");
        assert_eq!(inv.args, vec!["acceptance".to_string()]);
    }

    #[test]
    fn test_invocation_with_tags_and_branch() {
        let tags = vec!["smoke".to_string(), "@checkout".to_string(), " ".to_string()];
        let inv = build_invocation("make", "test", &tags, Some("release/2")).unwrap();
        assert_eq!(
            inv.args,
            vec![
                "test".to_string(),
                "TAGS=@smoke and @checkout".to_string(),
                "BRANCH=release/2".to_string(),
            ]
        );
        assert_eq!(
            inv.to_string(),
            "make test 'TAGS=@smoke and @checkout' BRANCH=release/2"
        );
    }

    #[test]
    fn test_rejects_bad_targets_and_tags() {
        assert!(build_invocation("make", "-f /etc/passwd", &[], None).is_err());
        assert!(build_invocation("make", "test; rm -rf /", &[], None).is_err());
        assert!(build_invocation("make", "", &[], None).is_err());
        let err = build_invocation("make", "test", &["@a or @b".to_string()], None).unwrap_err();
        assert!(matches!(err, RunError::InvalidTag(_)));
    }

    #[test]
    fn test_find_manifest() {
        let dir = TempDir::new().unwrap();
        let names = vec!["Makefile".to_string(), "GNUmakefile".to_string()];
        assert_eq!(find_manifest(dir.path(), &names), None);

        std::fs::write(dir.path().join("GNUmakefile"), "test:\n\ttrue\n").unwrap();
        assert_eq!(
            find_manifest(dir.path(), &names),
            Some(dir.path().join("GNUmakefile"))
        );
    }

    #[tokio::test]
    async fn test_dry_run_with_missing_tool() {
        let dir = TempDir::new().unwrap();
        let err = dry_run("/no/such/make", "-n", "test", dir.path(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::TargetCheckFailed(_)));
    }

    #[tokio::test]
    #[ignore] // Requires make
    async fn test_dry_run_with_make() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Makefile"), "test:\n\t@echo running\n").unwrap();

        dry_run("make", "-n", "test", dir.path(), Duration::from_secs(30))
            .await
            .unwrap();
        let err = dry_run("make", "-n", "nope", dir.path(), Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::InvalidTarget { .. }));
    }
}
