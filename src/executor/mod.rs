//! Run executor: drives one run from `pending` to a terminal status.
//!
//! Each run gets its own workspace, a shallow checkout, a target check, one
//! streamed invocation of the build tool and a result discovery pass. Any
//! fatal step fails the run with an error; the workspace is always removed and
//! the run's log buffer is evicted after the retention window.

pub mod process;
pub mod results;
pub mod source;
pub mod target;
pub mod workspace;

use crate::config::ExecutorConfig;
use crate::logbuf::{schedule_eviction, LogStore};
use crate::storage::{Run, RunPatch, RunStatus, RunStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub use self::results::{discover, Discovery};
pub use self::source::{GitFetcher, SourceFetcher};
pub use self::workspace::Workspace;

/// Fatal per-run failures. The `Display` text becomes the run's `error` column.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to prepare workspace {path}: {source}")]
    Workspace {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid repository identifier '{0}'")]
    InvalidRepository(String),

    #[error("invalid branch name '{0}'")]
    InvalidBranch(String),

    #[error("repository clone failed: {0}")]
    CloneFailed(String),

    #[error("repository clone timed out after {0}s")]
    CloneTimedOut(u64),

    #[error("no build manifest at repository root (expected one of: {expected})")]
    MissingManifest { expected: String },

    #[error("invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("invalid tag '{0}'")]
    InvalidTag(String),

    #[error("target check failed: {0}")]
    TargetCheckFailed(String),

    #[error("test execution timed out after {0}s")]
    ExecutionTimedOut(u64),

    #[error("run store error: {0}")]
    Store(String),
}

impl RunError {
    fn store(err: anyhow::Error) -> Self {
        RunError::Store(format!("{:#}", err))
    }
}

#[derive(Clone)]
pub struct Executor {
    runs: RunStore,
    logs: Arc<dyn LogStore>,
    fetcher: Arc<dyn SourceFetcher>,
    config: Arc<ExecutorConfig>,
    log_retention: Duration,
}

impl Executor {
    pub fn new(
        runs: RunStore,
        logs: Arc<dyn LogStore>,
        config: ExecutorConfig,
        log_retention: Duration,
    ) -> Self {
        let fetcher = Arc::new(GitFetcher::new(
            config.git_path.clone(),
            config.repo_url_template.clone(),
            config.clone_timeout(),
        ));
        Self {
            runs,
            logs,
            fetcher,
            config: Arc::new(config),
            log_retention,
        }
    }

    /// Swap the checkout strategy (local mirrors, tests).
    pub fn with_fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Start `run` in the background and return immediately.
    ///
    /// The returned handle belongs to a supervisor that fails the run if the
    /// executor task panics, then does the cleanup `execute` never reached;
    /// callers are free to drop it.
    pub fn submit(&self, run: Run) -> JoinHandle<()> {
        let executor = self.clone();
        let supervisor = self.clone();
        let run_id = run.id.clone();
        let started = Instant::now();

        let task = tokio::spawn(async move {
            executor.execute(run).await;
        });

        tokio::spawn(async move {
            if let Err(e) = task.await {
                error!(run_id = %run_id, error = %e, "executor task aborted");
                let mut patch = RunPatch::finished(RunStatus::Failed, elapsed_ms(started));
                patch.error = Some(format!("executor task aborted: {}", e));
                if let Err(e) = supervisor.runs.update_run(&run_id, patch) {
                    error!(run_id = %run_id, error = %e, "failed to record aborted run");
                }
                Workspace::for_run(&supervisor.config.workspace_root, &run_id)
                    .remove()
                    .await;
                schedule_eviction(supervisor.logs.clone(), run_id, supervisor.log_retention);
            }
        })
    }

    /// Drive `run` to completion. Returns the terminal run as persisted, or
    /// `None` when the final write did not succeed.
    pub async fn execute(&self, run: Run) -> Option<Run> {
        let started = Instant::now();
        let workspace = Workspace::for_run(&self.config.workspace_root, &run.id);

        let patch = match self.drive(&run, &workspace, started).await {
            Ok(patch) => patch,
            Err(e) => {
                error!(run_id = %run.id, error = %e, "run failed");
                self.log(&run.id, format!("[error] {}", e));
                let mut patch = RunPatch::finished(RunStatus::Failed, elapsed_ms(started));
                patch.error = Some(e.to_string());
                patch
            }
        };

        let finished = match self.runs.update_run(&run.id, patch) {
            Ok(run) => {
                info!(
                    run_id = %run.id,
                    status = %run.status,
                    passed = run.summary.passed,
                    failed = run.summary.failed,
                    skipped = run.summary.skipped,
                    duration_ms = run.duration_ms.unwrap_or_default(),
                    "run finished"
                );
                Some(run)
            }
            Err(e) => {
                error!(run_id = %run.id, error = %e, "failed to persist final run state");
                None
            }
        };

        workspace.remove().await;
        schedule_eviction(self.logs.clone(), run.id.clone(), self.log_retention);
        finished
    }

    async fn drive(
        &self,
        run: &Run,
        workspace: &Workspace,
        started: Instant,
    ) -> Result<RunPatch, RunError> {
        let cfg = &self.config;

        self.runs
            .update_run(&run.id, RunPatch::status(RunStatus::Running))
            .map_err(RunError::store)?;
        info!(run_id = %run.id, project = %run.project_id, target = %run.target, "run started");
        self.log(
            &run.id,
            format!(
                "Starting run {} for project {} (target '{}')",
                run.id, run.project_id, run.target
            ),
        );

        workspace.create().await?;
        let checkout = workspace.checkout_dir();

        self.log(&run.id, format!("Cloning {} at {}", run.repository, run.branch));
        self.fetcher
            .fetch(&run.repository, &run.branch, &checkout)
            .await?;

        if target::find_manifest(&checkout, &cfg.manifest_names).is_none() {
            return Err(RunError::MissingManifest {
                expected: cfg.manifest_names.join(", "),
            });
        }
        target::dry_run(
            &cfg.build_tool,
            &cfg.dry_run_flag,
            &run.target,
            &checkout,
            cfg.dry_run_timeout(),
        )
        .await?;

        let invocation =
            target::build_invocation(&cfg.build_tool, &run.target, &run.tags, Some(&run.branch))?;
        self.log(&run.id, format!("$ {}", invocation));

        let outcome = process::run_streaming(
            invocation.command(&checkout),
            cfg.execution_timeout(),
            self.logs.clone(),
            &run.id,
        )
        .await;
        if outcome.timed_out {
            self.log(
                &run.id,
                format!(
                    "[error] Test command killed after {}s",
                    cfg.execution_timeout_sec
                ),
            );
        } else {
            self.log(&run.id, format!("Test command exited with code {}", outcome.exit_code));
        }

        let root = checkout.clone();
        let exit_code = outcome.exit_code;
        let discovery = tokio::task::spawn_blocking(move || discover(&root, exit_code))
            .await
            .unwrap_or_else(|e| {
                warn!(run_id = %run.id, error = %e, "result discovery task failed");
                Discovery::fallback(exit_code)
            });
        match &discovery.source {
            Some(path) => self.log(
                &run.id,
                format!(
                    "Parsed {} report {}",
                    discovery.format,
                    path.strip_prefix(&checkout).unwrap_or(path).display()
                ),
            ),
            None => self.log(&run.id, "No report file found; using exit code".to_string()),
        }

        // A storage failure here is logged only; the computed status stands.
        if let Err(e) = self
            .runs
            .append_features(&run.id, &discovery.report.features)
        {
            error!(run_id = %run.id, error = %e, "failed to persist features");
            self.log(&run.id, format!("[error] failed to persist features: {:#}", e));
        }

        let summary = discovery.report.summary;
        let status = if summary.failed > 0 || outcome.timed_out {
            RunStatus::Failed
        } else {
            RunStatus::Passed
        };

        let mut patch = RunPatch::finished(status, elapsed_ms(started));
        patch.summary = Some(summary);
        patch.exit_code = Some(outcome.exit_code);
        patch.report_format = Some(discovery.format);
        if outcome.timed_out {
            patch.error = Some(RunError::ExecutionTimedOut(cfg.execution_timeout_sec).to_string());
        }
        Ok(patch)
    }

    fn log(&self, run_id: &str, line: String) {
        self.logs.append(run_id, line);
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u64::MAX as u128) as u64
}
