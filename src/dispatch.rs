//! Run requests: resolve project defaults, record a pending run, hand it to the executor.

use crate::executor::source::{resolve_repository_url, validate_branch};
use crate::executor::target::{tag_expression, validate_target_name};
use crate::executor::{Executor, RunError};
use crate::storage::{NewRun, ProjectStore, Run, RunStore, StoreError};
use anyhow::Result;
use serde::Deserialize;
use tracing::info;

/// Body of a run request. Omitted fields fall back to the project's settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunRequest {
    pub project_id: String,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Clone)]
pub struct Dispatcher {
    projects: ProjectStore,
    runs: RunStore,
    executor: Executor,
    default_branch: String,
    repo_url_template: String,
}

impl Dispatcher {
    pub fn new(
        projects: ProjectStore,
        runs: RunStore,
        executor: Executor,
        default_branch: impl Into<String>,
        repo_url_template: impl Into<String>,
    ) -> Self {
        Self {
            projects,
            runs,
            executor,
            default_branch: default_branch.into(),
            repo_url_template: repo_url_template.into(),
        }
    }

    /// Validate and persist the run as `pending` without starting it.
    pub fn prepare(&self, req: RunRequest) -> Result<Run> {
        let project = self
            .projects
            .get_project(&req.project_id)?
            .ok_or_else(|| StoreError::NotFound {
                kind: "project",
                id: req.project_id.clone(),
            })?;

        let repository = non_empty(req.repository).unwrap_or(project.repository);
        let branch = non_empty(req.branch).unwrap_or_else(|| self.default_branch.clone());
        let target = non_empty(req.target).unwrap_or(project.default_target);
        let tags: Vec<String> = req
            .tags
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        resolve_repository_url(&repository, &self.repo_url_template).map_err(invalid("repository"))?;
        validate_branch(&branch).map_err(invalid("branch"))?;
        validate_target_name(&target).map_err(invalid("target"))?;
        tag_expression(&tags).map_err(invalid("tags"))?;

        let run = self.runs.create_run(NewRun {
            project_id: project.id,
            repository,
            tags,
            branch,
            target,
        })?;
        info!(run_id = %run.id, project = %run.project_id, "run created");
        Ok(run)
    }

    /// Create the run and start it in the background; returns the `pending` record.
    pub fn request(&self, req: RunRequest) -> Result<Run> {
        let run = self.prepare(req)?;
        self.executor.submit(run.clone());
        Ok(run)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn invalid(field: &'static str) -> impl Fn(RunError) -> StoreError {
    move |e| StoreError::Invalid {
        field,
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use crate::logbuf::MemoryLogStore;
    use crate::storage::{open_in_memory, Project, RunStatus};
    use std::sync::Arc;
    use std::time::Duration;

    fn dispatcher() -> Dispatcher {
        let pool = open_in_memory().unwrap();
        let projects = ProjectStore::new(pool.clone());
        projects
            .upsert_project(&Project {
                id: "checkout".to_string(),
                name: "Checkout".to_string(),
                description: String::new(),
                color: "#00ff00".to_string(),
                repository: "acme/checkout-tests".to_string(),
                default_target: "acceptance".to_string(),
                tags: vec!["@smoke".to_string()],
            })
            .unwrap();
        let runs = RunStore::new(pool);
        let executor = Executor::new(
            runs.clone(),
            Arc::new(MemoryLogStore::new(100)),
            ExecutorConfig::default(),
            Duration::from_secs(60),
        );
        Dispatcher::new(projects, runs, executor, "main", "https://github.com/{repo}.git")
    }

    #[test]
    fn test_project_defaults_fill_gaps() {
        let d = dispatcher();
        let run = d
            .prepare(RunRequest {
                project_id: "checkout".to_string(),
                tags: Some(vec![" @smoke ".to_string(), "".to_string()]),
                branch: Some("  ".to_string()),
                ..RunRequest::default()
            })
            .unwrap();

        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.repository, "acme/checkout-tests");
        assert_eq!(run.branch, "main");
        assert_eq!(run.target, "acceptance");
        assert_eq!(run.tags, vec!["@smoke".to_string()]);
    }

    #[test]
    fn test_overrides_win() {
        let d = dispatcher();
        let run = d
            .prepare(RunRequest {
                project_id: "checkout".to_string(),
                repository: Some("acme/fork".to_string()),
                branch: Some("release/1".to_string()),
                target: Some("smoke".to_string()),
                tags: None,
            })
            .unwrap();
        assert_eq!(run.repository, "acme/fork");
        assert_eq!(run.branch, "release/1");
        assert_eq!(run.target, "smoke");
        assert!(run.tags.is_empty());
    }

    #[test]
    fn test_unknown_project_and_bad_input() {
        let d = dispatcher();
        let err = d
            .prepare(RunRequest {
                project_id: "ghost".to_string(),
                ..RunRequest::default()
            })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::NotFound { .. })
        ));

        let err = d
            .prepare(RunRequest {
                project_id: "checkout".to_string(),
                target: Some("-f".to_string()),
                ..RunRequest::default()
            })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::Invalid { field: "target", .. })
        ));
        assert!(d.runs.list_runs(None, 10).unwrap().is_empty());
    }
}
