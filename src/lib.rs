//! bddrunner -- runs BDD test suites from git repositories and normalizes their results.
//!
//! A run request records a `pending` run and returns immediately; the executor
//! clones the project's repository, invokes its build target, streams output
//! into the log buffer and turns whatever report the suite produced (Cucumber
//! JSON, JUnit XML, or just an exit code) into features and scenarios.

pub mod api;
pub mod config;
pub mod dispatch;
pub mod executor;
pub mod locator;
pub mod logbuf;
pub mod report;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::executor::Executor;
use crate::logbuf::{LogStore, MemoryLogStore};
use crate::storage::{Pool, ProjectStore, RunStore};

/// Stores, log buffer, executor and dispatcher wired from one config.
#[derive(Clone)]
pub struct Services {
    pub projects: ProjectStore,
    pub runs: RunStore,
    pub logs: Arc<dyn LogStore>,
    pub executor: Executor,
    pub dispatcher: Dispatcher,
}

impl Services {
    /// Build the services over `pool`, upserting the configured projects.
    pub fn new(config: &Config, pool: Pool) -> Result<Self> {
        let projects = ProjectStore::new(pool.clone());
        for project in &config.projects {
            projects
                .upsert_project(project)
                .with_context(|| format!("Failed to seed project '{}'", project.id))?;
        }
        if !config.projects.is_empty() {
            tracing::info!(count = config.projects.len(), "seeded projects from config");
        }

        let runs = RunStore::new(pool);
        let logs: Arc<dyn LogStore> = Arc::new(MemoryLogStore::new(config.logs.max_lines_per_run));
        let executor = Executor::new(
            runs.clone(),
            logs.clone(),
            config.executor.clone(),
            config.logs.retention(),
        );
        let dispatcher = Dispatcher::new(
            projects.clone(),
            runs.clone(),
            executor.clone(),
            config.executor.default_branch.clone(),
            config.executor.repo_url_template.clone(),
        );

        Ok(Self {
            projects,
            runs,
            logs,
            executor,
            dispatcher,
        })
    }

    pub fn app_state(&self) -> api::state::AppState {
        api::state::AppState {
            projects: self.projects.clone(),
            runs: self.runs.clone(),
            logs: self.logs.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

/// Start the bddrunner daemon: storage, executor and API server.
pub async fn serve(config: Config) -> Result<()> {
    // 1. Initialize Storage
    let db_path = config.storage.database_path.display().to_string();
    tracing::info!(%db_path, "Initializing database");
    let pool = storage::open_pool(&db_path)?;

    // 2. Wire executor and dispatcher
    let services = Services::new(&config, pool)?;
    tokio::fs::create_dir_all(&config.executor.workspace_root)
        .await
        .with_context(|| {
            format!(
                "Failed to create workspace root {}",
                config.executor.workspace_root.display()
            )
        })?;

    // 3. Start API Server
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", config.server.bind))?;
    let app = api::router(services.app_state(), config.server.permissive_cors);

    tracing::info!(%addr, "bddrunner listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
