use super::{format_ts, json_column, parse_ts, Pool, StoreError};
use crate::report::{Feature, ReportFormat, Scenario, Summary};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound for `list_runs`.
pub const MAX_LIST_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Passed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Passed | RunStatus::Failed)
    }

    /// Status only moves forward: pending -> running -> passed|failed.
    /// Re-applying the current status is allowed so patches stay idempotent.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            RunStatus::Pending => true,
            RunStatus::Running => next.is_terminal(),
            RunStatus::Passed | RunStatus::Failed => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "passed" => Ok(RunStatus::Passed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

impl ToSql for RunStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RunStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// One execution attempt of a project's test target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub project_id: String,
    pub repository: String,
    pub tags: Vec<String>,
    pub branch: String,
    pub target: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub summary: Summary,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub report_format: Option<ReportFormat>,
}

/// Fields supplied when a run is requested; everything else starts empty.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub project_id: String,
    pub repository: String,
    pub tags: Vec<String>,
    pub branch: String,
    pub target: String,
}

/// Field patch applied by the executor. `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub summary: Option<Summary>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub report_format: Option<ReportFormat>,
}

impl RunPatch {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Terminal patch stamped with the completion time.
    pub fn finished(status: RunStatus, duration_ms: u64) -> Self {
        Self {
            status: Some(status),
            completed_at: Some(Utc::now()),
            duration_ms: Some(duration_ms),
            ..Self::default()
        }
    }

    fn apply(self, run: &mut Run) {
        if let Some(status) = self.status {
            run.status = status;
        }
        if self.completed_at.is_some() {
            run.completed_at = self.completed_at;
        }
        if self.duration_ms.is_some() {
            run.duration_ms = self.duration_ms;
        }
        if let Some(summary) = self.summary {
            run.summary = summary;
        }
        if self.error.is_some() {
            run.error = self.error;
        }
        if self.exit_code.is_some() {
            run.exit_code = self.exit_code;
        }
        if self.report_format.is_some() {
            run.report_format = self.report_format;
        }
    }
}

/// A persisted feature; scenarios live in an embedded JSON blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFeature {
    pub id: i64,
    pub run_id: String,
    pub name: String,
    pub description: String,
    pub scenarios: Vec<Scenario>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: Run,
    pub features: Vec<StoredFeature>,
}

const RUN_COLUMNS: &str = "id, project_id, repository, tags_json, branch, target, status, \
    created_at, completed_at, duration_ms, passed, failed, skipped, total, error, exit_code, report_format";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<Run> {
    let tags_json: String = row.get(3)?;
    let created_at: String = row.get(7)?;
    let completed_at: Option<String> = row.get(8)?;
    let duration_ms: Option<i64> = row.get(9)?;
    let report_format: Option<String> = row.get(16)?;

    Ok(Run {
        id: row.get(0)?,
        project_id: row.get(1)?,
        repository: row.get(2)?,
        tags: json_column(3, &tags_json)?,
        branch: row.get(4)?,
        target: row.get(5)?,
        status: row.get(6)?,
        created_at: parse_ts(7, &created_at)?,
        completed_at: completed_at.map(|s| parse_ts(8, &s)).transpose()?,
        duration_ms: duration_ms.map(|d| d.max(0) as u64),
        summary: Summary {
            passed: row.get(10)?,
            failed: row.get(11)?,
            skipped: row.get(12)?,
            total: row.get(13)?,
        },
        error: row.get(14)?,
        exit_code: row.get(15)?,
        report_format: report_format.and_then(|f| f.parse().ok()),
    })
}

#[derive(Clone)]
pub struct RunStore {
    pool: Pool,
}

impl RunStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Record a new run in `pending` state under a fresh id.
    pub fn create_run(&self, new: NewRun) -> Result<Run> {
        let run = Run {
            id: Uuid::new_v4().to_string(),
            project_id: new.project_id,
            repository: new.repository,
            tags: new.tags,
            branch: new.branch,
            target: new.target,
            status: RunStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            summary: Summary::default(),
            error: None,
            exit_code: None,
            report_format: None,
        };

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO runs (id, project_id, repository, tags_json, branch, target, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.id,
                run.project_id,
                run.repository,
                serde_json::to_string(&run.tags)?,
                run.branch,
                run.target,
                run.status,
                format_ts(&run.created_at),
            ],
        )
        .context("Failed to insert run")?;

        Ok(run)
    }

    /// Apply a field patch. Rejects any move out of a terminal status or backwards.
    pub fn update_run(&self, id: &str, patch: RunPatch) -> Result<Run> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let mut run = tx
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![id],
                run_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound {
                kind: "run",
                id: id.to_string(),
            })?;

        if let Some(next) = patch.status {
            if !run.status.can_transition_to(next) {
                return Err(StoreError::IllegalTransition {
                    id: id.to_string(),
                    from: run.status,
                    to: next,
                }
                .into());
            }
        }

        patch.apply(&mut run);
        let s = run.summary;
        tx.execute(
            "UPDATE runs SET status = ?2, completed_at = ?3, duration_ms = ?4,
                passed = ?5, failed = ?6, skipped = ?7, total = ?8,
                error = ?9, exit_code = ?10, report_format = ?11
             WHERE id = ?1",
            params![
                run.id,
                run.status,
                run.completed_at.as_ref().map(format_ts),
                run.duration_ms.map(|d| d as i64),
                s.passed,
                s.failed,
                s.skipped,
                s.passed + s.failed + s.skipped,
                run.error,
                run.exit_code,
                run.report_format.map(|f| f.to_string()),
            ],
        )?;
        tx.commit()?;

        run.summary.total = s.passed + s.failed + s.skipped;
        Ok(run)
    }

    /// Bulk-insert a run's features in one transaction.
    pub fn append_features(&self, run_id: &str, features: &[Feature]) -> Result<usize> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let start: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM features WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO features (run_id, position, name, description, scenarios_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (i, feature) in features.iter().enumerate() {
                stmt.execute(params![
                    run_id,
                    start + i as i64,
                    feature.name,
                    feature.description,
                    serde_json::to_string(&feature.scenarios)?,
                ])
                .with_context(|| format!("Failed to insert feature for run {}", run_id))?;
            }
        }

        tx.commit()?;
        Ok(features.len())
    }

    pub fn find_run(&self, id: &str) -> Result<Option<Run>> {
        let conn = self.pool.get()?;
        let run = conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![id],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    /// A run joined with its features, in insertion order.
    pub fn get_run(&self, id: &str) -> Result<Option<RunDetail>> {
        let conn = self.pool.get()?;
        let Some(run) = conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![id],
                run_from_row,
            )
            .optional()?
        else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT id, run_id, name, description, scenarios_json
             FROM features WHERE run_id = ?1 ORDER BY position, id",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            let scenarios_json: String = row.get(4)?;
            Ok(StoredFeature {
                id: row.get(0)?,
                run_id: row.get(1)?,
                name: row.get(2)?,
                description: row.get(3)?,
                scenarios: json_column(4, &scenarios_json)?,
            })
        })?;

        let mut features = Vec::new();
        for r in rows {
            features.push(r?);
        }
        Ok(Some(RunDetail { run, features }))
    }

    /// Newest first, optionally for one project. `limit` is clamped to `1..=MAX_LIST_LIMIT`.
    pub fn list_runs(&self, project_id: Option<&str>, limit: usize) -> Result<Vec<Run>> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT) as i64;
        let conn = self.pool.get()?;

        let mut list = Vec::new();
        match project_id {
            Some(project_id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM runs WHERE project_id = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                    RUN_COLUMNS
                ))?;
                let rows = stmt.query_map(params![project_id, limit], run_from_row)?;
                for r in rows {
                    list.push(r?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM runs ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                    RUN_COLUMNS
                ))?;
                let rows = stmt.query_map(params![limit], run_from_row)?;
                for r in rows {
                    list.push(r?);
                }
            }
        }
        Ok(list)
    }
}
