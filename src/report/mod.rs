//! Canonical feature/scenario/step schema and the report parsers that produce it.
//!
//! Both supported report formats (Cucumber JSON and JUnit XML) normalize into
//! [`ParsedReport`]; everything downstream of discovery only ever sees this shape.

pub mod cucumber;
pub mod junit;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::cucumber::parse_cucumber;
pub use self::junit::parse_junit;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("invalid Cucumber JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid JUnit XML: {0}")]
    InvalidXml(String),
}

/// Which discovery path produced a run's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Cucumber,
    Junit,
    ExitCode,
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportFormat::Cucumber => write!(f, "cucumber"),
            ReportFormat::Junit => write!(f, "junit"),
            ReportFormat::ExitCode => write!(f, "exit_code"),
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cucumber" => Ok(ReportFormat::Cucumber),
            "junit" => Ok(ReportFormat::Junit),
            "exit_code" => Ok(ReportFormat::ExitCode),
            other => Err(format!("unknown report format '{}'", other)),
        }
    }
}

/// Status of a single step, as reported by the test tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
    Undefined,
    Pending,
    Ambiguous,
}

impl StepStatus {
    /// Map a raw status string; anything unrecognized counts as skipped.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "passed" => StepStatus::Passed,
            "failed" => StepStatus::Failed,
            "undefined" => StepStatus::Undefined,
            "pending" => StepStatus::Pending,
            "ambiguous" => StepStatus::Ambiguous,
            _ => StepStatus::Skipped,
        }
    }

    fn is_failure(self) -> bool {
        matches!(self, StepStatus::Failed | StepStatus::Ambiguous)
    }
}

/// Derived status of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    Skipped,
}

impl ScenarioStatus {
    /// `failed` if any step failed, else `skipped` if any step did not run, else `passed`.
    ///
    /// A scenario with no steps is `passed`.
    pub fn derive(steps: &[Step]) -> Self {
        if steps.iter().any(|s| s.status.is_failure()) {
            ScenarioStatus::Failed
        } else if steps.iter().any(|s| {
            matches!(
                s.status,
                StepStatus::Skipped | StepStatus::Undefined | StepStatus::Pending
            )
        }) {
            ScenarioStatus::Skipped
        } else {
            ScenarioStatus::Passed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub keyword: String,
    pub text: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub status: ScenarioStatus,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub scenarios: Vec<Scenario>,
}

/// Scenario counts for a run. `total` is maintained by [`Summary::record`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub total: u32,
}

impl Summary {
    pub fn record(&mut self, status: ScenarioStatus) {
        match status {
            ScenarioStatus::Passed => self.passed += 1,
            ScenarioStatus::Failed => self.failed += 1,
            ScenarioStatus::Skipped => self.skipped += 1,
        }
        self.total += 1;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedReport {
    pub features: Vec<Feature>,
    pub summary: Summary,
}

impl ParsedReport {
    /// Build a report from features, counting each scenario exactly once.
    pub fn from_features(features: Vec<Feature>) -> Self {
        let mut summary = Summary::default();
        for scenario in features.iter().flat_map(|f| f.scenarios.iter()) {
            summary.record(scenario.status);
        }
        Self { features, summary }
    }

    /// Single synthetic feature derived purely from a process exit code.
    pub fn from_exit_code(exit_code: i32) -> Self {
        let status = if exit_code == 0 {
            ScenarioStatus::Passed
        } else {
            ScenarioStatus::Failed
        };
        let scenario = Scenario {
            name: format!("Test target exited with code {}", exit_code),
            status,
            steps: Vec::new(),
            tags: Vec::new(),
            duration_ms: 0,
        };
        Self::from_features(vec![Feature {
            name: "Test Execution".to_string(),
            description: "No Cucumber JSON or JUnit XML report was found; result derived from the exit code."
                .to_string(),
            scenarios: vec![scenario],
        }])
    }

    pub fn scenario_count(&self) -> usize {
        self.features.iter().map(|f| f.scenarios.len()).sum()
    }
}
