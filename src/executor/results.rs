//! Result discovery: first parseable report, else the exit-code fallback.

use crate::locator::{self, LocatedReport};
use crate::report::{parse_cucumber, parse_junit, ParsedReport, ReportFormat};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Discovery {
    pub report: ParsedReport,
    pub format: ReportFormat,
    /// The report file used, if any.
    pub source: Option<PathBuf>,
}

impl Discovery {
    /// Synthetic single-scenario result derived from the exit code.
    pub fn fallback(exit_code: i32) -> Self {
        Self {
            report: ParsedReport::from_exit_code(exit_code),
            format: ReportFormat::ExitCode,
            source: None,
        }
    }
}

/// Walk candidates in preference order; a file that fails to parse is skipped.
pub fn discover(root: &Path, exit_code: i32) -> Discovery {
    for candidate in locator::candidates(root) {
        let path = candidate.path().to_path_buf();
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read report candidate");
                continue;
            }
        };

        let (parsed, format) = match candidate {
            LocatedReport::Cucumber(_) => (parse_cucumber(&text), ReportFormat::Cucumber),
            LocatedReport::Junit(_) => (parse_junit(&text), ReportFormat::Junit),
        };

        match parsed {
            Ok(report) => {
                info!(path = %path.display(), %format, scenarios = report.summary.total, "parsed report");
                return Discovery {
                    report,
                    format,
                    source: Some(path),
                };
            }
            Err(e) => warn!(path = %path.display(), error = %e, "report candidate did not parse"),
        }
    }

    Discovery::fallback(exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Summary;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_fallback_without_reports() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("README.md"), "hello").unwrap();

        let ok = discover(dir.path(), 0);
        assert_eq!(ok.format, ReportFormat::ExitCode);
        assert_eq!(ok.report.summary, Summary { passed: 1, failed: 0, skipped: 0, total: 1 });

        let bad = discover(dir.path(), 1);
        assert_eq!(bad.report.summary, Summary { passed: 0, failed: 1, skipped: 0, total: 1 });
        assert!(bad.source.is_none());
    }

    #[test]
    fn test_cucumber_wins_over_junit() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("cucumber.json"),
            r#"[{"name":"F","elements":[{"type":"scenario","name":"s","steps":[{"keyword":"Given","name":"x","result":{"status":"passed","duration":1}}]}]}]"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("junit.xml"),
            r#"<testsuite name="S"><testcase name="a"><failure/></testcase></testsuite>"#,
        )
        .unwrap();

        let found = discover(dir.path(), 1);
        assert_eq!(found.format, ReportFormat::Cucumber);
        assert_eq!(found.report.summary.passed, 1);
        assert_eq!(found.source, Some(dir.path().join("cucumber.json")));
    }

    #[test]
    fn test_unparseable_candidate_falls_through() {
        let dir = TempDir::new().unwrap();
        // Passes the sniff (array whose first element has `elements`) but not the schema.
        fs::write(dir.path().join("a.json"), r#"[{"elements": 5}]"#).unwrap();
        fs::write(dir.path().join("broken.xml"), "<testsuite><testcase></testsuite>").unwrap();
        fs::write(
            dir.path().join("good.xml"),
            r#"<testsuites><testsuite name="S"><testcase name="a"/></testsuite></testsuites>"#,
        )
        .unwrap();

        let found = discover(dir.path(), 1);
        assert_eq!(found.format, ReportFormat::Junit);
        assert_eq!(found.source, Some(dir.path().join("good.xml")));
        assert_eq!(found.report.summary.passed, 1);
    }
}
