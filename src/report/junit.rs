//! JUnit XML normalization.
//!
//! Producers disagree on the document shape: some write a single `<testsuite>`,
//! some concatenate several `<testsuite>` roots, most wrap them in `<testsuites>`.
//! The XML is read into a [`SuiteDocument`] first, and only the flattened suite
//! list is turned into canonical features.

use super::{Feature, ParsedReport, ReportError, Scenario, ScenarioStatus, Step, StepStatus};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

const DEFAULT_FAILURE_MESSAGE: &str = "Test failed";

/// The three document shapes seen in the wild.
#[derive(Debug)]
pub enum SuiteDocument {
    Single(Suite),
    Many(Vec<Suite>),
    Wrapped(Vec<Suite>),
}

impl SuiteDocument {
    pub fn into_suites(self) -> Vec<Suite> {
        match self {
            SuiteDocument::Single(suite) => vec![suite],
            SuiteDocument::Many(suites) | SuiteDocument::Wrapped(suites) => suites,
        }
    }
}

#[derive(Debug, Default)]
pub struct Suite {
    pub name: String,
    pub cases: Vec<TestCase>,
}

#[derive(Debug)]
pub struct TestCase {
    pub name: String,
    pub time_ms: u64,
    pub outcome: CaseOutcome,
}

#[derive(Debug, PartialEq)]
pub enum CaseOutcome {
    Passed,
    Failed(String),
    Skipped,
}

/// Parse a JUnit XML document into the canonical report.
pub fn parse_junit(xml: &str) -> Result<ParsedReport, ReportError> {
    let suites = read_document(xml)?.into_suites();
    Ok(ParsedReport::from_features(
        suites.into_iter().map(suite_to_feature).collect(),
    ))
}

fn suite_to_feature(suite: Suite) -> Feature {
    Feature {
        name: suite.name,
        description: String::new(),
        scenarios: suite.cases.into_iter().map(case_to_scenario).collect(),
    }
}

fn case_to_scenario(case: TestCase) -> Scenario {
    let (status, steps) = match case.outcome {
        CaseOutcome::Passed => (ScenarioStatus::Passed, Vec::new()),
        CaseOutcome::Skipped => (ScenarioStatus::Skipped, Vec::new()),
        // One synthetic step so failures render like BDD steps.
        CaseOutcome::Failed(error) => (
            ScenarioStatus::Failed,
            vec![Step {
                keyword: "Then".to_string(),
                text: case.name.clone(),
                status: StepStatus::Failed,
                duration_ms: case.time_ms,
                error: Some(error),
            }],
        ),
    };
    Scenario {
        name: case.name,
        status,
        steps,
        tags: Vec::new(),
        duration_ms: case.time_ms,
    }
}

/// In-progress `<failure>`/`<error>` element whose text may still follow.
struct PendingFailure {
    message: Option<String>,
    text: String,
}

impl PendingFailure {
    fn finish(self) -> String {
        self.message
            .filter(|m| !m.trim().is_empty())
            .or_else(|| Some(self.text.trim().to_string()).filter(|t| !t.is_empty()))
            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string())
    }
}

#[derive(Default)]
struct DocumentBuilder {
    wrapped: bool,
    top_level_suites: usize,
    // Suites in document (opening) order; nested suites are flattened.
    suites: Vec<Suite>,
    open_suites: Vec<usize>,
    case: Option<TestCase>,
    failure: Option<PendingFailure>,
}

impl DocumentBuilder {
    fn open(&mut self, e: &BytesStart<'_>, empty: bool) {
        match e.local_name().as_ref() {
            b"testsuites" => {
                if self.open_suites.is_empty() {
                    self.wrapped = true;
                }
            }
            b"testsuite" => {
                if self.open_suites.is_empty() {
                    self.top_level_suites += 1;
                }
                self.suites.push(Suite {
                    name: attr(e, b"name").unwrap_or_default(),
                    cases: Vec::new(),
                });
                if !empty {
                    self.open_suites.push(self.suites.len() - 1);
                }
            }
            b"testcase" => {
                let case = TestCase {
                    name: attr(e, b"name").unwrap_or_default(),
                    time_ms: attr(e, b"time").map(|t| seconds_to_millis(&t)).unwrap_or(0),
                    outcome: CaseOutcome::Passed,
                };
                if empty {
                    self.push_case(case);
                } else {
                    self.case = Some(case);
                }
            }
            b"failure" | b"error" => {
                if self.case.is_none() {
                    return;
                }
                let pending = PendingFailure {
                    message: attr(e, b"message"),
                    text: String::new(),
                };
                if empty {
                    self.record_failure(pending.finish());
                } else {
                    self.failure = Some(pending);
                }
            }
            b"skipped" => {
                if let Some(case) = self.case.as_mut() {
                    if case.outcome == CaseOutcome::Passed {
                        case.outcome = CaseOutcome::Skipped;
                    }
                }
            }
            _ => {}
        }
    }

    fn close(&mut self, local_name: &[u8]) {
        match local_name {
            b"testsuite" => {
                self.open_suites.pop();
            }
            b"testcase" => {
                if let Some(case) = self.case.take() {
                    self.push_case(case);
                }
            }
            b"failure" | b"error" => {
                if let Some(pending) = self.failure.take() {
                    self.record_failure(pending.finish());
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(pending) = self.failure.as_mut() {
            pending.text.push_str(text);
        }
    }

    fn record_failure(&mut self, message: String) {
        if let Some(case) = self.case.as_mut() {
            if !matches!(case.outcome, CaseOutcome::Failed(_)) {
                case.outcome = CaseOutcome::Failed(message);
            }
        }
    }

    fn push_case(&mut self, case: TestCase) {
        // Test cases outside any suite have nowhere to go.
        if let Some(&idx) = self.open_suites.last() {
            self.suites[idx].cases.push(case);
        }
    }

    fn finish(self) -> SuiteDocument {
        if self.wrapped {
            SuiteDocument::Wrapped(self.suites)
        } else if self.top_level_suites == 1 && self.suites.len() == 1 {
            let mut suites = self.suites;
            SuiteDocument::Single(suites.remove(0))
        } else {
            SuiteDocument::Many(self.suites)
        }
    }
}

/// Read the XML into its source shape without interpreting it further.
pub fn read_document(xml: &str) -> Result<SuiteDocument, ReportError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut builder = DocumentBuilder::default();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => builder.open(&e, false),
            Ok(Event::Empty(e)) => builder.open(&e, true),
            Ok(Event::End(e)) => builder.close(e.local_name().as_ref()),
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| ReportError::InvalidXml(e.to_string()))?;
                builder.text(&text);
            }
            Ok(Event::CData(t)) => {
                let raw = t.into_inner();
                builder.text(&String::from_utf8_lossy(&raw));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ReportError::InvalidXml(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    Ok(builder.finish())
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// `time="1.25"` seconds to whole milliseconds; anything unparseable is zero.
///
/// A single comma with no '.' is a decimal comma (`1,5`); otherwise commas group thousands.
fn seconds_to_millis(raw: &str) -> u64 {
    let raw = raw.trim();
    let cleaned: String = if !raw.contains('.') && raw.matches(',').count() == 1 {
        raw.replace(',', ".")
    } else {
        raw.chars().filter(|c| *c != ',').collect()
    };
    match cleaned.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => (secs * 1000.0).round() as u64,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Summary;

    #[test]
    fn test_wrapped_suite_with_failure() {
        let xml = r#"<testsuites><testsuite name="S"><testcase name="a"/><testcase name="b"><failure message="boom"/></testcase></testsuite></testsuites>"#;
        let report = parse_junit(xml).unwrap();

        assert_eq!(report.features.len(), 1);
        assert_eq!(report.features[0].name, "S");
        assert_eq!(report.features[0].scenarios.len(), 2);
        assert_eq!(
            report.summary,
            Summary { passed: 1, failed: 1, skipped: 0, total: 2 }
        );

        let a = &report.features[0].scenarios[0];
        assert!(a.steps.is_empty());

        let b = &report.features[0].scenarios[1];
        assert_eq!(b.status, ScenarioStatus::Failed);
        assert_eq!(b.steps.len(), 1);
        assert_eq!(b.steps[0].keyword, "Then");
        assert_eq!(b.steps[0].text, "b");
        assert_eq!(b.steps[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_all_three_shapes_agree() {
        let suite_a = r#"<testsuite name="A"><testcase name="a1"/><testcase name="a2"><skipped/></testcase></testsuite>"#;
        let suite_b = r#"<testsuite name="B"><testcase name="b1"><failure>trace</failure></testcase></testsuite>"#;

        let single = read_document(suite_a).unwrap();
        assert!(matches!(single, SuiteDocument::Single(_)));

        let many_xml = format!("{}{}", suite_a, suite_b);
        let many = read_document(&many_xml).unwrap();
        assert!(matches!(many, SuiteDocument::Many(ref s) if s.len() == 2));

        let wrapped_xml = format!("<?xml version=\"1.0\"?><testsuites>{}{}</testsuites>", suite_a, suite_b);
        let wrapped = read_document(&wrapped_xml).unwrap();
        assert!(matches!(wrapped, SuiteDocument::Wrapped(ref s) if s.len() == 2));

        let from_many = parse_junit(&many_xml).unwrap();
        let from_wrapped = parse_junit(&wrapped_xml).unwrap();
        assert_eq!(from_many, from_wrapped);
        assert_eq!(from_many.features.len(), 2);
        assert_eq!(from_many.scenario_count(), 3);

        let wrapped_single = parse_junit(&format!("<testsuites>{}</testsuites>", suite_a)).unwrap();
        assert_eq!(parse_junit(suite_a).unwrap(), wrapped_single);
    }

    #[test]
    fn test_failure_text_and_default_message() {
        let xml = r#"<testsuite name="S">
            <testcase name="text"><failure type="AssertionError"><![CDATA[expected 1 got 2]]></failure></testcase>
            <testcase name="bare"><failure/></testcase>
            <testcase name="errored"><error message="NullPointerException"/></testcase>
        </testsuite>"#;
        let report = parse_junit(xml).unwrap();
        let scenarios = &report.features[0].scenarios;
        assert_eq!(scenarios[0].steps[0].error.as_deref(), Some("expected 1 got 2"));
        assert_eq!(scenarios[1].steps[0].error.as_deref(), Some(DEFAULT_FAILURE_MESSAGE));
        assert_eq!(scenarios[2].steps[0].error.as_deref(), Some("NullPointerException"));
        for s in scenarios {
            assert_eq!(s.steps.len(), 1);
            assert!(!s.steps[0].error.as_deref().unwrap_or("").is_empty());
        }
        assert_eq!(report.summary.failed, 3);
    }

    #[test]
    fn test_skipped_and_times() {
        let xml = r#"<testsuite name="S">
            <testcase name="slow" time="1.2345"/>
            <testcase name="skip" time="abc"><skipped/></testcase>
            <testcase name="big" time="1,234.5"/>
        </testsuite>"#;
        let report = parse_junit(xml).unwrap();
        let scenarios = &report.features[0].scenarios;
        assert_eq!(scenarios[0].duration_ms, 1235);
        assert_eq!(scenarios[1].status, ScenarioStatus::Skipped);
        assert_eq!(scenarios[1].duration_ms, 0);
        assert!(scenarios[1].steps.is_empty());
        assert_eq!(scenarios[2].duration_ms, 1_234_500);
        assert_eq!(
            report.summary,
            Summary { passed: 2, failed: 0, skipped: 1, total: 3 }
        );
    }

    #[test]
    fn test_empty_documents() {
        let report = parse_junit("<testsuites/>").unwrap();
        assert!(report.features.is_empty());
        assert_eq!(report.summary, Summary::default());

        let report = parse_junit(r#"<testsuite name="nothing"></testsuite>"#).unwrap();
        assert_eq!(report.features.len(), 1);
        assert_eq!(report.summary.total, 0);
    }

    #[test]
    fn test_nested_suites_are_flattened() {
        let xml = r#"<testsuites><testsuite name="outer"><testcase name="o"/><testsuite name="inner"><testcase name="i"/></testsuite></testsuite></testsuites>"#;
        let report = parse_junit(xml).unwrap();
        let names: Vec<_> = report.features.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["outer", "inner"]);
        assert_eq!(report.summary.total, 2);
    }

    #[test]
    fn test_mismatched_tags_are_rejected() {
        assert!(parse_junit("<testsuite><testcase></testsuite>").is_err());
    }

    #[test]
    fn test_decimal_comma_times() {
        assert_eq!(seconds_to_millis("1,5"), 1500);
        assert_eq!(seconds_to_millis(" 0,25 "), 250);
        assert_eq!(seconds_to_millis("1,234.5"), 1_234_500);
        assert_eq!(seconds_to_millis("1,234,567"), 1_234_567_000);
        assert_eq!(seconds_to_millis("0.25"), 250);

        let report =
            parse_junit(r#"<testsuite name="S"><testcase name="a" time="2,5"/></testsuite>"#)
                .unwrap();
        assert_eq!(report.features[0].scenarios[0].duration_ms, 2500);
    }
}
