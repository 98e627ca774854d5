//! Cucumber JSON (`--format json`) normalization.

use super::{Feature, ParsedReport, ReportError, Scenario, ScenarioStatus, Step, StepStatus};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// One top-level record of a Cucumber JSON report (a feature file).
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CucumberFeature {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(deserialize_with = "null_as_default")]
    pub elements: Vec<CucumberElement>,
}

/// A scenario, background or other element within a feature.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CucumberElement {
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "tag_names")]
    pub tags: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub steps: Vec<CucumberStep>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CucumberStep {
    #[serde(deserialize_with = "null_as_default")]
    pub keyword: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub result: CucumberResult,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CucumberResult {
    #[serde(deserialize_with = "null_as_default")]
    pub status: String,
    /// Nanoseconds.
    #[serde(deserialize_with = "lenient_f64")]
    pub duration: f64,
    pub error_message: Option<String>,
}

/// Parse a Cucumber JSON document into the canonical report.
pub fn parse_cucumber(json: &str) -> Result<ParsedReport, ReportError> {
    let features: Vec<CucumberFeature> = serde_json::from_str(json)?;
    Ok(normalize_cucumber(features))
}

/// Convert already-deserialized Cucumber features. Only `scenario` elements are counted.
pub fn normalize_cucumber(features: Vec<CucumberFeature>) -> ParsedReport {
    let features = features
        .into_iter()
        .map(|feature| Feature {
            name: feature.name.trim().to_string(),
            description: feature.description.trim().to_string(),
            scenarios: feature
                .elements
                .into_iter()
                .filter(|e| e.kind == "scenario")
                .map(convert_scenario)
                .collect(),
        })
        .collect();

    ParsedReport::from_features(features)
}

fn convert_scenario(element: CucumberElement) -> Scenario {
    let steps: Vec<Step> = element.steps.into_iter().map(convert_step).collect();
    Scenario {
        name: element.name.trim().to_string(),
        status: ScenarioStatus::derive(&steps),
        duration_ms: steps.iter().map(|s| s.duration_ms).sum(),
        tags: element.tags,
        steps,
    }
}

fn convert_step(step: CucumberStep) -> Step {
    let status = StepStatus::from_raw(&step.result.status);
    let error = match status {
        StepStatus::Failed | StepStatus::Ambiguous => step.result.error_message,
        _ => None,
    };
    Step {
        keyword: step.keyword.trim().to_string(),
        text: step.name.trim().to_string(),
        status,
        duration_ms: nanos_to_millis(step.result.duration),
        error,
    }
}

fn nanos_to_millis(nanos: f64) -> u64 {
    if nanos.is_finite() && nanos > 0.0 {
        (nanos / 1_000_000.0).round() as u64
    } else {
        0
    }
}

/// `null` reads the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Numbers may arrive as numbers, numeric strings, or garbage; garbage is zero.
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

/// Tags are `[{"name": "@smoke", "line": 3}]`; bare strings are accepted too.
fn tag_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .iter()
        .filter_map(|tag| match tag {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map.get("name").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .collect())
}
