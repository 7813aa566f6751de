//! Best-effort external extraction for scenarios the tag grammar missed
//!
//! When a scenario ends up without any enrollment span, its text can be
//! handed to an external extractor (typically a language-model wrapper).
//! The extractor is a black box: any failure just means "nothing more to
//! add", and its results only ever add to what the parsers found.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::config::MeasureConfig;
use crate::error::{MockupError, Result};
use crate::scenario::{EnrollmentSpan, Gender, ProductLine, Scenario, Source};

/// Text handed to an external extractor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AiRequest {
    /// Scenario id
    pub id: String,
    /// Scenario description
    pub scenario_text: String,
    /// Test objective
    pub objective_text: String,
    /// Expected result
    pub expected_text: String,
    /// Source sheet
    pub sheet: String,
}

impl AiRequest {
    /// Build a request from a scenario's descriptive text
    #[must_use]
    pub fn from_scenario(scenario: &Scenario) -> Self {
        Self {
            id: scenario.id.clone(),
            scenario_text: scenario.scenario_text.clone(),
            objective_text: scenario.objective_text.clone(),
            expected_text: scenario.expected_text.clone(),
            sheet: scenario.sheet.clone(),
        }
    }
}

/// An enrollment span as reported by an extractor
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AiSpan {
    /// Start date token
    pub start: String,
    /// End date token
    #[serde(default)]
    pub end: Option<String>,
    /// Product id, as text or number
    #[serde(default)]
    pub product_id: Option<serde_json::Value>,
}

/// A clinical event as reported by an extractor
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AiEvent {
    /// Event name
    pub name: String,
    /// Compliance value (`1`, `"Y"`, ...); absent means compliant
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    /// Event date token
    #[serde(default)]
    pub date: Option<String>,
}

/// Structured result of an external extraction
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AiExtraction {
    /// Enrollment spans
    pub enrollment_spans: Vec<AiSpan>,
    /// Product line name
    pub product_line: Option<String>,
    /// Member age
    pub age: Option<u32>,
    /// Member gender
    pub gender: Option<String>,
    /// Clinical events
    pub clinical_events: Vec<AiEvent>,
    /// Exclusion names
    pub exclusions: Vec<String>,
    /// Expected result flags (`CE`, `NE`, ...)
    pub expected_results: BTreeMap<String, serde_json::Value>,
}

/// A best-effort text extractor
pub trait AiExtractor: Send + Sync {
    /// Extract structured data from a scenario's text
    fn extract(&self, request: &AiRequest) -> Result<AiExtraction>;
}

fn json_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        other => Some(other.to_string()),
    }
}

fn is_truthy(value: Option<&serde_json::Value>) -> bool {
    match value {
        None | Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|v| v > 0.0),
        Some(serde_json::Value::String(s)) => crate::parser::standard::is_truthy(s),
        Some(_) => false,
    }
}

/// Merge an extraction into a scenario without overriding what is already set
pub fn merge_extraction(scenario: &mut Scenario, extraction: AiExtraction, measure: &MeasureConfig) {
    for span in extraction.enrollment_spans {
        if span.start.trim().is_empty() {
            continue;
        }
        let mut merged = EnrollmentSpan::new(
            span.start.trim(),
            span.end.as_deref().map_or("12/31/MY", str::trim),
        );
        merged.product_id = span.product_id.as_ref().and_then(json_text);
        scenario.enrollment_spans.push(merged);
    }

    if let Some(line) = extraction.product_line.as_deref().and_then(ProductLine::from_alias) {
        scenario.product_line.offer(line, Source::Inferred);
    }
    if let Some(age) = extraction.age.filter(|a| *a <= 110) {
        scenario.age.offer(age, Source::Inferred);
    }
    if let Some(gender) = extraction.gender.as_deref().and_then(Gender::parse) {
        scenario.gender.offer(gender, Source::Inferred);
    }

    for event in extraction.clinical_events {
        if event.name.trim().is_empty() || !is_truthy(event.value.as_ref()) {
            continue;
        }
        let name = measure.canonical_component_name(&event.name);
        scenario.add_compliant(&name);
        if let Some(date) = event.date.filter(|d| !d.trim().is_empty()) {
            let meta = scenario.overrides.event_mut(&name);
            if meta.date.is_none() {
                meta.date = Some(date.trim().to_string());
            }
        }
    }

    for exclusion in extraction.exclusions {
        if !exclusion.trim().is_empty() {
            scenario.add_excluded(&measure.canonical_exclusion_name(&exclusion));
        }
    }

    for (key, value) in extraction.expected_results {
        let key = key.to_ascii_uppercase();
        if let Some(value) = json_text(&value) {
            scenario.overrides.fields.entry(key).or_insert(value);
        }
    }

    scenario.ai_extracted = true;
}

/// Run the extractor for a scenario that has no enrollment spans
///
/// Returns whether the extractor contributed. Failures are logged and
/// otherwise ignored.
pub fn apply_fallback(
    scenario: &mut Scenario,
    extractor: Option<&dyn AiExtractor>,
    measure: &MeasureConfig,
) -> bool {
    let Some(extractor) = extractor else {
        return false;
    };
    if !scenario.enrollment_spans.is_empty() {
        return false;
    }

    log::warn!(
        "No enrollment spans found for {}, trying external extractor",
        scenario.id
    );
    match extractor.extract(&AiRequest::from_scenario(scenario)) {
        Ok(extraction) => {
            let spans = extraction.enrollment_spans.len();
            merge_extraction(scenario, extraction, measure);
            log::info!("External extractor added {spans} span(s) to {}", scenario.id);
            true
        }
        Err(e) => {
            log::warn!("External extraction for {} failed: {e}", scenario.id);
            false
        }
    }
}

/// Extract the JSON object from a possibly chatty response
pub fn parse_response(response: &str) -> Result<AiExtraction> {
    let start = response.find('{');
    let end = response.rfind('}');
    let body = match (start, end) {
        (Some(s), Some(e)) if s < e => &response[s..=e],
        _ => {
            return Err(MockupError::ExternalExtraction(
                "response contains no JSON object".to_string(),
            ));
        }
    };
    serde_json::from_str(body).map_err(|e| MockupError::ExternalExtraction(e.to_string()))
}

/// Runs an external command: the request is written to its stdin as JSON
/// and the extraction is read from its stdout
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandExtractor {
    /// Create an extractor for a program and its arguments
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl AiExtractor for CommandExtractor {
    fn extract(&self, request: &AiRequest) -> Result<AiExtraction> {
        let failed = |what: &str, e: &dyn std::fmt::Display| {
            MockupError::ExternalExtraction(format!("{what} {}: {e}", self.program.display()))
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| failed("could not start", &e))?;

        let payload = serde_json::to_vec(request)?;
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&payload) {
                drop(stdin);
                let _ = child.kill();
                let _ = child.wait();
                return Err(failed("could not write to", &e));
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| failed("could not read from", &e))?;
        if !output.status.success() {
            return Err(failed("non-zero exit from", &output.status));
        }

        parse_response(&String::from_utf8_lossy(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Component;

    struct Fixed(&'static str);

    impl AiExtractor for Fixed {
        fn extract(&self, _request: &AiRequest) -> Result<AiExtraction> {
            parse_response(self.0)
        }
    }

    struct Failing;

    impl AiExtractor for Failing {
        fn extract(&self, _request: &AiRequest) -> Result<AiExtraction> {
            Err(MockupError::ExternalExtraction("offline".to_string()))
        }
    }

    fn measure() -> MeasureConfig {
        MeasureConfig::new("PSA")
            .with_numerator(Component::new("PSA Test").with_table("lab"))
            .with_exclusion(Component::new("Hospice"))
    }

    const RESPONSE: &str = r#"Sure! ```json
{"enrollment_spans": [{"start": "01/01/2026", "end": "12/31/2026", "product_id": 2}],
 "product_line": "Commercial", "age": 55, "gender": "F",
 "clinical_events": [{"name": "psa test", "value": "1", "date": "06/01/2026"},
                     {"name": "BMI", "value": 0}],
 "exclusions": ["hospice"], "expected_results": {"ce": 1}}
```"#;

    #[test]
    fn test_merge_is_additive() {
        let mut scenario = Scenario::new("T1").with_age(40);
        assert!(apply_fallback(&mut scenario, Some(&Fixed(RESPONSE)), &measure()));

        assert_eq!(scenario.enrollment_spans.len(), 1);
        assert_eq!(scenario.enrollment_spans[0].product_id.as_deref(), Some("2"));
        assert_eq!(scenario.age(), 40);
        assert_eq!(scenario.product_line(), ProductLine::Commercial);
        assert_eq!(scenario.gender(), Gender::Female);
        assert_eq!(scenario.compliant, vec!["PSA Test".to_string()]);
        assert_eq!(scenario.excluded, vec!["Hospice".to_string()]);
        assert_eq!(
            scenario.overrides.event("PSA Test").unwrap().date.as_deref(),
            Some("06/01/2026")
        );
        assert_eq!(scenario.overrides.field("CE"), Some("1"));
        assert!(scenario.ai_extracted);
    }

    #[test]
    fn test_fallback_only_runs_without_spans() {
        let mut scenario = Scenario::new("T2").with_enrollment(EnrollmentSpan::full_year());
        assert!(!apply_fallback(&mut scenario, Some(&Fixed(RESPONSE)), &measure()));
        assert_eq!(scenario.enrollment_spans.len(), 1);
    }

    #[test]
    fn test_failures_are_ignored() {
        let mut scenario = Scenario::new("T3");
        assert!(!apply_fallback(&mut scenario, Some(&Failing), &measure()));
        assert!(!apply_fallback(&mut scenario, Some(&Fixed("no json here")), &measure()));
        assert!(scenario.enrollment_spans.is_empty());
        assert!(!scenario.ai_extracted);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_that_ignores_input_is_reported() {
        // Larger than a pipe buffer, so the write fails once `true` exits
        let request = AiRequest {
            id: "T4".to_string(),
            scenario_text: "x".repeat(1 << 20),
            objective_text: String::new(),
            expected_text: String::new(),
            sheet: "PSA".to_string(),
        };
        let err = CommandExtractor::new("true", Vec::new()).extract(&request).unwrap_err();
        match err {
            MockupError::ExternalExtraction(message) => assert!(message.starts_with("could not write to")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
