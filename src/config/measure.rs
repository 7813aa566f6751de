//! Measure configuration documents
//!
//! A measure configuration names the clinical components a scenario can be
//! compliant for, the exclusions it can hit, and the value sets behind each.
//! Documents may wrap `clinical_events` and `exclusions` in a top-level
//! `rules` object or carry them at the root.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Terms that mark a component as a lab result
const LAB_TERMS: &[&str] = &[
    "lab", "psa", "a1c", "ldl", "cholesterol", "glucose", "creatinine", "egfr", "urine", "panel",
];

/// Logical table a component name suggests when none is configured
#[must_use]
pub fn infer_table(name: &str) -> &'static str {
    let lower = name.to_lowercase();
    let has_word = |word: &str| {
        lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|token| token == word)
    };

    if lower.contains("bmi") || lower.contains("weight") {
        "emr"
    } else if LAB_TERMS.iter().any(|term| has_word(term)) {
        "lab"
    } else if lower.contains("medication") || lower.contains("drug") || has_word("rx") {
        "rx"
    } else {
        "visit"
    }
}

/// A literal configured value (`value: 85`, `value: "1.0"`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    /// Integer literal
    Int(i64),
    /// Floating point literal
    Float(f64),
    /// Boolean literal
    Bool(bool),
    /// Text literal
    Text(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{}", u8::from(*b)),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// One required occurrence group of a composite component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubEvent {
    /// Optional label
    #[serde(default)]
    pub name: Option<String>,
    /// Number of occurrences
    #[serde(default = "default_count")]
    pub count: u32,
    /// Days between consecutive occurrences
    #[serde(default)]
    pub min_separation_days: Option<i64>,
}

const fn default_count() -> u32 {
    1
}

/// A numerator, denominator or exclusion component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Component name as written in scenarios
    pub name: String,
    /// Logical or physical target table
    #[serde(default)]
    pub table: Option<String>,
    /// Value sets holding qualifying codes
    #[serde(default)]
    pub value_set_names: Vec<String>,
    /// Number of required occurrences
    #[serde(default)]
    pub count: Option<u32>,
    /// Days between consecutive occurrences
    #[serde(default)]
    pub min_separation_days: Option<i64>,
    /// Explicit occurrence groups
    #[serde(default)]
    pub sub_events: Vec<SubEvent>,
    /// Acceptable result range
    #[serde(default)]
    pub value_range: Option<[f64; 2]>,
    /// Pharmacy days supply
    #[serde(default)]
    pub days_supply: Option<u32>,
    /// Pharmacy quantity
    #[serde(default)]
    pub quantity: Option<u32>,
    /// Default code
    #[serde(default)]
    pub code: Option<String>,
    /// Default result value
    #[serde(default)]
    pub value: Option<ScalarValue>,
}

impl Component {
    /// Create a component with only a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the target table
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Add a value set
    #[must_use]
    pub fn with_value_set(mut self, name: impl Into<String>) -> Self {
        self.value_set_names.push(name.into());
        self
    }

    /// Require repeated occurrences
    #[must_use]
    pub const fn with_count(mut self, count: u32, min_separation_days: i64) -> Self {
        self.count = Some(count);
        self.min_separation_days = Some(min_separation_days);
        self
    }

    /// Add an occurrence group
    #[must_use]
    pub fn with_sub_event(mut self, count: u32, min_separation_days: i64) -> Self {
        self.sub_events.push(SubEvent {
            name: None,
            count,
            min_separation_days: Some(min_separation_days),
        });
        self
    }

    /// Set a default code
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Whether the component lands in the `logical` table, either by its
    /// configured table name or by name inference
    #[must_use]
    pub fn targets(&self, logical: &str) -> bool {
        match self.table.as_deref() {
            Some(table) => table.to_ascii_lowercase().contains(&logical.to_ascii_lowercase()),
            None => infer_table(&self.name).eq_ignore_ascii_case(logical),
        }
    }

    /// Whether the component produces more than one row
    #[must_use]
    pub fn is_composite(&self) -> bool {
        !self.sub_events.is_empty() || self.count.is_some_and(|c| c > 1)
    }

    /// Whether the component names a pharmacy event
    #[must_use]
    pub fn is_pharmacy(&self) -> bool {
        let table_is_rx = self.table.as_deref().is_some_and(|t| {
            let t = t.to_ascii_lowercase();
            t == "rx" || t.contains("_rx")
        });
        table_is_rx || self.name.contains("Medication") || self.name.contains("Drug")
    }
}

/// Continuous enrollment requirement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuousEnrollment {
    /// Required coverage length
    #[serde(default)]
    pub period_months: Option<u32>,
    /// Largest permitted gap
    #[serde(default)]
    pub allowable_gap_days: Option<u32>,
}

/// Compliance components grouped by role
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicalEvents {
    /// Components that make a member compliant
    #[serde(default)]
    pub numerator_components: Vec<Component>,
    /// Components that place a member in the denominator
    #[serde(default)]
    pub denominator_components: Vec<Component>,
    /// Free-form pathway descriptions, carried through untouched
    #[serde(default)]
    pub logic_pathways: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRules {
    #[serde(default)]
    clinical_events: Option<ClinicalEvents>,
    #[serde(default)]
    exclusions: Option<Vec<Component>>,
}

#[derive(Debug, Deserialize)]
struct RawMeasureConfig {
    #[serde(default)]
    measure_name: String,
    #[serde(default)]
    age_range: Option<[u32; 2]>,
    #[serde(default)]
    continuous_enrollment: Option<ContinuousEnrollment>,
    #[serde(default)]
    rules: Option<RawRules>,
    #[serde(default)]
    clinical_events: Option<ClinicalEvents>,
    #[serde(default)]
    exclusions: Option<Vec<Component>>,
}

impl From<RawMeasureConfig> for MeasureConfig {
    fn from(raw: RawMeasureConfig) -> Self {
        let rules = raw.rules.unwrap_or_default();
        Self {
            measure_name: raw.measure_name,
            age_range: raw.age_range,
            continuous_enrollment: raw.continuous_enrollment,
            clinical_events: rules
                .clinical_events
                .or(raw.clinical_events)
                .unwrap_or_default(),
            exclusions: rules.exclusions.or(raw.exclusions).unwrap_or_default(),
        }
    }
}

/// A loaded measure definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawMeasureConfig")]
pub struct MeasureConfig {
    /// Measure abbreviation, e.g. `PSA`
    pub measure_name: String,
    /// Eligible age range
    pub age_range: Option<[u32; 2]>,
    /// Continuous enrollment requirement
    pub continuous_enrollment: Option<ContinuousEnrollment>,
    /// Compliance components
    pub clinical_events: ClinicalEvents,
    /// Exclusion components
    pub exclusions: Vec<Component>,
}

impl MeasureConfig {
    /// Create an empty measure definition
    pub fn new(measure_name: impl Into<String>) -> Self {
        Self {
            measure_name: measure_name.into(),
            ..Self::default()
        }
    }

    /// Load a measure definition from YAML or JSON
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = super::load_document(path)?;
        log::info!(
            "Loaded measure '{}' with {} numerator component(s) and {} exclusion(s)",
            config.measure_name,
            config.clinical_events.numerator_components.len(),
            config.exclusions.len()
        );
        Ok(config)
    }

    /// Add a numerator component
    #[must_use]
    pub fn with_numerator(mut self, component: Component) -> Self {
        self.clinical_events.numerator_components.push(component);
        self
    }

    /// Add an exclusion component
    #[must_use]
    pub fn with_exclusion(mut self, component: Component) -> Self {
        self.exclusions.push(component);
        self
    }

    /// Numerator components in configuration order
    #[must_use]
    pub fn numerator(&self) -> &[Component] {
        &self.clinical_events.numerator_components
    }

    /// Every clinical component, numerator first
    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.clinical_events
            .numerator_components
            .iter()
            .chain(&self.clinical_events.denominator_components)
    }

    /// Find a clinical component by name (case-insensitive)
    #[must_use]
    pub fn find_component(&self, name: &str) -> Option<&Component> {
        let name = name.trim();
        self.components()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Find an exclusion by name (case-insensitive)
    #[must_use]
    pub fn find_exclusion(&self, name: &str) -> Option<&Component> {
        let name = name.trim();
        self.exclusions
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Canonical spelling of a component name, or the input unchanged
    #[must_use]
    pub fn canonical_component_name(&self, name: &str) -> String {
        self.find_component(name)
            .map_or_else(|| name.trim().to_string(), |c| c.name.clone())
    }

    /// Canonical spelling of an exclusion name, or the input unchanged
    #[must_use]
    pub fn canonical_exclusion_name(&self, name: &str) -> String {
        self.find_exclusion(name)
            .map_or_else(|| name.trim().to_string(), |c| c.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_table_from_name() {
        assert_eq!(infer_table("BMI Percentile"), "emr");
        assert_eq!(infer_table("PSA Test"), "lab");
        assert_eq!(infer_table("HbA1c Lab"), "lab");
        assert_eq!(infer_table("Statin Medication"), "rx");
        assert_eq!(infer_table("Counseling for Nutrition"), "visit");

        assert!(Component::new("PSA Test").targets("lab"));
        assert!(Component::new("Anything").with_table("PSA_LAB_IN").targets("lab"));
        assert!(!Component::new("PSA Test").with_table("visit").targets("lab"));
    }

    const WRAPPED: &str = r"
measure_name: PSA
age_range: [66, 100]
continuous_enrollment:
  period_months: 12
  allowable_gap_days: 45
rules:
  clinical_events:
    numerator_components:
      - name: PSA Test
        table: PSA_LAB_IN
        value_set_names: [PSA Lab Test]
        value: 1.0
      - name: Outpatient Visit
        table: visit
        count: 2
        min_separation_days: 14
  exclusions:
    - name: Hospice
    - name: Prostate Cancer
      value_set_names: [Prostate Cancer]
";

    #[test]
    fn test_rules_wrapper_is_optional() {
        let wrapped: MeasureConfig = serde_yaml::from_str(WRAPPED).unwrap();
        assert_eq!(wrapped.measure_name, "PSA");
        assert_eq!(wrapped.numerator().len(), 2);
        assert_eq!(wrapped.exclusions.len(), 2);

        let flat: MeasureConfig = serde_json::from_str(
            r#"{"measure_name": "BCS", "clinical_events": {"numerator_components": [{"name": "Mammogram"}]}, "exclusions": []}"#,
        )
        .unwrap();
        assert_eq!(flat.numerator()[0].name, "Mammogram");
    }

    #[test]
    fn test_component_lookup_and_composites() {
        let config: MeasureConfig = serde_yaml::from_str(WRAPPED).unwrap();
        let psa = config.find_component("psa test").unwrap();
        assert_eq!(psa.value.as_ref().unwrap().to_string(), "1");
        assert!(!psa.is_composite());
        assert!(config.find_component("Outpatient Visit").unwrap().is_composite());
        assert_eq!(config.canonical_exclusion_name("hospice"), "Hospice");
        assert_eq!(config.canonical_component_name(" Unknown "), "Unknown");
    }
}
