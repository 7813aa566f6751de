//! Normalized scenario records
//!
//! A [`Scenario`] is what both extraction strategies produce and what the
//! engine consumes. Single-valued fields carry the strength of the evidence
//! that set them, so continuation rows and fallback extractors can add
//! information without clobbering what an earlier, explicit source said.

pub mod dates;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Default member age when a scenario never states one
pub const DEFAULT_AGE: u32 = 70;

/// Member gender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    /// Male
    #[serde(rename = "M")]
    Male,
    /// Female
    #[serde(rename = "F")]
    Female,
}

impl Gender {
    /// Single-letter code written to output tables
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Male => "M",
            Self::Female => "F",
        }
    }

    /// Parse `M`/`F`/`Male`/`Female` (case-insensitive)
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_uppercase().as_str() {
            "M" | "MALE" => Some(Self::Male),
            "F" | "FEMALE" => Some(Self::Female),
            _ => None,
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Insurance product line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductLine {
    /// Commercial coverage
    Commercial,
    /// Medicaid coverage
    Medicaid,
    /// Medicare coverage
    Medicare,
    /// Marketplace / exchange coverage
    Exchange,
}

impl ProductLine {
    /// Aliases recognized in free text, in match order
    pub const ALIASES: &'static [(Self, &'static [&'static str])] = &[
        (Self::Commercial, &["commercial", "comm"]),
        (Self::Medicaid, &["medicaid", "medi-cal", "mcd"]),
        (Self::Medicare, &["medicare", "mcr"]),
        (Self::Exchange, &["exchange", "marketplace", "qhp", "hix"]),
    ];

    /// Find the first product line whose alias occurs in `text`
    #[must_use]
    pub fn from_alias(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        Self::ALIASES
            .iter()
            .find(|(_, aliases)| aliases.iter().any(|alias| lower.contains(alias)))
            .map(|(line, _)| *line)
    }

    /// Numeric product id used by enrollment rows
    #[must_use]
    pub const fn product_id(self) -> i64 {
        match self {
            Self::Medicare => 1,
            Self::Commercial => 2,
            Self::Medicaid => 3,
            Self::Exchange => 4,
        }
    }

    /// Display name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Commercial => "Commercial",
            Self::Medicaid => "Medicaid",
            Self::Medicare => "Medicare",
            Self::Exchange => "Exchange",
        }
    }
}

impl fmt::Display for ProductLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How strongly a value was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Source {
    /// Built-in default
    Default,
    /// Heuristic or best-effort guess (keyword search, external extractor)
    Inferred,
    /// Stated explicitly by a tag or a dedicated column
    Explicit,
}

/// A single-valued scenario field together with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting<T> {
    /// Current value
    pub value: T,
    /// Evidence strength behind the value
    pub source: Source,
}

impl<T> Setting<T> {
    /// A default value
    pub const fn default_value(value: T) -> Self {
        Self {
            value,
            source: Source::Default,
        }
    }

    /// Offer a new value; it is accepted only when its source is stronger
    /// than the one that set the current value
    pub fn offer(&mut self, value: T, source: Source) -> bool {
        if source > self.source {
            self.value = value;
            self.source = source;
            true
        } else {
            false
        }
    }

    /// Whether the value is still the built-in default
    pub fn is_default(&self) -> bool {
        self.source == Source::Default
    }
}

/// A continuous enrollment period
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentSpan {
    /// Start date token
    pub start: String,
    /// End date token
    pub end: String,
    /// Explicit product id for this span
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    /// Coverage indicator for this span
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_indicator: Option<String>,
    /// Hospice benefit flag for this span
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hospice: Option<bool>,
}

impl EnrollmentSpan {
    /// Create a span from two date tokens
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            ..Self::default()
        }
    }

    /// The full measurement year
    #[must_use]
    pub fn full_year() -> Self {
        Self::new("1/1/MY", "12/31/MY")
    }
}

/// A visit on a given date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitSpan {
    /// Date token
    pub date: String,
    /// Free-text category (`Outpatient`, `Telehealth`) or an explicit code
    #[serde(rename = "type")]
    pub visit_type: String,
    /// Explicit procedure code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Explicit diagnosis code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
}

impl VisitSpan {
    /// Create a visit of the given type
    pub fn new(date: impl Into<String>, visit_type: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            visit_type: visit_type.into(),
            code: None,
            diagnosis: None,
        }
    }
}

/// Per-event metadata supplied by a scenario
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    /// Date token for the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Explicit code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Result value (lab value, BMI percentile)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Pharmacy days supply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_supply: Option<u32>,
    /// Pharmacy quantity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
}

impl EventMeta {
    /// Copy every field `other` sets that is still unset here
    pub fn fill_from(&mut self, other: &Self) {
        if self.date.is_none() {
            self.date.clone_from(&other.date);
        }
        if self.code.is_none() {
            self.code.clone_from(&other.code);
        }
        if self.value.is_none() {
            self.value.clone_from(&other.value);
        }
        if self.days_supply.is_none() {
            self.days_supply = other.days_supply;
        }
        if self.quantity.is_none() {
            self.quantity = other.quantity;
        }
    }
}

/// Field-level overrides collected for a scenario
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Overrides {
    /// Column or logical field name to value
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Metadata per compliant event name
    #[serde(default)]
    pub events: BTreeMap<String, EventMeta>,
    /// Metadata per exclusion name
    #[serde(default)]
    pub exclusions: BTreeMap<String, EventMeta>,
    /// Column overrides per 1-based visit index
    #[serde(default)]
    pub pinned_visits: BTreeMap<usize, BTreeMap<String, String>>,
    /// Date token per 1-based event index
    #[serde(default)]
    pub events_by_index: BTreeMap<usize, String>,
}

impl Overrides {
    /// Set a field override
    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Metadata for an event, looked up case-insensitively
    #[must_use]
    pub fn event(&self, name: &str) -> Option<&EventMeta> {
        lookup_ci(&self.events, name)
    }

    /// Metadata for an exclusion, looked up case-insensitively
    #[must_use]
    pub fn exclusion(&self, name: &str) -> Option<&EventMeta> {
        lookup_ci(&self.exclusions, name)
    }

    /// Mutable metadata entry for an event, created on first use
    pub fn event_mut(&mut self, name: &str) -> &mut EventMeta {
        self.events.entry(name.to_string()).or_default()
    }

    /// Mutable metadata entry for an exclusion, created on first use
    pub fn exclusion_mut(&mut self, name: &str) -> &mut EventMeta {
        self.exclusions.entry(name.to_string()).or_default()
    }

    /// Value of a field override, matched case-insensitively
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        lookup_ci(&self.fields, key).map(String::as_str)
    }
}

fn lookup_ci<'a, V>(map: &'a BTreeMap<String, V>, key: &str) -> Option<&'a V> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

/// A flag set on the monthly membership table as of a run date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyOverride {
    /// Flag column (e.g. `HOSPICE`)
    pub field: String,
    /// Flag value
    pub value: i64,
    /// Run-date token
    pub run_date: String,
}

/// A normalized test scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario / member identifier
    pub id: String,
    /// Sheet the scenario came from
    #[serde(default)]
    pub sheet: String,
    /// Scenario description text
    #[serde(default)]
    pub scenario_text: String,
    /// Test objective text
    #[serde(default)]
    pub objective_text: String,
    /// Expected result text
    #[serde(default)]
    pub expected_text: String,
    /// Member age as of the end of the measurement year
    pub age: Setting<u32>,
    /// Member gender
    pub gender: Setting<Gender>,
    /// Product line
    pub product_line: Setting<ProductLine>,
    /// Anchor date token used as the default event date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_date: Option<String>,
    /// Global event date tokens (`ED: d1, d2`)
    #[serde(default)]
    pub event_dates: Vec<String>,
    /// Enrollment spans
    #[serde(default)]
    pub enrollment_spans: Vec<EnrollmentSpan>,
    /// Visits
    #[serde(default)]
    pub visit_spans: Vec<VisitSpan>,
    /// Compliant event names, in first-seen order
    #[serde(default)]
    pub compliant: Vec<String>,
    /// Excluded event names, in first-seen order
    #[serde(default)]
    pub excluded: Vec<String>,
    /// Field-level overrides
    #[serde(default)]
    pub overrides: Overrides,
    /// Monthly membership flag overrides
    #[serde(default)]
    pub monthly_overrides: Vec<MonthlyOverride>,
    /// Whether the external extractor contributed data
    #[serde(default)]
    pub ai_extracted: bool,
}

impl Scenario {
    /// Create a scenario with default demographics
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sheet: String::new(),
            scenario_text: String::new(),
            objective_text: String::new(),
            expected_text: String::new(),
            age: Setting::default_value(DEFAULT_AGE),
            gender: Setting::default_value(Gender::Male),
            product_line: Setting::default_value(ProductLine::Medicare),
            anchor_date: None,
            event_dates: Vec::new(),
            enrollment_spans: Vec::new(),
            visit_spans: Vec::new(),
            compliant: Vec::new(),
            excluded: Vec::new(),
            overrides: Overrides::default(),
            monthly_overrides: Vec::new(),
            ai_extracted: false,
        }
    }

    /// Member age
    #[must_use]
    pub fn age(&self) -> u32 {
        self.age.value
    }

    /// Member gender
    #[must_use]
    pub fn gender(&self) -> Gender {
        self.gender.value
    }

    /// Product line
    #[must_use]
    pub fn product_line(&self) -> ProductLine {
        self.product_line.value
    }

    /// Builder-style explicit age
    #[must_use]
    pub fn with_age(mut self, age: u32) -> Self {
        self.age.offer(age, Source::Explicit);
        self
    }

    /// Builder-style explicit gender
    #[must_use]
    pub fn with_gender(mut self, gender: Gender) -> Self {
        self.gender.offer(gender, Source::Explicit);
        self
    }

    /// Builder-style explicit product line
    #[must_use]
    pub fn with_product_line(mut self, line: ProductLine) -> Self {
        self.product_line.offer(line, Source::Explicit);
        self
    }

    /// Builder-style enrollment span
    #[must_use]
    pub fn with_enrollment(mut self, span: EnrollmentSpan) -> Self {
        self.enrollment_spans.push(span);
        self
    }

    /// Builder-style visit
    #[must_use]
    pub fn with_visit(mut self, visit: VisitSpan) -> Self {
        self.visit_spans.push(visit);
        self
    }

    /// Builder-style compliant event
    #[must_use]
    pub fn with_compliant(mut self, name: &str) -> Self {
        self.add_compliant(name);
        self
    }

    /// Builder-style exclusion
    #[must_use]
    pub fn with_exclusion(mut self, name: &str) -> Self {
        self.add_excluded(name);
        self
    }

    /// Record a compliant event once; returns whether it was new
    pub fn add_compliant(&mut self, name: &str) -> bool {
        push_unique(&mut self.compliant, name)
    }

    /// Record an exclusion once; returns whether it was new
    pub fn add_excluded(&mut self, name: &str) -> bool {
        push_unique(&mut self.excluded, name)
    }

    /// Whether the scenario names an event (case-insensitive)
    #[must_use]
    pub fn is_compliant(&self, name: &str) -> bool {
        self.compliant.iter().any(|c| c.eq_ignore_ascii_case(name))
    }

    /// Set the anchor date unless one is already known
    pub fn set_anchor_date(&mut self, token: &str) {
        if self.anchor_date.is_none() {
            self.anchor_date = Some(token.to_string());
        }
    }
}

fn push_unique(list: &mut Vec<String>, name: &str) -> bool {
    if list.iter().any(|existing| existing.eq_ignore_ascii_case(name)) {
        false
    } else {
        list.push(name.to_string());
        true
    }
}
