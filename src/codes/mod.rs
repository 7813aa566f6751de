//! Code directory and code-validity resolution
//!
//! [`CodeResolver`] answers the two questions the engine asks while
//! building rows: "give me a code from value set X that is valid in the
//! measurement year" and "which code system does code Y belong to". The
//! index is built once at construction and is read-only afterwards, so a
//! resolver can be shared between threads behind an `Arc`.

pub mod loader;
pub mod system;

use std::fmt;
use std::path::Path;

use chrono::NaiveDate;
use rand::Rng;
use rand::seq::IndexedRandom;
use regex::RegexBuilder;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::error::util::validate_input_path;
use crate::workbook::Workbook;

pub use system::{CodeKind, infer_system, looks_like_code};

/// Rows scanned for a directory header
pub const HEADER_SCAN_ROWS: usize = 20;

/// Code system reported for codes missing from the directory
pub const UNKNOWN_SYSTEM: &str = "Unknown";

/// One row of a code directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeEntry {
    /// Value set the code belongs to
    pub value_set: String,
    /// The code
    pub code: String,
    /// Code system (CPT, ICD10CM, ...)
    pub system: Option<String>,
    /// First date the code is valid
    pub effective: Option<NaiveDate>,
    /// Last date the code is valid
    pub expiration: Option<NaiveDate>,
}

impl CodeEntry {
    /// Create an entry without a validity window
    pub fn new(value_set: &str, code: &str, system: &str) -> Self {
        Self {
            value_set: value_set.to_string(),
            code: code.to_string(),
            system: Some(system.to_string()).filter(|s| !s.is_empty()),
            effective: None,
            expiration: None,
        }
    }

    /// Set the validity window
    #[must_use]
    pub const fn with_window(
        mut self,
        effective: Option<NaiveDate>,
        expiration: Option<NaiveDate>,
    ) -> Self {
        self.effective = effective;
        self.expiration = expiration;
        self
    }

    /// Whether the validity window overlaps the measurement year
    #[must_use]
    pub fn is_valid_for(&self, year: i32) -> bool {
        let (start, end) = year_bounds(year);
        self.effective.is_none_or(|d| d <= end) && self.expiration.is_none_or(|d| d >= start)
    }
}

fn year_bounds(year: i32) -> (NaiveDate, NaiveDate) {
    (
        NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(NaiveDate::MIN),
        NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(NaiveDate::MAX),
    )
}

/// Outcome of a code validity check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeValidity {
    /// The code is not in the directory
    NotFound,
    /// The code only becomes valid after the measurement year
    NotYetEffective(NaiveDate),
    /// The code expired before the measurement year
    Expired(NaiveDate),
    /// The code is valid for the measurement year
    Valid,
}

impl CodeValidity {
    /// Whether the verdict allows the code
    #[must_use]
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl fmt::Display for CodeValidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("Code not found in directory"),
            Self::NotYetEffective(d) => write!(f, "Not yet effective (starts {d})"),
            Self::Expired(d) => write!(f, "Expired (ended {d})"),
            Self::Valid => f.write_str("Valid for measurement year"),
        }
    }
}

/// Read-only index over a code directory for one measurement year
#[derive(Debug, Clone, Default)]
pub struct CodeResolver {
    year: i32,
    entries: Vec<CodeEntry>,
    /// Lower-case value set name to codes valid in `year`
    valid: FxHashMap<String, Vec<String>>,
    /// Lower-case value set name to every code
    all: FxHashMap<String, Vec<String>>,
    /// Value set names as written, sorted
    names: Vec<String>,
    /// Code to code system, first entry wins
    systems: FxHashMap<String, String>,
}

impl CodeResolver {
    /// Build a resolver from directory entries
    #[must_use]
    pub fn from_entries(entries: Vec<CodeEntry>, year: i32) -> Self {
        let mut valid: FxHashMap<String, Vec<String>> = FxHashMap::default();
        let mut all: FxHashMap<String, Vec<String>> = FxHashMap::default();
        let mut systems = FxHashMap::default();
        let mut names = Vec::new();

        for entry in &entries {
            let key = entry.value_set.trim().to_lowercase();
            if !all.contains_key(&key) {
                names.push(entry.value_set.trim().to_string());
            }
            all.entry(key.clone()).or_default().push(entry.code.clone());
            let valid_codes = valid.entry(key).or_default();
            if entry.is_valid_for(year) {
                valid_codes.push(entry.code.clone());
            }
            if let Some(system) = &entry.system {
                systems
                    .entry(entry.code.clone())
                    .or_insert_with(|| system.clone());
            }
        }
        names.sort();

        log::debug!(
            "Indexed {} code entries in {} value sets for MY {year}",
            entries.len(),
            names.len()
        );

        Self {
            year,
            entries,
            valid,
            all,
            names,
            systems,
        }
    }

    /// Load a code directory from a workbook file or CSV directory
    pub fn load(path: &Path, year: i32) -> Result<Self> {
        validate_input_path(path, "Code directory")?;
        let workbook = Workbook::open(path)?;
        let resolver = Self::from_workbook(&workbook, year)?;
        log::info!(
            "Code directory {} loaded: {} entries, {} valid for MY {year}",
            path.display(),
            resolver.len(),
            resolver.valid_code_count()
        );
        Ok(resolver)
    }

    /// Build a resolver from an already opened workbook
    pub fn from_workbook(workbook: &Workbook, year: i32) -> Result<Self> {
        let entries = loader::read_entries(workbook, HEADER_SCAN_ROWS)?;
        Ok(Self::from_entries(entries, year))
    }

    /// Measurement year the index was built for
    #[must_use]
    pub const fn year(&self) -> i32 {
        self.year
    }

    /// Number of directory entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the directory is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries valid for the measurement year
    #[must_use]
    pub fn valid_code_count(&self) -> usize {
        self.valid.values().map(Vec::len).sum()
    }

    /// Every value set name, sorted
    #[must_use]
    pub fn value_set_names(&self) -> &[String] {
        &self.names
    }

    /// Resolve a value set name to its index key
    ///
    /// Exact (case-insensitive) names win. Otherwise the shortest cached name
    /// that contains, or is contained in, the requested name is used as the
    /// most generic candidate.
    #[must_use]
    pub fn resolve_name(&self, name: &str) -> Option<&str> {
        let query = name.trim().to_lowercase();
        if query.is_empty() {
            return None;
        }
        if let Some((key, _)) = self.all.get_key_value(&query) {
            return Some(key.as_str());
        }

        let fallback = self
            .all
            .keys()
            .filter(|key| key.contains(&query) || query.contains(key.as_str()))
            .min_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))?;
        log::debug!("Value set '{name}' resolved by containment to '{fallback}'");
        Some(fallback.as_str())
    }

    /// Codes of a value set, optionally restricted to the measurement year
    #[must_use]
    pub fn get_codes(&self, value_set: &str, validate_dates: bool) -> &[String] {
        let index = if validate_dates { &self.valid } else { &self.all };
        self.resolve_name(value_set)
            .and_then(|key| index.get(key))
            .map_or(&[], Vec::as_slice)
    }

    /// A random code from a value set
    ///
    /// Codes valid for the measurement year are preferred; if there are none
    /// the unfiltered set is used. Returns `None` only when the value set has
    /// no codes at all.
    pub fn get_random_code<R: Rng + ?Sized>(&self, value_set: &str, rng: &mut R) -> Option<String> {
        let valid = self.get_codes(value_set, true);
        let pool = if valid.is_empty() {
            self.get_codes(value_set, false)
        } else {
            valid
        };
        pool.choose(rng).cloned()
    }

    /// Value set names matching a pattern
    ///
    /// The pattern is a case-insensitive regex; if it does not compile it is
    /// used as a plain substring. With `filter_empty` only value sets with
    /// codes valid in the measurement year are returned.
    #[must_use]
    pub fn find_value_sets(&self, pattern: &str, filter_empty: bool) -> Vec<&str> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build().ok();
        let needle = pattern.to_lowercase();

        self.names
            .iter()
            .filter(|name| match &regex {
                Some(re) => re.is_match(name),
                None => name.to_lowercase().contains(&needle),
            })
            .filter(|name| {
                !filter_empty
                    || self
                        .valid
                        .get(&name.to_lowercase())
                        .is_some_and(|codes| !codes.is_empty())
            })
            .map(String::as_str)
            .collect()
    }

    /// A random code from the shortest value set name matching a pattern
    pub fn get_random_code_from_pattern<R: Rng + ?Sized>(
        &self,
        pattern: &str,
        rng: &mut R,
    ) -> Option<String> {
        let name = self
            .find_value_sets(pattern, true)
            .into_iter()
            .min_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))?;
        self.get_random_code(name, rng)
    }

    /// Code system of a code, or `"Unknown"`
    #[must_use]
    pub fn get_code_system(&self, code: &str) -> &str {
        self.systems
            .get(code.trim())
            .map_or(UNKNOWN_SYSTEM, String::as_str)
    }

    /// Column kind for a code, falling back to its shape when unknown
    #[must_use]
    pub fn code_kind(&self, code: &str) -> CodeKind {
        match self.get_code_system(code) {
            UNKNOWN_SYSTEM => CodeKind::from_system(infer_system(code)),
            system => CodeKind::from_system(system),
        }
    }

    /// Check a code against the measurement year
    ///
    /// A code listed more than once is valid if any of its rows is.
    #[must_use]
    pub fn is_code_valid(&self, code: &str, value_set: Option<&str>) -> CodeValidity {
        let code = code.trim();
        let mut matching = self.entries.iter().filter(|e| {
            e.code == code
                && value_set.is_none_or(|vs| e.value_set.trim().eq_ignore_ascii_case(vs.trim()))
        });

        let Some(first) = matching.next() else {
            return CodeValidity::NotFound;
        };
        if first.is_valid_for(self.year) || matching.any(|e| e.is_valid_for(self.year)) {
            return CodeValidity::Valid;
        }

        let (start, end) = year_bounds(self.year);
        match (first.effective, first.expiration) {
            (Some(effective), _) if effective > end => CodeValidity::NotYetEffective(effective),
            (_, Some(expiration)) if expiration < start => CodeValidity::Expired(expiration),
            _ => CodeValidity::Valid,
        }
    }
}
