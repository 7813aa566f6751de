//! Code system classification
//!
//! The engine routes a resolved code to a diagnosis, procedure, revenue or
//! drug column depending on its code system. Systems come from the code
//! directory when the code is known there, otherwise from the shape of the
//! code itself.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NDC_CODE: Regex = Regex::new(r"^(?:\d{4,5}-\d{3,4}-\d{1,2}|\d{11})$").unwrap();
    static ref ICD_CODE: Regex = Regex::new(r"^[A-Za-z]\d{2}(?:\.[0-9A-Za-z]{1,4})?$").unwrap();
    static ref REVENUE_CODE: Regex = Regex::new(r"^0?\d{3}$").unwrap();
    static ref LOINC_CODE: Regex = Regex::new(r"^\d{1,5}-\d$").unwrap();
    static ref HCPCS_CODE: Regex = Regex::new(r"^[A-Va-v]\d{4}$").unwrap();
}

/// Which kind of column a code belongs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeKind {
    /// ICD diagnosis codes
    Diagnosis,
    /// CPT, HCPCS and ICD procedure codes
    Procedure,
    /// UB revenue codes
    Revenue,
    /// NDC / RxNorm drug codes
    Drug,
    /// LOINC results
    Lab,
    /// Anything else
    Other,
}

impl CodeKind {
    /// Classify a code system string from a code directory
    #[must_use]
    pub fn from_system(system: &str) -> Self {
        let s = system.trim().to_ascii_uppercase().replace([' ', '_'], "-");
        if s.is_empty() || s == "UNKNOWN" {
            Self::Other
        } else if s.starts_with("ICD") && (s.contains("PCS") || s.contains("PROC")) {
            Self::Procedure
        } else if s.starts_with("ICD") || s.contains("DIAG") || s.contains("SNOMED") {
            Self::Diagnosis
        } else if s.contains("REV") {
            Self::Revenue
        } else if s.contains("NDC") || s.contains("RXNORM") {
            Self::Drug
        } else if s.contains("LOINC") {
            Self::Lab
        } else if s.contains("CPT") || s.contains("HCPCS") || s.contains("POS") {
            Self::Procedure
        } else {
            Self::Other
        }
    }
}

/// Guess the code system of a code from its shape
#[must_use]
pub fn infer_system(code: &str) -> &'static str {
    let code = code.trim();
    if REVENUE_CODE.is_match(code) {
        "UBREV"
    } else if NDC_CODE.is_match(code) {
        "NDC"
    } else if LOINC_CODE.is_match(code) {
        "LOINC"
    } else if code.contains('.') || ICD_CODE.is_match(code) {
        "ICD10CM"
    } else if HCPCS_CODE.is_match(code) {
        "HCPCS"
    } else {
        "CPT"
    }
}

/// Whether a token plausibly is a code rather than a word
#[must_use]
pub fn looks_like_code(token: &str) -> bool {
    let token = token.trim();
    (3..=12).contains(&token.len())
        && token.chars().any(|c| c.is_ascii_digit())
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}
