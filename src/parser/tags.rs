//! Inline tag grammar used in tester-authored scenario rows
//!
//! Testers annotate free text with short tags (`PL: Medicaid`, `AG: 40`,
//! `CE: PSA Test`, `V1: DIAG=Z00.00`, ...). [`tokenize`] turns a row's text
//! into typed [`Tag`]s. Patterns are tried in a fixed precedence order and
//! a match is dropped when it overlaps text an earlier pattern already
//! claimed, so `V1: DIAG=Z00.00` never also yields a bare `DIAG:` tag and
//! `CE:1` never doubles as a `<FIELD>=1` flag.

use std::ops::Range;

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use smallvec::SmallVec;

use crate::scenario::dates::DATE_PART_FULL;
use crate::scenario::{MonthlyOverride, ProductLine};

/// An explicit compliant / excluded marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTag {
    /// `CE: <name>`
    Named(String),
    /// `CE:1` / `CE:0`
    Flag(bool),
}

/// A typed tag found in row text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    /// `PL: <alias>`
    ProductLine(ProductLine),
    /// `AG: <n>`
    Age(u32),
    /// `AD: <date>`
    AnchorDate(String),
    /// `BE: <profile>`
    BenefitProfile(String),
    /// `ED: <date>, <date>`
    EventDates(Vec<String>),
    /// `ED<n>: <date>`
    IndexedEventDate {
        /// 1-based event index
        index: usize,
        /// Date token
        date: String,
    },
    /// `ED: <name>=<date>`
    NamedEventDate {
        /// Event name as written
        name: String,
        /// Date token
        date: String,
    },
    /// `F<n>: <value>`
    Field {
        /// Field number
        index: u32,
        /// Value
        value: String,
    },
    /// `V<n>:KEY=VALUE`
    PinnedVisit {
        /// 1-based visit index
        index: usize,
        /// Column (normalized)
        key: String,
        /// Value
        value: String,
    },
    /// `DIAG: <code>`
    Diagnosis(String),
    /// `CE: ...`
    Compliant(EventTag),
    /// `NE: ...`
    Excluded(EventTag),
    /// `DS: <n>`
    DaysSupply(u32),
    /// `QTY: <n>`
    Quantity(u32),
    /// `NDC: <code>`
    Ndc(String),
    /// `<FLAG>=Y ... rundate=<date>`
    MonthlyFlag(MonthlyOverride),
    /// `<FIELD>=0|1`
    FlagOverride {
        /// Column (upper-case)
        field: String,
        /// `0` or `1`
        value: String,
    },
    /// `no <benefit>`
    Negation {
        /// Column (upper-case)
        field: String,
    },
}

/// Discriminant of a [`Tag`], used to register handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagKind {
    /// `PL:`
    ProductLine,
    /// `AG:`
    Age,
    /// `AD:`
    AnchorDate,
    /// `BE:`
    BenefitProfile,
    /// `ED:` list
    EventDates,
    /// `ED<n>:`
    IndexedEventDate,
    /// `ED: name=date`
    NamedEventDate,
    /// `F<n>:`
    Field,
    /// `V<n>:`
    PinnedVisit,
    /// `DIAG:`
    Diagnosis,
    /// `CE:`
    Compliant,
    /// `NE:`
    Excluded,
    /// `DS:`
    DaysSupply,
    /// `QTY:`
    Quantity,
    /// `NDC:`
    Ndc,
    /// `rundate=` flags
    MonthlyFlag,
    /// `<FIELD>=0|1`
    FlagOverride,
    /// `no <benefit>`
    Negation,
}

impl Tag {
    /// The tag's kind
    #[must_use]
    pub const fn kind(&self) -> TagKind {
        match self {
            Self::ProductLine(_) => TagKind::ProductLine,
            Self::Age(_) => TagKind::Age,
            Self::AnchorDate(_) => TagKind::AnchorDate,
            Self::BenefitProfile(_) => TagKind::BenefitProfile,
            Self::EventDates(_) => TagKind::EventDates,
            Self::IndexedEventDate { .. } => TagKind::IndexedEventDate,
            Self::NamedEventDate { .. } => TagKind::NamedEventDate,
            Self::Field { .. } => TagKind::Field,
            Self::PinnedVisit { .. } => TagKind::PinnedVisit,
            Self::Diagnosis(_) => TagKind::Diagnosis,
            Self::Compliant(_) => TagKind::Compliant,
            Self::Excluded(_) => TagKind::Excluded,
            Self::DaysSupply(_) => TagKind::DaysSupply,
            Self::Quantity(_) => TagKind::Quantity,
            Self::Ndc(_) => TagKind::Ndc,
            Self::MonthlyFlag(_) => TagKind::MonthlyFlag,
            Self::FlagOverride { .. } => TagKind::FlagOverride,
            Self::Negation { .. } => TagKind::Negation,
        }
    }
}

/// Keys a `<FIELD>=0|1` match must not claim
const RESERVED_FLAG_KEYS: &[&str] = &[
    "pl", "ag", "ad", "be", "ed", "ce", "ne", "ds", "qty", "ndc", "diag", "day", "days",
    "quantity", "supply", "product", "product_id", "productid", "prod", "prod_id", "rollup",
    "rollup_id", "pl_id", "coverage", "coverage_indicator", "coverage_ind", "cover", "cov",
    "ben_hospice", "rundate", "run_date",
];

/// Where a `CE:`/`NE:` value stops: a separator, the next pharmacy or
/// date tag, or the end of the text
const EVENT_VALUE_END: &str = r"\s*(?:[;,\n]|\b(?:ds|days?|qty|quantity|ndc|ed\d*|diag)\s*[:=]|$)";

type Builder = fn(&Captures<'_>) -> Option<Tag>;

struct Pattern {
    regex: Regex,
    /// Capture group whose span is claimed (0 = whole match)
    claim_group: usize,
    build: Builder,
}

fn pattern(regex: &str, claim_group: usize, build: Builder) -> Pattern {
    Pattern {
        regex: Regex::new(regex).unwrap(),
        claim_group,
        build,
    }
}

/// `CE:1 ...` / `CE:0 ...` are flags whatever follows them
fn event_tag(raw: &str) -> EventTag {
    let raw = raw.trim();
    match raw.split_whitespace().next() {
        Some("1") => EventTag::Flag(true),
        Some("0") => EventTag::Flag(false),
        _ => EventTag::Named(raw.to_string()),
    }
}

fn pinned_key(raw: &str) -> String {
    let key = raw.trim().to_ascii_uppercase();
    match key.as_str() {
        "DIAG" | "DIAGNOSIS" => "DIAG_I_1".to_string(),
        "CPT" | "PROC" => "CPT_1".to_string(),
        _ => key,
    }
}

lazy_static! {
    static ref DATE_LIST_SPLIT: Regex = Regex::new(r"\s*,\s*").unwrap();

    /// Tag patterns in precedence order
    static ref PATTERNS: Vec<Pattern> = vec![
        pattern(
            &format!(r"(?i)\b([a-z][a-z0-9_]*)\s*[:=]\s*([yn01])\b[^;]*?\brun_?date\s*[:=]\s*({DATE_PART_FULL})"),
            0,
            |c| Some(Tag::MonthlyFlag(MonthlyOverride {
                field: c[1].to_ascii_uppercase(),
                value: i64::from(matches!(&c[2], "y" | "Y" | "1")),
                run_date: c[3].to_ascii_uppercase(),
            })),
        ),
        pattern(
            r"(?i)\bv(\d+)\s*:\s*([a-z0-9_]+)\s*[:=]\s*([a-z0-9.\-]+)",
            0,
            |c| Some(Tag::PinnedVisit {
                index: c[1].parse().ok()?,
                key: pinned_key(&c[2]),
                value: c[3].to_string(),
            }),
        ),
        pattern(
            &format!(r"(?i)\bed\s*:\s*([a-z][a-z0-9 _\-]*?)\s*[:=]\s*({DATE_PART_FULL})"),
            0,
            |c| {
                let name = c[1].trim();
                let prefix = name.to_ascii_lowercase();
                if ["ad", "ce", "ne", "ag", "pl"].contains(&prefix.as_str()) {
                    return None;
                }
                Some(Tag::NamedEventDate { name: name.to_string(), date: c[2].to_string() })
            },
        ),
        pattern(
            &format!(r"(?i)\bed(\d+)\s*:\s*({DATE_PART_FULL})"),
            0,
            |c| Some(Tag::IndexedEventDate { index: c[1].parse().ok()?, date: c[2].to_string() }),
        ),
        pattern(
            &format!(r"(?i)\bed\s*:\s*((?:{DATE_PART_FULL})(?:\s*,\s*(?:{DATE_PART_FULL}))*)"),
            0,
            |c| Some(Tag::EventDates(
                DATE_LIST_SPLIT
                    .split(c[1].trim())
                    .filter(|d| !d.is_empty())
                    .map(ToString::to_string)
                    .collect(),
            )),
        ),
        pattern(r"(?i)\bpl\s*:\s*([a-z][a-z\-]*)", 0, |c| {
            ProductLine::from_alias(&c[1]).map(Tag::ProductLine)
        }),
        pattern(r"(?i)\bag\s*:\s*(\d{1,3})\b", 0, |c| Some(Tag::Age(c[1].parse().ok()?))),
        pattern(
            &format!(r"(?i)\bad\s*:\s*({DATE_PART_FULL})"),
            0,
            |c| Some(Tag::AnchorDate(c[1].to_string())),
        ),
        pattern(r"(?i)\bbe\s*:\s*(\w+)", 0, |c| Some(Tag::BenefitProfile(c[1].to_ascii_uppercase()))),
        pattern(r"(?i)\bf(\d+)\s*[:=]\s*([^\s;,]+)", 0, |c| {
            Some(Tag::Field { index: c[1].parse().ok()?, value: c[2].to_string() })
        }),
        pattern(r"(?i)\bdiag\s*[:=]\s*([a-z0-9.]+)", 0, |c| {
            Some(Tag::Diagnosis(c[1].to_ascii_uppercase()))
        }),
        pattern(
            &format!(r"(?i)(\bce\s*[:=]\s*([^;,\n]+?)){EVENT_VALUE_END}"),
            1,
            |c| Some(Tag::Compliant(event_tag(&c[2]))),
        ),
        pattern(
            &format!(r"(?i)(\bne\s*[:=]\s*([^;,\n]+?)){EVENT_VALUE_END}"),
            1,
            |c| Some(Tag::Excluded(event_tag(&c[2]))),
        ),
        pattern(r"(?i)\bnot\s+tested\b", 0, |_| Some(Tag::Compliant(EventTag::Flag(false)))),
        pattern(r"(?i)\b(?:ds|days?\s*supply|days?)\s*[:=]\s*(\d+)", 0, |c| {
            Some(Tag::DaysSupply(c[1].parse().ok()?))
        }),
        pattern(r"(?i)\b(?:qty|quantity)\s*[:=]\s*(\d+)", 0, |c| Some(Tag::Quantity(c[1].parse().ok()?))),
        pattern(r"(?i)\bndc\s*[:=]\s*([\d\-]+)", 0, |c| Some(Tag::Ndc(c[1].to_string()))),
        pattern(r"(?i)\bno\s+(ben_[a-z_]+)", 0, |c| {
            Some(Tag::Negation { field: c[1].to_ascii_uppercase() })
        }),
        pattern(r"(?i)\bno\s+mental\s+health\b", 0, |_| {
            Some(Tag::Negation { field: "BEN_MH_INP".to_string() })
        }),
        pattern(r"(?i)\bno\s+pharmacy\b", 0, |_| Some(Tag::Negation { field: "BEN_RX".to_string() })),
        pattern(r"(?i)\bno\s+medical\b", 0, |_| {
            Some(Tag::Negation { field: "BEN_MEDICAL".to_string() })
        }),
        pattern(r"(?i)\b([a-z][a-z0-9_]*)\s*[:=]\s*([01])\b", 0, |c| {
            let key = c[1].to_ascii_lowercase();
            let numbered = |prefix: &str| {
                key.strip_prefix(prefix)
                    .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit()))
            };
            if RESERVED_FLAG_KEYS.contains(&key.as_str()) || numbered("ed") || numbered("f") || numbered("v") {
                return None;
            }
            Some(Tag::FlagOverride { field: c[1].to_ascii_uppercase(), value: c[2].to_string() })
        }),
    ];
}

fn overlaps(claimed: &[Range<usize>], span: &Range<usize>) -> bool {
    claimed
        .iter()
        .any(|c| c.start < span.end && span.start < c.end)
}

/// Tokenize row text into tags
///
/// Tags come out grouped by precedence, and in text order within a group.
#[must_use]
pub fn tokenize(text: &str) -> SmallVec<[Tag; 8]> {
    let mut tags = SmallVec::new();
    let mut claimed: Vec<Range<usize>> = Vec::new();

    for pattern in PATTERNS.iter() {
        for caps in pattern.regex.captures_iter(text) {
            let Some(span) = caps.get(pattern.claim_group).map(|m| m.range()) else {
                continue;
            };
            if overlaps(&claimed, &span) {
                continue;
            }
            if let Some(tag) = (pattern.build)(&caps) {
                claimed.push(span);
                tags.push(tag);
            }
        }
    }

    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TagKind> {
        tokenize(text).iter().map(Tag::kind).collect()
    }

    #[test]
    fn test_basic_tags() {
        let tags = tokenize("T1 ; PL: Medi-Cal ; AG: 40 ; AD: 3/1/MY ; BE: Medical");
        assert!(tags.contains(&Tag::ProductLine(ProductLine::Medicaid)));
        assert!(tags.contains(&Tag::Age(40)));
        assert!(tags.contains(&Tag::AnchorDate("3/1/MY".to_string())));
        assert!(tags.contains(&Tag::BenefitProfile("MEDICAL".to_string())));
    }

    #[test]
    fn test_event_date_forms() {
        let tags = tokenize("ED: 1/1/MY, 2/1/MY ; ED2: 6/1/MY ; ED: PSA Test=7/1/MY");
        assert!(tags.contains(&Tag::EventDates(vec!["1/1/MY".into(), "2/1/MY".into()])));
        assert!(tags.contains(&Tag::IndexedEventDate { index: 2, date: "6/1/MY".into() }));
        assert!(tags.contains(&Tag::NamedEventDate { name: "PSA Test".into(), date: "7/1/MY".into() }));
        assert_eq!(tags.len(), 3);
    }

    #[test]
    fn test_pinned_visit_claims_its_diagnosis() {
        let tags = tokenize("V1: DIAG=Z00.00 ; V2: cpt=99214");
        assert_eq!(
            tags[0],
            Tag::PinnedVisit { index: 1, key: "DIAG_I_1".into(), value: "Z00.00".into() }
        );
        assert_eq!(
            tags[1],
            Tag::PinnedVisit { index: 2, key: "CPT_1".into(), value: "99214".into() }
        );
        assert!(!kinds("V1: DIAG=Z00.00").contains(&TagKind::Diagnosis));
        assert_eq!(tokenize("DIAG: z71.3"), SmallVec::<[Tag; 8]>::from_vec(vec![Tag::Diagnosis("Z71.3".into())]));
    }

    #[test]
    fn test_compliance_tags_are_not_flag_overrides() {
        let tags = tokenize("CE:1 ; NE: Hospice ; BEN_RX=0");
        assert_eq!(tags[0], Tag::Compliant(EventTag::Flag(true)));
        assert_eq!(tags[1], Tag::Excluded(EventTag::Named("Hospice".into())));
        assert_eq!(tags[2], Tag::FlagOverride { field: "BEN_RX".into(), value: "0".into() });
        assert_eq!(tags.len(), 3);

        assert_eq!(tokenize("ce=0")[0], Tag::Compliant(EventTag::Flag(false)));
        assert_eq!(tokenize("PSA not tested")[0], Tag::Compliant(EventTag::Flag(false)));
    }

    #[test]
    fn test_event_value_stops_at_next_tag() {
        let tags = tokenize("CE: Statin Medication DS: 90 QTY=30");
        assert_eq!(tags[0], Tag::Compliant(EventTag::Named("Statin Medication".into())));
        assert!(tags.contains(&Tag::DaysSupply(90)));
        assert!(tags.contains(&Tag::Quantity(30)));
    }

    #[test]
    fn test_monthly_flag_with_run_date() {
        let tags = tokenize("Hospice=Y in June, rundate=6/1/MY");
        assert_eq!(
            tags[0],
            Tag::MonthlyFlag(MonthlyOverride {
                field: "HOSPICE".into(),
                value: 1,
                run_date: "6/1/MY".into(),
            })
        );
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn test_pharmacy_and_negation_tags() {
        let tags = tokenize("Statin DS: 90 QTY=30 NDC: 00002-7510-01 ; no pharmacy ; no ben_mh_amb");
        assert!(tags.contains(&Tag::DaysSupply(90)));
        assert!(tags.contains(&Tag::Quantity(30)));
        assert!(tags.contains(&Tag::Ndc("00002-7510-01".into())));
        assert!(tags.contains(&Tag::Negation { field: "BEN_RX".into() }));
        assert!(tags.contains(&Tag::Negation { field: "BEN_MH_AMB".into() }));
    }

    #[test]
    fn test_field_overrides() {
        let tags = tokenize("F1: ABC ; F12=7");
        assert!(tags.contains(&Tag::Field { index: 1, value: "ABC".into() }));
        assert!(tags.contains(&Tag::Field { index: 12, value: "7".into() }));
    }
}
