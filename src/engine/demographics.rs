//! Synthetic member demographics
//!
//! Names and addresses are drawn from small fixed pools; identifiers follow
//! the shape of the real ones (SSN `###-##-####`, HIC nine digits plus a
//! letter, MBI `?#??-?#?-?#??`). Nothing here resembles real people beyond
//! the format.

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;

use crate::scenario::Gender;

const FEMALE_FIRST_NAMES: &[&str] = &[
    "Mary", "Patricia", "Linda", "Barbara", "Elizabeth", "Jennifer", "Maria", "Susan", "Margaret",
    "Dorothy", "Lisa", "Nancy", "Karen", "Betty", "Helen", "Sandra", "Donna", "Carol", "Ruth",
    "Sharon",
];

const MALE_FIRST_NAMES: &[&str] = &[
    "James", "John", "Robert", "Michael", "William", "David", "Richard", "Charles", "Joseph",
    "Thomas", "Christopher", "Daniel", "Paul", "Mark", "Donald", "George", "Kenneth", "Steven",
    "Edward", "Brian",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis", "Rodriguez",
    "Martinez", "Hernandez", "Lopez", "Gonzalez", "Wilson", "Anderson", "Thomas", "Taylor",
    "Moore", "Jackson", "Martin", "Lee", "Perez", "Thompson", "White", "Harris",
];

const STREET_NAMES: &[&str] = &[
    "Main", "Oak", "Pine", "Maple", "Cedar", "Elm", "Washington", "Lake", "Hill", "Park",
    "Sunset", "Ridge", "Church", "Highland", "Mill",
];

const STREET_SUFFIXES: &[&str] = &["St", "Ave", "Rd", "Blvd", "Ln", "Dr", "Ct", "Way"];

/// City, state, first three digits of the zip code
const CITIES: &[(&str, &str, &str)] = &[
    ("Springfield", "IL", "627"),
    ("Columbus", "OH", "432"),
    ("Austin", "TX", "787"),
    ("Sacramento", "CA", "958"),
    ("Denver", "CO", "802"),
    ("Albany", "NY", "122"),
    ("Tallahassee", "FL", "323"),
    ("Raleigh", "NC", "276"),
    ("Madison", "WI", "537"),
    ("Phoenix", "AZ", "850"),
    ("Nashville", "TN", "372"),
    ("Richmond", "VA", "232"),
];

/// MBI letters exclude S, L, O, I, B and Z
const MBI_LETTERS: &[u8] = b"ACDEFGHJKMNPQRTUVWXY";

/// Generated identity of one member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demographics {
    /// First name
    pub first_name: String,
    /// Middle initial
    pub middle_name: String,
    /// Last name
    pub last_name: String,
    /// Street address
    pub addr1: String,
    /// City
    pub city: String,
    /// Two-letter state code
    pub state: String,
    /// Five-digit zip code
    pub zip: String,
    /// Social security number
    pub ssn: String,
    /// Health insurance claim number
    pub hic: String,
    /// Medicare beneficiary identifier
    pub mbi: String,
}

impl Demographics {
    /// Generate demographics from a seed; equal seeds give equal results
    #[must_use]
    pub fn generate(seed: u64, gender: Gender) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);

        let first_pool = match gender {
            Gender::Female => FEMALE_FIRST_NAMES,
            Gender::Male => MALE_FIRST_NAMES,
        };
        let first_name = pick(first_pool, &mut rng);
        let last_name = pick(LAST_NAMES, &mut rng);
        let middle_name = pick(FEMALE_FIRST_NAMES, &mut rng)
            .chars()
            .next()
            .map(String::from)
            .unwrap_or_default();

        let addr1 = format!(
            "{} {} {}",
            rng.random_range(100..10_000),
            pick(STREET_NAMES, &mut rng),
            pick(STREET_SUFFIXES, &mut rng)
        );
        let (city, state, zip_prefix) = CITIES.choose(&mut rng).copied().unwrap_or(CITIES[0]);
        let zip = format!("{zip_prefix}{:02}", rng.random_range(0..100));

        let ssn = format!(
            "{:03}-{:02}-{:04}",
            rng.random_range(1..666),
            rng.random_range(1..100),
            rng.random_range(1..10_000)
        );
        let hic = format!("{:09}A", rng.random_range(0..1_000_000_000_u32));
        let mbi = bothify("?#??-?#?-?#??", &mut rng);

        Self {
            first_name,
            middle_name,
            last_name,
            addr1,
            city: city.to_string(),
            state: state.to_string(),
            zip,
            ssn,
            hic,
            mbi,
        }
    }
}

fn pick(pool: &[&str], rng: &mut StdRng) -> String {
    pool.choose(rng).map(ToString::to_string).unwrap_or_default()
}

/// Replace `?` with a letter and `#` with a digit
fn bothify(pattern: &str, rng: &mut StdRng) -> String {
    pattern
        .chars()
        .map(|c| match c {
            '?' => char::from(MBI_LETTERS[rng.random_range(0..MBI_LETTERS.len())]),
            '#' => char::from(b'0' + rng.random_range(0..10_u8)),
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_member() {
        assert_eq!(
            Demographics::generate(42, Gender::Female),
            Demographics::generate(42, Gender::Female)
        );
    }

    #[test]
    fn test_identifier_shapes() {
        let demo = Demographics::generate(7, Gender::Male);
        assert!(MALE_FIRST_NAMES.contains(&demo.first_name.as_str()));
        assert_eq!(demo.middle_name.len(), 1);
        assert_eq!(demo.zip.len(), 5);

        let ssn: Vec<&str> = demo.ssn.split('-').collect();
        assert_eq!(ssn.iter().map(|p| p.len()).collect::<Vec<_>>(), vec![3, 2, 4]);
        assert_eq!(demo.hic.len(), 10);
        assert!(demo.hic.ends_with('A'));

        assert_eq!(demo.mbi.len(), 13);
        assert!(demo.mbi.chars().all(|c| c == '-' || c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
