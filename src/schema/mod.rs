//! Logical-to-physical schema mapping
//!
//! Generation code speaks in logical names (`visit`, `visit.date`); the
//! schema configuration maps those onto physical table and column names.
//! Physical table names may carry a `{MEASURE}` placeholder, and master
//! column lists may be keyed by `TEMPLATE_` prefixed names; both are
//! resolved once against the active measure when the mapper is built.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MockupError, Result};

/// Placeholder replaced by the measure name in physical table names
pub const MEASURE_PLACEHOLDER: &str = "{MEASURE}";

/// Prefix of template table names in master column lists
pub const TEMPLATE_PREFIX: &str = "TEMPLATE_";

/// Logical table keys the engine writes to
pub mod tables {
    /// Member demographics
    pub const MEMBER: &str = "member";
    /// Enrollment spans
    pub const ENROLLMENT: &str = "enrollment";
    /// Visits / claims
    pub const VISIT: &str = "visit";
    /// Lab results
    pub const LAB: &str = "lab";
    /// Pharmacy claims
    pub const RX: &str = "rx";
    /// EMR observations
    pub const EMR: &str = "emr";
    /// Monthly membership flags
    pub const MONTHLY_MEMBERSHIP: &str = "monthly_membership";
}

/// A logical field mapped to one column or an ordered list of columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldSpec {
    /// A single column
    Column(String),
    /// Several columns filled in order (`CPT_1`, `CPT_2`, ...)
    Columns(Vec<String>),
}

impl FieldSpec {
    /// First mapped column
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::Column(c) => Some(c.as_str()),
            Self::Columns(cs) => cs.first().map(String::as_str),
        }
    }

    /// All mapped columns
    #[must_use]
    pub fn all(&self) -> &[String] {
        match self {
            Self::Column(c) => std::slice::from_ref(c),
            Self::Columns(cs) => cs,
        }
    }
}

/// Mapping for one logical table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Logical key, filled in from the map key
    #[serde(skip)]
    pub key: String,
    /// Physical table name, possibly containing `{MEASURE}`
    pub name: String,
    /// Primary key column
    pub pk: String,
    /// Foreign key column pointing at the member
    #[serde(default)]
    pub fk: Option<String>,
    /// Logical field to physical column(s)
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
}

impl TableSchema {
    /// Column holding the member id (foreign key, else primary key)
    #[must_use]
    pub fn member_column(&self) -> &str {
        self.fk.as_deref().unwrap_or(&self.pk)
    }

    /// First column mapped to a logical field
    #[must_use]
    pub fn column(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(FieldSpec::first)
    }

    /// All columns mapped to a logical field
    #[must_use]
    pub fn columns(&self, field: &str) -> &[String] {
        self.fields.get(field).map_or(&[], FieldSpec::all)
    }

    /// First mapped column among several candidate logical fields
    #[must_use]
    pub fn first_column(&self, fields: &[&str]) -> Option<&str> {
        fields.iter().find_map(|f| self.column(f))
    }

    /// Map an override key (logical field or physical column, any case) to a
    /// physical column of this table
    #[must_use]
    pub fn physical_column(&self, key: &str) -> Option<&str> {
        if key.eq_ignore_ascii_case(&self.pk) {
            return Some(&self.pk);
        }
        if let Some(fk) = self.fk.as_deref().filter(|fk| key.eq_ignore_ascii_case(fk)) {
            return Some(fk);
        }
        self.fields.iter().find_map(|(logical, spec)| {
            if logical.eq_ignore_ascii_case(key) {
                return spec.first();
            }
            spec.all()
                .iter()
                .find(|c| c.eq_ignore_ascii_case(key))
                .map(String::as_str)
        })
    }
}

fn table(
    key: &str,
    name: &str,
    pk: &str,
    fk: Option<&str>,
    fields: &[(&str, &[&str])],
) -> (String, TableSchema) {
    let fields = fields
        .iter()
        .map(|(logical, columns)| {
            let spec = if columns.len() == 1 {
                FieldSpec::Column(columns[0].to_string())
            } else {
                FieldSpec::Columns(columns.iter().map(ToString::to_string).collect())
            };
            ((*logical).to_string(), spec)
        })
        .collect();

    (
        key.to_string(),
        TableSchema {
            key: key.to_string(),
            name: name.to_string(),
            pk: pk.to_string(),
            fk: fk.map(ToString::to_string),
            fields,
        },
    )
}

/// A schema configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Logical table key to table mapping
    pub tables: BTreeMap<String, TableSchema>,
    /// Benefit profile name to the columns it switches on
    #[serde(default)]
    pub benefit_profiles: BTreeMap<String, Vec<String>>,
    /// Physical (or template) table name to master column order
    #[serde(default)]
    pub columns: BTreeMap<String, Vec<String>>,
}

impl SchemaConfig {
    /// Load a schema configuration from YAML or JSON
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: Self = crate::config::load_document(path)?;
        config.fill_keys();
        log::info!(
            "Loaded schema with {} table(s) from {}",
            config.tables.len(),
            path.display()
        );
        Ok(config)
    }

    fn fill_keys(&mut self) {
        for (key, table) in &mut self.tables {
            table.key.clone_from(key);
        }
    }

    /// The built-in schema used when no schema file is supplied
    #[must_use]
    pub fn default_template() -> Self {
        let tables = [
            table(
                tables::MEMBER,
                "{MEASURE}_MEMBER_IN",
                "MEM_NBR",
                None,
                &[
                    ("dob", &["MEM_DOB"]),
                    ("gender", &["MEM_GENDER"]),
                    ("first_name", &["MEM_FNAME"]),
                    ("middle_name", &["MEM_MNAME"]),
                    ("last_name", &["MEM_LNAME"]),
                    ("addr1", &["MEM_ADDR1"]),
                    ("city", &["MEM_CITY"]),
                    ("state", &["MEM_STATE"]),
                    ("zip", &["MEM_ZIP"]),
                    ("ssn", &["MEM_SSN"]),
                    ("hic", &["HIC_NBR"]),
                    ("mbi", &["MBI"]),
                ],
            ),
            table(
                tables::ENROLLMENT,
                "{MEASURE}_ENROLLMENT_IN",
                "MEM_NBR",
                None,
                &[
                    ("start_date", &["ENR_START"]),
                    ("end_date", &["ENR_END"]),
                    ("product_id", &["PRODUCT_ID"]),
                    ("coverage_indicator", &["COVERAGE_INDICATOR"]),
                    ("hospice", &["BEN_HOSPICE"]),
                ],
            ),
            table(
                tables::VISIT,
                "{MEASURE}_VISIT_IN",
                "CLAIM_ID",
                Some("MEM_NBR"),
                &[
                    ("date", &["SERV_DT"]),
                    ("pos", &["POS"]),
                    ("procedure_codes", &["CPT_1", "CPT_2", "CPT_3"]),
                    ("diagnosis_codes", &["DIAG_I_1", "DIAG_I_2", "DIAG_I_3"]),
                    ("revenue_code", &["UB_REV"]),
                ],
            ),
            table(
                tables::LAB,
                "{MEASURE}_LAB_IN",
                "LAB_ID",
                Some("MEM_NBR"),
                &[
                    ("date", &["LAB_SCR_DT"]),
                    ("cpt", &["LAB_CPT"]),
                    ("value", &["LAB_VALUE"]),
                ],
            ),
            table(
                tables::RX,
                "{MEASURE}_RX_IN",
                "RX_ID",
                Some("MEM_NBR"),
                &[
                    ("date", &["RX_FILL_DT"]),
                    ("ndc", &["NDC"]),
                    ("days_supply", &["DAYS_SUPPLY"]),
                    ("quantity", &["QTY"]),
                ],
            ),
            table(
                tables::EMR,
                "{MEASURE}_EMR_IN",
                "EMR_ID",
                Some("MEM_NBR"),
                &[
                    ("date", &["EMR_DT"]),
                    ("code", &["EMR_CODE"]),
                    ("bmi_percentile", &["BMI_PERCENTILE"]),
                    ("value", &["EMR_VALUE"]),
                ],
            ),
            table(
                tables::MONTHLY_MEMBERSHIP,
                "{MEASURE}_MONTHLY_MEMBERSHIP_IN",
                "MMS_ID",
                Some("MEM_NBR"),
                &[("run_date", &["RUN_DATE"]), ("hospice_flag", &["HOSPICE"])],
            ),
        ];

        Self {
            tables: tables.into_iter().collect(),
            benefit_profiles: BTreeMap::new(),
            columns: BTreeMap::new(),
        }
    }
}

/// Resolves logical names against a schema for one measure
#[derive(Debug, Clone)]
pub struct SchemaMapper {
    measure: String,
    tables: BTreeMap<String, TableSchema>,
    benefit_profiles: BTreeMap<String, Vec<String>>,
    columns: BTreeMap<String, Vec<String>>,
}

impl SchemaMapper {
    /// Build a mapper, resolving physical names for `measure`
    #[must_use]
    pub fn new(config: SchemaConfig, measure: &str) -> Self {
        let measure = measure.trim().to_ascii_uppercase();

        let tables = config
            .tables
            .into_iter()
            .map(|(key, mut table)| {
                table.key.clone_from(&key);
                table.name = expand_table_name(&table.name, &measure);
                (key, table)
            })
            .collect();

        // Concrete entries win over template expansions of the same table
        let mut columns = BTreeMap::new();
        for (name, list) in &config.columns {
            if name.starts_with(TEMPLATE_PREFIX) || name.contains(MEASURE_PLACEHOLDER) {
                columns
                    .entry(expand_table_name(name, &measure))
                    .or_insert_with(|| list.clone());
            }
        }
        for (name, list) in config.columns {
            if !name.starts_with(TEMPLATE_PREFIX) && !name.contains(MEASURE_PLACEHOLDER) {
                columns.insert(name, list);
            }
        }

        Self {
            measure,
            tables,
            benefit_profiles: config
                .benefit_profiles
                .into_iter()
                .map(|(k, v)| (k.to_ascii_uppercase(), v))
                .collect(),
            columns,
        }
    }

    /// The active measure name (upper-case)
    #[must_use]
    pub fn measure(&self) -> &str {
        &self.measure
    }

    /// Table schema by logical key
    #[must_use]
    pub fn table(&self, key: &str) -> Option<&TableSchema> {
        self.tables.get(key)
    }

    /// Table schema by logical key, failing with a configuration error
    pub fn require(&self, key: &str) -> Result<&TableSchema> {
        self.table(key).ok_or_else(|| {
            MockupError::config(format!("Schema has no '{key}' table"))
        })
    }

    /// Every table schema
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Resolve a dotted logical name (`visit.date`) to (physical table, column)
    #[must_use]
    pub fn resolve(&self, dotted: &str) -> Option<(&str, &str)> {
        let (key, field) = dotted.split_once('.')?;
        let table = self.table(key)?;
        let column = match field {
            "pk" => Some(table.pk.as_str()),
            "fk" => table.fk.as_deref(),
            _ => table.column(field),
        }?;
        Some((table.name.as_str(), column))
    }

    /// Logical key for a configured table reference, which may be a logical
    /// key, a physical name, or a physical name for another measure
    #[must_use]
    pub fn logical_key_for(&self, reference: &str) -> Option<&str> {
        let reference = reference.trim();
        if let Some((key, _)) = self.tables.get_key_value(reference) {
            return Some(key.as_str());
        }
        if let Some(table) = self
            .tables
            .values()
            .find(|t| t.name.eq_ignore_ascii_case(reference) || t.key.eq_ignore_ascii_case(reference))
        {
            return Some(table.key.as_str());
        }

        // PSA_LAB_IN -> lab, TEMPLATE_MONTHLY_MEMBERSHIP_IN -> monthly_membership
        let upper = reference.to_ascii_uppercase();
        let stripped = upper.strip_suffix("_IN").unwrap_or(&upper);
        let stripped = stripped
            .strip_prefix(&format!("{}_", self.measure))
            .or_else(|| stripped.strip_prefix(TEMPLATE_PREFIX))
            .unwrap_or(stripped);
        let candidate = stripped.to_ascii_lowercase();
        if let Some((key, _)) = self.tables.get_key_value(candidate.as_str()) {
            return Some(key.as_str());
        }

        self.tables
            .keys()
            .find(|key| {
                let token = key.to_ascii_uppercase();
                upper.split(|c: char| !c.is_ascii_alphanumeric()).any(|part| part == token)
                    || upper.contains(&format!("_{token}_"))
            })
            .map(String::as_str)
    }

    /// Master column order for a physical table
    #[must_use]
    pub fn column_order(&self, physical: &str) -> Option<&[String]> {
        self.columns.get(physical).map(Vec::as_slice)
    }

    /// Every master column order, keyed by physical table name
    #[must_use]
    pub const fn column_orders(&self) -> &BTreeMap<String, Vec<String>> {
        &self.columns
    }

    /// Columns switched on by a benefit profile (case-insensitive)
    #[must_use]
    pub fn benefit_profile(&self, name: &str) -> Option<&[String]> {
        self.benefit_profiles
            .get(&name.trim().to_ascii_uppercase())
            .map(Vec::as_slice)
    }

    /// All benefit profiles
    #[must_use]
    pub const fn benefit_profiles(&self) -> &BTreeMap<String, Vec<String>> {
        &self.benefit_profiles
    }
}

/// Substitute the measure into a physical or template table name
#[must_use]
pub fn expand_table_name(name: &str, measure: &str) -> String {
    if let Some(rest) = name.strip_prefix(TEMPLATE_PREFIX) {
        return format!("{measure}_{rest}");
    }
    name.replace(MEASURE_PLACEHOLDER, measure)
}
