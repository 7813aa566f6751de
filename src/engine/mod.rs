//! Mockup generation engine
//!
//! The engine turns one normalized [`Scenario`] into output rows. Every
//! scenario is processed in a fixed order: member, enrollment, visits,
//! clinical events, exclusions, monthly overrides. Each step reads only the
//! scenario, so the rows for a scenario do not depend on which scenarios
//! were generated before it.
//!
//! Randomness (demographics, code picks) is seeded from a stable hash of the
//! scenario id, which makes the output reproducible run to run.

pub mod clinical;
pub mod demographics;
pub mod enrollment;
pub mod exclusion;
pub mod member;
pub mod monthly;
pub mod observer;
pub mod visit;

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rustc_hash::{FxHashMap, FxHasher};

use crate::codes::{CodeKind, CodeResolver, infer_system};
use crate::config::{GenerationConfig, MeasureConfig};
use crate::error::Result;
use crate::output::{CellValue, GeneratedRow, OutputStore};
use crate::scenario::Scenario;
use crate::scenario::dates::DateResolver;
use crate::schema::{SchemaMapper, TableSchema};

pub use clinical::{EventRows, TableTarget};
pub use observer::{GenerationObserver, NoopObserver};

/// Mixed into the scenario seed for the code-selection stream
const CODE_STREAM: u64 = 0x9E37_79B9_7F4A_7C15;

/// Stable seed for a scenario id
#[must_use]
pub fn scenario_seed(id: &str) -> u64 {
    let mut hasher = FxHasher::default();
    id.hash(&mut hasher);
    hasher.finish()
}

/// Primary key prefix per logical table
fn id_prefix(table_key: &str) -> String {
    match table_key {
        "visit" => "C".to_string(),
        "lab" => "L".to_string(),
        "rx" => "RX".to_string(),
        "emr" => "E".to_string(),
        "monthly_membership" => "MM".to_string(),
        other => other
            .chars()
            .next()
            .map_or_else(|| "R".to_string(), |c| c.to_ascii_uppercase().to_string()),
    }
}

/// Per-scenario generation state
pub struct ScenarioContext<'a> {
    /// The scenario being generated
    pub scenario: &'a Scenario,
    rng: StdRng,
    counters: FxHashMap<String, usize>,
    warnings: Vec<String>,
    rows: usize,
}

impl<'a> ScenarioContext<'a> {
    /// Create the context for a scenario
    #[must_use]
    pub fn new(scenario: &'a Scenario) -> Self {
        Self {
            scenario,
            rng: StdRng::seed_from_u64(scenario_seed(&scenario.id) ^ CODE_STREAM),
            counters: FxHashMap::default(),
            warnings: Vec::new(),
            rows: 0,
        }
    }

    /// Scenario id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.scenario.id
    }

    /// Random source for code selection
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Next primary key for a logical table (`C_T1_01`, `C_T1_02`, ...)
    pub fn next_id(&mut self, table_key: &str) -> String {
        let counter = self.counters.entry(table_key.to_string()).or_insert(0);
        *counter += 1;
        format!("{}_{}_{:02}", id_prefix(table_key), self.scenario.id, *counter)
    }

    /// Record a recovered irregularity
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}: {message}", self.scenario.id);
        self.warnings.push(message);
    }

    /// Warnings recorded so far
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// Counts from a generation run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationSummary {
    /// Scenarios generated
    pub scenarios: usize,
    /// Rows appended
    pub rows: usize,
    /// Recovered irregularities
    pub warnings: usize,
    /// Rows per physical table
    pub rows_per_table: BTreeMap<String, usize>,
}

/// Generates output rows for scenarios of one measure
#[derive(Debug, Clone)]
pub struct MockupEngine {
    measure: MeasureConfig,
    schema: SchemaMapper,
    codes: Option<Arc<CodeResolver>>,
    config: GenerationConfig,
    dates: DateResolver,
}

impl MockupEngine {
    /// Create an engine without a code directory
    #[must_use]
    pub fn new(measure: MeasureConfig, schema: SchemaMapper, config: GenerationConfig) -> Self {
        let dates = DateResolver::new(config.measurement_year);
        Self {
            measure,
            schema,
            codes: None,
            config,
            dates,
        }
    }

    /// Attach a code directory
    #[must_use]
    pub fn with_codes(mut self, codes: Arc<CodeResolver>) -> Self {
        if codes.year() != self.config.measurement_year {
            log::warn!(
                "Code directory indexed for MY {} but generating for MY {}",
                codes.year(),
                self.config.measurement_year
            );
        }
        self.codes = Some(codes);
        self
    }

    /// Measure definition
    #[must_use]
    pub const fn measure(&self) -> &MeasureConfig {
        &self.measure
    }

    /// Schema mapper
    #[must_use]
    pub const fn schema(&self) -> &SchemaMapper {
        &self.schema
    }

    /// Run configuration
    #[must_use]
    pub const fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Date resolver for the measurement year
    #[must_use]
    pub const fn dates(&self) -> &DateResolver {
        &self.dates
    }

    /// Code directory, when one is attached
    #[must_use]
    pub fn codes(&self) -> Option<&CodeResolver> {
        self.codes.as_deref()
    }

    /// Generate every row for one scenario into `store`
    ///
    /// Returns the per-scenario context so callers can inspect warnings.
    pub fn generate_scenario<'s>(
        &self,
        scenario: &'s Scenario,
        store: &mut OutputStore,
    ) -> Result<ScenarioContext<'s>> {
        let mut ctx = ScenarioContext::new(scenario);

        let member = self.generate_member(&mut ctx)?;
        self.emit(&mut ctx, store, [member]);

        let enrollments = self.generate_enrollments(&mut ctx)?;
        self.emit(&mut ctx, store, enrollments);

        let visits = self.generate_visits(&mut ctx)?;
        self.emit(&mut ctx, store, visits);

        for (index, name) in scenario.compliant.iter().enumerate() {
            let rows = self.generate_clinical_event(&mut ctx, name, index)?;
            self.emit(&mut ctx, store, rows.into_rows());
        }

        for name in &scenario.excluded {
            if let Some(row) = self.generate_exclusion(&mut ctx, name)? {
                self.emit(&mut ctx, store, [row]);
            }
        }

        let monthly = self.generate_monthly_overrides(&mut ctx);
        self.emit(&mut ctx, store, monthly);

        log::debug!("{}: {} row(s)", scenario.id, ctx.rows);
        Ok(ctx)
    }

    /// Generate rows for every scenario, reporting progress to `observer`
    pub fn generate_all(
        &self,
        scenarios: &[Scenario],
        store: &mut OutputStore,
        observer: &mut dyn GenerationObserver,
    ) -> Result<GenerationSummary> {
        observer.on_start(scenarios.len());
        let before: BTreeMap<String, usize> = store
            .tables()
            .map(|(name, rows)| (name.to_string(), rows.len()))
            .collect();

        let mut summary = GenerationSummary::default();
        for scenario in scenarios {
            let ctx = self.generate_scenario(scenario, store)?;
            for warning in ctx.warnings() {
                observer.on_warning(&scenario.id, warning);
            }
            summary.scenarios += 1;
            summary.rows += ctx.rows;
            summary.warnings += ctx.warnings().len();
            observer.on_scenario(scenario, ctx.rows);
        }

        summary.rows_per_table = store
            .tables()
            .filter_map(|(name, rows)| {
                let added = rows.len() - before.get(name).copied().unwrap_or(0);
                (added > 0).then(|| (name.to_string(), added))
            })
            .collect();

        log::info!(
            "Generated {} row(s) in {} table(s) for {} scenario(s)",
            summary.rows,
            summary.rows_per_table.len(),
            summary.scenarios
        );
        observer.on_finish(&summary);
        Ok(summary)
    }

    fn emit(
        &self,
        ctx: &mut ScenarioContext<'_>,
        store: &mut OutputStore,
        rows: impl IntoIterator<Item = GeneratedRow>,
    ) {
        for row in rows {
            ctx.rows += 1;
            store.append(row);
        }
    }

    /// A new row for `table` carrying the member id and, for tables with a
    /// foreign key, a freshly numbered primary key
    pub(crate) fn start_row(&self, ctx: &mut ScenarioContext<'_>, table: &TableSchema) -> GeneratedRow {
        let mut row = GeneratedRow::new(&table.name);
        match table.fk.as_deref() {
            Some(fk) => {
                row.set(fk, ctx.id());
                row.set(&table.pk, ctx.next_id(&table.key));
            }
            None => row.set(&table.pk, ctx.id()),
        }
        row
    }

    /// Apply scenario field overrides to a row
    ///
    /// A key matching a column already in the row replaces it; with
    /// `include_mapped`, keys naming a mapped logical field or physical
    /// column of the table are added too. Key columns are never touched.
    pub(crate) fn apply_field_overrides(
        &self,
        row: &mut GeneratedRow,
        table: &TableSchema,
        fields: &BTreeMap<String, String>,
        include_mapped: bool,
    ) {
        for (key, value) in fields {
            let is_key_column = key.eq_ignore_ascii_case(&table.pk)
                || key.eq_ignore_ascii_case(table.member_column());
            if is_key_column {
                continue;
            }

            let existing = row
                .column_names()
                .find(|name| name.eq_ignore_ascii_case(key))
                .map(ToString::to_string);
            let column = existing.or_else(|| {
                include_mapped
                    .then(|| table.physical_column(key).map(ToString::to_string))
                    .flatten()
            });

            if let Some(column) = column {
                let converted = self.convert_override(row.get(&column), value);
                row.set(&column, converted);
            }
        }
    }

    /// Convert override text to the type of the value it replaces
    pub(crate) fn convert_override(&self, current: Option<&CellValue>, value: &str) -> CellValue {
        let value = value.trim();
        match current {
            Some(CellValue::Int(_)) => value
                .parse::<i64>()
                .map_or_else(|_| CellValue::from(value), CellValue::Int),
            Some(CellValue::Date(_)) => self
                .dates
                .try_parse(value)
                .map_or_else(|| CellValue::from(value), CellValue::Date),
            _ => CellValue::from(value),
        }
    }

    /// A code from the first of `value_sets` that has one
    pub(crate) fn code_from_value_sets(
        &self,
        ctx: &mut ScenarioContext<'_>,
        value_sets: &[String],
    ) -> Option<String> {
        let codes = self.codes.as_deref()?;
        value_sets.iter().find_map(|name| {
            if self.config.validate_code_dates {
                codes.get_random_code(name, ctx.rng())
            } else {
                codes.get_codes(name, false).choose(ctx.rng()).cloned()
            }
        })
    }

    /// A code from the most generic value set whose name contains every
    /// word of `name`, in order
    pub(crate) fn code_from_name(&self, ctx: &mut ScenarioContext<'_>, name: &str) -> Option<String> {
        let codes = self.codes.as_deref()?;
        let words: Vec<String> = name.split_whitespace().map(regex::escape).collect();
        if words.is_empty() {
            return None;
        }
        codes.get_random_code_from_pattern(&words.join(".*"), ctx.rng())
    }

    /// Column kind for a code
    pub(crate) fn code_kind(&self, code: &str) -> CodeKind {
        self.codes.as_deref().map_or_else(
            || CodeKind::from_system(infer_system(code)),
            |codes| codes.code_kind(code),
        )
    }

    /// Put a code into the first free column for its kind
    ///
    /// Diagnoses go to the diagnosis columns, revenue codes to the revenue
    /// column, everything else to the procedure columns. Returns whether a
    /// column was available.
    pub(crate) fn place_code(&self, row: &mut GeneratedRow, table: &TableSchema, code: &str) -> bool {
        let field = match self.code_kind(code) {
            CodeKind::Diagnosis => "diagnosis_codes",
            CodeKind::Revenue => "revenue_code",
            _ => "procedure_codes",
        };
        let free = table
            .columns(field)
            .iter()
            .find(|column| row.get(column).is_none_or(CellValue::is_blank));
        match free {
            Some(column) => {
                row.set(column, code);
                true
            }
            None => false,
        }
    }
}
