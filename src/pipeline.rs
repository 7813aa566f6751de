//! End-to-end generation run
//!
//! A run loads the measure and schema configuration, parses the scenario
//! workbook, generates rows for every scenario, checks the result, and
//! writes one file per physical table. Configuration and input failures
//! abort the run; everything past parsing is recovered and reported.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::codes::CodeResolver;
use crate::config::{GenerationConfig, MeasureConfig};
use crate::engine::{GenerationObserver, GenerationSummary, MockupEngine};
use crate::error::Result;
use crate::error::util::validate_input_file;
use crate::output::{OutputFormat, OutputStore, OutputWriter};
use crate::parser::ai::AiExtractor;
use crate::parser::{ParseContext, parse_scenarios};
use crate::quality::{QualityReport, check_output};
use crate::resources::ResourceManager;
use crate::scenario::Scenario;
use crate::schema::{SchemaConfig, SchemaMapper};
use crate::utils::logging::{log_operation_complete, log_operation_start, log_warning};
use crate::workbook::Workbook;

/// Input and output locations of a run
#[derive(Debug, Clone)]
pub struct RunPaths {
    /// Scenario workbook, CSV file or CSV directory
    pub scenarios: PathBuf,
    /// Measure configuration (YAML or JSON)
    pub measure: PathBuf,
    /// Schema configuration; the built-in template when absent
    pub schema: Option<PathBuf>,
    /// Code directory workbook
    pub codes: Option<PathBuf>,
    /// Output directory
    pub output_dir: PathBuf,
}

impl RunPaths {
    /// Paths with the built-in schema and no code directory
    pub fn new(
        scenarios: impl Into<PathBuf>,
        measure: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            scenarios: scenarios.into(),
            measure: measure.into(),
            schema: None,
            codes: None,
            output_dir: output_dir.into(),
        }
    }

    /// Use a schema configuration file
    #[must_use]
    pub fn with_schema(mut self, path: impl Into<PathBuf>) -> Self {
        self.schema = Some(path.into());
        self
    }

    /// Use a code directory
    #[must_use]
    pub fn with_codes(mut self, path: impl Into<PathBuf>) -> Self {
        self.codes = Some(path.into());
        self
    }
}

/// What a run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Generation counts
    pub summary: GenerationSummary,
    /// Quality findings
    pub quality: QualityReport,
    /// Files written
    pub files: Vec<PathBuf>,
}

/// One configured generation run
pub struct GenerationRun {
    paths: RunPaths,
    config: GenerationConfig,
    format: OutputFormat,
    extractor: Option<Arc<dyn AiExtractor>>,
}

impl GenerationRun {
    /// Create a run
    #[must_use]
    pub fn new(paths: RunPaths, config: GenerationConfig) -> Self {
        Self {
            paths,
            config,
            format: OutputFormat::default(),
            extractor: None,
        }
    }

    /// Set the output format
    #[must_use]
    pub const fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Use an external extractor for rows without enrollment data
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn AiExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Run configuration
    #[must_use]
    pub const fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Load the measure configuration
    pub fn load_measure(&self) -> Result<MeasureConfig> {
        MeasureConfig::load(&self.paths.measure)
    }

    /// Load the schema for a measure
    pub fn load_schema(&self, measure: &MeasureConfig) -> Result<SchemaMapper> {
        let config = match &self.paths.schema {
            Some(path) => SchemaConfig::load(path)?,
            None => {
                log::info!("No schema configuration given, using the built-in template");
                SchemaConfig::default_template()
            }
        };
        Ok(SchemaMapper::new(config, self.config.effective_measure_name(measure)))
    }

    /// Parse the scenario input
    pub fn parse(&self, measure: &MeasureConfig, schema: &SchemaMapper) -> Result<Vec<Scenario>> {
        let workbook = Workbook::open(&self.paths.scenarios)?;
        let mut ctx = ParseContext::new(measure, &self.config, schema.benefit_profiles());
        if let Some(extractor) = self.extractor.as_deref() {
            ctx = ctx.with_extractor(extractor);
        }
        parse_scenarios(&workbook, &ctx)
    }

    /// The code directory, shared through `resources`
    pub fn load_codes(&self, resources: &ResourceManager) -> Result<Option<Arc<CodeResolver>>> {
        let Some(path) = self.paths.codes.as_deref() else {
            log_warning("No code directory given, clinical codes fall back to built-in defaults", None);
            return Ok(None);
        };
        validate_input_file(path, "Code directory")?;
        resources.acquire(path, self.config.measurement_year).map(Some)
    }

    /// Run every stage
    pub fn run(
        &self,
        resources: &ResourceManager,
        observer: &mut dyn GenerationObserver,
    ) -> Result<RunReport> {
        let start = Instant::now();
        log::debug!("{}", self.config);

        let measure = self.load_measure()?;
        let schema = self.load_schema(&measure)?;
        let codes = self.load_codes(resources)?;

        log_operation_start("Parsing scenarios from", &self.paths.scenarios);
        let scenarios = self.parse(&measure, &schema)?;
        log_operation_complete("parsed", &self.paths.scenarios, scenarios.len(), None);

        let mut engine = MockupEngine::new(measure, schema, self.config.clone());
        if let Some(codes) = codes {
            engine = engine.with_codes(codes);
        }

        let mut store = OutputStore::new();
        let summary = engine.generate_all(&scenarios, &mut store, observer)?;

        let quality = check_output(&store, engine.schema());
        quality.log();

        let files = write_output(&store, engine.schema(), &self.paths.output_dir, self.format)?;
        log_operation_complete("wrote", &self.paths.output_dir, files.len(), Some(start.elapsed()));

        Ok(RunReport {
            summary,
            quality,
            files,
        })
    }
}

/// Write a store using the schema's master column orders
pub fn write_output(
    store: &OutputStore,
    schema: &SchemaMapper,
    directory: &Path,
    format: OutputFormat,
) -> Result<Vec<PathBuf>> {
    OutputWriter::new(directory)
        .with_format(format)
        .with_column_orders(schema.column_orders().clone())
        .write(store)
}
