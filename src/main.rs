//! Command line interface for measure mockup generation

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use measure_mockup::codes::CodeResolver;
use measure_mockup::config::{DEFAULT_MEASUREMENT_YEAR, GenerationConfig, VisitDepth};
use measure_mockup::output::OutputFormat;
use measure_mockup::parser::ai::{AiExtractor, CommandExtractor};
use measure_mockup::pipeline::{GenerationRun, RunPaths};
use measure_mockup::resources::ResourceManager;
use measure_mockup::utils::logging::console::{
    print_code_directory, print_generation_summary, print_quality_report,
};
use measure_mockup::utils::logging::{ProgressObserver, create_spinner, finish_progress_bar};

#[derive(Parser)]
#[command(name = "measure-mockup")]
#[command(about = "Generate quality-measure test data from scenario spreadsheets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by commands that read scenarios
#[derive(clap::Args)]
struct ScenarioArgs {
    /// Scenario workbook, CSV file or directory of CSV files
    #[arg(short, long)]
    scenarios: PathBuf,
    /// Measure configuration (YAML or JSON)
    #[arg(short, long)]
    measure: PathBuf,
    /// Schema configuration (YAML or JSON); built-in template when omitted
    #[arg(long)]
    schema: Option<PathBuf>,
    /// Measurement year
    #[arg(short, long, default_value_t = DEFAULT_MEASUREMENT_YEAR)]
    year: i32,
    /// Measure name for table names, overriding the measure configuration
    #[arg(long)]
    measure_name: Option<String>,
    /// Only keep free-text scenarios that mention this measure
    #[arg(long)]
    measure_filter: Option<String>,
    /// External extraction command for rows without enrollment data
    #[arg(long)]
    ai_command: Option<PathBuf>,
    /// Arguments for the extraction command
    #[arg(long = "ai-arg", requires = "ai_command")]
    ai_args: Vec<String>,
}

impl ScenarioArgs {
    fn config(&self) -> GenerationConfig {
        let mut config = GenerationConfig::new().with_measurement_year(self.year);
        if let Some(name) = &self.measure_name {
            config = config.with_measure_name(name);
        }
        if let Some(filter) = &self.measure_filter {
            config = config.with_measure_filter(filter);
        }
        config
    }

    fn run(
        &self,
        resources: &ResourceManager,
        output: PathBuf,
        codes: Option<PathBuf>,
        config: GenerationConfig,
    ) -> Result<GenerationRun> {
        let mut paths = RunPaths::new(&self.scenarios, &self.measure, output);
        if let Some(schema) = &self.schema {
            paths = paths.with_schema(schema);
        }
        if let Some(codes) = codes {
            paths = paths.with_codes(codes);
        }

        let mut run = GenerationRun::new(paths, config);
        if let Some(program) = &self.ai_command {
            let name = program.display().to_string();
            let extractor = resources
                .acquire_extractor(&name, || {
                    Ok(Arc::new(CommandExtractor::new(program, self.ai_args.clone())) as Arc<dyn AiExtractor>)
                })
                .with_context(|| format!("Failed to set up extractor {name}"))?;
            run = run.with_extractor(extractor);
        }
        Ok(run)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Parse scenarios and write mockup tables
    Generate {
        #[command(flatten)]
        scenarios: ScenarioArgs,
        /// Code directory workbook
        #[arg(short, long)]
        codes: Option<PathBuf>,
        /// Output directory
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
        /// Output format: parquet, csv or both
        #[arg(short, long, default_value = "parquet")]
        format: OutputFormat,
        /// Only emit the visits scenarios name
        #[arg(long)]
        scenario_only: bool,
        /// Accept codes outside their validity window
        #[arg(long)]
        no_code_date_validation: bool,
    },
    /// Parse scenarios and print them as JSON
    Parse {
        #[command(flatten)]
        scenarios: ScenarioArgs,
        /// Pretty-print JSON output
        #[arg(short, long)]
        pretty: bool,
    },
    /// Summarize a code directory or look up codes in it
    InspectCodes {
        /// Code directory workbook
        codes: PathBuf,
        /// Measurement year
        #[arg(short, long, default_value_t = DEFAULT_MEASUREMENT_YEAR)]
        year: i32,
        /// List value sets matching this pattern
        #[arg(short, long)]
        pattern: Option<String>,
        /// Check whether a code is valid for the measurement year
        #[arg(long)]
        code: Option<String>,
        /// Value sets to list in the summary
        #[arg(long, default_value_t = 20)]
        sample: usize,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Generate {
            scenarios,
            codes,
            output,
            format,
            scenario_only,
            no_code_date_validation,
        } => {
            let mut config = scenarios
                .config()
                .with_code_date_validation(!no_code_date_validation);
            if scenario_only {
                config = config.with_visit_depth(VisitDepth::ScenarioOnly);
            }
            handle_generate(&scenarios, codes, output, format, config)
        }
        Commands::Parse { scenarios, pretty } => handle_parse(&scenarios, pretty),
        Commands::InspectCodes {
            codes,
            year,
            pattern,
            code,
            sample,
        } => handle_inspect(&codes, year, pattern.as_deref(), code.as_deref(), sample),
    }
}

fn handle_generate(
    args: &ScenarioArgs,
    codes: Option<PathBuf>,
    output: PathBuf,
    format: OutputFormat,
    config: GenerationConfig,
) -> Result<()> {
    let resources = ResourceManager::new();
    let run = args.run(&resources, output, codes, config)?.with_format(format);
    let mut observer = ProgressObserver::new();

    let report = run
        .run(&resources, &mut observer)
        .with_context(|| format!("Generation failed for {}", args.scenarios.display()))?;

    print_generation_summary(&report.summary, &report.files);
    print_quality_report(&report.quality, 25);
    Ok(())
}

fn handle_parse(args: &ScenarioArgs, pretty: bool) -> Result<()> {
    let resources = ResourceManager::new();
    let run = args.run(&resources, PathBuf::new(), None, args.config())?;
    let measure = run
        .load_measure()
        .with_context(|| format!("Failed to load measure {}", args.measure.display()))?;
    let schema = run.load_schema(&measure).context("Failed to load schema")?;
    let scenarios = run
        .parse(&measure, &schema)
        .with_context(|| format!("Failed to parse {}", args.scenarios.display()))?;

    info!("Parsed {} scenario(s)", scenarios.len());
    let json = if pretty {
        serde_json::to_string_pretty(&scenarios)?
    } else {
        serde_json::to_string(&scenarios)?
    };
    println!("{json}");
    Ok(())
}

fn handle_inspect(
    path: &Path,
    year: i32,
    pattern: Option<&str>,
    code: Option<&str>,
    sample: usize,
) -> Result<()> {
    let spinner = create_spinner(Some("Loading code directory"));
    let codes = CodeResolver::load(path, year)
        .with_context(|| format!("Failed to load code directory {}", path.display()))?;
    finish_progress_bar(&spinner, Some("Code directory loaded"));

    print_code_directory(&codes, sample);

    if let Some(pattern) = pattern {
        let matches = codes.find_value_sets(pattern, false);
        println!("{} value set(s) match '{pattern}':", matches.len());
        for name in matches {
            println!("  - {name}: {}", codes.get_codes(name, true).join(", "));
        }
    }

    if let Some(code) = code {
        println!(
            "{code} [{}]: {}",
            codes.get_code_system(code),
            codes.is_code_valid(code, None)
        );
    }
    Ok(())
}
