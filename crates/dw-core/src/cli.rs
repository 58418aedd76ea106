//! Command-line interface.
//!
//! Subcommands:
//! - `score`: run the pipeline over a batch file, one run per device
//! - `history`: print a device's stored scores
//! - `export`: write the whole score store as a Parquet `scores` table
//! - `refresh`: re-score a historical window and re-apply the failure rule
//!
//! Every command prints its result on stdout (JSON by default) and returns
//! an [`ExitCode`]; diagnostics go through `tracing` to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use dw_common::{DeviceId, Error, OutputFormat, SCHEMA_VERSION};
use dw_config::{
    resolve_config, ColumnMapping, ConfigError, ConfigPaths, ConfigSnapshot, ModelBundle,
    ModelBundleError, PipelineConfig,
};
use dw_telemetry::{
    drive_schema_for, parse_records, samples_from_records, write_features, BatchedWriter,
    SampleSchema, ScoreRow, TelemetrySample, WriteError, WriterConfig,
};
use serde::Serialize;
use tracing::{error, info};

use crate::alert::{AssetRegistry, FailureRule, MemoryAssetRegistry};
use crate::exit_codes::ExitCode;
use crate::history::{JsonScoreStore, ScoreStore};
use crate::logging::{init_logging, Verbosity};
use crate::pipeline::{Pipeline, RunError, RunOutcome, RunReport};
use crate::refresh::{MemorySource, RefreshJob};
use crate::score::LogisticModel;

/// Drive failure scoring pipeline.
#[derive(Parser, Debug)]
#[command(name = "dw-core", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Pipeline config file (overrides DW_CONFIG and the XDG config)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Score store file (overrides the config's store_path)
    #[arg(long, global = true, value_name = "PATH")]
    pub store: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Where a batch comes from.
#[derive(Args, Debug)]
pub struct BatchInput {
    /// JSON array of telemetry samples (requires --schema)
    #[arg(long, value_name = "PATH", conflicts_with = "records", requires = "schema")]
    pub samples: Option<PathBuf>,

    /// Sample schema for --samples
    #[arg(long, value_name = "PATH")]
    pub schema: Option<PathBuf>,

    /// JSON-lines drive-day records
    #[arg(long, value_name = "PATH", required_unless_present = "samples")]
    pub records: Option<PathBuf>,

    /// Column-to-metric mapping for --records (default: drive-stats columns)
    #[arg(long, value_name = "PATH")]
    pub mapping: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Score a batch and upsert the scores
    Score {
        #[command(flatten)]
        input: BatchInput,

        /// Model bundle
        #[arg(long, value_name = "PATH")]
        model: PathBuf,

        /// Also write each device's feature matrix to <DIR>/<device>.parquet
        #[arg(long, value_name = "DIR")]
        dump_features: Option<PathBuf>,
    },
    /// Print stored scores of a device
    History {
        #[arg(long)]
        device: String,
    },
    /// Export the score store to Parquet
    Export {
        #[arg(long, value_name = "PATH")]
        out: PathBuf,
    },
    /// Re-score a historical window for every device
    Refresh {
        #[command(flatten)]
        input: BatchInput,

        /// Model bundle
        #[arg(long, value_name = "PATH")]
        model: PathBuf,

        /// Window start (default from config)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Window end, exclusive (default from config)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Skip devices whose history already covers the window
        #[arg(long)]
        no_force: bool,
    },
}

/// A command failure: exit code plus message.
#[derive(Debug)]
struct Failure {
    code: ExitCode,
    message: String,
}

impl Failure {
    fn new(code: ExitCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<Error> for Failure {
    fn from(err: Error) -> Self {
        Failure::new(ExitCode::from_error(&err), err.to_string())
    }
}

impl From<ConfigError> for Failure {
    fn from(err: ConfigError) -> Self {
        Failure::new(ExitCode::ConfigError, err.to_string())
    }
}

impl From<ModelBundleError> for Failure {
    fn from(err: ModelBundleError) -> Self {
        Failure::new(ExitCode::ConfigError, format!("model bundle: {err}"))
    }
}

impl From<WriteError> for Failure {
    fn from(err: WriteError) -> Self {
        Failure::new(ExitCode::IoError, err.to_string())
    }
}

impl From<RunError> for Failure {
    fn from(err: RunError) -> Self {
        Failure::new(ExitCode::from(&err), err.to_string())
    }
}

type CmdResult = Result<ExitCode, Failure>;

/// Parse-free entry point used by `main`.
pub fn run(cli: Cli) -> ExitCode {
    init_logging(
        Verbosity::from_flags(cli.global.verbose, cli.global.quiet),
        cli.global.log_json,
    );
    match dispatch(&cli) {
        Ok(code) => code,
        Err(failure) => {
            error!(code = failure.code.as_i32(), "{}", failure.message);
            eprintln!("error: {}", failure.message);
            failure.code
        }
    }
}

fn dispatch(cli: &Cli) -> CmdResult {
    let (config, source) = resolve_config(&ConfigPaths::discover(cli.global.config.clone()))?;
    let snapshot = ConfigSnapshot::capture(&config, source)?;
    info!(source = %snapshot.source, hash = %snapshot.config_hash, "configuration resolved");
    let ctx = Context {
        format: cli.global.format,
        store_path: store_path(cli.global.store.as_deref(), &config),
        config,
        snapshot,
    };

    match &cli.command {
        Commands::Score {
            input,
            model,
            dump_features,
        } => ctx.score(input, model, dump_features.as_deref()),
        Commands::History { device } => ctx.history(&DeviceId::new(device.clone())),
        Commands::Export { out } => ctx.export(out),
        Commands::Refresh {
            input,
            model,
            start,
            end,
            no_force,
        } => ctx.refresh(input, model, *start, *end, *no_force),
    }
}

/// Default store location: `<data dir>/drivewatch/scores.json`.
pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("drivewatch")
        .join("scores.json")
}

fn store_path(cli: Option<&Path>, config: &PipelineConfig) -> PathBuf {
    cli.map(Path::to_path_buf)
        .or_else(|| config.store_path.clone())
        .unwrap_or_else(default_store_path)
}

fn read_file(path: &Path) -> Result<String, Failure> {
    std::fs::read_to_string(path)
        .map_err(|e| Failure::new(ExitCode::IoError, format!("reading {}: {e}", path.display())))
}

/// Load the batch and its schema.
fn load_batch(input: &BatchInput) -> Result<(SampleSchema, Vec<TelemetrySample>), Failure> {
    if let (Some(samples), Some(schema)) = (&input.samples, &input.schema) {
        let schema = SampleSchema::from_json(&read_file(schema)?)?;
        let samples: Vec<TelemetrySample> =
            serde_json::from_str(&read_file(samples)?).map_err(Error::from)?;
        return Ok((schema, samples));
    }
    let Some(records) = &input.records else {
        return Err(Failure::new(
            ExitCode::ConfigError,
            "either --samples with --schema or --records is required",
        ));
    };
    let mapping = match &input.mapping {
        Some(path) => ColumnMapping::load(path)?,
        None => ColumnMapping::drive_stats(),
    };
    let records = parse_records(&read_file(records)?)?;
    let samples = samples_from_records(&records, &mapping)?;
    Ok((drive_schema_for(&records, &mapping)?, samples))
}

/// Split a batch per device, keeping first-appearance order of devices and
/// the original order of samples.
fn group_by_device(samples: Vec<TelemetrySample>) -> Vec<(DeviceId, Vec<TelemetrySample>)> {
    let mut groups: Vec<(DeviceId, Vec<TelemetrySample>)> = Vec::new();
    for sample in samples {
        match groups.iter_mut().find(|(id, _)| *id == sample.device_id) {
            Some((_, group)) => group.push(sample),
            None => groups.push((sample.device_id.clone(), vec![sample])),
        }
    }
    groups
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Failure> {
    let json = serde_json::to_string_pretty(value).map_err(Error::from)?;
    println!("{json}");
    Ok(())
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_version: &'static str,
    command: &'static str,
    generated_at: String,
    config: &'a ConfigSnapshot,
    #[serde(flatten)]
    body: T,
}

#[derive(Serialize)]
struct RunFailure {
    device: DeviceId,
    stage: String,
    code: u32,
    message: String,
}

#[derive(Serialize)]
struct ScoreBody {
    runs: Vec<RunReport>,
    errors: Vec<RunFailure>,
}

struct Context {
    format: OutputFormat,
    store_path: PathBuf,
    config: PipelineConfig,
    snapshot: ConfigSnapshot,
}

impl Context {
    fn envelope<T: Serialize>(&self, command: &'static str, body: T) -> Envelope<'_, T> {
        Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            generated_at: Utc::now().to_rfc3339(),
            config: &self.snapshot,
            body,
        }
    }

    fn open_store(&self) -> Result<Arc<JsonScoreStore>, Failure> {
        Ok(Arc::new(JsonScoreStore::open(&self.store_path)?))
    }

    fn pipeline(
        &self,
        schema: SampleSchema,
        model: &Path,
        store: Arc<dyn ScoreStore>,
    ) -> Result<Pipeline, Failure> {
        let bundle = ModelBundle::load_from_file(model)?;
        info!(model = %bundle.model.name, version = %bundle.bundle_version, "model loaded");
        let model = Arc::new(LogisticModel::from_bundle(&bundle));
        Ok(Pipeline::from_config(&self.config, schema, model, store))
    }

    fn score(&self, input: &BatchInput, model: &Path, dump: Option<&Path>) -> CmdResult {
        let (schema, samples) = load_batch(input)?;
        let store = self.open_store()?;
        let pipeline = self.pipeline(schema, model, store)?;
        let groups = group_by_device(samples);

        let mut runs = Vec::new();
        let mut failures = Vec::new();
        for (device, batch) in &groups {
            if let Some(dir) = dump {
                self.dump_features(&pipeline, dir, device, batch)?;
            }
            match pipeline.run(device, batch) {
                Ok(report) => runs.push(report),
                Err(e) => failures.push(e),
            }
        }

        let code = match (failures.as_slice(), groups.len()) {
            ([], _) if runs.iter().all(|r| r.outcome == RunOutcome::NoData) => ExitCode::NoData,
            ([], _) => ExitCode::Clean,
            ([only], 1) => ExitCode::from(only),
            _ => ExitCode::PartialFail,
        };

        match self.format {
            OutputFormat::Json => {
                let errors = failures
                    .iter()
                    .map(|e| RunFailure {
                        device: e.device.clone(),
                        stage: e.stage.to_string(),
                        code: e.source.code(),
                        message: e.to_string(),
                    })
                    .collect();
                print_json(&self.envelope("score", ScoreBody { runs, errors }))?;
            }
            OutputFormat::Summary => {
                for r in &runs {
                    match &r.outcome {
                        RunOutcome::Scored { rows, applied } => {
                            println!("{}  scored {rows} rows, {applied} upserted", r.device)
                        }
                        RunOutcome::NoData => println!("{}  no data", r.device),
                    }
                }
                for e in &failures {
                    println!("{}  FAILED at {}: {}", e.device, e.stage, e.source);
                }
            }
        }
        Ok(code)
    }

    fn dump_features(
        &self,
        pipeline: &Pipeline,
        dir: &Path,
        device: &DeviceId,
        batch: &[TelemetrySample],
    ) -> Result<(), Failure> {
        let dataset = pipeline.features(device, batch)?;
        std::fs::create_dir_all(dir).map_err(Error::from)?;
        let path = dir.join(format!("{device}.parquet"));
        let rows = write_features(
            &path,
            dataset.columns(),
            dataset.index(),
            dataset.data(),
            &WriterConfig::default(),
        )?;
        info!(device = %device, rows, path = %path.display(), "features dumped");
        Ok(())
    }

    fn history(&self, device: &DeviceId) -> CmdResult {
        let store = self.open_store()?;
        let points = store.history(device)?;
        match self.format {
            OutputFormat::Json => {
                #[derive(Serialize)]
                struct Body<'a> {
                    device: &'a DeviceId,
                    scores: Vec<ScorePoint>,
                }
                #[derive(Serialize)]
                struct ScorePoint {
                    timestamp: String,
                    score: f64,
                }
                let scores = points
                    .iter()
                    .map(|p| ScorePoint {
                        timestamp: p.timestamp.to_rfc3339(),
                        score: p.value,
                    })
                    .collect();
                print_json(&self.envelope("history", Body { device, scores }))?;
            }
            OutputFormat::Summary => {
                for p in &points {
                    println!("{}  {:.6}", p.timestamp.to_rfc3339(), p.value);
                }
            }
        }
        Ok(if points.is_empty() {
            ExitCode::NoData
        } else {
            ExitCode::Clean
        })
    }

    fn export(&self, out: &Path) -> CmdResult {
        let store = self.open_store()?;
        let mut writer = BatchedWriter::create(out, WriterConfig::default())?;
        for device in store.devices()? {
            for p in store.history(&device)? {
                writer.push(ScoreRow {
                    device_id: device.to_string(),
                    timestamp: p.timestamp,
                    score: p.value,
                })?;
            }
        }
        let rows = writer.finish()?;
        info!(rows, path = %out.display(), "exported scores");

        #[derive(Serialize)]
        struct Body {
            path: String,
            rows: usize,
        }
        match self.format {
            OutputFormat::Json => print_json(&self.envelope(
                "export",
                Body {
                    path: out.display().to_string(),
                    rows,
                },
            ))?,
            OutputFormat::Summary => println!("exported {rows} rows to {}", out.display()),
        }
        Ok(ExitCode::Clean)
    }

    fn refresh(
        &self,
        input: &BatchInput,
        model: &Path,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        no_force: bool,
    ) -> CmdResult {
        let mut window = self.config.refresh.clone();
        window.start = start.unwrap_or(window.start);
        window.end = end.unwrap_or(window.end);
        window.force_reeval = window.force_reeval && !no_force;
        if window.start >= window.end {
            return Err(Failure::new(
                ExitCode::ConfigError,
                format!("refresh window start {} must be before end {}", window.start, window.end),
            ));
        }

        let (schema, samples) = load_batch(input)?;
        let store = self.open_store()?;
        let pipeline = self.pipeline(schema, model, store)?;
        let registry = MemoryAssetRegistry::new();
        let source = MemorySource::from_samples(samples);
        let rule = FailureRule::from_config(&self.config);
        let job = RefreshJob::new(&pipeline, &registry, rule, window);
        let summary = job.run(&source)?;
        let statuses = registry.all()?;

        match self.format {
            OutputFormat::Json => {
                #[derive(Serialize)]
                struct Body<'a> {
                    summary: &'a crate::refresh::RefreshSummary,
                    failed_devices: Vec<crate::alert::DeviceStatus>,
                }
                print_json(&self.envelope(
                    "refresh",
                    Body {
                        summary: &summary,
                        failed_devices: statuses,
                    },
                ))?;
            }
            OutputFormat::Summary => {
                println!(
                    "{} devices: {} scored, {} without data, {} current, {} errors",
                    summary.devices,
                    summary.scored,
                    summary.no_data,
                    summary.skipped_current,
                    summary.errors.len()
                );
                for s in &statuses {
                    println!("{}  Failed since {}", s.id, s.failure_date.date_naive());
                }
            }
        }
        Ok(if summary.is_clean() {
            ExitCode::Clean
        } else {
            ExitCode::PartialFail
        })
    }
}
