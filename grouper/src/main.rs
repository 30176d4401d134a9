use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{Value, json};

use grouping::cache::MemoryCache;
use grouping::enhancer::{Enhancements, InvalidEnhancerConfig};
use grouping::errors::GroupingError;
use grouping::event::Event;
use grouping::fingerprinting::{FingerprintingRules, InvalidFingerprintingConfig};
use grouping::loader::{get_background_grouping_config_dict, get_grouping_config_dict_for_event_data};
use grouping::project::StaticProject;
use grouping::registry::default_configuration;
use grouping::{api, calculate_event_grouping, load_grouping_config};

mod config;
use config::{Config, ConfigError, MetricsConfig};

#[derive(Parser)]
#[command(about = "Computes and explains the grouping of Sentry events")]
struct Cli {
    /// YAML config file with logging, metrics and grouping settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Prints the grouping variants and hashes of an event.
    Variants {
        #[arg(long)]
        event: PathBuf,
        /// JSON file with the project id and options.
        #[arg(long)]
        project: Option<PathBuf>,
    },
    /// Parses stack trace rules and prints their serialized form.
    CheckEnhancements {
        file: PathBuf,
        #[arg(long)]
        base: Option<String>,
    },
    /// Parses fingerprinting rules and prints them as JSON.
    CheckFingerprinting { file: PathBuf },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not read input: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Grouping(#[from] GroupingError),
    #[error("could not initialize logging: {0}")]
    Logging(#[from] shared::logging::LoggingError),
    #[error("could not initialize metrics: {0}")]
    Metrics(String),
}

impl From<InvalidEnhancerConfig> for CliError {
    fn from(err: InvalidEnhancerConfig) -> Self {
        CliError::Grouping(err.into())
    }
}

impl From<InvalidFingerprintingConfig> for CliError {
    fn from(err: InvalidFingerprintingConfig) -> Self {
        CliError::Grouping(err.into())
    }
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = metrics_exporter_statsd::StatsdBuilder::from(&config.statsd_host, config.statsd_port)
        .build(Some("grouper"))
        .map_err(|err| CliError::Metrics(err.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|err| CliError::Metrics(err.to_string()))?;
    shared::metrics_defs::describe_metrics(grouping::metrics_defs::ALL_METRICS);
    Ok(())
}

fn read_json(path: &Path) -> Result<Value, CliError> {
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn variants(config: &Config, event: &Path, project: Option<&Path>) -> Result<(), CliError> {
    let cache = MemoryCache::new(&config.grouping.cache);
    let project: StaticProject = match project {
        Some(path) => serde_json::from_value(read_json(path)?)?,
        None => StaticProject::default(),
    };
    let mut event = Event::new(read_json(event)?);

    let config_dict = get_grouping_config_dict_for_event_data(&event.data, &project, &cache)?;
    let hashes = calculate_event_grouping(&project, &mut event, &config_dict, &cache)?;
    let grouping_config = load_grouping_config(Some(&config_dict))?;
    let mut output = json!({
        "config": config_dict,
        "variants": api::get_grouping_info(&event, &grouping_config),
        "hashes": hashes,
    });

    if let Some(background_dict) =
        get_background_grouping_config_dict(&project, &cache, &config.grouping)
    {
        let background_config = load_grouping_config(Some(&background_dict))?;
        let background_hashes = api::get_hashes_for_event(&event, &background_config);
        if let Some(map) = output.as_object_mut() {
            map.insert("background_config".to_owned(), serde_json::to_value(&background_dict)?);
            map.insert("background_hashes".to_owned(), serde_json::to_value(background_hashes)?);
        }
    }

    print_json(&output)
}

fn check_enhancements(file: &Path, base: Option<&str>) -> Result<(), CliError> {
    let input = std::fs::read_to_string(file)?;
    let base = base.unwrap_or(default_configuration().enhancements_base);
    let enhancements = Enhancements::from_config_string(&input, &[base])?;
    tracing::info!(rules = enhancements.rules().len(), base, "Parsed enhancements");
    println!("{}", enhancements.dumps()?);
    Ok(())
}

fn check_fingerprinting(file: &Path) -> Result<(), CliError> {
    let input = std::fs::read_to_string(file)?;
    let rules = FingerprintingRules::from_config_string(&input, Vec::new())?;
    print_json(&rules.to_json(false))
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let _guard = shared::logging::init(&config.logging)?;
    if let Some(metrics) = &config.metrics {
        init_metrics(metrics)?;
    }

    match &cli.command {
        CliCommand::Variants { event, project } => variants(&config, event, project.as_deref()),
        CliCommand::CheckEnhancements { file, base } => check_enhancements(file, base.as_deref()),
        CliCommand::CheckFingerprinting { file } => check_fingerprinting(file),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "grouper failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
