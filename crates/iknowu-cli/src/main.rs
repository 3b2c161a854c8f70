use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use iknowu_core::{CnnClassifier, CnnSettings, Inferrer, Predictor, Report, Trainer, DEFAULT_EPOCHS};
use iknowu_dataset::{Obtainer, Purpose};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod config;
mod logging;

use config::{ConfigStore, DEFAULT_CONFIG};
use logging::{LogOptions, Logger};

const VERBOSITY_HELP: &str = "DEBUG, INFO, WARNING, ERROR (default) or CRITICAL";

#[derive(Parser)]
#[command(
    name = "iknowu",
    version,
    about = "Machine Learning image categorisation",
    after_help = "Config file: --config, else $IKNOWU_CONFIG, else ./config.json\n\
                  Logging: $IKNOWU_LOG_SINK (console|syslog), $IKNOWU_LOG_NAME"
)]
struct Cli {
    /// Configuration file (JSON, YAML or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Obtain data (import pictures)
    Obtain {
        /// Directory holding the pictures to import
        #[arg(short, long)]
        directory: PathBuf,
        /// Person's name
        #[arg(short, long)]
        name: String,
        /// Desired purpose: training or evaluate
        #[arg(short, long)]
        purpose: Purpose,
        #[arg(short, long, help = VERBOSITY_HELP)]
        verbosity: Option<String>,
    },
    /// Train model
    Train {
        /// Epochs
        #[arg(short, long, default_value_t = DEFAULT_EPOCHS)]
        epochs: usize,
        /// Write report.csv and report.png to the working directory
        #[arg(short, long)]
        report: bool,
        #[arg(short, long, help = VERBOSITY_HELP)]
        verbosity: Option<String>,
    },
    /// Do an infer
    Infer {
        /// Image file
        #[arg(short, long)]
        file: PathBuf,
        /// Model used for prediction
        #[arg(long, value_enum, default_value_t = Backend::Cnn)]
        backend: Backend,
        #[arg(short, long, help = VERBOSITY_HELP)]
        verbosity: Option<String>,
    },
}

impl Commands {
    fn verbosity(&self) -> Option<&str> {
        match self {
            Commands::Obtain { verbosity, .. }
            | Commands::Train { verbosity, .. }
            | Commands::Infer { verbosity, .. } => verbosity.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Trained model.mpk
    Cnn,
    /// Exported model.onnx
    Onnx,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let logger = match Logger::start(&LogOptions::from_env()) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("iknowu: {e}");
            return ExitCode::FAILURE;
        }
    };

    let path = config_path(cli.config, std::env::var_os("IKNOWU_CONFIG"));
    let config = ConfigStore::load(&path);
    tracing::debug!(path = %config.path().display(), format = ?config.source(), "configuration");

    match run(cli.command, &config, &logger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// `--config`, else `$IKNOWU_CONFIG`, else `config.json`.
fn config_path(flag: Option<PathBuf>, env: Option<OsString>) -> PathBuf {
    flag.or_else(|| env.filter(|v| !v.is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
}

fn run(command: Commands, config: &ConfigStore, logger: &Logger) -> Result<()> {
    let verbosity = logger.set_verbosity(command.verbosity())?;
    tracing::debug!(logger = logger.name(), ?verbosity, level = ?logger.level(), "verbosity set");

    match command {
        Commands::Obtain {
            directory,
            name,
            purpose,
            ..
        } => obtain(config, &directory, &name, purpose),
        Commands::Train { epochs, report, .. } => {
            let workdir = std::env::current_dir().context("cannot resolve working directory")?;
            train(config, epochs, report.then_some(workdir.as_path()))
        }
        Commands::Infer { file, backend, .. } => {
            let person = infer(config, &file, backend)?;
            println!("{person}");
            Ok(())
        }
    }
}

fn obtain(config: &ConfigStore, source: &Path, name: &str, purpose: Purpose) -> Result<()> {
    tracing::info!("Running obtain...");
    let destination = config.directory()?;

    let mut obtainer = Obtainer::new();
    obtainer
        .configure(source, &destination, purpose, name)
        .context("obtain failed")?;
    let info = obtainer.info()?;
    tracing::info!(info = %serde_json::to_string(&info)?, "obtain plan");

    let copied = obtainer.run().context("obtain failed")?;
    println!(
        "{copied} file(s) copied from {} to {}",
        info.source.path.display(),
        info.destination.path.display()
    );
    tracing::info!("Done");
    Ok(())
}

fn train(config: &ConfigStore, epochs: usize, report: Option<&Path>) -> Result<()> {
    tracing::info!("Running train...");
    let directory = config.directory()?;
    let settings: CnnSettings = config.get().model.clone();

    let mut trainer = Trainer::configure(&directory).context("train failed")?;
    let history = trainer
        .run(epochs, |classes| CnnClassifier::new(classes, settings))
        .context("train failed")?;
    let artifact = trainer.save().context("saving the trained model failed")?;
    tracing::info!(artifact = %artifact.display(), "model saved");

    println!("{}", serde_json::to_string_pretty(&history)?);
    if let Some(dir) = report {
        Report::new(&history).save(dir)?;
    }
    tracing::info!("Done");
    Ok(())
}

fn infer(config: &ConfigStore, file: &Path, backend: Backend) -> Result<String> {
    tracing::info!("Running infer...");
    let directory = config.directory()?;

    let inferrer = Inferrer::configure(&directory, file, config.nicks()).context("infer failed")?;
    let settings = &config.get().model;
    let mut predictor: Box<dyn Predictor> = match backend {
        Backend::Cnn => Box::new(CnnClassifier::load(&directory, settings.clone())?),
        Backend::Onnx => onnx_predictor(&directory, settings.image_size)?,
    };

    let prediction = inferrer.run(predictor.as_mut()).context("infer failed")?;
    let name = config.person(&prediction.person).and_then(|p| p.name());
    tracing::info!(person = %prediction.person, name, "Person");
    tracing::info!(index = prediction.index, scores = ?prediction.scores, "Class");
    tracing::info!("Done");
    Ok(prediction.person)
}

#[cfg(feature = "onnx")]
fn onnx_predictor(directory: &Path, image_size: u32) -> Result<Box<dyn Predictor>> {
    Ok(Box::new(iknowu_core::OnnxPredictor::load(directory, image_size)?))
}

#[cfg(not(feature = "onnx"))]
fn onnx_predictor(_directory: &Path, _image_size: u32) -> Result<Box<dyn Predictor>> {
    anyhow::bail!("this build has no ONNX support; rebuild with `--features onnx`")
}
