//! # Command Line Interface
//!
//! Argument definitions and the `cmd_*` implementations behind each
//! subcommand. Commands return their output as a string; `main` prints it.

use crate::api::types::{ExplanationResponse, PredictionResponse, application_from_json};
use crate::config::{
    ConfigError, DEFAULT_BIND, DEFAULT_MAX_BATCH, DEFAULT_MAX_BODY_BYTES, DEFAULT_MODELS_PATH,
    DEFAULT_RATE_LIMIT, ServerConfig,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use loanlens_core::cache::DEFAULT_CACHE_CAPACITY;
use loanlens_core::explainer::DEFAULT_MAX_BACKGROUND;
use loanlens_core::{
    ExplainerKind, LoanLensError, ModelBundle, Pipeline, PipelineOptions, RawApplication, report,
    template,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] LoanLensError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("server error: {0}")]
    Server(std::io::Error),
}

fn read(path: &Path) -> Result<Vec<u8>, CliError> {
    std::fs::read(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, contents: &[u8]) -> Result<(), CliError> {
    std::fs::write(path, contents).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// =============================================================================
// ARGUMENTS
// =============================================================================

/// LoanLens: loan approval predictions with SHAP explanations.
#[derive(Debug, Parser)]
#[command(name = "loanlens", version, about)]
pub struct Cli {
    /// Model bundle (JSON or binary).
    #[arg(long, global = true, env = "LOANLENS_MODELS", default_value = DEFAULT_MODELS_PATH)]
    pub models: PathBuf,

    /// SHAP backend.
    #[arg(long, global = true, value_enum, default_value_t = ExplainerArg::Tree)]
    pub explainer: ExplainerArg,

    /// Background rows used by the exact explainer.
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_BACKGROUND)]
    pub max_background: usize,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExplainerArg {
    Tree,
    Exact,
}

impl From<ExplainerArg> for ExplainerKind {
    fn from(arg: ExplainerArg) -> Self {
        match arg {
            ExplainerArg::Tree => ExplainerKind::Tree,
            ExplainerArg::Exact => ExplainerKind::Exact,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TemplateFormat {
    Csv,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BundleFormat {
    Json,
    Binary,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP API.
    Serve(ServeArgs),

    /// Predict one application from a JSON file.
    Predict(ApplicationArgs),

    /// Explain one application from a JSON file.
    Explain(ApplicationArgs),

    /// Recommend improvements for one application from a JSON file.
    Recommend(ApplicationArgs),

    /// Score a CSV file of applications.
    Batch {
        /// Input CSV with a header row.
        input: PathBuf,
        /// Write predictions here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Model name (defaults to the bundle default).
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Print or save the application template.
    Template {
        #[arg(short, long, value_enum, default_value_t = TemplateFormat::Csv)]
        format: TemplateFormat,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Describe the loaded model bundle.
    Inspect {
        #[arg(long)]
        json: bool,
    },

    /// Re-encode a model bundle as JSON or checksummed binary.
    Convert {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = BundleFormat::Binary)]
        to: BundleFormat,
    },
}

#[derive(Debug, Args)]
pub struct ApplicationArgs {
    /// JSON file holding one application.
    pub input: PathBuf,
    /// Model name (defaults to the bundle default).
    #[arg(short, long)]
    pub model: Option<String>,
    /// Print JSON instead of a text report.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Listen address.
    #[arg(long, env = "LOANLENS_BIND", default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,
    /// Explanations kept in the LRU cache; 0 disables it.
    #[arg(long, default_value_t = DEFAULT_CACHE_CAPACITY)]
    pub cache_capacity: usize,
    /// Requests per second; 0 disables rate limiting.
    #[arg(long, default_value_t = DEFAULT_RATE_LIMIT)]
    pub rate_limit: u32,
    /// Allowed CORS origin (repeatable). Permissive when absent.
    #[arg(long = "cors-origin")]
    pub cors_origins: Vec<String>,
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,
    #[arg(long, default_value_t = DEFAULT_MAX_BATCH)]
    pub max_batch: usize,
}

impl Cli {
    #[must_use]
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            explainer: self.explainer.into(),
            max_background: self.max_background,
            ..PipelineOptions::default()
        }
    }

    /// Resolve `serve` arguments into a validated server config.
    pub fn server_config(&self, args: &ServeArgs) -> Result<ServerConfig, CliError> {
        let config = ServerConfig {
            bind: args.bind,
            models_path: self.models.clone(),
            pipeline: PipelineOptions {
                cache_capacity: args.cache_capacity,
                ..self.pipeline_options()
            },
            rate_limit_per_second: args.rate_limit,
            cors_origins: args.cors_origins.clone(),
            max_body_bytes: args.max_body_bytes,
            max_batch: args.max_batch,
        };
        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

/// Load a bundle from disk and build its pipeline.
pub fn load_pipeline(models: &Path, options: PipelineOptions) -> Result<Pipeline, CliError> {
    let bytes = read(models)?;
    let pipeline = Pipeline::from_bytes(&bytes, options)?;
    tracing::debug!(path = %models.display(), ?pipeline, "model bundle loaded");
    Ok(pipeline)
}

/// Read one application from a JSON file.
pub fn read_application(path: &Path) -> Result<RawApplication, CliError> {
    let value: serde_json::Value = serde_json::from_slice(&read(path)?)?;
    application_from_json(value).map_err(CliError::InvalidInput)
}

pub fn cmd_predict(
    pipeline: &Pipeline,
    input: &Path,
    model: Option<&str>,
    json: bool,
) -> Result<String, CliError> {
    let raw = read_application(input)?;
    let prediction = pipeline.predict(&raw, model)?;
    if json {
        Ok(serde_json::to_string_pretty(&PredictionResponse::from(prediction))?)
    } else {
        Ok(report::prediction_text(&prediction))
    }
}

pub fn cmd_explain(
    pipeline: &Pipeline,
    input: &Path,
    model: Option<&str>,
    json: bool,
) -> Result<String, CliError> {
    let raw = read_application(input)?;
    let explanation = pipeline.explain(&raw, model)?;
    if json {
        Ok(serde_json::to_string_pretty(&ExplanationResponse::from(
            explanation,
        ))?)
    } else {
        Ok(report::explanation_text(&explanation, None))
    }
}

pub fn cmd_recommend(
    pipeline: &Pipeline,
    input: &Path,
    model: Option<&str>,
    json: bool,
) -> Result<String, CliError> {
    let raw = read_application(input)?;
    let (explanation, recommendations) = pipeline.analyze(&raw, model)?;
    if json {
        Ok(serde_json::to_string_pretty(&recommendations)?)
    } else {
        Ok(report::explanation_text(&explanation, Some(&recommendations)))
    }
}

pub fn cmd_batch(
    pipeline: &Pipeline,
    input: &Path,
    output: Option<&Path>,
    model: Option<&str>,
) -> Result<String, CliError> {
    let bytes = read(input)?;
    let text = String::from_utf8(bytes)
        .map_err(|_| CliError::InvalidInput(format!("{} is not UTF-8", input.display())))?;
    let csv = pipeline.predict_csv(&text, model)?;
    let rows = csv.lines().count().saturating_sub(1);
    let errors = csv.lines().skip(1).filter(|l| l.contains(",Error,")).count();
    tracing::info!(rows, errors, "batch scored");

    match output {
        Some(path) => {
            write(path, csv.as_bytes())?;
            Ok(format!(
                "Wrote {rows} predictions ({errors} errors) to {}",
                path.display()
            ))
        }
        None => Ok(csv),
    }
}

pub fn cmd_template(format: TemplateFormat, output: Option<&Path>) -> Result<String, CliError> {
    let contents = match format {
        TemplateFormat::Csv => template::csv_template(),
        TemplateFormat::Json => serde_json::to_string_pretty(&template::json_template())?,
    };
    match output {
        Some(path) => {
            write(path, contents.as_bytes())?;
            Ok(format!("Template written to {}", path.display()))
        }
        None => Ok(contents),
    }
}

pub fn cmd_inspect(pipeline: &Pipeline, json: bool) -> Result<String, CliError> {
    let info = pipeline.model_info();
    if json {
        return Ok(serde_json::to_string_pretty(&info)?);
    }

    let mut out = String::new();
    out.push_str(&format!("Default model: {}\n", info.default_model));
    out.push_str(&format!("Explainer:     {}\n", info.explainer));
    out.push_str(&format!("Classes:       {}\n", info.class_labels.join(", ")));
    out.push_str(&format!("Features ({}):\n", info.feature_count));
    for feature in &info.features {
        out.push_str(&format!("  - {feature}\n"));
    }
    out.push_str("Models:\n");
    for model in &info.models {
        out.push_str(&format!(
            "  - {} ({:?}): {} trees, {} nodes, depth {}\n",
            model.name, model.kind, model.trees, model.nodes, model.max_depth
        ));
    }
    if let Some(stats) = pipeline.cache_stats() {
        out.push_str(&format!("Cache capacity: {}\n", stats.capacity));
    }
    Ok(out)
}

pub fn cmd_convert(input: &Path, output: &Path, to: BundleFormat) -> Result<String, CliError> {
    let bundle = ModelBundle::decode(&read(input)?)?;
    let bytes = match to {
        BundleFormat::Json => bundle.to_json_pretty()?.into_bytes(),
        BundleFormat::Binary => bundle.to_binary()?,
    };
    write(output, &bytes)?;
    Ok(format!(
        "Converted {} -> {} ({} bytes)",
        input.display(),
        output.display(),
        bytes.len()
    ))
}

/// Run the HTTP server until shutdown.
pub async fn cmd_serve(config: ServerConfig) -> Result<(), CliError> {
    let pipeline = load_pipeline(&config.models_path, config.pipeline.clone())?;
    crate::api::serve(config, pipeline)
        .await
        .map_err(CliError::Server)
}
