//! # LoanLens Core
//!
//! The request-to-explanation pipeline for loan approval decisions.
//!
//! ```text
//! RawApplication ─validate─► LoanApplication ─encode─► [f64; n]
//!                                                        │
//!                         ┌──────────────────────────────┤
//!                         ▼                              ▼
//!                   TreeEnsemble ──► Prediction    Explainer ──► Explanation
//!                                                        │
//!                                                        ▼
//!                                                  Recommender ──► RecommendationReport
//! ```
//!
//! This crate performs no I/O. Model bundles come in as bytes and every
//! result goes out as a plain serializable value. The app layer
//! (`apps/loanlens`) owns files, sockets and logging.

pub mod application;
pub mod cache;
pub mod encoder;
pub mod explainer;
pub mod formats;
pub mod model;
pub mod pipeline;
pub mod predictor;
pub mod recommender;
pub mod report;
pub mod template;

mod ordered;

pub use application::{
    Education, Feature, LoanApplication, RawApplication, SelfEmployed, ValidationError,
};
pub use encoder::FeatureEncoder;
pub use explainer::{
    Attribution, ExactExplainer, Explainer, ExplainerKind, Explanation, Impact, TopFeature,
    TreeExplainer,
};
pub use formats::ModelBundle;
pub use model::{Classifier, DecisionTree, EnsembleKind, TreeEnsemble, TreeNode};
pub use pipeline::{ModelInfo, ModelSummary, Pipeline, PipelineOptions};
pub use predictor::{Confidence, Prediction};
pub use recommender::{FeatureValue, Priority, Recommendation, RecommendationReport};
pub use template::{CsvTable, JsonTemplate};

use thiserror::Error;

/// Label of the class whose probability explanations are expressed in.
pub const APPROVED_LABEL: &str = "Approved";

// =============================================================================
// ERROR TYPE
// =============================================================================

/// Errors produced by the LoanLens pipeline.
#[derive(Debug, Error)]
pub enum LoanLensError {
    /// The application failed input validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The model bundle is structurally invalid.
    #[error("invalid model bundle: {0}")]
    InvalidBundle(String),

    /// The model bundle could not be decoded.
    #[error("failed to decode model bundle: {0}")]
    Decode(String),

    /// The model bundle could not be encoded.
    #[error("failed to encode model bundle: {0}")]
    Encode(String),

    /// The binary bundle checksum does not match its payload.
    #[error("bundle checksum mismatch: header {expected:#018x}, payload {actual:#018x}")]
    ChecksumMismatch { expected: u64, actual: u64 },

    /// The binary bundle uses a version or checksum this build cannot read.
    #[error("unsupported bundle format: {0}")]
    UnsupportedFormat(String),

    /// No model with this name is loaded.
    #[error("Model {0} not found")]
    UnknownModel(String),

    /// No class with this label exists in the bundle.
    #[error("class label {0} not found")]
    UnknownClass(String),

    /// The exact explainer was selected but the bundle carries no background rows.
    #[error("exact explainer requires background rows in the model bundle")]
    MissingBackground,

    /// Coalition enumeration is bounded by the feature count.
    #[error("exact explainer supports at most {max} features, model has {count}")]
    TooManyFeatures { count: usize, max: usize },

    /// A batch item failed; the whole batch is rejected.
    #[error("item {index}: {source}")]
    Batch {
        index: usize,
        #[source]
        source: Box<LoanLensError>,
    },

    /// Malformed CSV input.
    #[error("CSV line {line}: {message}")]
    Csv { line: usize, message: String },
}

/// Result alias for the core crate.
pub type Result<T> = std::result::Result<T, LoanLensError>;
