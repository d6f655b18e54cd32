//! # Explainer Module
//!
//! Per-feature SHAP attribution for a single prediction, and the
//! human-facing summary built on top of it.
//!
//! Two backends implement [`Explainer`]:
//! - [`TreeExplainer`]: path-dependent TreeSHAP, using the trees' own covers
//!   as the reference distribution. Fast and background-free.
//! - [`ExactExplainer`]: interventional Shapley values against the bundle's
//!   background rows. Slower; exact for any classifier.
//!
//! Both satisfy `expected_value + sum(values) == predict_proba(x)[class]`.

mod exact;
mod tree_shap;

pub use exact::{ExactExplainer, DEFAULT_MAX_BACKGROUND, MAX_EXACT_FEATURES};
pub use tree_shap::{tree_shap, TreeExplainer};

use crate::application::Feature;
use crate::model::TreeEnsemble;
use crate::ordered::serialize_pairs;
use crate::predictor::Prediction;
use crate::{LoanLensError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of features reported as top contributors.
pub const TOP_FEATURES: usize = 5;

/// |SHAP| above which a feature gets an impact sentence.
pub const IMPACT_THRESHOLD: f64 = 0.1;

// =============================================================================
// EXPLAINER TRAIT
// =============================================================================

/// Raw attribution for one class of one encoded row.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    /// Model output for the class with no features known.
    pub expected_value: f64,
    /// One SHAP value per encoded feature.
    pub values: Vec<f64>,
}

/// A SHAP backend.
pub trait Explainer: Send + Sync {
    fn kind(&self) -> ExplainerKind;

    /// Attribute `model`'s probability of `class` at `x` to each feature.
    fn explain(&self, model: &TreeEnsemble, x: &[f64], class: usize) -> Result<Attribution>;
}

/// Which backend the pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplainerKind {
    #[default]
    Tree,
    Exact,
}

impl ExplainerKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ExplainerKind::Tree => "tree",
            ExplainerKind::Exact => "exact",
        }
    }
}

impl fmt::Display for ExplainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExplainerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tree" => Ok(ExplainerKind::Tree),
            "exact" => Ok(ExplainerKind::Exact),
            other => Err(format!("unknown explainer {other:?} (expected tree or exact)")),
        }
    }
}

// =============================================================================
// EXPLANATION
// =============================================================================

/// Direction of a feature's effect on the explained class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Impact {
    Positive,
    Negative,
}

/// One of the strongest contributors to a prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopFeature {
    /// 1-based rank by importance.
    pub rank: usize,
    pub feature: Feature,
    pub shap_value: f64,
    /// Encoded value fed to the model.
    pub feature_value: f64,
    pub impact: Impact,
    /// |shap_value|
    pub importance: f64,
}

/// A prediction with its attribution, ready for clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    pub prediction: Prediction,
    /// Label of the class the SHAP values explain.
    pub explained_class: String,
    pub expected_value: f64,
    /// SHAP value per feature, in model column order.
    #[serde(serialize_with = "serialize_pairs")]
    pub shap_values: Vec<(Feature, f64)>,
    pub top_contributing_features: Vec<TopFeature>,
    /// Sentences for features with |SHAP| > [`IMPACT_THRESHOLD`].
    #[serde(serialize_with = "serialize_pairs")]
    pub feature_impact: Vec<(Feature, String)>,
}

impl Explanation {
    /// Assemble an explanation from an attribution over `features` (model
    /// column order) evaluated at `encoded`.
    pub fn new(
        prediction: Prediction,
        explained_class: impl Into<String>,
        attribution: Attribution,
        features: &[Feature],
        encoded: &[f64],
    ) -> Result<Self> {
        if attribution.values.len() != features.len() || encoded.len() != features.len() {
            return Err(LoanLensError::InvalidBundle(format!(
                "attribution has {} values for {} features",
                attribution.values.len(),
                features.len()
            )));
        }

        let shap_values: Vec<(Feature, f64)> = features
            .iter()
            .copied()
            .zip(attribution.values.iter().copied())
            .collect();

        let mut ranked: Vec<usize> = (0..features.len()).collect();
        ranked.sort_by(|a, b| {
            attribution.values[*b]
                .abs()
                .total_cmp(&attribution.values[*a].abs())
        });
        let top_contributing_features = ranked
            .into_iter()
            .take(TOP_FEATURES)
            .enumerate()
            .map(|(position, column)| {
                let shap_value = attribution.values[column];
                TopFeature {
                    rank: position + 1,
                    feature: features[column],
                    shap_value,
                    feature_value: encoded[column],
                    impact: if shap_value > 0.0 {
                        Impact::Positive
                    } else {
                        Impact::Negative
                    },
                    importance: shap_value.abs(),
                }
            })
            .collect();

        let feature_impact = shap_values
            .iter()
            .filter(|(_, v)| v.abs() > IMPACT_THRESHOLD)
            .map(|(feature, v)| {
                let direction = if *v > 0.0 { "Increases" } else { "Decreases" };
                (
                    *feature,
                    format!("{direction} approval probability by {:.3}", v.abs()),
                )
            })
            .collect();

        Ok(Self {
            prediction,
            explained_class: explained_class.into(),
            expected_value: attribution.expected_value,
            shap_values,
            top_contributing_features,
            feature_impact,
        })
    }

    /// SHAP value of one feature.
    #[must_use]
    pub fn shap_value(&self, feature: Feature) -> Option<f64> {
        self.shap_values
            .iter()
            .find(|(f, _)| *f == feature)
            .map(|(_, v)| *v)
    }
}

// =============================================================================
// TESTS
// =============================================================================
