//! # Predictor Module
//!
//! Turns class probabilities into a labelled decision.

use crate::APPROVED_LABEL;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse confidence band for the predicted class probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// High at >= 0.8, Medium at >= 0.6, Low otherwise.
    #[must_use]
    pub fn from_probability(probability: f64) -> Self {
        if probability >= 0.8 {
            Confidence::High
        } else if probability >= 0.6 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Confidence::High => "High",
            Confidence::Medium => "Medium",
            Confidence::Low => "Low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A model decision for one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Class label with surrounding whitespace removed.
    pub label: String,
    pub class_index: usize,
    /// Probability of the predicted class.
    pub probability: f64,
    pub confidence: Confidence,
    /// Probability of every class, in bundle label order.
    pub probabilities: Vec<f64>,
}

impl Prediction {
    /// Pick the most probable class. Ties go to the lowest class index.
    #[must_use]
    pub fn from_probabilities(probabilities: Vec<f64>, labels: &[String]) -> Self {
        let mut class_index = 0;
        for (index, p) in probabilities.iter().enumerate() {
            if *p > probabilities[class_index] {
                class_index = index;
            }
        }
        let probability = probabilities.get(class_index).copied().unwrap_or(0.0);
        let label = labels
            .get(class_index)
            .map(|l| l.trim().to_string())
            .unwrap_or_default();

        Self {
            label,
            class_index,
            probability,
            confidence: Confidence::from_probability(probability),
            probabilities,
        }
    }

    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.label == APPROVED_LABEL
    }
}

// =============================================================================
// TESTS
// =============================================================================
