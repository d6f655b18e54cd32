//! Interventional Shapley values against a background reference set.
//!
//! The value of a coalition `S` is the model output averaged over the
//! background rows with the features in `S` replaced by the explained
//! row's values. Every coalition is enumerated, so cost grows as
//! `2^features * background rows` model evaluations.

use crate::explainer::{Attribution, Explainer, ExplainerKind};
use crate::model::{Classifier, TreeEnsemble};
use crate::{LoanLensError, Result};

/// Upper bound on features for coalition enumeration.
pub const MAX_EXACT_FEATURES: usize = 16;

/// Default cap on background rows used per explanation.
pub const DEFAULT_MAX_BACKGROUND: usize = 50;

/// Explainer that enumerates coalitions over a background sample.
#[derive(Debug, Clone)]
pub struct ExactExplainer {
    background: Vec<Vec<f64>>,
}

impl ExactExplainer {
    /// Use at most `max_background` rows, taken from the front.
    pub fn new(mut background: Vec<Vec<f64>>, max_background: usize) -> Result<Self> {
        background.truncate(max_background);
        if background.is_empty() {
            return Err(LoanLensError::MissingBackground);
        }
        Ok(Self { background })
    }

    #[must_use]
    pub fn background_len(&self) -> usize {
        self.background.len()
    }

    fn shapley<C: Classifier + ?Sized>(&self, model: &C, x: &[f64], class: usize) -> Result<Attribution> {
        let m = x.len();
        if m > MAX_EXACT_FEATURES {
            return Err(LoanLensError::TooManyFeatures {
                count: m,
                max: MAX_EXACT_FEATURES,
            });
        }

        let coalitions = 1usize << m;
        let mut value = vec![0.0; coalitions];
        let mut row = vec![0.0; m];
        let rows = self.background.len() as f64;

        for (mask, slot) in value.iter_mut().enumerate() {
            let mut total = 0.0;
            for reference in &self.background {
                for (j, cell) in row.iter_mut().enumerate() {
                    *cell = if mask & (1 << j) != 0 {
                        x[j]
                    } else {
                        reference.get(j).copied().unwrap_or(f64::NAN)
                    };
                }
                total += model.predict_proba(&row).get(class).copied().unwrap_or(0.0);
            }
            *slot = total / rows;
        }

        // weight[s] = s! (m - s - 1)! / m!
        let factorial: Vec<f64> = std::iter::once(1.0)
            .chain((1..=m).scan(1.0, |acc, k| {
                *acc *= k as f64;
                Some(*acc)
            }))
            .collect();
        let weight: Vec<f64> = (0..m)
            .map(|s| factorial[s] * factorial[m - s - 1] / factorial[m])
            .collect();

        let mut values = vec![0.0; m];
        for (i, phi) in values.iter_mut().enumerate() {
            let bit = 1usize << i;
            for mask in (0..coalitions).filter(|mask| mask & bit == 0) {
                let size = mask.count_ones() as usize;
                *phi += weight[size] * (value[mask | bit] - value[mask]);
            }
        }

        Ok(Attribution {
            expected_value: value[0],
            values,
        })
    }
}

impl Explainer for ExactExplainer {
    fn kind(&self) -> ExplainerKind {
        ExplainerKind::Exact
    }

    fn explain(&self, model: &TreeEnsemble, x: &[f64], class: usize) -> Result<Attribution> {
        self.shapley(model, x, class)
    }
}

// =============================================================================
// TESTS
// =============================================================================
