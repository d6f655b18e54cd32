//! # Encoder Module
//!
//! Turns a validated application into the numeric vector the models were
//! trained on, using the fitted category lists stored in the bundle.

use crate::application::{Education, Feature, LoanApplication, SelfEmployed};
use crate::formats::ModelBundle;
use crate::{LoanLensError, Result};

/// The fitted feature encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureEncoder {
    /// Bundle column order.
    order: Vec<Feature>,
    /// Ordinal codes indexed by `Education::ALL` position.
    education: [f64; 2],
    /// Ordinal codes indexed by `SelfEmployed::ALL` position.
    self_employed: [f64; 2],
}

impl FeatureEncoder {
    /// Build the encoder from a bundle's feature order and categories.
    pub fn from_bundle(bundle: &ModelBundle) -> Result<Self> {
        let order = bundle
            .feature_names
            .iter()
            .map(|name| name.parse::<Feature>())
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let education = codes(bundle, Feature::Education, Education::ALL.map(Education::label))?;
        let self_employed = codes(
            bundle,
            Feature::SelfEmployed,
            SelfEmployed::ALL.map(SelfEmployed::label),
        )?;

        Ok(Self {
            order,
            education,
            self_employed,
        })
    }

    /// Encode one application in bundle column order.
    #[must_use]
    pub fn encode(&self, application: &LoanApplication) -> Vec<f64> {
        self.order
            .iter()
            .map(|feature| match feature {
                Feature::Education => self.education[education_slot(application.education)],
                Feature::SelfEmployed => {
                    self.self_employed[self_employed_slot(application.self_employed)]
                }
                numeric => application.numeric(*numeric).unwrap_or(f64::NAN),
            })
            .collect()
    }

    /// Features in bundle column order.
    #[must_use]
    pub fn features(&self) -> &[Feature] {
        &self.order
    }

    /// Column position of a feature in the encoded vector.
    #[must_use]
    pub fn position(&self, feature: Feature) -> Option<usize> {
        self.order.iter().position(|f| *f == feature)
    }
}

fn codes(bundle: &ModelBundle, feature: Feature, labels: [&str; 2]) -> Result<[f64; 2]> {
    let categories = bundle.categories.get(feature.name()).ok_or_else(|| {
        LoanLensError::InvalidBundle(format!("no categories for {feature}"))
    })?;

    let mut out = [0.0; 2];
    for (slot, label) in out.iter_mut().zip(labels) {
        let code = categories
            .iter()
            .position(|c| c.trim() == label)
            .ok_or_else(|| {
                LoanLensError::InvalidBundle(format!("{feature} categories lack {label:?}"))
            })?;
        *slot = code as f64;
    }
    Ok(out)
}

fn education_slot(value: Education) -> usize {
    match value {
        Education::Graduate => 0,
        Education::NotGraduate => 1,
    }
}

fn self_employed_slot(value: SelfEmployed) -> usize {
    match value {
        SelfEmployed::Yes => 0,
        SelfEmployed::No => 1,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> ModelBundle {
        ModelBundle::from_json(include_bytes!("../../../models/loan_model.json"))
            .unwrap_or_else(|e| unreachable!("{e}"))
    }

    #[test]
    fn sample_encodes_in_bundle_order() {
        let encoder = FeatureEncoder::from_bundle(&demo()).unwrap_or_else(|e| unreachable!("{e}"));
        let encoded = encoder.encode(&LoanApplication::sample());
        assert_eq!(
            encoded,
            vec![
                2.0,
                0.0,
                0.0,
                8_000_000.0,
                25_000_000.0,
                15.0,
                750.0,
                5_000_000.0,
                3_000_000.0,
                2_000_000.0,
                1_000_000.0
            ]
        );
    }

    #[test]
    fn category_codes_follow_bundle_lists() {
        let mut bundle = demo();
        bundle.categories.insert(
            "self_employed".to_string(),
            vec![" Yes".to_string(), " No".to_string()],
        );
        let encoder = FeatureEncoder::from_bundle(&bundle).unwrap_or_else(|e| unreachable!("{e}"));

        let mut app = LoanApplication::sample();
        app.self_employed = SelfEmployed::Yes;
        app.education = Education::NotGraduate;
        let encoded = encoder.encode(&app);

        assert_eq!(encoded[1], 1.0);
        assert_eq!(encoded[2], 0.0);
    }

    #[test]
    fn reordered_columns_are_respected() {
        let mut bundle = demo();
        bundle.feature_names.swap(0, 6);
        let encoder = FeatureEncoder::from_bundle(&bundle).unwrap_or_else(|e| unreachable!("{e}"));

        let encoded = encoder.encode(&LoanApplication::sample());
        assert_eq!(encoded[0], 750.0);
        assert_eq!(encoded[6], 2.0);
        assert_eq!(encoder.position(Feature::CibilScore), Some(0));
    }

    #[test]
    fn missing_categories_fail() {
        let mut bundle = demo();
        bundle.categories.remove("education");
        assert!(FeatureEncoder::from_bundle(&bundle).is_err());
    }
}
