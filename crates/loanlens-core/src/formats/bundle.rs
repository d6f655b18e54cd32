//! Model bundle schema plus its JSON and binary encodings.
//!
//! Binary layout (little endian):
//!
//! ```text
//! ┌──────────┬─────────┬───────────┬──────────┬──────────┬──────────────────┐
//! │ LOANLENS │ version │ algorithm │ reserved │ checksum │ postcard payload │
//! │ 8 bytes  │ u16     │ u8        │ u8       │ u64      │ ...              │
//! └──────────┴─────────┴───────────┴──────────┴──────────┴──────────────────┘
//! ```

use crate::application::{Education, Feature, SelfEmployed};
use crate::model::TreeEnsemble;
use crate::{LoanLensError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Schema version written into every bundle.
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// Magic prefix identifying a binary bundle.
pub const BINARY_MAGIC: &[u8; 8] = b"LOANLENS";

/// Binary header version.
pub const BINARY_VERSION: u16 = 1;

const HEADER_LEN: usize = 20;

/// Checksum algorithm id: FNV-1a 64.
pub const CHECKSUM_FNV1A: u8 = 0;

/// Checksum algorithm id: BLAKE3 truncated to 64 bits.
pub const CHECKSUM_BLAKE3: u8 = 1;

#[cfg(not(feature = "crypto-hash"))]
const WRITE_CHECKSUM: u8 = CHECKSUM_FNV1A;

#[cfg(feature = "crypto-hash")]
const WRITE_CHECKSUM: u8 = CHECKSUM_BLAKE3;

// =============================================================================
// BUNDLE
// =============================================================================

/// Everything the pipeline needs to score an application.
///
/// `categories` is the fitted object encoder: the position of a category in
/// its list is the ordinal code the models were trained on. `class_labels`
/// is the fitted target encoder: class index `i` means `class_labels[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub format_version: u32,
    pub feature_names: Vec<String>,
    pub class_labels: Vec<String>,
    pub categories: BTreeMap<String, Vec<String>>,
    pub models: BTreeMap<String, TreeEnsemble>,
    pub default_model: String,
    /// Encoded reference rows for the exact (interventional) explainer.
    #[serde(default)]
    pub background: Vec<Vec<f64>>,
}

impl ModelBundle {
    /// Decode a bundle, detecting binary by its magic prefix and falling
    /// back to JSON.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.starts_with(BINARY_MAGIC) {
            Self::from_binary(bytes)
        } else {
            Self::from_json(bytes)
        }
    }

    /// Parse and validate a JSON bundle.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let mut bundle: Self =
            serde_json::from_slice(bytes).map_err(|e| LoanLensError::Decode(e.to_string()))?;
        bundle.validate()?;
        Ok(bundle)
    }

    /// Pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| LoanLensError::Encode(e.to_string()))
    }

    /// Encode as a checksummed binary bundle.
    pub fn to_binary(&self) -> Result<Vec<u8>> {
        let payload =
            postcard::to_stdvec(self).map_err(|e| LoanLensError::Encode(e.to_string()))?;
        let checksum = checksum(WRITE_CHECKSUM, &payload)?;

        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(BINARY_MAGIC);
        out.extend_from_slice(&BINARY_VERSION.to_le_bytes());
        out.push(WRITE_CHECKSUM);
        out.push(0);
        out.extend_from_slice(&checksum.to_le_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Verify the header and checksum, then decode and validate the payload.
    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN || !bytes.starts_with(BINARY_MAGIC) {
            return Err(LoanLensError::Decode(
                "missing or truncated binary header".to_string(),
            ));
        }

        let version = u16::from_le_bytes([bytes[8], bytes[9]]);
        if version != BINARY_VERSION {
            return Err(LoanLensError::UnsupportedFormat(format!(
                "binary version {version}"
            )));
        }

        let algorithm = bytes[10];
        let mut stored = [0u8; 8];
        stored.copy_from_slice(&bytes[12..HEADER_LEN]);
        let expected = u64::from_le_bytes(stored);

        let payload = &bytes[HEADER_LEN..];
        let actual = checksum(algorithm, payload)?;
        if actual != expected {
            return Err(LoanLensError::ChecksumMismatch { expected, actual });
        }

        let mut bundle: Self =
            postcard::from_bytes(payload).map_err(|e| LoanLensError::Decode(e.to_string()))?;
        bundle.validate()?;
        Ok(bundle)
    }

    /// Check every structural invariant and normalize leaf distributions.
    pub fn validate(&mut self) -> Result<()> {
        if self.format_version != BUNDLE_FORMAT_VERSION {
            return Err(LoanLensError::UnsupportedFormat(format!(
                "bundle format_version {}",
                self.format_version
            )));
        }

        self.validate_features()?;
        self.validate_labels()?;
        self.validate_categories()?;

        if self.models.is_empty() {
            return Err(invalid("bundle contains no models"));
        }
        if !self.models.contains_key(&self.default_model) {
            return Err(invalid(format!(
                "default model {} is not in the bundle",
                self.default_model
            )));
        }

        let (n_features, n_classes) = (self.feature_names.len(), self.class_labels.len());
        for (name, model) in &mut self.models {
            if model.n_features != n_features || model.n_classes != n_classes {
                return Err(invalid(format!(
                    "model {name} expects {} features and {} classes, bundle has {n_features} and {n_classes}",
                    model.n_features, model.n_classes
                )));
            }
            model
                .validate()
                .map_err(|e| invalid(format!("model {name}: {e}")))?;
        }

        for (index, row) in self.background.iter().enumerate() {
            if row.len() != n_features {
                return Err(invalid(format!(
                    "background row {index} has {} values, expected {n_features}",
                    row.len()
                )));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(invalid(format!("background row {index} is not finite")));
            }
        }

        Ok(())
    }

    /// Index of a class label, ignoring surrounding whitespace.
    #[must_use]
    pub fn class_index(&self, label: &str) -> Option<usize> {
        let wanted = label.trim();
        self.class_labels.iter().position(|l| l.trim() == wanted)
    }

    /// Model names in deterministic (sorted) order.
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    fn validate_features(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for name in &self.feature_names {
            let feature = name
                .parse::<Feature>()
                .map_err(|_| invalid(format!("unknown feature {name}")))?;
            if !seen.insert(feature) {
                return Err(invalid(format!("feature {name} listed twice")));
            }
        }
        if seen.len() != Feature::ALL.len() {
            let missing: Vec<&str> = Feature::ALL
                .iter()
                .filter(|f| !seen.contains(f))
                .map(|f| f.name())
                .collect();
            return Err(invalid(format!("missing features: {}", missing.join(", "))));
        }
        Ok(())
    }

    fn validate_labels(&self) -> Result<()> {
        if self.class_labels.len() < 2 {
            return Err(invalid("at least two class labels are required"));
        }
        let unique: BTreeSet<&str> = self.class_labels.iter().map(|l| l.trim()).collect();
        if unique.len() != self.class_labels.len() {
            return Err(invalid("class labels must be unique"));
        }
        Ok(())
    }

    fn validate_categories(&self) -> Result<()> {
        for key in self.categories.keys() {
            let is_categorical = key.parse::<Feature>().is_ok_and(Feature::is_categorical);
            if !is_categorical {
                return Err(invalid(format!("categories given for non-categorical {key}")));
            }
        }

        let required: [(Feature, Vec<&str>); 2] = [
            (
                Feature::Education,
                Education::ALL.iter().map(|e| e.label()).collect(),
            ),
            (
                Feature::SelfEmployed,
                SelfEmployed::ALL.iter().map(|s| s.label()).collect(),
            ),
        ];
        for (feature, labels) in required {
            let known = self
                .categories
                .get(feature.name())
                .ok_or_else(|| invalid(format!("no categories for {feature}")))?;
            for label in labels {
                if !known.iter().any(|k| k.trim() == label) {
                    return Err(invalid(format!("{feature} categories lack {label:?}")));
                }
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> LoanLensError {
    LoanLensError::InvalidBundle(message.into())
}

// =============================================================================
// CHECKSUMS
// =============================================================================

fn checksum(algorithm: u8, payload: &[u8]) -> Result<u64> {
    match algorithm {
        CHECKSUM_FNV1A => Ok(fnv1a(payload)),
        #[cfg(feature = "crypto-hash")]
        CHECKSUM_BLAKE3 => {
            let hash = blake3::hash(payload);
            let mut first = [0u8; 8];
            first.copy_from_slice(&hash.as_bytes()[..8]);
            Ok(u64::from_le_bytes(first))
        }
        other => Err(LoanLensError::UnsupportedFormat(format!(
            "checksum algorithm {other}"
        ))),
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const DEMO: &str = include_str!("../../../../models/loan_model.json");

    fn demo() -> ModelBundle {
        ModelBundle::from_json(DEMO.as_bytes()).unwrap_or_else(|e| unreachable!("{e}"))
    }

    #[test]
    fn demo_bundle_is_valid() {
        let bundle = demo();
        assert_eq!(bundle.feature_names.len(), 11);
        assert_eq!(bundle.default_model, "random_forest");
        assert_eq!(bundle.class_index("Approved"), Some(0));
        assert_eq!(bundle.class_index(" Rejected"), Some(1));
        assert_eq!(
            bundle.model_names().collect::<Vec<_>>(),
            vec!["decision_tree", "random_forest"]
        );
    }

    #[test]
    fn binary_encoding_preserves_bundle() {
        let bundle = demo();
        let bytes = bundle.to_binary().unwrap_or_default();
        assert!(bytes.starts_with(BINARY_MAGIC));

        let decoded = ModelBundle::decode(&bytes).unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(decoded, bundle);
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut bytes = demo().to_binary().unwrap_or_default();
        if let Some(last) = bytes.last_mut() {
            *last ^= 0xff;
        }
        assert!(matches!(
            ModelBundle::from_binary(&bytes),
            Err(LoanLensError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn unknown_checksum_algorithm_is_unsupported() {
        let mut bytes = demo().to_binary().unwrap_or_default();
        bytes[10] = 9;
        assert!(matches!(
            ModelBundle::from_binary(&bytes),
            Err(LoanLensError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn truncated_header_is_rejected() {
        assert!(matches!(
            ModelBundle::from_binary(b"LOANLENS\x01"),
            Err(LoanLensError::Decode(_))
        ));
    }

    #[test]
    fn missing_default_model_is_rejected() {
        let mut bundle = demo();
        bundle.default_model = "gradient_boosting".to_string();
        assert!(matches!(
            bundle.validate(),
            Err(LoanLensError::InvalidBundle(_))
        ));
    }

    #[test]
    fn duplicate_feature_is_rejected() {
        let mut bundle = demo();
        bundle.feature_names[1] = "no_of_dependents".to_string();
        assert!(bundle.validate().is_err());
    }

    #[test]
    fn incomplete_categories_are_rejected() {
        let mut bundle = demo();
        bundle
            .categories
            .insert("education".to_string(), vec!["Graduate".to_string()]);
        assert!(bundle.validate().is_err());
    }

    #[test]
    fn short_background_row_is_rejected() {
        let mut bundle = demo();
        bundle.background.push(vec![1.0, 2.0]);
        assert!(bundle.validate().is_err());
    }

    #[test]
    fn wrong_format_version_is_unsupported() {
        let mut bundle = demo();
        bundle.format_version = 2;
        assert!(matches!(
            bundle.validate(),
            Err(LoanLensError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn json_garbage_is_a_decode_error() {
        assert!(matches!(
            ModelBundle::decode(b"{not json"),
            Err(LoanLensError::Decode(_))
        ));
    }

    #[test]
    fn fnv1a_reference_values() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }
}
