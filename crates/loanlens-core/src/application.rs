//! # Application Module
//!
//! The loan application schema and its validation rules.
//!
//! Requests arrive as [`RawApplication`] (loosely typed, as sent by clients
//! and CSV rows) and leave validation as [`LoanApplication`] (ranges checked,
//! categoricals resolved to enums). Nothing downstream of validation ever
//! sees an unchecked value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// FEATURES
// =============================================================================

/// The model input features, in canonical (training) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    NoOfDependents,
    Education,
    SelfEmployed,
    IncomeAnnum,
    LoanAmount,
    LoanTerm,
    CibilScore,
    ResidentialAssetsValue,
    CommercialAssetsValue,
    LuxuryAssetsValue,
    BankAssetValue,
}

impl Feature {
    /// Every feature, in canonical order.
    pub const ALL: [Feature; 11] = [
        Feature::NoOfDependents,
        Feature::Education,
        Feature::SelfEmployed,
        Feature::IncomeAnnum,
        Feature::LoanAmount,
        Feature::LoanTerm,
        Feature::CibilScore,
        Feature::ResidentialAssetsValue,
        Feature::CommercialAssetsValue,
        Feature::LuxuryAssetsValue,
        Feature::BankAssetValue,
    ];

    /// Column name used on the wire, in CSV headers and in model bundles.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Feature::NoOfDependents => "no_of_dependents",
            Feature::Education => "education",
            Feature::SelfEmployed => "self_employed",
            Feature::IncomeAnnum => "income_annum",
            Feature::LoanAmount => "loan_amount",
            Feature::LoanTerm => "loan_term",
            Feature::CibilScore => "cibil_score",
            Feature::ResidentialAssetsValue => "residential_assets_value",
            Feature::CommercialAssetsValue => "commercial_assets_value",
            Feature::LuxuryAssetsValue => "luxury_assets_value",
            Feature::BankAssetValue => "bank_asset_value",
        }
    }

    /// Categorical features are ordinal-encoded by the bundle's categories.
    #[must_use]
    pub const fn is_categorical(self) -> bool {
        matches!(self, Feature::Education | Feature::SelfEmployed)
    }

    /// Integer-valued features (counts, years, scores).
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Feature::NoOfDependents | Feature::LoanTerm | Feature::CibilScore
        )
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Feature {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Feature::ALL
            .into_iter()
            .find(|feature| feature.name() == trimmed)
            .ok_or_else(|| ValidationError::UnknownFeature(trimmed.to_string()))
    }
}

// =============================================================================
// CATEGORICALS
// =============================================================================

/// Applicant education level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Education {
    #[serde(rename = "Graduate")]
    Graduate,
    #[serde(rename = "Not Graduate")]
    NotGraduate,
}

impl Education {
    pub const ALL: [Education; 2] = [Education::Graduate, Education::NotGraduate];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Education::Graduate => "Graduate",
            Education::NotGraduate => "Not Graduate",
        }
    }
}

impl FromStr for Education {
    type Err = ValidationError;

    /// Surrounding whitespace is ignored: the training data spells
    /// categories with a leading space (`" Graduate"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Graduate" => Ok(Education::Graduate),
            "Not Graduate" => Ok(Education::NotGraduate),
            other => Err(ValidationError::InvalidEducation(other.to_string())),
        }
    }
}

/// Whether the applicant is self-employed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelfEmployed {
    Yes,
    No,
}

impl SelfEmployed {
    pub const ALL: [SelfEmployed; 2] = [SelfEmployed::Yes, SelfEmployed::No];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            SelfEmployed::Yes => "Yes",
            SelfEmployed::No => "No",
        }
    }
}

impl FromStr for SelfEmployed {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Yes" => Ok(SelfEmployed::Yes),
            "No" => Ok(SelfEmployed::No),
            other => Err(ValidationError::InvalidSelfEmployed(other.to_string())),
        }
    }
}

// =============================================================================
// VALIDATION ERRORS
// =============================================================================

/// Why an application was rejected before reaching the model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Row on line {line} has {found} fields but the header has {expected}")]
    FieldCount {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    #[error("Invalid value for {field}: must be an integer")]
    NotAnInteger { field: Feature },

    #[error("Invalid value for {field}: must be a number, got {value:?}")]
    NotANumber { field: Feature, value: String },

    #[error("Invalid value for {field}: must be a non-negative finite amount")]
    InvalidAmount { field: Feature },

    #[error("Education must be 'Graduate' or 'Not Graduate', got {0:?}")]
    InvalidEducation(String),

    #[error("Self_employed must be 'Yes' or 'No', got {0:?}")]
    InvalidSelfEmployed(String),

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: Feature,
        min: i64,
        max: i64,
        value: i64,
    },
}

// =============================================================================
// RAW APPLICATION
// =============================================================================

/// A loan application as received from a client.
///
/// Numbers are accepted as any JSON number; integer fields are checked
/// for whole values during [`RawApplication::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawApplication {
    pub no_of_dependents: f64,
    pub education: String,
    pub self_employed: String,
    pub income_annum: f64,
    pub loan_amount: f64,
    pub loan_term: f64,
    pub cibil_score: f64,
    pub residential_assets_value: f64,
    pub commercial_assets_value: f64,
    pub luxury_assets_value: f64,
    pub bank_asset_value: f64,
}

const DEPENDENTS_RANGE: (i64, i64) = (0, 10);
const CIBIL_RANGE: (i64, i64) = (300, 900);
const LOAN_TERM_RANGE: (i64, i64) = (1, 30);

impl RawApplication {
    /// Validate and normalize into a [`LoanApplication`].
    ///
    /// Checks run in a fixed order (integers, amounts, categoricals, ranges)
    /// so the same bad input always reports the same error.
    pub fn validate(&self) -> Result<LoanApplication, ValidationError> {
        let dependents = whole(Feature::NoOfDependents, self.no_of_dependents)?;
        let loan_term = whole(Feature::LoanTerm, self.loan_term)?;
        let cibil_score = whole(Feature::CibilScore, self.cibil_score)?;

        let income_annum = amount(Feature::IncomeAnnum, self.income_annum)?;
        let loan_amount = amount(Feature::LoanAmount, self.loan_amount)?;
        let residential = amount(
            Feature::ResidentialAssetsValue,
            self.residential_assets_value,
        )?;
        let commercial = amount(Feature::CommercialAssetsValue, self.commercial_assets_value)?;
        let luxury = amount(Feature::LuxuryAssetsValue, self.luxury_assets_value)?;
        let bank = amount(Feature::BankAssetValue, self.bank_asset_value)?;

        let education = self.education.parse::<Education>()?;
        let self_employed = self.self_employed.parse::<SelfEmployed>()?;

        in_range(Feature::NoOfDependents, dependents, DEPENDENTS_RANGE)?;
        in_range(Feature::CibilScore, cibil_score, CIBIL_RANGE)?;
        in_range(Feature::LoanTerm, loan_term, LOAN_TERM_RANGE)?;

        Ok(LoanApplication {
            no_of_dependents: dependents as u8,
            education,
            self_employed,
            income_annum,
            loan_amount,
            loan_term: loan_term as u8,
            cibil_score: cibil_score as u16,
            residential_assets_value: residential,
            commercial_assets_value: commercial,
            luxury_assets_value: luxury,
            bank_asset_value: bank,
        })
    }

    /// Build from a `(column, value)` record such as a CSV row.
    ///
    /// Column names and values are trimmed; unknown columns are ignored.
    /// All missing columns are reported together.
    pub fn from_record<K, V>(record: &[(K, V)]) -> Result<Self, ValidationError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let columns: BTreeMap<&str, &str> = record
            .iter()
            .map(|(k, v)| (k.as_ref().trim(), v.as_ref().trim()))
            .collect();

        let missing: Vec<String> = Feature::ALL
            .iter()
            .filter(|f| !columns.contains_key(f.name()))
            .map(|f| f.name().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields(missing));
        }

        let text = |feature: Feature| columns.get(feature.name()).copied().unwrap_or_default();
        let number = |feature: Feature| -> Result<f64, ValidationError> {
            let raw = text(feature);
            raw.parse::<f64>().map_err(|_| ValidationError::NotANumber {
                field: feature,
                value: raw.to_string(),
            })
        };

        Ok(Self {
            no_of_dependents: number(Feature::NoOfDependents)?,
            education: text(Feature::Education).to_string(),
            self_employed: text(Feature::SelfEmployed).to_string(),
            income_annum: number(Feature::IncomeAnnum)?,
            loan_amount: number(Feature::LoanAmount)?,
            loan_term: number(Feature::LoanTerm)?,
            cibil_score: number(Feature::CibilScore)?,
            residential_assets_value: number(Feature::ResidentialAssetsValue)?,
            commercial_assets_value: number(Feature::CommercialAssetsValue)?,
            luxury_assets_value: number(Feature::LuxuryAssetsValue)?,
            bank_asset_value: number(Feature::BankAssetValue)?,
        })
    }
}

fn whole(field: Feature, value: f64) -> Result<i64, ValidationError> {
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(ValidationError::NotAnInteger { field });
    }
    Ok(value as i64)
}

fn amount(field: Feature, value: f64) -> Result<f64, ValidationError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ValidationError::InvalidAmount { field });
    }
    Ok(value)
}

fn in_range(field: Feature, value: i64, (min, max): (i64, i64)) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            min,
            max,
            value,
        });
    }
    Ok(())
}

// =============================================================================
// VALIDATED APPLICATION
// =============================================================================

/// A validated loan application.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoanApplication {
    pub no_of_dependents: u8,
    pub education: Education,
    pub self_employed: SelfEmployed,
    pub income_annum: f64,
    pub loan_amount: f64,
    pub loan_term: u8,
    pub cibil_score: u16,
    pub residential_assets_value: f64,
    pub commercial_assets_value: f64,
    pub luxury_assets_value: f64,
    pub bank_asset_value: f64,
}

impl LoanApplication {
    /// The reference applicant used by the CSV and JSON templates.
    #[must_use]
    pub fn sample() -> Self {
        Self {
            no_of_dependents: 2,
            education: Education::Graduate,
            self_employed: SelfEmployed::No,
            income_annum: 8_000_000.0,
            loan_amount: 25_000_000.0,
            loan_term: 15,
            cibil_score: 750,
            residential_assets_value: 5_000_000.0,
            commercial_assets_value: 3_000_000.0,
            luxury_assets_value: 2_000_000.0,
            bank_asset_value: 1_000_000.0,
        }
    }

    /// Human-scale value of a numeric feature; `None` for categoricals.
    #[must_use]
    pub fn numeric(&self, feature: Feature) -> Option<f64> {
        match feature {
            Feature::NoOfDependents => Some(f64::from(self.no_of_dependents)),
            Feature::IncomeAnnum => Some(self.income_annum),
            Feature::LoanAmount => Some(self.loan_amount),
            Feature::LoanTerm => Some(f64::from(self.loan_term)),
            Feature::CibilScore => Some(f64::from(self.cibil_score)),
            Feature::ResidentialAssetsValue => Some(self.residential_assets_value),
            Feature::CommercialAssetsValue => Some(self.commercial_assets_value),
            Feature::LuxuryAssetsValue => Some(self.luxury_assets_value),
            Feature::BankAssetValue => Some(self.bank_asset_value),
            Feature::Education | Feature::SelfEmployed => None,
        }
    }

    /// Category label of a categorical feature; `None` for numerics.
    #[must_use]
    pub fn category(&self, feature: Feature) -> Option<&'static str> {
        match feature {
            Feature::Education => Some(self.education.label()),
            Feature::SelfEmployed => Some(self.self_employed.label()),
            _ => None,
        }
    }

    /// Convert back to the wire shape.
    #[must_use]
    pub fn to_raw(&self) -> RawApplication {
        RawApplication {
            no_of_dependents: f64::from(self.no_of_dependents),
            education: self.education.label().to_string(),
            self_employed: self.self_employed.label().to_string(),
            income_annum: self.income_annum,
            loan_amount: self.loan_amount,
            loan_term: f64::from(self.loan_term),
            cibil_score: f64::from(self.cibil_score),
            residential_assets_value: self.residential_assets_value,
            commercial_assets_value: self.commercial_assets_value,
            luxury_assets_value: self.luxury_assets_value,
            bank_asset_value: self.bank_asset_value,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
