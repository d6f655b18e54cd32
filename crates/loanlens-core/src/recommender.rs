//! # Recommender Module
//!
//! Threshold rules that turn an explanation into advice for a rejected
//! applicant. Only features that pushed the decision towards rejection
//! (negative SHAP among the top contributors) are considered.

use crate::application::{Feature, LoanApplication};
use crate::explainer::{Explanation, TOP_FEATURES};
use crate::ordered::serialize_pairs;
use serde::{Deserialize, Serialize};
use std::fmt;

/// CIBIL score below which improving it is the first recommendation.
pub const CIBIL_TARGET: u16 = 550;

/// CIBIL score used as the goal when estimating improvements.
pub const CIBIL_GOOD: u16 = 750;

/// Loan terms above this many years are flagged.
pub const MAX_COMFORTABLE_TERM: u8 = 15;

/// Largest loan-to-income ratio not flagged.
pub const MAX_LOAN_TO_INCOME: f64 = 3.0;

/// SHAP value below which a feature counts towards potential improvements.
pub const IMPROVEMENT_THRESHOLD: f64 = -0.05;

const APPROVED_MESSAGE: &str = "Congratulations! Your loan has been approved. \
     Continue maintaining your good financial profile.";

/// How urgently a recommendation should be acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        })
    }
}

/// A feature's current value as reported back to clients: counts, terms
/// and scores as integers, amounts as floats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Integer(i64),
    Amount(f64),
}

impl FeatureValue {
    #[must_use]
    pub fn new(feature: Feature, value: f64) -> Self {
        if feature.is_integer() {
            FeatureValue::Integer(value as i64)
        } else {
            FeatureValue::Amount(value)
        }
    }

    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            FeatureValue::Integer(v) => v as f64,
            FeatureValue::Amount(v) => v,
        }
    }
}

/// One piece of advice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    /// Feature name, or `loan_approved` for the approval notice.
    pub feature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_value: Option<FeatureValue>,
    pub recommendation: String,
    /// |SHAP| of the feature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<f64>,
    pub actionable: bool,
}

/// Recommendations plus the estimated probability gains behind them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationReport {
    pub current_prediction: String,
    pub recommendations: Vec<Recommendation>,
    #[serde(serialize_with = "serialize_pairs")]
    pub potential_improvements: Vec<(Feature, f64)>,
}

/// Build recommendations for `application` from its explanation.
#[must_use]
pub fn recommend(application: &LoanApplication, explanation: &Explanation) -> RecommendationReport {
    let current_prediction = explanation.prediction.label.clone();

    if explanation.prediction.is_approved() {
        return RecommendationReport {
            current_prediction,
            recommendations: vec![Recommendation {
                priority: Priority::High,
                feature: "loan_approved".to_string(),
                current_value: None,
                recommendation: APPROVED_MESSAGE.to_string(),
                impact: None,
                actionable: true,
            }],
            potential_improvements: Vec::new(),
        };
    }

    let mut negative: Vec<(Feature, f64)> = explanation
        .top_contributing_features
        .iter()
        .take(TOP_FEATURES)
        .filter(|top| top.shap_value < 0.0)
        .map(|top| (top.feature, top.shap_value))
        .collect();
    negative.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut recommendations: Vec<Recommendation> = negative
        .into_iter()
        .filter_map(|(feature, shap)| rule(application, feature, shap.abs()))
        .collect();
    recommendations.sort_by(|a, b| {
        a.priority.cmp(&b.priority).then_with(|| {
            b.impact
                .unwrap_or(0.0)
                .total_cmp(&a.impact.unwrap_or(0.0))
        })
    });

    let potential_improvements = explanation
        .shap_values
        .iter()
        .filter(|(_, shap)| *shap < IMPROVEMENT_THRESHOLD)
        .filter_map(|(feature, shap)| {
            improvement(application, *feature, shap.abs()).map(|gain| (*feature, gain))
        })
        .collect();

    RecommendationReport {
        current_prediction,
        recommendations,
        potential_improvements,
    }
}

fn rule(application: &LoanApplication, feature: Feature, impact: f64) -> Option<Recommendation> {
    let advice = |priority, current: f64, text: String, actionable| Recommendation {
        priority,
        feature: feature.name().to_string(),
        current_value: Some(FeatureValue::new(feature, current)),
        recommendation: text,
        impact: Some(impact),
        actionable,
    };

    match feature {
        Feature::CibilScore if application.cibil_score < CIBIL_TARGET => {
            let score = application.cibil_score;
            Some(advice(
                Priority::High,
                f64::from(score),
                format!(
                    "Improve CIBIL score from {score} to {CIBIL_TARGET}+ for better approval chances"
                ),
                true,
            ))
        }
        Feature::IncomeAnnum => {
            let income = application.income_annum;
            Some(advice(
                Priority::Medium,
                income,
                format!(
                    "Increase annual income from {} to {}",
                    rupees(income),
                    rupees(income * 1.2)
                ),
                true,
            ))
        }
        Feature::LoanAmount
            if application.loan_amount > application.income_annum * MAX_LOAN_TO_INCOME =>
        {
            let amount = application.loan_amount;
            let target = application.income_annum * MAX_LOAN_TO_INCOME;
            Some(advice(
                Priority::High,
                amount,
                format!(
                    "Reduce loan amount from {} to {} (3x annual income)",
                    rupees(amount),
                    rupees(target)
                ),
                true,
            ))
        }
        Feature::LoanTerm if application.loan_term > MAX_COMFORTABLE_TERM => {
            let term = application.loan_term;
            Some(advice(
                Priority::Medium,
                f64::from(term),
                format!("Consider reducing loan term from {term} to 10-15 years"),
                true,
            ))
        }
        Feature::BankAssetValue => {
            let bank = application.bank_asset_value;
            Some(advice(
                Priority::Medium,
                bank,
                format!(
                    "Increase bank assets from {} to {}",
                    rupees(bank),
                    rupees(bank * 1.5)
                ),
                true,
            ))
        }
        Feature::ResidentialAssetsValue => {
            let residential = application.residential_assets_value;
            Some(advice(
                Priority::Low,
                residential,
                format!(
                    "Increase residential assets from {} to {}",
                    rupees(residential),
                    rupees(residential * 1.3)
                ),
                false,
            ))
        }
        _ => None,
    }
}

/// Estimated gain in approval probability from fixing one feature.
fn improvement(application: &LoanApplication, feature: Feature, magnitude: f64) -> Option<f64> {
    match feature {
        Feature::CibilScore if application.cibil_score < CIBIL_GOOD => {
            Some(magnitude * f64::from(CIBIL_GOOD - application.cibil_score) / 900.0)
        }
        Feature::LoanAmount => {
            let target = application.income_annum * MAX_LOAN_TO_INCOME;
            (application.loan_amount > target)
                .then(|| magnitude * (application.loan_amount - target) / application.loan_amount)
        }
        Feature::IncomeAnnum => Some(magnitude * 0.2),
        _ => None,
    }
}

/// Format an amount as whole rupees with comma thousands separators.
#[must_use]
pub fn rupees(amount: f64) -> String {
    let rounded = format!("{:.0}", amount.abs());
    let mut grouped = String::with_capacity(rounded.len() + rounded.len() / 3);
    for (i, digit) in rounded.chars().enumerate() {
        if i > 0 && (rounded.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    let sign = if amount < 0.0 && rounded != "0" { "-" } else { "" };
    format!("{sign}₹{grouped}")
}

// =============================================================================
// TESTS
// =============================================================================
