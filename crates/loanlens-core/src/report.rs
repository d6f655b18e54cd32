//! # Report Module
//!
//! Plain-text rendering of predictions, explanations and recommendations
//! for terminal output.

use crate::explainer::Explanation;
use crate::predictor::Prediction;
use crate::recommender::RecommendationReport;

const RULE_TOP: &str = "┌──────────────────────────────────────────────┐\n";
const RULE_MID: &str = "├──────────────────────────────────────────────┤\n";
const RULE_BOTTOM: &str = "└──────────────────────────────────────────────┘\n";

fn section(output: &mut String, title: &str) {
    output.push_str(&format!("│ {title:<44} │\n"));
}

fn none(output: &mut String) {
    output.push_str("│ - (none)\n");
}

/// One-box summary of a prediction.
#[must_use]
pub fn prediction_text(prediction: &Prediction) -> String {
    let mut output = String::new();
    output.push_str(RULE_TOP);
    section(&mut output, "PREDICTION");
    output.push_str(&format!("│ - Decision:    {}\n", prediction.label));
    output.push_str(&format!(
        "│ - Probability: {:.1}%\n",
        prediction.probability * 100.0
    ));
    output.push_str(&format!("│ - Confidence:  {}\n", prediction.confidence));
    output.push_str(RULE_BOTTOM);
    output
}

/// Prediction plus attribution, and recommendations when given.
#[must_use]
pub fn explanation_text(
    explanation: &Explanation,
    recommendations: Option<&RecommendationReport>,
) -> String {
    let prediction = &explanation.prediction;
    let mut output = String::new();

    output.push_str(RULE_TOP);
    section(&mut output, "PREDICTION");
    output.push_str(&format!(
        "│ - {} ({:.1}%, {} confidence)\n",
        prediction.label,
        prediction.probability * 100.0,
        prediction.confidence
    ));

    output.push_str(RULE_MID);
    section(
        &mut output,
        &format!(
            "TOP FACTORS ({} probability, base {:.3})",
            explanation.explained_class, explanation.expected_value
        ),
    );
    if explanation.top_contributing_features.is_empty() {
        none(&mut output);
    } else {
        for top in &explanation.top_contributing_features {
            output.push_str(&format!(
                "│ {}. {:<26} {:+.4}\n",
                top.rank,
                top.feature.name(),
                top.shap_value
            ));
        }
    }

    output.push_str(RULE_MID);
    section(&mut output, "IMPACT");
    if explanation.feature_impact.is_empty() {
        none(&mut output);
    } else {
        for (feature, sentence) in &explanation.feature_impact {
            output.push_str(&format!("│ - {feature}: {sentence}\n"));
        }
    }

    if let Some(report) = recommendations {
        output.push_str(RULE_MID);
        section(&mut output, "RECOMMENDATIONS");
        if report.recommendations.is_empty() {
            none(&mut output);
        } else {
            for rec in &report.recommendations {
                output.push_str(&format!("│ - [{}] {}\n", rec.priority, rec.recommendation));
            }
        }
        if !report.potential_improvements.is_empty() {
            output.push_str(RULE_MID);
            section(&mut output, "POTENTIAL IMPROVEMENTS");
            for (feature, gain) in &report.potential_improvements {
                output.push_str(&format!("│ - {feature}: +{:.1}%\n", gain * 100.0));
            }
        }
    }

    output.push_str(RULE_BOTTOM);
    output
}

// =============================================================================
// TESTS
// =============================================================================
