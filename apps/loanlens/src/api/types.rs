//! Request and response bodies for the REST API.

use loanlens_core::{
    Explanation, Feature, Prediction, RawApplication, TopFeature, ValidationError,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `?model=` query parameter.
#[derive(Debug, Default, Deserialize)]
pub struct ModelQuery {
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: &'static str,
    pub version: &'static str,
    pub health: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub prediction: String,
    pub probability: f64,
    pub confidence: String,
}

impl From<Prediction> for PredictionResponse {
    fn from(p: Prediction) -> Self {
        Self {
            prediction: p.label,
            probability: p.probability,
            confidence: p.confidence.to_string(),
        }
    }
}

/// `POST /predict/batch` body. Items stay as raw JSON until each one is
/// checked, so a missing field is reported with its batch index.
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub data: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResponse {
    pub predictions: Vec<PredictionResponse>,
}

/// `POST /explain` response.
#[derive(Debug, Serialize)]
pub struct ExplanationResponse {
    pub prediction: String,
    pub probability: f64,
    pub expected_value: f64,
    pub shap_values: Map<String, Value>,
    pub top_contributing_features: Vec<TopFeature>,
    pub feature_impact: Map<String, Value>,
}

impl From<Explanation> for ExplanationResponse {
    fn from(e: Explanation) -> Self {
        let shap_values = e
            .shap_values
            .iter()
            .map(|(f, v)| (f.name().to_string(), Value::from(*v)))
            .collect();
        let feature_impact = e
            .feature_impact
            .into_iter()
            .map(|(f, sentence)| (f.name().to_string(), Value::from(sentence)))
            .collect();
        Self {
            prediction: e.prediction.label,
            probability: e.prediction.probability,
            expected_value: e.expected_value,
            shap_values,
            top_contributing_features: e.top_contributing_features,
            feature_impact,
        }
    }
}

/// Turn one JSON application into a [`RawApplication`], naming every
/// missing field at once.
pub fn application_from_json(value: Value) -> Result<RawApplication, String> {
    if let Value::Object(map) = &value {
        let missing: Vec<String> = Feature::ALL
            .iter()
            .filter(|f| !map.contains_key(f.name()))
            .map(|f| f.name().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields(missing).to_string());
        }
    } else {
        return Err("application must be a JSON object".to_string());
    }
    serde_json::from_value(value).map_err(|e| e.to_string())
}
