//! # Pipeline Module
//!
//! [`Pipeline`] is the single entry point the app layer uses. It owns the
//! loaded bundle, the fitted encoder and the configured explainer, and
//! runs a request through validate, encode, predict, explain and recommend.
//!
//! A pipeline is immutable after construction apart from its explanation
//! cache, which sits behind a mutex so one pipeline can serve concurrent
//! requests through a shared reference.

use crate::application::{Feature, LoanApplication, RawApplication};
use crate::cache::{CacheStats, ExplanationCache, ExplanationKey, LruCache};
use crate::encoder::FeatureEncoder;
use crate::explainer::{
    DEFAULT_MAX_BACKGROUND, ExactExplainer, Explainer, ExplainerKind, Explanation, TreeExplainer,
};
use crate::formats::ModelBundle;
use crate::model::{Classifier, EnsembleKind, TreeEnsemble};
use crate::predictor::Prediction;
use crate::recommender::{self, RecommendationReport};
use crate::template::{self, CsvTable};
use crate::{APPROVED_LABEL, LoanLensError, Result};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};

/// Construction options for a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub explainer: ExplainerKind,
    /// Background rows used by the exact explainer.
    pub max_background: usize,
    /// Cached explanations; 0 disables the cache.
    pub cache_capacity: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            explainer: ExplainerKind::Tree,
            max_background: DEFAULT_MAX_BACKGROUND,
            cache_capacity: crate::cache::DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Summary of one loaded model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSummary {
    pub name: String,
    pub kind: EnsembleKind,
    pub trees: usize,
    pub nodes: usize,
    pub max_depth: usize,
}

/// What the pipeline has loaded, for `/models` and `inspect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub available_models: Vec<String>,
    pub default_model: String,
    pub feature_count: usize,
    pub features: Vec<String>,
    pub class_labels: Vec<String>,
    pub explainer: ExplainerKind,
    pub models: Vec<ModelSummary>,
}

/// The request-to-explanation pipeline.
pub struct Pipeline {
    bundle: ModelBundle,
    encoder: FeatureEncoder,
    explainer: Box<dyn Explainer>,
    explain_class: usize,
    cache: Option<Mutex<ExplanationCache>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("models", &self.bundle.models.keys().collect::<Vec<_>>())
            .field("default_model", &self.bundle.default_model)
            .field("explainer", &self.explainer.kind())
            .field("explain_class", &self.explain_class)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Build a pipeline over a validated bundle.
    pub fn new(bundle: ModelBundle, options: PipelineOptions) -> Result<Self> {
        let encoder = FeatureEncoder::from_bundle(&bundle)?;
        let explain_class = bundle
            .class_index(APPROVED_LABEL)
            .ok_or_else(|| LoanLensError::UnknownClass(APPROVED_LABEL.to_string()))?;

        let explainer: Box<dyn Explainer> = match options.explainer {
            ExplainerKind::Tree => Box::new(TreeExplainer),
            ExplainerKind::Exact => Box::new(ExactExplainer::new(
                bundle.background.clone(),
                options.max_background,
            )?),
        };

        let cache = (options.cache_capacity > 0)
            .then(|| Mutex::new(LruCache::new(options.cache_capacity)));

        Ok(Self {
            bundle,
            encoder,
            explainer,
            explain_class,
            cache,
        })
    }

    /// Decode bundle bytes (JSON or binary) and build a pipeline.
    pub fn from_bytes(bytes: &[u8], options: PipelineOptions) -> Result<Self> {
        Self::new(ModelBundle::decode(bytes)?, options)
    }

    #[must_use]
    pub fn bundle(&self) -> &ModelBundle {
        &self.bundle
    }

    #[must_use]
    pub fn features(&self) -> &[Feature] {
        self.encoder.features()
    }

    #[must_use]
    pub fn explainer_kind(&self) -> ExplainerKind {
        self.explainer.kind()
    }

    /// Resolve a model name, `None` meaning the bundle default.
    pub fn model(&self, name: Option<&str>) -> Result<(&str, &TreeEnsemble)> {
        let wanted = name.unwrap_or(&self.bundle.default_model);
        self.bundle
            .models
            .get_key_value(wanted)
            .map(|(name, model)| (name.as_str(), model))
            .ok_or_else(|| LoanLensError::UnknownModel(wanted.to_string()))
    }

    // -------------------------------------------------------------------------
    // Predict
    // -------------------------------------------------------------------------

    pub fn predict(&self, raw: &RawApplication, model: Option<&str>) -> Result<Prediction> {
        let application = raw.validate()?;
        self.predict_application(&application, model)
    }

    pub fn predict_application(
        &self,
        application: &LoanApplication,
        model: Option<&str>,
    ) -> Result<Prediction> {
        let (_, ensemble) = self.model(model)?;
        let encoded = self.encoder.encode(application);
        Ok(self.score(ensemble, &encoded))
    }

    /// Predict every application or none. The first failure is reported
    /// with its zero-based index.
    pub fn predict_batch(
        &self,
        raws: &[RawApplication],
        model: Option<&str>,
    ) -> Result<Vec<Prediction>> {
        let (_, ensemble) = self.model(model)?;
        raws.iter()
            .enumerate()
            .map(|(index, raw)| {
                let application = raw.validate().map_err(|e| LoanLensError::Batch {
                    index,
                    source: Box::new(e.into()),
                })?;
                Ok(self.score(ensemble, &self.encoder.encode(&application)))
            })
            .collect()
    }

    /// Score a CSV upload row by row. Bad rows become error rows in the
    /// output instead of failing the whole file.
    pub fn predict_csv(&self, text: &str, model: Option<&str>) -> Result<String> {
        let (_, ensemble) = self.model(model)?;
        let table = CsvTable::parse(text)?;
        let results: Vec<std::result::Result<Prediction, String>> = table
            .applications()
            .into_iter()
            .map(|raw| {
                let application = raw
                    .and_then(|raw| raw.validate())
                    .map_err(|e| e.to_string())?;
                Ok(self.score(ensemble, &self.encoder.encode(&application)))
            })
            .collect();
        Ok(template::predictions_to_csv(&results))
    }

    fn score(&self, ensemble: &TreeEnsemble, encoded: &[f64]) -> Prediction {
        Prediction::from_probabilities(ensemble.predict_proba(encoded), &self.bundle.class_labels)
    }

    // -------------------------------------------------------------------------
    // Explain / recommend
    // -------------------------------------------------------------------------

    pub fn explain(&self, raw: &RawApplication, model: Option<&str>) -> Result<Explanation> {
        let application = raw.validate()?;
        self.explain_application(&application, model)
    }

    pub fn explain_application(
        &self,
        application: &LoanApplication,
        model: Option<&str>,
    ) -> Result<Explanation> {
        let (name, ensemble) = self.model(model)?;
        let encoded = self.encoder.encode(application);
        let prediction = self.score(ensemble, &encoded);

        let key = ExplanationKey::new(name, self.explain_class, &encoded);
        let cached = self.cache.as_ref().and_then(|cache| {
            cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&key)
        });
        let attribution = match cached {
            Some(attribution) => attribution,
            None => {
                let attribution = self.explainer.explain(ensemble, &encoded, self.explain_class)?;
                if let Some(cache) = &self.cache {
                    cache
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(key, attribution.clone());
                }
                attribution
            }
        };

        Explanation::new(
            prediction,
            self.bundle.class_labels[self.explain_class].trim(),
            attribution,
            self.encoder.features(),
            &encoded,
        )
    }

    pub fn recommend(
        &self,
        raw: &RawApplication,
        model: Option<&str>,
    ) -> Result<RecommendationReport> {
        let application = raw.validate()?;
        let explanation = self.explain_application(&application, model)?;
        Ok(recommender::recommend(&application, &explanation))
    }

    /// Explanation and recommendations for one application, sharing the
    /// attribution work.
    pub fn analyze(
        &self,
        raw: &RawApplication,
        model: Option<&str>,
    ) -> Result<(Explanation, RecommendationReport)> {
        let application = raw.validate()?;
        let explanation = self.explain_application(&application, model)?;
        let report = recommender::recommend(&application, &explanation);
        Ok((explanation, report))
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            available_models: self.bundle.model_names().map(str::to_string).collect(),
            default_model: self.bundle.default_model.clone(),
            feature_count: self.encoder.features().len(),
            features: self
                .encoder
                .features()
                .iter()
                .map(|f| f.name().to_string())
                .collect(),
            class_labels: self
                .bundle
                .class_labels
                .iter()
                .map(|l| l.trim().to_string())
                .collect(),
            explainer: self.explainer.kind(),
            models: self
                .bundle
                .models
                .iter()
                .map(|(name, model)| ModelSummary {
                    name: name.clone(),
                    kind: model.kind,
                    trees: model.trees.len(),
                    nodes: model.node_count(),
                    max_depth: model.trees.iter().map(|t| t.max_depth()).max().unwrap_or(0),
                })
                .collect(),
        }
    }

    /// Explanation cache counters, when the cache is enabled.
    #[must_use]
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache
            .as_ref()
            .map(|cache| cache.lock().unwrap_or_else(PoisonError::into_inner).stats())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::Confidence;
    use crate::recommender::Priority;

    const DEMO: &[u8] = include_bytes!("../../../models/loan_model.json");

    fn pipeline(options: PipelineOptions) -> Pipeline {
        Pipeline::from_bytes(DEMO, options).unwrap_or_else(|e| unreachable!("{e}"))
    }

    fn weak() -> RawApplication {
        RawApplication {
            no_of_dependents: 0.0,
            education: " Not Graduate".to_string(),
            self_employed: " Yes".to_string(),
            income_annum: 4_000_000.0,
            loan_amount: 15_000_000.0,
            loan_term: 20.0,
            cibil_score: 400.0,
            residential_assets_value: 2_000_000.0,
            commercial_assets_value: 500_000.0,
            luxury_assets_value: 1_000_000.0,
            bank_asset_value: 500_000.0,
        }
    }

    #[test]
    fn sample_is_approved() {
        let pipeline = pipeline(PipelineOptions::default());
        let prediction = pipeline
            .predict(&LoanApplication::sample().to_raw(), None)
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(prediction.label, "Approved");
        assert!((prediction.probability - 0.96).abs() < 1e-9);
        assert_eq!(prediction.confidence, Confidence::High);
    }

    #[test]
    fn weak_applicant_is_rejected() {
        let pipeline = pipeline(PipelineOptions::default());
        let prediction = pipeline
            .predict(&weak(), None)
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(prediction.label, "Rejected");
        assert!((prediction.probability - 0.943_333).abs() < 1e-5);
    }

    #[test]
    fn tree_explanation_matches_reference_values() {
        let pipeline = pipeline(PipelineOptions::default());
        let explanation = pipeline
            .explain(&weak(), None)
            .unwrap_or_else(|e| unreachable!("{e}"));

        assert_eq!(explanation.explained_class, "Approved");
        assert!((explanation.expected_value - 0.602_667).abs() < 1e-5);
        let cibil = explanation.shap_value(Feature::CibilScore).unwrap_or_default();
        assert!((cibil + 0.507_893).abs() < 1e-5);
        assert_eq!(
            explanation.top_contributing_features[0].feature,
            Feature::CibilScore
        );

        let total: f64 = explanation.shap_values.iter().map(|(_, v)| v).sum();
        let approved = explanation.prediction.probabilities[0];
        assert!((explanation.expected_value + total - approved).abs() < 1e-9);
    }

    #[test]
    fn recommendations_for_weak_applicant() {
        let pipeline = pipeline(PipelineOptions::default());
        let report = pipeline
            .recommend(&weak(), None)
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(report.current_prediction, "Rejected");
        assert_eq!(report.recommendations[0].feature, "cibil_score");
        assert_eq!(report.recommendations[0].priority, Priority::High);
        assert_eq!(report.potential_improvements.len(), 1);
    }

    #[test]
    fn unknown_model_is_an_error() {
        let pipeline = pipeline(PipelineOptions::default());
        assert!(matches!(
            pipeline.predict(&weak(), Some("xgboost")),
            Err(LoanLensError::UnknownModel(name)) if name == "xgboost"
        ));
    }

    #[test]
    fn decision_tree_is_selectable() {
        let pipeline = pipeline(PipelineOptions::default());
        let prediction = pipeline
            .predict(&weak(), Some("decision_tree"))
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(prediction.label, "Rejected");
        assert!((prediction.probability - 1.0).abs() < 1e-12);
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let pipeline = pipeline(PipelineOptions::default());
        let mut bad = weak();
        bad.cibil_score = 1000.0;

        let ok = pipeline
            .predict_batch(&[weak(), LoanApplication::sample().to_raw()], None)
            .unwrap_or_default();
        assert_eq!(ok.len(), 2);

        let result = pipeline.predict_batch(&[weak(), bad], None);
        assert!(matches!(result, Err(LoanLensError::Batch { index: 1, .. })));
    }

    #[test]
    fn csv_rows_fail_independently() {
        let pipeline = pipeline(PipelineOptions::default());
        let mut text = template::csv_template();
        text.push_str("1, Graduate, No,100,100,5,200,0,0,0,0\n");
        let out = pipeline
            .predict_csv(&text, None)
            .unwrap_or_else(|e| unreachable!("{e}"));

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "row,prediction,probability,confidence,error");
        assert!(lines[1].starts_with("1,Approved,0.9600,High,"));
        assert!(lines[2].starts_with("2,Error,0.0000,,"));
        assert!(lines[2].contains("cibil_score must be between 300 and 900"));
    }

    #[test]
    fn short_csv_row_does_not_drop_its_neighbours() {
        let pipeline = pipeline(PipelineOptions::default());
        let template = template::csv_template();
        let sample_row = template.lines().nth(1).unwrap_or_default();
        let text = format!("{template}1,Graduate,No,100,100,5,700,0,0,0\n{sample_row}\n");
        let out = pipeline
            .predict_csv(&text, None)
            .unwrap_or_else(|e| unreachable!("{e}"));

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("1,Approved,0.9600,High,"));
        assert_eq!(
            lines[2],
            "2,Error,0.0000,,Row on line 3 has 10 fields but the header has 11"
        );
        assert!(lines[3].starts_with("3,Approved,0.9600,High,"));
    }

    #[test]
    fn explanations_are_cached() {
        let pipeline = pipeline(PipelineOptions::default());
        let first = pipeline.explain(&weak(), None).unwrap_or_else(|e| unreachable!("{e}"));
        let second = pipeline.explain(&weak(), None).unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(first, second);

        let stats = pipeline.cache_stats().unwrap_or_else(|| unreachable!());
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn zero_capacity_disables_cache() {
        let pipeline = pipeline(PipelineOptions {
            cache_capacity: 0,
            ..PipelineOptions::default()
        });
        assert!(pipeline.cache_stats().is_none());
    }

    #[test]
    fn exact_explainer_is_additive_on_demo_bundle() {
        let pipeline = pipeline(PipelineOptions {
            explainer: ExplainerKind::Exact,
            ..PipelineOptions::default()
        });
        assert_eq!(pipeline.explainer_kind(), ExplainerKind::Exact);

        let explanation = pipeline.explain(&weak(), None).unwrap_or_else(|e| unreachable!("{e}"));
        let total: f64 = explanation.shap_values.iter().map(|(_, v)| v).sum();
        let approved = explanation.prediction.probabilities[0];
        assert!((explanation.expected_value + total - approved).abs() < 1e-9);
    }

    #[test]
    fn exact_explainer_needs_background() {
        let mut bundle = ModelBundle::from_json(DEMO).unwrap_or_else(|e| unreachable!("{e}"));
        bundle.background.clear();
        let result = Pipeline::new(
            bundle,
            PipelineOptions {
                explainer: ExplainerKind::Exact,
                ..PipelineOptions::default()
            },
        );
        assert!(matches!(result, Err(LoanLensError::MissingBackground)));
    }

    #[test]
    fn model_info_lists_models() {
        let info = pipeline(PipelineOptions::default()).model_info();
        assert_eq!(info.available_models, vec!["decision_tree", "random_forest"]);
        assert_eq!(info.default_model, "random_forest");
        assert_eq!(info.feature_count, 11);
        assert_eq!(info.class_labels, vec!["Approved", "Rejected"]);
        assert_eq!(info.models[1].trees, 3);
        assert_eq!(info.models[0].max_depth, 2);
    }
}
