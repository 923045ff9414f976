use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::core::features::{Feature, FeatureVector, FEATURE_COUNT, FEATURE_NAMES, FEATURE_SCHEMA_VERSION};
use crate::core::training::TrainingReport;
use crate::models::TutorCandidate;

/// Feature vector does not match what the loaded model was trained on
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Feature schema mismatch: model expects v{expected_version} with {expected_len} features, got v{actual_version} with {actual_len}"
)]
pub struct FeatureSchemaError {
    pub expected_version: u32,
    pub expected_len: usize,
    pub actual_version: u32,
    pub actual_len: usize,
}

/// Errors raised by a ranking strategy at inference time
#[derive(Debug, Error)]
pub enum RankingError {
    #[error(transparent)]
    Schema(#[from] FeatureSchemaError),

    #[error("Model produced a non-finite score for candidate {0}")]
    NonFiniteScore(usize),
}

/// Errors loading or saving a model artifact
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artifact parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Schema(#[from] FeatureSchemaError),

    #[error("Invalid artifact: {0}")]
    Invalid(String),
}

/// A scorer over feature vectors: one score per candidate, higher is better
pub trait RankingModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, features: &[FeatureVector]) -> Result<Vec<f64>, RankingError>;
}

/// Weights of the deterministic fallback scorer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallbackWeights {
    pub quality: f64,
    pub budget: f64,
    pub experience: f64,
    pub reviews: f64,
    pub location: f64,
    pub semantic: f64,
}

impl Default for FallbackWeights {
    fn default() -> Self {
        Self {
            quality: 0.3,
            budget: 0.2,
            experience: 0.2,
            reviews: 0.1,
            location: 0.1,
            semantic: 0.1,
        }
    }
}

/// Score for a feature vector the fallback cannot read; ranks it last
pub const MALFORMED_FEATURES_SCORE: f64 = 0.0;

/// Weighted linear combination used when no trained model is available
///
/// score = rating/5 * 0.3 + budget_proximity * 0.2 + min(exp/10, 1) * 0.2
///       + min(reviews/100, 1) * 0.1 + location * 0.1 + semantic * 0.1
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackRanker {
    weights: FallbackWeights,
}

impl FallbackRanker {
    /// Vectors with the wrong schema or arity score [`MALFORMED_FEATURES_SCORE`].
    pub fn score_one(&self, features: &FeatureVector) -> f64 {
        if features.schema_version != FEATURE_SCHEMA_VERSION || features.len() != FEATURE_COUNT {
            tracing::error!(
                "Fallback scorer got feature vector v{} with {} values, expected v{} with {}",
                features.schema_version,
                features.len(),
                FEATURE_SCHEMA_VERSION,
                FEATURE_COUNT
            );
            return MALFORMED_FEATURES_SCORE;
        }

        let w = &self.weights;

        let quality = features.get(Feature::TutorRating) / 5.0;
        let budget = budget_proximity(
            features.get(Feature::TutorPrice),
            features.get(Feature::PriceRatio),
        );
        let experience = (features.get(Feature::TutorExperience) / 10.0).min(1.0);
        let reviews = (features.get(Feature::TutorReviews) / 100.0).min(1.0);

        quality * w.quality
            + budget * w.budget
            + experience * w.experience
            + reviews * w.reviews
            + features.get(Feature::LocationMatch) * w.location
            + features.get(Feature::SemanticSimilarity) * w.semantic
    }
}

impl RankingModel for FallbackRanker {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn score(&self, features: &[FeatureVector]) -> Result<Vec<f64>, RankingError> {
        Ok(features.iter().map(|f| self.score_one(f)).collect())
    }
}

/// Closeness of the rate to `budget_max` (0-1)
///
/// The budget is recovered from price / price_ratio. A recovered budget of 1
/// or less means the order had no budget (the ratio divides by max(budget, 1)),
/// which scores 0.
#[inline]
fn budget_proximity(price: f64, ratio: f64) -> f64 {
    if price <= 0.0 || ratio <= 0.0 {
        return 0.0;
    }
    let budget = price / ratio;
    if budget <= 1.0 {
        return 0.0;
    }
    (1.0 - (price - budget).abs() / budget).max(0.0)
}

/// Serialized learned ranker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub schema_version: u32,
    pub feature_names: Vec<String>,
    /// Per-feature standardization
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub weights: Vec<f64>,
    pub trained_at: DateTime<Utc>,
    pub report: TrainingReport,
}

impl ModelArtifact {
    /// Read an artifact; `Ok(None)` when the file does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>, ModelLoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        let artifact: ModelArtifact = serde_json::from_slice(&bytes)?;
        artifact.validate()?;
        Ok(Some(artifact))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ModelLoadError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ModelLoadError> {
        let len = self.weights.len();
        if self.schema_version != FEATURE_SCHEMA_VERSION || len != FEATURE_COUNT {
            return Err(FeatureSchemaError {
                expected_version: FEATURE_SCHEMA_VERSION,
                expected_len: FEATURE_COUNT,
                actual_version: self.schema_version,
                actual_len: len,
            }
            .into());
        }
        if self.means.len() != len || self.scales.len() != len || self.feature_names.len() != len {
            return Err(ModelLoadError::Invalid(
                "means, scales, weights and feature names must have equal length".to_string(),
            ));
        }
        if self.feature_names.iter().zip(FEATURE_NAMES).any(|(a, b)| a != b) {
            return Err(ModelLoadError::Invalid(format!(
                "feature names {:?} do not match {:?}",
                self.feature_names, FEATURE_NAMES
            )));
        }
        if self.scales.iter().any(|s| *s <= 0.0 || !s.is_finite()) {
            return Err(ModelLoadError::Invalid("scales must be positive and finite".to_string()));
        }
        Ok(())
    }
}

/// Linear listwise ranker trained offline (see `core::training`)
#[derive(Debug, Clone)]
pub struct LearnedRanker {
    artifact: ModelArtifact,
}

impl LearnedRanker {
    pub fn new(artifact: ModelArtifact) -> Result<Self, ModelLoadError> {
        artifact.validate()?;
        Ok(Self { artifact })
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    fn check_schema(&self, features: &FeatureVector) -> Result<(), FeatureSchemaError> {
        let expected_len = self.artifact.weights.len();
        if features.schema_version != self.artifact.schema_version || features.len() != expected_len {
            return Err(FeatureSchemaError {
                expected_version: self.artifact.schema_version,
                expected_len,
                actual_version: features.schema_version,
                actual_len: features.len(),
            });
        }
        Ok(())
    }

    pub fn score_one(&self, features: &FeatureVector) -> Result<f64, FeatureSchemaError> {
        self.check_schema(features)?;
        let a = &self.artifact;
        Ok(features
            .values
            .iter()
            .enumerate()
            .map(|(i, x)| a.weights[i] * (x - a.means[i]) / a.scales[i])
            .sum())
    }
}

impl RankingModel for LearnedRanker {
    fn name(&self) -> &'static str {
        "learned"
    }

    fn score(&self, features: &[FeatureVector]) -> Result<Vec<f64>, RankingError> {
        features
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let score = self.score_one(f)?;
                if score.is_finite() {
                    Ok(score)
                } else {
                    Err(RankingError::NonFiniteScore(i))
                }
            })
            .collect()
    }
}

/// Ranking strategy chosen once at construction, with a fallback for
/// inference failures. Immutable; share it across requests.
pub struct Ranker {
    strategy: Box<dyn RankingModel>,
    fallback: FallbackRanker,
}

impl Ranker {
    pub fn fallback() -> Self {
        Self::with_strategy(Box::new(FallbackRanker::default()))
    }

    pub fn learned(model: LearnedRanker) -> Self {
        Self::with_strategy(Box::new(model))
    }

    pub fn with_strategy(strategy: Box<dyn RankingModel>) -> Self {
        Self {
            strategy,
            fallback: FallbackRanker::default(),
        }
    }

    /// Load the learned model if the artifact exists and is valid.
    ///
    /// A missing artifact is expected before the first training run; an
    /// invalid one is a configuration defect. Both select the fallback.
    pub fn from_artifact_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match ModelArtifact::load(path).and_then(|a| a.map(LearnedRanker::new).transpose()) {
            Ok(Some(model)) => {
                tracing::info!(
                    "Loaded ranking model from {} (trained {}, {} samples)",
                    path.display(),
                    model.artifact().trained_at,
                    model.artifact().report.num_samples
                );
                Self::learned(model)
            }
            Ok(None) => {
                tracing::info!("No ranking model at {}, using fallback scorer", path.display());
                Self::fallback()
            }
            Err(e) => {
                tracing::error!("Ranking model at {} is unusable, using fallback scorer: {}", path.display(), e);
                Self::fallback()
            }
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// One score per feature vector. Never fails.
    pub fn score(&self, features: &[FeatureVector]) -> Vec<f64> {
        match self.strategy.score(features) {
            Ok(scores) if scores.len() == features.len() => return scores,
            Ok(scores) => tracing::error!(
                "{} ranker returned {} scores for {} candidates, using fallback",
                self.strategy.name(),
                scores.len(),
                features.len()
            ),
            Err(RankingError::Schema(e)) => {
                tracing::error!("Ranking model configuration defect, using fallback: {}", e)
            }
            Err(e) => tracing::warn!("{} ranker failed, using fallback: {}", self.strategy.name(), e),
        }

        features.iter().map(|f| self.fallback.score_one(f)).collect()
    }
}

impl Default for Ranker {
    fn default() -> Self {
        Self::fallback()
    }
}

/// A candidate with its features and ranking score
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub tutor: TutorCandidate,
    pub features: FeatureVector,
    pub score: f64,
}

/// Pair candidates with their scores and sort by score descending.
///
/// The sort is stable: equal scores keep input order.
pub fn rank_candidates(
    tutors: Vec<TutorCandidate>,
    features: Vec<FeatureVector>,
    scores: Vec<f64>,
) -> Vec<ScoredCandidate> {
    let mut ranked: Vec<ScoredCandidate> = tutors
        .into_iter()
        .zip(features)
        .zip(scores)
        .map(|((tutor, features), score)| ScoredCandidate { tutor, features, score })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    ranked
}
