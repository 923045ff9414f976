use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::core::features::{FeatureExtractor, FeatureVector, FEATURE_COUNT, FEATURE_NAMES, FEATURE_SCHEMA_VERSION};
use crate::core::ranking::{LearnedRanker, ModelArtifact, ModelLoadError};
use crate::models::TrainingGroup;

/// Minimum number of (order, tutor) samples needed to fit a model
pub const MIN_SAMPLES: usize = 2;

/// Every `VALIDATION_STRIDE`-th group is held out (80/20 split)
const VALIDATION_STRIDE: usize = 5;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("Insufficient training data: {samples} samples, need at least {MIN_SAMPLES}")]
    InsufficientData { samples: usize },

    #[error(transparent)]
    Artifact(#[from] ModelLoadError),
}

/// One labelled (order, tutor) pair
#[derive(Debug, Clone)]
pub struct LabelledSample {
    pub features: FeatureVector,
    pub label: u8,
}

/// Samples grouped by order
#[derive(Debug, Clone, Default)]
pub struct TrainingDataset {
    pub groups: Vec<Vec<LabelledSample>>,
}

impl TrainingDataset {
    pub fn num_samples(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn num_positive(&self) -> usize {
        self.groups
            .iter()
            .flatten()
            .filter(|s| s.label > 0)
            .count()
    }
}

/// Turn historical orders and their applications into a labelled dataset.
///
/// Orders without applications are skipped. No data yields an empty dataset.
pub async fn build_dataset(extractor: &FeatureExtractor, groups: Vec<TrainingGroup>) -> TrainingDataset {
    let mut dataset = TrainingDataset::default();

    for group in groups {
        if group.applications.is_empty() {
            continue;
        }

        let tutors: Vec<_> = group.applications.iter().map(|a| a.tutor.clone()).collect();
        let features = extractor.extract_all(&group.order, &tutors).await;

        let samples = group
            .applications
            .iter()
            .zip(features)
            .map(|(application, features)| LabelledSample {
                features,
                label: application.relevance(),
            })
            .collect();

        dataset.groups.push(samples);
    }

    tracing::info!(
        "Built training dataset: {} samples in {} groups, {} positive",
        dataset.num_samples(),
        dataset.num_groups(),
        dataset.num_positive()
    );

    dataset
}

/// Hyperparameters for LambdaRank training
#[derive(Debug, Clone)]
pub struct TrainingParams {
    pub learning_rate: f64,
    pub l2: f64,
    pub max_epochs: usize,
    /// Stop after this many epochs without validation improvement
    pub patience: usize,
    /// Cutoff of the NDCG used for early stopping
    pub eval_at: usize,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            l2: 1e-4,
            max_epochs: 200,
            patience: 10,
            eval_at: 3,
        }
    }
}

/// Summary stored alongside the model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub num_samples: usize,
    pub num_groups: usize,
    pub num_positive: usize,
    pub train_groups: usize,
    pub validation_groups: usize,
    pub epochs: usize,
    pub best_epoch: usize,
    pub ndcg_at_1: f64,
    pub ndcg_at_3: f64,
    pub ndcg_at_5: f64,
    pub feature_weights: BTreeMap<String, f64>,
}

/// Fit a linear ranker with LambdaRank gradients.
///
/// Groups are split deterministically: every fifth group goes to validation
/// when there are at least five, otherwise validation reuses the training set.
pub fn train(dataset: &TrainingDataset, params: &TrainingParams) -> Result<ModelArtifact, TrainingError> {
    let samples = dataset.num_samples();
    if samples < MIN_SAMPLES {
        return Err(TrainingError::InsufficientData { samples });
    }

    let (means, scales) = standardization(dataset);
    let standardized: Vec<Vec<(Vec<f64>, u8)>> = dataset
        .groups
        .iter()
        .map(|group| {
            group
                .iter()
                .map(|s| {
                    let x = s
                        .features
                        .values
                        .iter()
                        .enumerate()
                        .map(|(i, v)| (v - means[i]) / scales[i])
                        .collect();
                    (x, s.label)
                })
                .collect()
        })
        .collect();

    let (train_set, validation_set): (Vec<_>, Vec<_>) = if standardized.len() >= VALIDATION_STRIDE {
        let (validation, train): (Vec<_>, Vec<_>) = standardized
            .iter()
            .enumerate()
            .partition(|(i, _)| i % VALIDATION_STRIDE == VALIDATION_STRIDE - 1);
        (
            train.into_iter().map(|(_, g)| g).collect(),
            validation.into_iter().map(|(_, g)| g).collect(),
        )
    } else {
        (standardized.iter().collect(), standardized.iter().collect())
    };

    let mut weights = vec![0.0; FEATURE_COUNT];
    let mut best_weights = weights.clone();
    let mut best_score = mean_ndcg(&validation_set, &weights, params.eval_at);
    let mut best_epoch = 0;
    let mut stale = 0;
    let mut epochs = 0;

    for epoch in 1..=params.max_epochs {
        epochs = epoch;
        let gradient = lambda_gradient(&train_set, &weights);
        for (w, g) in weights.iter_mut().zip(&gradient) {
            *w += params.learning_rate * (g - params.l2 * *w);
        }

        let score = mean_ndcg(&validation_set, &weights, params.eval_at);
        if score > best_score + 1e-12 {
            best_score = score;
            best_weights = weights.clone();
            best_epoch = epoch;
            stale = 0;
        } else {
            stale += 1;
            if stale >= params.patience {
                tracing::debug!("Early stopping at epoch {} (best {})", epoch, best_epoch);
                break;
            }
        }
    }

    let report = TrainingReport {
        num_samples: samples,
        num_groups: dataset.num_groups(),
        num_positive: dataset.num_positive(),
        train_groups: train_set.len(),
        validation_groups: validation_set.len(),
        epochs,
        best_epoch,
        ndcg_at_1: mean_ndcg(&validation_set, &best_weights, 1),
        ndcg_at_3: mean_ndcg(&validation_set, &best_weights, 3),
        ndcg_at_5: mean_ndcg(&validation_set, &best_weights, 5),
        feature_weights: FEATURE_NAMES
            .iter()
            .zip(&best_weights)
            .map(|(name, w)| (name.to_string(), *w))
            .collect(),
    };

    tracing::info!(
        "Training finished: ndcg@1={:.4} ndcg@3={:.4} ndcg@5={:.4} (best epoch {})",
        report.ndcg_at_1,
        report.ndcg_at_3,
        report.ndcg_at_5,
        report.best_epoch
    );

    Ok(ModelArtifact {
        schema_version: FEATURE_SCHEMA_VERSION,
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        means,
        scales,
        weights: best_weights,
        trained_at: Utc::now(),
        report,
    })
}

/// Train and wrap the result as a ready-to-use ranker
pub fn train_ranker(dataset: &TrainingDataset, params: &TrainingParams) -> Result<LearnedRanker, TrainingError> {
    Ok(LearnedRanker::new(train(dataset, params)?)?)
}

fn standardization(dataset: &TrainingDataset) -> (Vec<f64>, Vec<f64>) {
    let n = dataset.num_samples() as f64;
    let mut means = vec![0.0; FEATURE_COUNT];
    let mut scales = vec![0.0; FEATURE_COUNT];

    for sample in dataset.groups.iter().flatten() {
        for (i, v) in sample.features.values.iter().take(FEATURE_COUNT).enumerate() {
            means[i] += v / n;
        }
    }
    for sample in dataset.groups.iter().flatten() {
        for (i, v) in sample.features.values.iter().take(FEATURE_COUNT).enumerate() {
            scales[i] += (v - means[i]).powi(2) / n;
        }
    }
    for s in scales.iter_mut() {
        *s = s.sqrt();
        if !s.is_finite() || *s < 1e-12 {
            *s = 1.0;
        }
    }

    (means, scales)
}

fn dot(w: &[f64], x: &[f64]) -> f64 {
    w.iter().zip(x).map(|(a, b)| a * b).sum()
}

fn gain(label: u8) -> f64 {
    2f64.powi(label as i32) - 1.0
}

fn discount(position: usize) -> f64 {
    1.0 / ((position + 2) as f64).log2()
}

/// Ascent direction averaged over groups
fn lambda_gradient(groups: &[&Vec<(Vec<f64>, u8)>], weights: &[f64]) -> Vec<f64> {
    let mut gradient = vec![0.0; weights.len()];
    if groups.is_empty() {
        return gradient;
    }

    for group in groups {
        let labels: Vec<u8> = group.iter().map(|(_, l)| *l).collect();
        let ideal = ideal_dcg(&labels, labels.len());
        if ideal == 0.0 {
            continue;
        }

        let scores: Vec<f64> = group.iter().map(|(x, _)| dot(weights, x)).collect();
        let mut position = vec![0usize; group.len()];
        for (rank, idx) in order_by_score(&scores).into_iter().enumerate() {
            position[idx] = rank;
        }

        for i in 0..group.len() {
            for j in 0..group.len() {
                if labels[i] <= labels[j] {
                    continue;
                }
                let delta_ndcg = ((gain(labels[i]) - gain(labels[j]))
                    * (discount(position[i]) - discount(position[j])))
                .abs()
                    / ideal;
                let rho = 1.0 / (1.0 + (scores[i] - scores[j]).exp());
                let lambda = rho * delta_ndcg;

                for (k, g) in gradient.iter_mut().enumerate() {
                    *g += lambda * (group[i].0[k] - group[j].0[k]);
                }
            }
        }
    }

    let n = groups.len() as f64;
    gradient.iter_mut().for_each(|g| *g /= n);
    gradient
}

/// Indices sorted by score descending; ties keep input order
fn order_by_score(scores: &[f64]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..scores.len()).collect();
    idx.sort_by(|a, b| {
        scores[*b]
            .partial_cmp(&scores[*a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    idx
}

fn ideal_dcg(labels: &[u8], k: usize) -> f64 {
    let mut sorted = labels.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    dcg(&sorted, k)
}

fn dcg(labels: &[u8], k: usize) -> f64 {
    labels
        .iter()
        .take(k)
        .enumerate()
        .map(|(pos, l)| gain(*l) * discount(pos))
        .sum()
}

/// NDCG@k of labels listed in ranked order. A group with no relevant item scores 1.
pub fn ndcg_at_k(ranked_labels: &[u8], k: usize) -> f64 {
    let ideal = ideal_dcg(ranked_labels, k);
    if ideal == 0.0 {
        return 1.0;
    }
    dcg(ranked_labels, k) / ideal
}

fn mean_ndcg(groups: &[&Vec<(Vec<f64>, u8)>], weights: &[f64], k: usize) -> f64 {
    if groups.is_empty() {
        return 0.0;
    }
    let total: f64 = groups
        .iter()
        .map(|group| {
            let scores: Vec<f64> = group.iter().map(|(x, _)| dot(weights, x)).collect();
            let ranked: Vec<u8> = order_by_score(&scores).into_iter().map(|i| group[i].1).collect();
            ndcg_at_k(&ranked, k)
        })
        .sum();
    total / groups.len() as f64
}
