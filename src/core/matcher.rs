use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};

use crate::core::{
    candidates::CandidateSelector,
    features::{extract_features, FeatureExtractor, FeatureVector},
    ranking::{rank_candidates, Ranker},
    reasons::match_reasons,
    reranker::Reranker,
};
use crate::models::{MatchResult, Order};
use crate::services::directory::{DirectoryError, TutorDirectory};

/// Default end-to-end budget for the external steps of one request
pub const DEFAULT_REQUEST_BUDGET: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Tutor directory error: {0}")]
    Directory(#[from] DirectoryError),
}

/// Result of the matching process
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub matches: Vec<MatchResult>,
    pub total_found: usize,
    /// Whether the language-model pass produced the final order
    pub reranked: bool,
}

/// Main matching orchestrator
///
/// # Pipeline Stages
/// 1. Candidate selection (eligibility, subject, budget, location, cap)
/// 2. Feature extraction
/// 3. Scoring and ranking
/// 4. Optional re-rank of the top `2 * limit`
/// 5. Rule-based reasons when the re-rank is skipped or fails
#[derive(Clone)]
pub struct Matcher {
    directory: Arc<dyn TutorDirectory>,
    selector: CandidateSelector,
    extractor: FeatureExtractor,
    ranker: Arc<Ranker>,
    reranker: Option<Reranker>,
    request_budget: Duration,
}

impl Matcher {
    pub fn new(directory: Arc<dyn TutorDirectory>, ranker: Arc<Ranker>) -> Self {
        Self {
            directory,
            selector: CandidateSelector::default(),
            extractor: FeatureExtractor::offline(),
            ranker,
            reranker: None,
            request_budget: DEFAULT_REQUEST_BUDGET,
        }
    }

    pub fn with_selector(mut self, selector: CandidateSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_extractor(mut self, extractor: FeatureExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_reranker(mut self, reranker: Option<Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn with_request_budget(mut self, budget: Duration) -> Self {
        self.request_budget = budget;
        self
    }

    pub fn ranker(&self) -> &Ranker {
        &self.ranker
    }

    /// Find the best `limit` tutors for an order.
    ///
    /// Only directory failures are errors. Provider and model problems degrade
    /// to the ranker's order; no candidates is an empty result.
    pub async fn get_matches(&self, order: &Order, limit: usize) -> Result<MatchOutcome, MatchError> {
        let deadline = Instant::now() + self.request_budget;

        let population = self.directory.tutors_for_subject(order.subject.id).await?;
        let population_size = population.len();

        // Stage 1: candidate selection
        let candidates = self.selector.select(order, population);
        tracing::debug!(
            "Order {}: {} of {} tutors passed selection",
            order.id,
            candidates.len(),
            population_size
        );

        if candidates.is_empty() || limit == 0 {
            return Ok(MatchOutcome {
                matches: vec![],
                total_found: 0,
                reranked: false,
            });
        }

        // Stage 2: features; the order embedding is the only external call
        let embedding = match timeout_at(deadline, self.extractor.order_embedding(order)).await {
            Ok(embedding) => embedding,
            Err(_) => {
                tracing::warn!("Order {}: embedding exceeded request budget", order.id);
                None
            }
        };
        let features: Vec<FeatureVector> = candidates
            .iter()
            .map(|tutor| extract_features(order, tutor, embedding.as_deref()))
            .collect();

        // Stage 3: scoring
        let scores = self.ranker.score(&features);
        let mut ranked = rank_candidates(candidates, features, scores);
        ranked.truncate(limit.saturating_mul(2));

        // Stage 4: optional re-rank
        if let Some(reranker) = &self.reranker {
            if ranked.len() > limit {
                match timeout_at(deadline, reranker.rerank(order, &ranked, limit)).await {
                    Ok(Some(matches)) if !matches.is_empty() => {
                        return Ok(MatchOutcome {
                            total_found: matches.len(),
                            matches,
                            reranked: true,
                        });
                    }
                    Ok(_) => {}
                    Err(_) => tracing::warn!("Order {}: re-rank exceeded request budget", order.id),
                }
            }
        }

        // Stage 5: ranker order with rule-based reasons
        let matches: Vec<MatchResult> = ranked
            .into_iter()
            .take(limit)
            .map(|candidate| MatchResult {
                reasons: match_reasons(order, &candidate.tutor),
                tutor: candidate.tutor,
                score: candidate.score,
            })
            .collect();

        Ok(MatchOutcome {
            total_found: matches.len(),
            matches,
            reranked: false,
        })
    }
}
