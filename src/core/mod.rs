// Core algorithm exports
pub mod candidates;
pub mod features;
pub mod matcher;
pub mod ranking;
pub mod reasons;
pub mod reranker;
pub mod training;

pub use candidates::{CandidateSelector, MAX_CANDIDATES};
pub use features::{cosine_similarity, extract_features, FeatureExtractor, FeatureVector};
pub use matcher::{MatchError, MatchOutcome, Matcher};
pub use ranking::{FallbackRanker, LearnedRanker, ModelArtifact, Ranker, RankingModel};
pub use reasons::match_reasons;
pub use reranker::Reranker;
pub use training::{build_dataset, train, TrainingDataset, TrainingError, TrainingParams, TrainingReport};
