//! Tutor Match - AI matching and ranking service for the tutors marketplace
//!
//! This library selects, scores and explains the tutors best suited to a
//! student's order. It implements a staged pipeline: candidate selection,
//! feature extraction, learned (or fallback) ranking and an optional
//! language-model re-rank, with every external call behind a retry gate.

pub mod bootstrap;
pub mod config;
pub mod core;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use core::{CandidateSelector, FeatureExtractor, MatchOutcome, Matcher, Ranker};
pub use models::{MatchRequest, MatchResponse, MatchResult, Order, TutorCandidate};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        assert_eq!(Ranker::default().strategy_name(), "fallback");
        assert_eq!(CandidateSelector::default().max_candidates(), core::MAX_CANDIDATES);
    }
}
