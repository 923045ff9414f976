use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{Order, TutorCandidate, WeeklySchedule};
use crate::services::embedding::EmbeddingCache;

/// Version of the feature layout below. Bump on any change to order or meaning.
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

/// Feature names in vector order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "tutor_price",
    "price_ratio",
    "in_budget",
    "tutor_rating",
    "tutor_reviews",
    "tutor_experience",
    "availability_overlap",
    "location_match",
    "semantic_similarity",
];

pub const FEATURE_COUNT: usize = 9;

/// Value used when schedules or embeddings are unknown
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Index of each feature in a [`FeatureVector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    TutorPrice = 0,
    PriceRatio = 1,
    InBudget = 2,
    TutorRating = 3,
    TutorReviews = 4,
    TutorExperience = 5,
    AvailabilityOverlap = 6,
    LocationMatch = 7,
    SemanticSimilarity = 8,
}

/// Fixed-schema numeric encoding of an (order, tutor) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub schema_version: u32,
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn get(&self, feature: Feature) -> f64 {
        self.values.get(feature as usize).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Converts (order, tutor) pairs into feature vectors.
///
/// Pure except for the order-text embedding, which goes through the
/// embedding cache when one is configured.
#[derive(Clone, Default)]
pub struct FeatureExtractor {
    embeddings: Option<Arc<EmbeddingCache>>,
}

impl FeatureExtractor {
    pub fn new(embeddings: Option<Arc<EmbeddingCache>>) -> Self {
        Self { embeddings }
    }

    /// Extractor that never calls out; semantic similarity uses the neutral default
    pub fn offline() -> Self {
        Self { embeddings: None }
    }

    /// Embedding of the order's free text, or `None` when unavailable.
    ///
    /// Provider failures only cost the semantic feature.
    pub async fn order_embedding(&self, order: &Order) -> Option<Vec<f32>> {
        let cache = self.embeddings.as_ref()?;
        match cache.get_or_compute(&order.embedding_text()).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::error!("Order {} embedding failed, semantic feature degraded: {}", order.id, e);
                None
            }
        }
    }

    /// Extract features for every tutor, fetching the order embedding once
    pub async fn extract_all(&self, order: &Order, tutors: &[TutorCandidate]) -> Vec<FeatureVector> {
        let embedding = self.order_embedding(order).await;
        tutors
            .iter()
            .map(|tutor| extract_features(order, tutor, embedding.as_deref()))
            .collect()
    }
}

/// Build the feature vector given an already-resolved order embedding
pub fn extract_features(
    order: &Order,
    tutor: &TutorCandidate,
    order_embedding: Option<&[f32]>,
) -> FeatureVector {
    let rate = tutor.hourly_rate;
    let in_budget = if rate <= order.budget_max { 1.0 } else { 0.0 };

    let semantic = match (order_embedding, tutor.embedding.as_deref()) {
        (Some(a), Some(b)) => cosine_similarity(a, b),
        _ => NEUTRAL_SCORE,
    };

    let values = vec![
        rate,
        rate / order.budget_max.max(1.0),
        in_budget,
        tutor.rating,
        tutor.rating_count as f64,
        tutor.experience_years as f64,
        availability_overlap(order.schedule.as_ref(), tutor.availability.as_ref()),
        location_match(order, tutor),
        semantic,
    ];

    FeatureVector {
        schema_version: FEATURE_SCHEMA_VERSION,
        values,
    }
}

/// Share of the student's requested minutes covered by the tutor's availability (0-1)
///
/// Either schedule missing or empty → 0.5.
pub fn availability_overlap(
    requested: Option<&WeeklySchedule>,
    available: Option<&WeeklySchedule>,
) -> f64 {
    let (Some(requested), Some(available)) = (requested, available) else {
        return NEUTRAL_SCORE;
    };
    if requested.is_empty() || available.is_empty() {
        return NEUTRAL_SCORE;
    }

    let requested_minutes = requested.total_minutes() as f64;
    let covered: u32 = requested
        .slots
        .iter()
        .map(|want| {
            available
                .slots
                .iter()
                .map(|have| want.overlap_minutes(have))
                .sum::<u32>()
                .min(want.minutes())
        })
        .sum();

    (covered as f64 / requested_minutes).clamp(0.0, 1.0)
}

/// Location score for the ranking features
///
/// Online-only → 1.0, same city → 1.0, same region → 0.7, otherwise 0.3.
pub fn location_match(order: &Order, tutor: &TutorCandidate) -> f64 {
    if !order.requires_offline() {
        return 1.0;
    }

    if same_city(order, tutor) {
        return 1.0;
    }

    if let (Some(order_region), Some(tutor_region)) = (order.region(), tutor.region()) {
        if order_region.to_lowercase() == tutor_region.to_lowercase() {
            return 0.7;
        }
    }

    0.3
}

/// Case-insensitive city equality; false when either city is missing
pub fn same_city(order: &Order, tutor: &TutorCandidate) -> bool {
    match (order.city(), tutor.city()) {
        (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
        _ => false,
    }
}

/// Cosine similarity in [-1, 1].
///
/// Empty, zero-norm or dimension-mismatched inputs return the neutral 0.5.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        tracing::warn!(
            "Embedding dimension mismatch ({} vs {}), using neutral similarity",
            a.len(),
            b.len()
        );
        return NEUTRAL_SCORE;
    }
    if a.is_empty() {
        return NEUTRAL_SCORE;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return NEUTRAL_SCORE;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SubjectRef, TimeSlot};
    use chrono::Weekday;

    fn create_order() -> Order {
        Order {
            id: 1,
            student_id: 10,
            subject: SubjectRef { id: 1, name: "Mathematics".to_string() },
            title: "Need calculus help".to_string(),
            description: "I struggle with derivatives".to_string(),
            goal_text: String::new(),
            budget_min: 1000.0,
            budget_max: 2000.0,
            format_online: true,
            format_offline: false,
            city: "Moscow".to_string(),
            region: "Moscow Region".to_string(),
            schedule: None,
        }
    }

    fn create_tutor() -> TutorCandidate {
        TutorCandidate {
            id: 7,
            name: "Tutor".to_string(),
            bio: "Experienced mathematics tutor".to_string(),
            hourly_rate: 1500.0,
            rating: 4.8,
            rating_count: 25,
            experience_years: 5,
            city: "Moscow".to_string(),
            region: "Moscow Region".to_string(),
            is_verified: true,
            is_active: true,
            embedding: None,
            subjects: vec![SubjectRef { id: 1, name: "Mathematics".to_string() }],
            availability: None,
        }
    }

    #[test]
    fn test_feature_layout() {
        let features = extract_features(&create_order(), &create_tutor(), None);

        assert_eq!(features.schema_version, FEATURE_SCHEMA_VERSION);
        assert_eq!(features.len(), FEATURE_COUNT);
        assert_eq!(features.get(Feature::TutorPrice), 1500.0);
        assert_eq!(features.get(Feature::PriceRatio), 0.75);
        assert_eq!(features.get(Feature::InBudget), 1.0);
        assert_eq!(features.get(Feature::TutorRating), 4.8);
        assert_eq!(features.get(Feature::TutorReviews), 25.0);
        assert_eq!(features.get(Feature::TutorExperience), 5.0);
        assert_eq!(features.get(Feature::AvailabilityOverlap), NEUTRAL_SCORE);
        assert_eq!(features.get(Feature::LocationMatch), 1.0);
        assert_eq!(features.get(Feature::SemanticSimilarity), NEUTRAL_SCORE);
    }

    #[test]
    fn test_price_ratio_with_zero_budget() {
        let mut order = create_order();
        order.budget_max = 0.0;
        let features = extract_features(&order, &create_tutor(), None);

        assert_eq!(features.get(Feature::PriceRatio), 1500.0);
        assert_eq!(features.get(Feature::InBudget), 0.0);
    }

    #[test]
    fn test_location_scores() {
        let mut order = create_order();
        order.format_offline = true;
        let mut tutor = create_tutor();

        assert_eq!(location_match(&order, &tutor), 1.0);

        tutor.city = "Khimki".to_string();
        assert_eq!(location_match(&order, &tutor), 0.7);

        tutor.region = "Leningrad Region".to_string();
        assert_eq!(location_match(&order, &tutor), 0.3);

        tutor.city = String::new();
        tutor.region = String::new();
        assert_eq!(location_match(&order, &tutor), 0.3);
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        assert!((cosine_similarity(&[0.1, 0.2, 0.3], &[0.1, 0.2, 0.3]) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_zero_vector_is_neutral() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), NEUTRAL_SCORE);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[0.0, 0.0]), NEUTRAL_SCORE);
        assert_eq!(cosine_similarity(&[], &[]), NEUTRAL_SCORE);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), NEUTRAL_SCORE);
    }

    #[test]
    fn test_semantic_feature_uses_embeddings() {
        let mut tutor = create_tutor();
        tutor.embedding = Some(vec![1.0, 0.0]);
        let features = extract_features(&create_order(), &tutor, Some(&[0.0, 1.0]));
        assert_eq!(features.get(Feature::SemanticSimilarity), 0.0);
    }

    #[test]
    fn test_availability_overlap() {
        let requested = WeeklySchedule {
            slots: vec![
                TimeSlot { day: Weekday::Mon, start_minute: 600, end_minute: 720 },
                TimeSlot { day: Weekday::Wed, start_minute: 600, end_minute: 720 },
            ],
        };
        let available = WeeklySchedule {
            slots: vec![TimeSlot { day: Weekday::Mon, start_minute: 540, end_minute: 780 }],
        };

        assert_eq!(availability_overlap(Some(&requested), Some(&available)), 0.5);
        assert_eq!(availability_overlap(Some(&requested), Some(&requested)), 1.0);
        assert_eq!(availability_overlap(None, Some(&available)), NEUTRAL_SCORE);
        assert_eq!(availability_overlap(Some(&requested), Some(&WeeklySchedule::default())), NEUTRAL_SCORE);
    }

    #[tokio::test]
    async fn test_offline_extractor_matches_pure_function() {
        let extractor = FeatureExtractor::offline();
        let order = create_order();
        let tutor = create_tutor();

        let features = extractor.extract_all(&order, std::slice::from_ref(&tutor)).await;

        assert_eq!(features, vec![extract_features(&order, &tutor, None)]);
    }
}
