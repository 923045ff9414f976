use crate::models::{Order, TutorCandidate};

/// Default ceiling on candidates passed to feature extraction
pub const MAX_CANDIDATES: usize = 200;

/// Budget tolerance, in percent of `budget_max`
const BUDGET_TOLERANCE_PERCENT: f64 = 110.0;

/// Narrows the tutor population to a bounded set of relevant candidates
///
/// # Filters (all must pass)
/// 1. Verified and active
/// 2. Teaches the order's subject
/// 3. Rate within `budget_max * 1.10` when a budget is set
/// 4. City/region fuzzy match for offline orders with a city
#[derive(Debug, Clone, Copy)]
pub struct CandidateSelector {
    max_candidates: usize,
}

impl CandidateSelector {
    pub fn new(max_candidates: usize) -> Self {
        Self { max_candidates }
    }

    pub fn max_candidates(&self) -> usize {
        self.max_candidates
    }

    /// Select candidates for an order from a population snapshot.
    ///
    /// Keeps population order and stops at the ceiling; the capped subset
    /// carries no priority.
    pub fn select<I>(&self, order: &Order, population: I) -> Vec<TutorCandidate>
    where
        I: IntoIterator<Item = TutorCandidate>,
    {
        population
            .into_iter()
            .filter(is_eligible)
            .filter(|tutor| tutor.teaches(order.subject.id))
            .filter(|tutor| within_budget(tutor, order))
            .filter(|tutor| matches_location(tutor, order))
            .take(self.max_candidates)
            .collect()
    }
}

impl Default for CandidateSelector {
    fn default() -> Self {
        Self::new(MAX_CANDIDATES)
    }
}

#[inline]
pub fn is_eligible(tutor: &TutorCandidate) -> bool {
    tutor.is_verified && tutor.is_active
}

/// Rate must not exceed the budget by more than 10%.
///
/// Compared in whole cents so that exactly `budget_max * 1.10` passes.
#[inline]
pub fn within_budget(tutor: &TutorCandidate, order: &Order) -> bool {
    if order.budget_max <= 0.0 {
        return true;
    }
    let rate_cents = (tutor.hourly_rate * 100.0).round();
    let ceiling_cents = (order.budget_max * BUDGET_TOLERANCE_PERCENT).round();
    rate_cents <= ceiling_cents
}

/// Case-insensitive substring match on city or region, for offline orders only
#[inline]
pub fn matches_location(tutor: &TutorCandidate, order: &Order) -> bool {
    if !order.requires_offline() {
        return true;
    }
    let Some(order_city) = order.city() else {
        return true;
    };

    let contains = |haystack: &str, needle: &str| {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    };

    let city_match = tutor.city().is_some_and(|city| contains(city, order_city));
    let region_match = match (tutor.region(), order.region()) {
        (Some(tutor_region), Some(order_region)) => contains(tutor_region, order_region),
        _ => false,
    };

    city_match || region_match
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubjectRef;

    fn math() -> SubjectRef {
        SubjectRef { id: 1, name: "Mathematics".to_string() }
    }

    fn create_tutor(id: i64, rate: f64, city: &str) -> TutorCandidate {
        TutorCandidate {
            id,
            name: format!("Tutor {}", id),
            bio: String::new(),
            hourly_rate: rate,
            rating: 4.0,
            rating_count: 10,
            experience_years: 3,
            city: city.to_string(),
            region: String::new(),
            is_verified: true,
            is_active: true,
            embedding: None,
            subjects: vec![math()],
            availability: None,
        }
    }

    fn create_order(budget_max: f64) -> Order {
        Order {
            id: 1,
            student_id: 10,
            subject: math(),
            title: "Need calculus help".to_string(),
            description: String::new(),
            goal_text: String::new(),
            budget_min: 0.0,
            budget_max,
            format_online: true,
            format_offline: false,
            city: String::new(),
            region: String::new(),
            schedule: None,
        }
    }

    #[test]
    fn test_unverified_and_inactive_filtered() {
        let mut unverified = create_tutor(1, 1000.0, "");
        unverified.is_verified = false;
        let mut inactive = create_tutor(2, 1000.0, "");
        inactive.is_active = false;
        let ok = create_tutor(3, 1000.0, "");

        let selected = CandidateSelector::default().select(&create_order(2000.0), vec![unverified, inactive, ok]);

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, 3);
    }

    #[test]
    fn test_other_subject_filtered() {
        let mut physics = create_tutor(1, 1000.0, "");
        physics.subjects = vec![SubjectRef { id: 2, name: "Physics".to_string() }];

        let selected = CandidateSelector::default().select(&create_order(2000.0), vec![physics]);

        assert!(selected.is_empty());
    }

    #[test]
    fn test_budget_boundary() {
        let order = create_order(1000.0);
        assert!(within_budget(&create_tutor(1, 1100.0, ""), &order));
        assert!(!within_budget(&create_tutor(2, 1100.01, ""), &order));
    }

    #[test]
    fn test_no_budget_means_no_price_filter() {
        let order = create_order(0.0);
        assert!(within_budget(&create_tutor(1, 99_999.0, ""), &order));
    }

    #[test]
    fn test_offline_location_filter() {
        let mut order = create_order(2000.0);
        order.format_offline = true;
        order.city = "Moscow".to_string();

        let near = create_tutor(1, 1000.0, "moscow");
        let far = create_tutor(2, 1000.0, "Saint Petersburg");
        let mut same_region = create_tutor(3, 1000.0, "Khimki");
        same_region.region = "Moscow Region".to_string();
        order.region = "Moscow Region".to_string();

        let selected = CandidateSelector::default().select(&order, vec![near, far, same_region]);
        let ids: Vec<i64> = selected.iter().map(|t| t.id).collect();

        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_online_order_ignores_location() {
        let mut order = create_order(2000.0);
        order.city = "Moscow".to_string();

        let selected = CandidateSelector::default().select(&order, vec![create_tutor(1, 1000.0, "Kazan")]);

        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn test_cap_applied() {
        let population: Vec<TutorCandidate> = (0..250).map(|i| create_tutor(i, 1000.0, "")).collect();

        let selected = CandidateSelector::default().select(&create_order(2000.0), population);

        assert_eq!(selected.len(), MAX_CANDIDATES);
    }
}
