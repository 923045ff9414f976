use crate::core::features::same_city;
use crate::models::{Order, TutorCandidate};

const HIGH_RATING: f64 = 4.5;
const SENIOR_EXPERIENCE_YEARS: u32 = 5;

/// Rule-based, human-readable reasons a tutor fits an order
pub fn match_reasons(order: &Order, tutor: &TutorCandidate) -> Vec<String> {
    let mut reasons = Vec::new();

    if tutor.teaches(order.subject.id) {
        reasons.push(format!("Teaches {}", order.subject.name));
    }

    if order.budget_max > 0.0
        && order.budget_min <= tutor.hourly_rate
        && tutor.hourly_rate <= order.budget_max
    {
        reasons.push(format!("Rate {:.0} fits your budget", tutor.hourly_rate));
    }

    if tutor.rating >= HIGH_RATING {
        reasons.push(format!("High rating ({:.1})", tutor.rating));
    }

    if tutor.experience_years >= SENIOR_EXPERIENCE_YEARS {
        reasons.push(format!("{} years of experience", tutor.experience_years));
    }

    if order.requires_offline() && same_city(order, tutor) {
        reasons.push(format!("Lives in {}", tutor.city.trim()));
    }

    reasons
}
