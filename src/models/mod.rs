// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{
    MatchResult, Order, SubjectRef, TimeSlot, TrainingApplication, TrainingGroup, TutorCandidate,
    WeeklySchedule,
};
pub use requests::MatchRequest;
pub use responses::{ErrorResponse, HealthResponse, MatchResponse};
