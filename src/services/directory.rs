use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Order, TutorCandidate};

/// Errors from the order and tutor sources
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Invalid tutor record: {0}")]
    InvalidRecord(String),
}

/// Read-only snapshot of the tutor population
#[async_trait]
pub trait TutorDirectory: Send + Sync {
    /// All tutors linked to the subject, in a stable order
    async fn tutors_for_subject(&self, subject_id: i64) -> Result<Vec<TutorCandidate>, DirectoryError>;
}

/// Lookup of student orders by id
#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn get_order(&self, order_id: i64) -> Result<Option<Order>, DirectoryError>;
}

/// Write-back of refreshed tutor bio embeddings
#[async_trait]
pub trait TutorVectorWriter: Send + Sync {
    async fn update_tutor_vector(&self, tutor_id: i64, vector: &[f32]) -> Result<(), DirectoryError>;
}

/// Fixed in-memory population
#[derive(Debug, Clone, Default)]
pub struct InMemoryTutorDirectory {
    tutors: Vec<TutorCandidate>,
}

impl InMemoryTutorDirectory {
    pub fn new(tutors: Vec<TutorCandidate>) -> Self {
        Self { tutors }
    }
}

#[async_trait]
impl TutorDirectory for InMemoryTutorDirectory {
    async fn tutors_for_subject(&self, subject_id: i64) -> Result<Vec<TutorCandidate>, DirectoryError> {
        Ok(self
            .tutors
            .iter()
            .filter(|t| t.teaches(subject_id))
            .cloned()
            .collect())
    }
}

/// Fixed in-memory order book
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderSource {
    orders: Vec<Order>,
}

impl InMemoryOrderSource {
    pub fn new(orders: Vec<Order>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl OrderSource for InMemoryOrderSource {
    async fn get_order(&self, order_id: i64) -> Result<Option<Order>, DirectoryError> {
        Ok(self.orders.iter().find(|o| o.id == order_id).cloned())
    }
}
