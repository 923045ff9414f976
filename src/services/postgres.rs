use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::models::{
    Order, SubjectRef, TrainingApplication, TrainingGroup, TutorCandidate, WeeklySchedule,
};
use crate::services::directory::{DirectoryError, OrderSource, TutorDirectory, TutorVectorWriter};
use crate::services::embedding::{EmbeddingCacheEntry, EmbeddingStore, StoreError};

/// Errors that can occur when interacting with PostgreSQL
#[derive(Debug, Error)]
pub enum PostgresError {
    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl From<PostgresError> for DirectoryError {
    fn from(value: PostgresError) -> Self {
        match value {
            PostgresError::SqlxError(e) => DirectoryError::SqlxError(e),
            other => DirectoryError::InvalidRecord(other.to_string()),
        }
    }
}

const TUTOR_SELECT: &str = r#"
    SELECT
        tp.id::int8 AS id,
        COALESCE(NULLIF(TRIM(u.first_name || ' ' || u.last_name), ''), u.username) AS name,
        tp.bio,
        tp.hourly_rate::float8 AS hourly_rate,
        tp.rating::float8 AS rating,
        tp.rating_count::int8 AS rating_count,
        tp.experience_years::int8 AS experience_years,
        tp.city,
        tp.region,
        tp.is_verified,
        u.is_active,
        tp.vector::text AS vector,
        tp.availability,
        COALESCE(
            (SELECT json_agg(json_build_object('id', s.id, 'name', s.name) ORDER BY s.id)
             FROM subjects_tutors sx
             JOIN subjects s ON s.id = sx.subject_id
             WHERE sx.tutorprofile_id = tp.id),
            '[]'::json
        ) AS subjects
    FROM tutor_profiles tp
    JOIN users u ON u.id = tp.user_id
"#;

const ORDER_SELECT: &str = r#"
    SELECT
        o.id::int8 AS id,
        o.student_id::int8 AS student_id,
        o.subject_id::int8 AS subject_id,
        s.name AS subject_name,
        o.title,
        o.description,
        o.goal_text,
        o.budget_min::float8 AS budget_min,
        o.budget_max::float8 AS budget_max,
        o.format_online,
        o.format_offline,
        o.city,
        o.region,
        o.schedule_json
    FROM orders o
    JOIN subjects s ON s.id = o.subject_id
"#;

/// Row counts used to judge whether there is enough data to train
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataStats {
    pub orders: i64,
    pub orders_with_applications: i64,
    pub tutors: i64,
    pub verified_tutors: i64,
    pub applications: i64,
    pub chosen_applications: i64,
    pub completed_bookings: i64,
}

/// PostgreSQL access for orders, tutors, training history and the
/// embedding cache table
#[derive(Clone)]
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Create a new PostgreSQL client from a connection string
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, PostgresError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .test_before_acquire(true)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn get_order(&self, order_id: i64) -> Result<Option<Order>, PostgresError> {
        let query = format!("{} WHERE o.id = $1", ORDER_SELECT);
        let row = sqlx::query(&query)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(order_from_row).transpose()
    }

    /// Tutors linked to the subject, ordered by id
    pub async fn get_tutors_for_subject(&self, subject_id: i64) -> Result<Vec<TutorCandidate>, PostgresError> {
        let query = format!(
            "{} WHERE EXISTS (SELECT 1 FROM subjects_tutors st WHERE st.tutorprofile_id = tp.id AND st.subject_id = $1) ORDER BY tp.id",
            TUTOR_SELECT
        );
        let rows = sqlx::query(&query)
            .bind(subject_id)
            .fetch_all(&self.pool)
            .await?;

        let tutors = rows.iter().map(tutor_from_row).collect::<Result<Vec<_>, _>>()?;
        tracing::debug!("Loaded {} tutors for subject {}", tutors.len(), subject_id);
        Ok(tutors)
    }

    pub async fn get_tutors_by_ids(&self, ids: &[i64]) -> Result<Vec<TutorCandidate>, PostgresError> {
        let query = format!("{} WHERE tp.id = ANY($1) ORDER BY tp.id", TUTOR_SELECT);
        let rows = sqlx::query(&query).bind(ids).fetch_all(&self.pool).await?;
        rows.iter().map(tutor_from_row).collect()
    }

    /// Historical orders with their applications, in order-id order.
    ///
    /// Relevance comes from `is_chosen` and a completed booking on the application.
    pub async fn get_training_groups(&self) -> Result<Vec<TrainingGroup>, PostgresError> {
        let order_query = format!(
            "{} WHERE EXISTS (SELECT 1 FROM applications a WHERE a.order_id = o.id) ORDER BY o.id",
            ORDER_SELECT
        );
        let orders = sqlx::query(&order_query)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(order_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let application_rows = sqlx::query(
            r#"
            SELECT
                a.order_id::int8 AS order_id,
                a.tutor_id::int8 AS tutor_id,
                a.is_chosen,
                EXISTS (
                    SELECT 1 FROM bookings b
                    WHERE b.application_id = a.id AND b.status = 'completed'
                ) AS booking_completed
            FROM applications a
            ORDER BY a.order_id, a.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut tutor_ids: Vec<i64> = application_rows
            .iter()
            .map(|row| row.try_get("tutor_id"))
            .collect::<Result<_, _>>()?;
        tutor_ids.sort_unstable();
        tutor_ids.dedup();

        let tutors: HashMap<i64, TutorCandidate> = self
            .get_tutors_by_ids(&tutor_ids)
            .await?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();

        let mut applications: HashMap<i64, Vec<TrainingApplication>> = HashMap::new();
        for row in &application_rows {
            let order_id: i64 = row.try_get("order_id")?;
            let tutor_id: i64 = row.try_get("tutor_id")?;
            let Some(tutor) = tutors.get(&tutor_id) else {
                continue;
            };
            applications.entry(order_id).or_default().push(TrainingApplication {
                tutor: tutor.clone(),
                is_chosen: row.try_get("is_chosen")?,
                booking_completed: row.try_get("booking_completed")?,
            });
        }

        let groups = orders
            .into_iter()
            .filter_map(|order| {
                let applications = applications.remove(&order.id)?;
                Some(TrainingGroup { order, applications })
            })
            .collect();

        Ok(groups)
    }

    pub async fn get_data_stats(&self) -> Result<DataStats, PostgresError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM orders) AS orders,
                (SELECT COUNT(DISTINCT order_id) FROM applications) AS orders_with_applications,
                (SELECT COUNT(*) FROM tutor_profiles) AS tutors,
                (SELECT COUNT(*) FROM tutor_profiles WHERE is_verified) AS verified_tutors,
                (SELECT COUNT(*) FROM applications) AS applications,
                (SELECT COUNT(*) FROM applications WHERE is_chosen) AS chosen_applications,
                (SELECT COUNT(*) FROM bookings WHERE status = 'completed') AS completed_bookings
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DataStats {
            orders: row.try_get("orders")?,
            orders_with_applications: row.try_get("orders_with_applications")?,
            tutors: row.try_get("tutors")?,
            verified_tutors: row.try_get("verified_tutors")?,
            applications: row.try_get("applications")?,
            chosen_applications: row.try_get("chosen_applications")?,
            completed_bookings: row.try_get("completed_bookings")?,
        })
    }

    /// (tutor id, bio) of verified tutors with a non-blank bio
    pub async fn get_verified_tutor_bios(&self) -> Result<Vec<(i64, String)>, PostgresError> {
        let rows = sqlx::query(
            r#"
            SELECT id::int8 AS id, bio
            FROM tutor_profiles
            WHERE is_verified AND TRIM(bio) <> ''
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok((row.try_get("id")?, row.try_get("bio")?)))
            .collect()
    }

    pub async fn update_tutor_vector(&self, tutor_id: i64, vector: &[f32]) -> Result<(), PostgresError> {
        let literal = serde_json::to_string(vector)
            .map_err(|e| PostgresError::InvalidRecord(e.to_string()))?;

        let result = sqlx::query("UPDATE tutor_profiles SET vector = $2::vector, updated_at = NOW() WHERE id = $1")
            .bind(tutor_id)
            .bind(literal)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PostgresError::NotFound(format!("tutor {}", tutor_id)));
        }
        Ok(())
    }

    /// Health check for the database connection
    pub async fn health_check(&self) -> Result<bool, PostgresError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| true)
            .map_err(Into::into)
    }
}

#[async_trait]
impl TutorDirectory for PostgresClient {
    async fn tutors_for_subject(&self, subject_id: i64) -> Result<Vec<TutorCandidate>, DirectoryError> {
        Ok(self.get_tutors_for_subject(subject_id).await?)
    }
}

#[async_trait]
impl OrderSource for PostgresClient {
    async fn get_order(&self, order_id: i64) -> Result<Option<Order>, DirectoryError> {
        Ok(PostgresClient::get_order(self, order_id).await?)
    }
}

#[async_trait]
impl TutorVectorWriter for PostgresClient {
    async fn update_tutor_vector(&self, tutor_id: i64, vector: &[f32]) -> Result<(), DirectoryError> {
        Ok(PostgresClient::update_tutor_vector(self, tutor_id, vector).await?)
    }
}

#[async_trait]
impl EmbeddingStore for PostgresClient {
    async fn get(&self, text_hash: &str) -> Result<Option<EmbeddingCacheEntry>, StoreError> {
        let row = sqlx::query(
            "SELECT text, text_hash, vector, created_at FROM embedding_cache WHERE text_hash = $1",
        )
        .bind(text_hash)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let Json(vector): Json<Vec<f32>> = row.try_get("vector")?;
        Ok(Some(EmbeddingCacheEntry {
            text: row.try_get("text")?,
            text_hash: row.try_get("text_hash")?,
            vector,
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn insert_if_absent(&self, entry: EmbeddingCacheEntry) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO embedding_cache (text, text_hash, vector, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (text_hash) DO NOTHING
            "#,
        )
        .bind(&entry.text)
        .bind(&entry.text_hash)
        .bind(Json(&entry.vector))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM embedding_cache WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        tracing::info!("Purged {} embedding cache entries older than {}", result.rows_affected(), cutoff);
        Ok(result.rows_affected())
    }
}

fn order_from_row(row: &PgRow) -> Result<Order, PostgresError> {
    Ok(Order {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        subject: SubjectRef {
            id: row.try_get("subject_id")?,
            name: row.try_get("subject_name")?,
        },
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        goal_text: row.try_get("goal_text")?,
        budget_min: row.try_get("budget_min")?,
        budget_max: row.try_get("budget_max")?,
        format_online: row.try_get("format_online")?,
        format_offline: row.try_get("format_offline")?,
        city: row.try_get("city")?,
        region: row.try_get("region")?,
        schedule: parse_schedule(row.try_get("schedule_json")?),
    })
}

fn tutor_from_row(row: &PgRow) -> Result<TutorCandidate, PostgresError> {
    let id: i64 = row.try_get("id")?;
    let Json(subjects): Json<Vec<SubjectRef>> = row.try_get("subjects")?;
    let rating_count: i64 = row.try_get("rating_count")?;
    let experience_years: i64 = row.try_get("experience_years")?;

    Ok(TutorCandidate {
        id,
        name: row.try_get("name")?,
        bio: row.try_get("bio")?,
        hourly_rate: row.try_get("hourly_rate")?,
        rating: row.try_get("rating")?,
        rating_count: rating_count.clamp(0, u32::MAX as i64) as u32,
        experience_years: experience_years.clamp(0, u32::MAX as i64) as u32,
        city: row.try_get("city")?,
        region: row.try_get("region")?,
        is_verified: row.try_get("is_verified")?,
        is_active: row.try_get("is_active")?,
        embedding: parse_vector(id, row.try_get("vector")?),
        subjects,
        availability: parse_schedule(row.try_get("availability")?),
    })
}

/// pgvector's text form `[0.1,0.2,...]` is a JSON array
fn parse_vector(tutor_id: i64, text: Option<String>) -> Option<Vec<f32>> {
    let text = text?;
    match serde_json::from_str::<Vec<f32>>(&text) {
        Ok(vector) if !vector.is_empty() => Some(vector),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("Ignoring malformed vector for tutor {}: {}", tutor_id, e);
            None
        }
    }
}

/// Schedules that do not follow the slot layout are treated as unknown
fn parse_schedule(value: Option<serde_json::Value>) -> Option<WeeklySchedule> {
    serde_json::from_value::<WeeklySchedule>(value?)
        .ok()
        .filter(|schedule| !schedule.slots.is_empty())
}
