use chrono::Weekday;
use serde::{Deserialize, Serialize};

/// Subject reference (id + display name)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRef {
    pub id: i64,
    pub name: String,
}

/// A single weekly time window, minutes counted from midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub day: Weekday,
    #[serde(rename = "startMinute")]
    pub start_minute: u16,
    #[serde(rename = "endMinute")]
    pub end_minute: u16,
}

impl TimeSlot {
    /// Length of the slot in minutes; inverted slots count as empty
    pub fn minutes(&self) -> u32 {
        self.end_minute.saturating_sub(self.start_minute) as u32
    }

    /// Minutes shared with another slot on the same weekday
    pub fn overlap_minutes(&self, other: &TimeSlot) -> u32 {
        if self.day != other.day {
            return 0;
        }
        let start = self.start_minute.max(other.start_minute);
        let end = self.end_minute.min(other.end_minute);
        end.saturating_sub(start) as u32
    }
}

/// Weekly schedule: the student's preferred lesson times or a tutor's availability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    #[serde(default)]
    pub slots: Vec<TimeSlot>,
}

impl WeeklySchedule {
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|slot| slot.minutes() == 0)
    }

    pub fn total_minutes(&self) -> u32 {
        self.slots.iter().map(TimeSlot::minutes).sum()
    }
}

/// Student order looking for a tutor
///
/// Blank `city`/`region` strings mean "not provided"; use [`Order::city`] and
/// [`Order::region`] rather than reading the fields directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    #[serde(rename = "studentId")]
    pub student_id: i64,
    pub subject: SubjectRef,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "goalText", default)]
    pub goal_text: String,
    #[serde(rename = "budgetMin", default)]
    pub budget_min: f64,
    #[serde(rename = "budgetMax", default)]
    pub budget_max: f64,
    #[serde(rename = "formatOnline", default = "default_true")]
    pub format_online: bool,
    #[serde(rename = "formatOffline", default)]
    pub format_offline: bool,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub schedule: Option<WeeklySchedule>,
}

impl Order {
    pub fn city(&self) -> Option<&str> {
        non_blank(&self.city)
    }

    pub fn region(&self) -> Option<&str> {
        non_blank(&self.region)
    }

    /// Location only matters when the student accepts in-person lessons
    pub fn requires_offline(&self) -> bool {
        self.format_offline
    }

    /// Free text used for the order's semantic embedding
    pub fn embedding_text(&self) -> String {
        format!("{} {} {}", self.title, self.description, self.goal_text)
    }
}

/// Tutor as seen by the matching pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorCandidate {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(rename = "hourlyRate")]
    pub hourly_rate: f64,
    #[serde(default)]
    pub rating: f64,
    #[serde(rename = "ratingCount", default)]
    pub rating_count: u32,
    #[serde(rename = "experienceYears", default)]
    pub experience_years: u32,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub region: String,
    #[serde(rename = "isVerified", default)]
    pub is_verified: bool,
    #[serde(rename = "isActive", default = "default_true")]
    pub is_active: bool,
    #[serde(default, skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub subjects: Vec<SubjectRef>,
    #[serde(default, skip_serializing)]
    pub availability: Option<WeeklySchedule>,
}

impl TutorCandidate {
    pub fn city(&self) -> Option<&str> {
        non_blank(&self.city)
    }

    pub fn region(&self) -> Option<&str> {
        non_blank(&self.region)
    }

    pub fn teaches(&self, subject_id: i64) -> bool {
        self.subjects.iter().any(|s| s.id == subject_id)
    }

    /// Subjects as a comma-separated string
    pub fn subjects_display(&self) -> String {
        self.subjects
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A ranked tutor with human-readable reasons
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub tutor: TutorCandidate,
    pub score: f64,
    pub reasons: Vec<String>,
}

/// One order's applications, used to build a training group
#[derive(Debug, Clone)]
pub struct TrainingGroup {
    pub order: Order,
    pub applications: Vec<TrainingApplication>,
}

#[derive(Debug, Clone)]
pub struct TrainingApplication {
    pub tutor: TutorCandidate,
    pub is_chosen: bool,
    pub booking_completed: bool,
}

impl TrainingApplication {
    /// Graded relevance: chosen and completed > chosen > not chosen
    pub fn relevance(&self) -> u8 {
        match (self.is_chosen, self.booking_completed) {
            (true, true) => 2,
            (true, false) => 1,
            _ => 0,
        }
    }
}

fn non_blank(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn default_true() -> bool { true }
