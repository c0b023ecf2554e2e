use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

#[derive(Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub streak: i32,
    pub study_minutes: i32,
    pub studied_minutes: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A subject with its embedded chapter/subtopic tree, stored as one JSONB
/// document per row. `total_chapter` is fixed at import time.
#[derive(Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subject_name: String,
    pub total_chapter: i32,
    pub chapters: Json<Vec<Chapter>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub name: String,
    pub section: String,
    pub subtopics: Vec<Subtopic>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtopic {
    pub name: String,
    #[serde(default)]
    pub is_completed: bool,
}
