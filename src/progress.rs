use serde::{Deserialize, Serialize};
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Chapter, Subject, Subtopic};

const SUBJECT_COLUMNS: &str =
    "id, user_id, subject_name, total_chapter, chapters, created_at, updated_at";

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub total_topics: i32,
    pub completed_topics: i32,
    pub remaining_topics: i32,
    pub completion_percentage: i32,
}

/// Completion stats for a chapter/subtopic tree. Pure; the caller supplies
/// the already-fetched tree.
pub fn completion_of(chapters: &[Chapter]) -> Completion {
    let mut total = 0;
    let mut completed = 0;

    for chapter in chapters {
        for subtopic in &chapter.subtopics {
            total += 1;
            if subtopic.is_completed {
                completed += 1;
            }
        }
    }

    let percentage = if total > 0 {
        ((completed as f64 / total as f64) * 100.0).round() as i32
    } else {
        0
    };

    Completion {
        total_topics: total,
        completed_topics: completed,
        remaining_topics: total - completed,
        completion_percentage: percentage,
    }
}

/// Merge a client-supplied tree into the stored one. Chapter and subtopic
/// identity (names, sections, ordering, arity) must match exactly;
/// `isCompleted` may only go false -> true. An attempt to un-complete a
/// subtopic is ignored rather than applied.
pub fn merge_completed(existing: &[Chapter], incoming: &[Chapter]) -> Result<Vec<Chapter>, AppError> {
    if existing.len() != incoming.len() {
        return Err(AppError::Validation("Chapter structure mismatch".to_string()));
    }

    let mut merged = Vec::with_capacity(existing.len());
    for (current, update) in existing.iter().zip(incoming) {
        if current.name != update.name
            || current.section != update.section
            || current.subtopics.len() != update.subtopics.len()
        {
            return Err(AppError::Validation(format!(
                "Chapter structure mismatch in '{}'",
                current.name
            )));
        }

        let mut subtopics = Vec::with_capacity(current.subtopics.len());
        for (current_topic, updated_topic) in current.subtopics.iter().zip(&update.subtopics) {
            if current_topic.name != updated_topic.name {
                return Err(AppError::Validation(format!(
                    "Subtopic structure mismatch in '{}'",
                    current.name
                )));
            }
            subtopics.push(Subtopic {
                name: current_topic.name.clone(),
                is_completed: current_topic.is_completed || updated_topic.is_completed,
            });
        }

        merged.push(Chapter {
            name: current.name.clone(),
            section: current.section.clone(),
            subtopics,
        });
    }

    Ok(merged)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectImport {
    pub subject_name: String,
    pub chapters: Vec<Chapter>,
}

/// Bulk assignment import: one subject row per entry, `total_chapter` fixed
/// at the chapter count.
pub async fn create_subjects(
    db: &PgPool,
    user_id: Uuid,
    subjects: Vec<SubjectImport>,
) -> Result<u64, AppError> {
    if subjects.is_empty() {
        return Err(AppError::Validation("Subjects array cannot be empty".to_string()));
    }

    let mut inserted = 0;
    for subject in subjects {
        sqlx::query(
            "INSERT INTO subjects (user_id, subject_name, total_chapter, chapters) VALUES ($1, $2, $3, $4)",
        )
        .bind(user_id)
        .bind(&subject.subject_name)
        .bind(subject.chapters.len() as i32)
        .bind(Json(&subject.chapters))
        .execute(db)
        .await?;
        inserted += 1;
    }

    Ok(inserted)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSummary {
    pub id: Uuid,
    pub name: String,
    pub total_chapters: i32,
    pub completed: i32,
    pub incompleted: i32,
}

pub async fn list_subjects(db: &PgPool, user_id: Uuid) -> Result<Vec<SubjectSummary>, AppError> {
    let subjects: Vec<Subject> = sqlx::query_as(&format!(
        "SELECT {SUBJECT_COLUMNS} FROM subjects WHERE user_id = $1 ORDER BY created_at",
    ))
    .bind(user_id)
    .fetch_all(db)
    .await?;

    Ok(subjects
        .into_iter()
        .map(|subject| {
            let completion = completion_of(&subject.chapters.0);
            SubjectSummary {
                id: subject.id,
                name: subject.subject_name,
                total_chapters: subject.total_chapter,
                completed: completion.completed_topics,
                incompleted: completion.remaining_topics,
            }
        })
        .collect())
}

async fn fetch_subject(db: &PgPool, user_id: Uuid, subject_id: Uuid) -> Result<Subject, AppError> {
    sqlx::query_as(&format!(
        "SELECT {SUBJECT_COLUMNS} FROM subjects WHERE id = $1 AND user_id = $2",
    ))
    .bind(subject_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?
    .ok_or(AppError::NotFound("Subject"))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectProgress {
    pub subject_name: String,
    #[serde(flatten)]
    pub completion: Completion,
    pub total_chapters: i32,
}

pub async fn subject_progress(
    db: &PgPool,
    user_id: Uuid,
    subject_id: Uuid,
) -> Result<SubjectProgress, AppError> {
    let subject = fetch_subject(db, user_id, subject_id).await?;

    Ok(SubjectProgress {
        completion: completion_of(&subject.chapters.0),
        subject_name: subject.subject_name,
        total_chapters: subject.total_chapter,
    })
}

/// Apply a validated completion merge to a subject the caller owns.
pub async fn update_completed_topics(
    db: &PgPool,
    user_id: Uuid,
    subject_id: Uuid,
    incoming: &[Chapter],
) -> Result<(), AppError> {
    let subject = fetch_subject(db, user_id, subject_id).await?;
    let merged = merge_completed(&subject.chapters.0, incoming)?;

    sqlx::query(
        "UPDATE subjects SET chapters = $1, updated_at = NOW() WHERE id = $2 AND user_id = $3",
    )
    .bind(Json(&merged))
    .bind(subject_id)
    .bind(user_id)
    .execute(db)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(name: &str, topics: &[(&str, bool)]) -> Chapter {
        Chapter {
            name: name.to_string(),
            section: "A".to_string(),
            subtopics: topics
                .iter()
                .map(|(topic, done)| Subtopic {
                    name: topic.to_string(),
                    is_completed: *done,
                })
                .collect(),
        }
    }

    #[test]
    fn completion_two_chapters_four_done() {
        let chapters = vec![
            chapter("Ch1", &[("a", true), ("b", true), ("c", true)]),
            chapter("Ch2", &[("d", true), ("e", false), ("f", false)]),
        ];
        assert_eq!(
            completion_of(&chapters),
            Completion {
                total_topics: 6,
                completed_topics: 4,
                remaining_topics: 2,
                completion_percentage: 67,
            }
        );
    }

    #[test]
    fn completion_empty_tree_is_zero() {
        assert_eq!(completion_of(&[]).completion_percentage, 0);
        let no_topics = vec![chapter("Ch1", &[])];
        assert_eq!(completion_of(&no_topics).completion_percentage, 0);
    }

    #[test]
    fn completion_percentage_stays_in_bounds() {
        let all_done = vec![chapter("Ch1", &[("a", true), ("b", true)])];
        assert_eq!(completion_of(&all_done).completion_percentage, 100);
        let none_done = vec![chapter("Ch1", &[("a", false)])];
        assert_eq!(completion_of(&none_done).completion_percentage, 0);
    }

    #[test]
    fn merge_flips_false_to_true() {
        let existing = vec![chapter("Ch1", &[("a", false), ("b", true)])];
        let incoming = vec![chapter("Ch1", &[("a", true), ("b", true)])];
        let merged = merge_completed(&existing, &incoming).unwrap();
        assert!(merged[0].subtopics[0].is_completed);
        assert!(merged[0].subtopics[1].is_completed);
    }

    #[test]
    fn merge_ignores_uncomplete_attempt() {
        let existing = vec![chapter("Ch1", &[("a", true)])];
        let incoming = vec![chapter("Ch1", &[("a", false)])];
        let merged = merge_completed(&existing, &incoming).unwrap();
        assert!(merged[0].subtopics[0].is_completed);
    }

    #[test]
    fn merge_rejects_structural_changes() {
        let existing = vec![chapter("Ch1", &[("a", false)])];

        let renamed = vec![chapter("Ch2", &[("a", true)])];
        assert!(matches!(
            merge_completed(&existing, &renamed),
            Err(AppError::Validation(_))
        ));

        let extra_topic = vec![chapter("Ch1", &[("a", true), ("b", true)])];
        assert!(matches!(
            merge_completed(&existing, &extra_topic),
            Err(AppError::Validation(_))
        ));

        let renamed_topic = vec![chapter("Ch1", &[("z", true)])];
        assert!(matches!(
            merge_completed(&existing, &renamed_topic),
            Err(AppError::Validation(_))
        ));

        let extra_chapter = vec![
            chapter("Ch1", &[("a", false)]),
            chapter("Ch2", &[("b", false)]),
        ];
        assert!(matches!(
            merge_completed(&existing, &extra_chapter),
            Err(AppError::Validation(_))
        ));
    }
}
