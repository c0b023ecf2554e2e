use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{types::Json, PgPool, Row};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::Chapter;
use crate::progress::completion_of;

pub const MILLIS_PER_DAY: i64 = 86_400_000;

const WEEK_DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Day bucket: UTC midnight of the given day as epoch milliseconds.
pub fn day_bucket_millis(day: NaiveDate) -> i64 {
    day.and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc()
        .timestamp_millis()
}

/// Monday of the week containing `day`. A Sunday belongs to the week that
/// started six days earlier, not the one starting the next day.
pub fn week_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(day.weekday().num_days_from_monday() as i64)
}

fn round_hours(minutes: i64) -> f64 {
    (minutes as f64 / 60.0 * 10.0).round() / 10.0
}

/// Add a finished session to today's bucket for (user, subject). The
/// increment-or-insert runs as a single statement against the unique
/// (user_id, subject_id, study_date) constraint, so rapid repeated calls
/// cannot create duplicate rows or lose minutes.
pub async fn record_study_session(
    db: &PgPool,
    user_id: Uuid,
    subject_id: Uuid,
    minutes: i32,
    completed_topics: i32,
) -> Result<(), AppError> {
    if minutes <= 0 {
        return Err(AppError::Validation("Minutes must be positive".to_string()));
    }
    if completed_topics < 0 {
        return Err(AppError::Validation("Completed topics cannot be negative".to_string()));
    }

    let owned: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM subjects WHERE id = $1 AND user_id = $2")
            .bind(subject_id)
            .bind(user_id)
            .fetch_optional(db)
            .await?;
    if owned.is_none() {
        return Err(AppError::NotFound("Subject"));
    }

    sqlx::query(
        "INSERT INTO study_time (user_id, subject_id, study_minutes, completed_topics, study_date)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (user_id, subject_id, study_date)
         DO UPDATE SET study_minutes = study_time.study_minutes + EXCLUDED.study_minutes,
                       completed_topics = study_time.completed_topics + EXCLUDED.completed_topics",
    )
    .bind(user_id)
    .bind(subject_id)
    .bind(minutes)
    .bind(completed_topics)
    .bind(day_bucket_millis(today()))
    .execute(db)
    .await?;

    // Cached today total on the user row; reset by the nightly rollover.
    sqlx::query("UPDATE users SET studied_minutes = studied_minutes + $1 WHERE id = $2")
        .bind(minutes)
        .bind(user_id)
        .execute(db)
        .await?;

    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayTotal {
    pub date: i64,
    pub total_study_minutes: i64,
}

pub async fn today_total(db: &PgPool, user_id: Uuid) -> Result<TodayTotal, AppError> {
    let bucket = day_bucket_millis(today());

    let total: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(study_minutes), 0) FROM study_time
         WHERE user_id = $1 AND study_date = $2",
    )
    .bind(user_id)
    .bind(bucket)
    .fetch_one(db)
    .await?;

    Ok(TodayTotal {
        date: bucket,
        total_study_minutes: total,
    })
}

#[derive(Debug, PartialEq, Serialize)]
pub struct DayFocus {
    pub name: &'static str,
    pub hours: f64,
    pub goal: f64,
}

/// Mon..Sun distribution for the current week. Pure part split out so the
/// shape guarantees are testable without a database.
fn build_distribution(monday: NaiveDate, totals: &HashMap<i64, i64>, goal_hours: f64) -> Vec<DayFocus> {
    WEEK_DAYS
        .iter()
        .enumerate()
        .map(|(offset, name)| {
            let bucket = day_bucket_millis(monday + Duration::days(offset as i64));
            DayFocus {
                name,
                hours: totals.get(&bucket).map(|m| round_hours(*m)).unwrap_or(0.0),
                goal: goal_hours,
            }
        })
        .collect()
}

pub async fn weekly_focus(db: &PgPool, user_id: Uuid) -> Result<Vec<DayFocus>, AppError> {
    let goal_minutes: i32 = sqlx::query_scalar("SELECT study_minutes FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    // Fall back to the historical default when no goal is configured.
    let goal_hours = if goal_minutes > 0 { round_hours(goal_minutes as i64) } else { 5.0 };

    let monday = week_start(today());
    let start = day_bucket_millis(monday);
    let end = day_bucket_millis(monday + Duration::days(7));

    let rows = sqlx::query(
        "SELECT study_date, SUM(study_minutes) AS total_minutes FROM study_time
         WHERE user_id = $1 AND study_date >= $2 AND study_date < $3
         GROUP BY study_date",
    )
    .bind(user_id)
    .bind(start)
    .bind(end)
    .fetch_all(db)
    .await?;

    let totals: HashMap<i64, i64> = rows
        .iter()
        .map(|row| (row.get::<i64, _>("study_date"), row.get::<i64, _>("total_minutes")))
        .collect();

    Ok(build_distribution(monday, &totals, goal_hours))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryEntry {
    pub subject_name: String,
    pub hours: f64,
    pub percent: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyMastery {
    pub total_hours: f64,
    pub subjects: Vec<MasteryEntry>,
}

/// Per-subject hours and completion over the trailing 7-day window
/// `[today-6d, today+1d]`, upper bound inclusive so day-boundary rounding
/// never drops today's rows.
pub async fn weekly_mastery(db: &PgPool, user_id: Uuid) -> Result<WeeklyMastery, AppError> {
    let now = today();
    let start = day_bucket_millis(now - Duration::days(6));
    let end = day_bucket_millis(now) + MILLIS_PER_DAY;

    let rows = sqlx::query(
        "SELECT subject_id, SUM(study_minutes) AS total_minutes FROM study_time
         WHERE user_id = $1 AND study_date >= $2 AND study_date <= $3
         GROUP BY subject_id",
    )
    .bind(user_id)
    .bind(start)
    .bind(end)
    .fetch_all(db)
    .await?;

    let mut total_minutes: i64 = 0;
    let mut subjects = Vec::new();

    for row in &rows {
        let subject_id: Uuid = row.get("subject_id");
        let minutes: i64 = row.get("total_minutes");
        total_minutes += minutes;

        // The subject may have been deleted since the time was logged;
        // skip it rather than fail the whole report.
        let subject_row = sqlx::query("SELECT subject_name, chapters FROM subjects WHERE id = $1")
            .bind(subject_id)
            .fetch_optional(db)
            .await?;
        let Some(subject_row) = subject_row else {
            continue;
        };

        let chapters: Json<Vec<Chapter>> = subject_row.get("chapters");
        subjects.push(MasteryEntry {
            subject_name: subject_row.get("subject_name"),
            hours: round_hours(minutes),
            percent: completion_of(&chapters.0).completion_percentage,
        });
    }

    Ok(WeeklyMastery {
        // Rounded from the raw sum, not the already-rounded per-subject values.
        total_hours: round_hours(total_minutes),
        subjects,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn week_start_is_monday() {
        // 2026-08-19 is a Wednesday.
        let wednesday = NaiveDate::from_ymd_opt(2026, 8, 19).unwrap();
        assert_eq!(week_start(wednesday), NaiveDate::from_ymd_opt(2026, 8, 17).unwrap());

        let monday = NaiveDate::from_ymd_opt(2026, 8, 17).unwrap();
        assert_eq!(week_start(monday), monday);
    }

    #[test]
    fn sunday_belongs_to_the_week_behind_it() {
        let sunday = NaiveDate::from_ymd_opt(2026, 8, 23).unwrap();
        assert_eq!(week_start(sunday), NaiveDate::from_ymd_opt(2026, 8, 17).unwrap());
    }

    #[test]
    fn day_buckets_are_utc_midnight_and_a_day_apart() {
        let day = NaiveDate::from_ymd_opt(2026, 8, 17).unwrap();
        let next = day + Duration::days(1);
        assert_eq!(day_bucket_millis(day) % MILLIS_PER_DAY, 0);
        assert_eq!(day_bucket_millis(next) - day_bucket_millis(day), MILLIS_PER_DAY);
    }

    #[test]
    fn distribution_is_always_seven_days_mon_to_sun() {
        let monday = NaiveDate::from_ymd_opt(2026, 8, 17).unwrap();
        let distribution = build_distribution(monday, &HashMap::new(), 5.0);
        assert_eq!(distribution.len(), 7);
        let names: Vec<&str> = distribution.iter().map(|d| d.name).collect();
        assert_eq!(names, ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"]);
        assert!(distribution.iter().all(|d| d.hours == 0.0 && d.goal == 5.0));
    }

    #[test]
    fn distribution_places_minutes_on_the_right_day() {
        let monday = NaiveDate::from_ymd_opt(2026, 8, 17).unwrap();
        let wednesday = monday + Duration::days(2);

        let mut totals = HashMap::new();
        totals.insert(day_bucket_millis(monday), 90);
        totals.insert(day_bucket_millis(wednesday), 75);

        let distribution = build_distribution(monday, &totals, 2.0);
        assert_eq!(distribution[0].hours, 1.5);
        assert_eq!(distribution[1].hours, 0.0);
        assert_eq!(distribution[2].hours, 1.3);
    }

    #[test]
    fn hours_round_to_one_decimal() {
        assert_eq!(round_hours(60), 1.0);
        assert_eq!(round_hours(90), 1.5);
        assert_eq!(round_hours(100), 1.7);
        assert_eq!(round_hours(0), 0.0);
    }
}
