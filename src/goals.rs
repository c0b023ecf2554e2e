use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::User;
use crate::study_time::{day_bucket_millis, today};

pub async fn fetch_user(db: &PgPool, user_id: Uuid) -> Result<User, AppError> {
    sqlx::query_as(
        "SELECT id, name, email, password_hash, streak, study_minutes, studied_minutes, created_at
         FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(db)
    .await?
    .ok_or(AppError::NotFound("User"))
}

pub async fn set_goal(db: &PgPool, user_id: Uuid, minutes: i32) -> Result<(), AppError> {
    if minutes < 0 {
        return Err(AppError::Validation("Study goal cannot be negative".to_string()));
    }

    let result = sqlx::query("UPDATE users SET study_minutes = $1 WHERE id = $2")
        .bind(minutes)
        .bind(user_id)
        .execute(db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User"));
    }
    Ok(())
}

pub async fn get_goal(db: &PgPool, user_id: Uuid) -> Result<i32, AppError> {
    Ok(fetch_user(db, user_id).await?.study_minutes)
}

pub async fn get_streak(db: &PgPool, user_id: Uuid) -> Result<i32, AppError> {
    Ok(fetch_user(db, user_id).await?.streak)
}

/// Streak transition for one completed day: meeting the goal extends the
/// streak by exactly one, missing it resets to zero.
fn next_streak(current: i32, studied_minutes: i64, goal_minutes: i32) -> i32 {
    if studied_minutes >= goal_minutes as i64 {
        current + 1
    } else {
        0
    }
}

/// Nightly batch: settle every user's streak against yesterday's total and
/// clear the cached today counter. One user's failure must not abort the
/// rest of the batch.
pub async fn run_daily_rollover(db: &PgPool) {
    let yesterday_bucket = day_bucket_millis(today() - Duration::days(1));

    let users = match sqlx::query("SELECT id, streak, study_minutes FROM users")
        .fetch_all(db)
        .await
    {
        Ok(users) => users,
        Err(e) => {
            log::error!("streak rollover: failed to list users: {}", e);
            return;
        }
    };

    for row in users {
        let user_id: Uuid = row.get("id");
        let streak: i32 = row.get("streak");
        let goal: i32 = row.get("study_minutes");

        if let Err(e) = roll_user(db, user_id, streak, goal, yesterday_bucket).await {
            log::warn!("streak rollover failed for user {}: {}", user_id, e);
        }
    }
}

async fn roll_user(
    db: &PgPool,
    user_id: Uuid,
    streak: i32,
    goal: i32,
    yesterday_bucket: i64,
) -> Result<(), AppError> {
    let studied: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(study_minutes), 0) FROM study_time
         WHERE user_id = $1 AND study_date = $2",
    )
    .bind(user_id)
    .bind(yesterday_bucket)
    .fetch_one(db)
    .await?;

    sqlx::query("UPDATE users SET streak = $1, studied_minutes = 0 WHERE id = $2")
        .bind(next_streak(streak, studied, goal))
        .bind(user_id)
        .execute(db)
        .await?;

    Ok(())
}

fn until_next_utc_midnight(now: DateTime<Utc>) -> std::time::Duration {
    let next = (now.date_naive() + Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc();
    (next - now)
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(1))
}

/// Runs the rollover once per day at UTC midnight for the life of the process.
pub fn spawn_rollover_scheduler(db: PgPool) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(until_next_utc_midnight(Utc::now())).await;
            log::info!("running nightly streak rollover");
            run_daily_rollover(&db).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn streak_over_three_days() {
        // goal 120, day totals [150, 60, 120] -> streaks [1, 0, 1]
        let goal = 120;
        let mut streak = 0;

        streak = next_streak(streak, 150, goal);
        assert_eq!(streak, 1);
        streak = next_streak(streak, 60, goal);
        assert_eq!(streak, 0);
        streak = next_streak(streak, 120, goal);
        assert_eq!(streak, 1);
    }

    #[test]
    fn streak_never_increments_by_more_than_one() {
        let streak = next_streak(4, 10_000, 120);
        assert_eq!(streak, 5);
    }

    #[test]
    fn exact_goal_counts_as_met() {
        assert_eq!(next_streak(2, 120, 120), 3);
        assert_eq!(next_streak(2, 119, 120), 0);
    }

    #[test]
    fn rollover_wait_ends_at_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 8, 24, 22, 30, 0).unwrap();
        assert_eq!(until_next_utc_midnight(now).as_secs(), 90 * 60);

        let just_after_midnight = Utc.with_ymd_and_hms(2026, 8, 24, 0, 0, 1).unwrap();
        let wait = until_next_utc_midnight(just_after_midnight).as_secs();
        assert_eq!(wait, 86_399);
    }
}
