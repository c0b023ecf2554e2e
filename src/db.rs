use sqlx::PgPool;

pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPool::connect(database_url).await?;
    initialize_schema(&pool).await?;
    Ok(pool)
}

async fn initialize_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    log::debug!("creating users table...");
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            id               UUID        PRIMARY KEY DEFAULT gen_random_uuid(),
            name             TEXT        NOT NULL,
            email            TEXT        NOT NULL UNIQUE,
            password_hash    TEXT        NOT NULL,
            streak           INTEGER     NOT NULL DEFAULT 0,
            study_minutes    INTEGER     NOT NULL DEFAULT 0,
            studied_minutes  INTEGER     NOT NULL DEFAULT 0,
            created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await?;

    log::debug!("creating subjects table...");
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS subjects (
            id             UUID        PRIMARY KEY DEFAULT gen_random_uuid(),
            user_id        UUID        NOT NULL REFERENCES users(id),
            subject_name   TEXT        NOT NULL,
            total_chapter  INTEGER     NOT NULL,
            chapters       JSONB       NOT NULL DEFAULT '[]',
            created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await?;

    // study_date is the UTC-midnight day bucket in epoch milliseconds.
    // The unique constraint is what makes the day-bucket upsert atomic.
    log::debug!("creating study_time table...");
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS study_time (
            id                UUID    PRIMARY KEY DEFAULT gen_random_uuid(),
            user_id           UUID    NOT NULL REFERENCES users(id),
            subject_id        UUID    NOT NULL REFERENCES subjects(id),
            study_minutes     INTEGER NOT NULL DEFAULT 0,
            completed_topics  INTEGER NOT NULL DEFAULT 0,
            study_date        BIGINT  NOT NULL,
            UNIQUE (user_id, subject_id, study_date)
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}
