use axum::http::{header, HeaderMap};
use sqlx::{PgPool, Row};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::crypto::generate_token;
use crate::error::AppError;

pub type TokenMap = Arc<RwLock<HashMap<String, Session>>>;

pub struct Session {
    pub user_id: Uuid,
    pub expires_at: Instant,
}

pub struct AuthState {
    pub user_id: Uuid,
    pub name: String,
}

pub async fn create_token(user_id: Uuid, tokens: &TokenMap, ttl: Duration) -> String {
    let token = generate_token();
    tokens.write().await.insert(
        token.clone(),
        Session {
            user_id,
            expires_at: Instant::now() + ttl,
        },
    );
    token
}

pub async fn verify_token(
    headers: &HeaderMap,
    tokens: &TokenMap,
    db: &PgPool,
) -> Result<AuthState, AppError> {
    let token = extract_bearer(headers).ok_or(AppError::Unauthorized)?;

    let user_id = {
        let tokens_read = tokens.read().await;
        let session = tokens_read.get(&token).ok_or(AppError::Unauthorized)?;
        if session.expires_at <= Instant::now() {
            drop(tokens_read);
            tokens.write().await.remove(&token);
            return Err(AppError::Unauthorized);
        }
        session.user_id
    };

    // The user may have been deleted since the token was issued.
    let user_row = sqlx::query("SELECT name FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::Unauthorized)?;

    Ok(AuthState {
        user_id,
        name: user_row.get("name"),
    })
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}
