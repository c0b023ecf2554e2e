use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue},
    routing::{get, post},
    Json, Router,
};
use regex::Regex;
use serde::Deserialize;
use sqlx::PgPool;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
};
use uuid::Uuid;

mod auth;
mod config;
mod crypto;
mod db;
mod error;
mod goals;
mod models;
mod progress;
mod study_time;

use auth::{create_token, verify_token, AuthState, TokenMap};
use config::Config;
use crypto::{hash_password, verify_password};
use error::AppError;
use models::Chapter;
use progress::SubjectImport;

type AppState = Arc<AppData>;

struct AppData {
    db: PgPool,
    tokens: TokenMap,
    config: Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Config::load();
    let db = db::connect(&config.database_url).await?;

    goals::spawn_rollover_scheduler(db.clone());

    let cors = match &config.cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin.parse::<HeaderValue>()?)
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::permissive(),
    };

    let port = config.port;
    let app_state = AppState::new(AppData {
        db,
        tokens: Arc::new(RwLock::new(HashMap::new())),
        config,
    });

    let app = Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/user/profile", get(get_profile))
        .route("/api/assignments", post(create_assignments))
        .route("/api/subjects", get(list_subjects))
        .route("/api/subjects/:id/progress", get(subject_progress))
        .route("/api/subjects/completed-topics", post(update_completed_topics))
        .route("/api/study/goal", post(set_study_goal))
        .route("/api/study/goal", get(get_study_goal))
        .route("/api/study/streak", get(get_streak))
        .route("/api/study/time", post(record_study_time))
        .route("/api/study/time", get(get_today_study_time))
        .route("/api/study/weekly-focus", get(weekly_focus))
        .route("/api/study/weekly-mastery", get(weekly_mastery))
        .layer(RequestBodyLimitLayer::new(2 * 1024 * 1024)) // 2MB limit
        .layer(cors)
        .with_state(app_state);

    log::info!("Studytrack server starting on port {}", port);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn authenticate(headers: &HeaderMap, state: &AppState) -> Result<AuthState, AppError> {
    verify_token(headers, &state.tokens, &state.db).await
}

#[derive(Deserialize)]
struct RegisterRequest {
    name: String,
    email: String,
    password: String,
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if req.name.trim().is_empty() {
        return Err(AppError::Validation("Name must not be empty".to_string()));
    }

    let email_regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    if !email_regex.is_match(&req.email) {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }

    if req.password.len() < 8 {
        return Err(AppError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    let password_hash = hash_password(&req.password).await?;

    let result = sqlx::query("INSERT INTO users (name, email, password_hash) VALUES ($1, $2, $3)")
        .bind(req.name.trim())
        .bind(&req.email)
        .bind(&password_hash)
        .execute(&state.db)
        .await;

    match result {
        Ok(_) => Ok(Json(serde_json::json!({
            "status": 202,
            "message": "User created successfully"
        }))),
        Err(_) => Err(AppError::Validation("Email already registered".to_string())),
    }
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    // Always perform a hash verification to keep login constant time
    // whether or not the email exists.
    let dummy_hash = "$2b$12$dummy.hash.for.timing.protection.with.enough.length.here.ok";
    let mut password_to_verify = dummy_hash.to_string();
    let mut user_id: Option<Uuid> = None;

    let user_row: Option<models::User> = sqlx::query_as(
        "SELECT id, name, email, password_hash, streak, study_minutes, studied_minutes, created_at
         FROM users WHERE email = $1",
    )
    .bind(&req.email)
    .fetch_optional(&state.db)
    .await?;

    if let Some(user) = user_row {
        password_to_verify = user.password_hash;
        user_id = Some(user.id);
    }

    let password_valid = verify_password(&req.password, &password_to_verify)
        .await
        .unwrap_or(false);

    match user_id {
        Some(id) if password_valid => {
            let ttl = Duration::from_secs(state.config.token_ttl_secs);
            let token = create_token(id, &state.tokens, ttl).await;
            Ok(Json(serde_json::json!({ "token": token })))
        }
        _ => Err(AppError::Unauthorized),
    }
}

async fn get_profile(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let auth_state = authenticate(&headers, &state).await?;

    let user = goals::fetch_user(&state.db, auth_state.user_id).await?;

    Ok(Json(serde_json::json!({
        "name": auth_state.name,
        "email": user.email,
        "streak": user.streak,
        "studyMinutes": user.study_minutes,
        "studiedMinutes": user.studied_minutes
    })))
}

#[derive(Deserialize)]
struct CreateAssignmentsRequest {
    subjects: Vec<SubjectImport>,
}

async fn create_assignments(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<CreateAssignmentsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let auth_state = authenticate(&headers, &state).await?;

    let inserted = progress::create_subjects(&state.db, auth_state.user_id, req.subjects).await?;

    Ok(Json(serde_json::json!({
        "message": "Subjects inserted successfully",
        "insertedCount": inserted
    })))
}

async fn list_subjects(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let auth_state = authenticate(&headers, &state).await?;

    let subjects = progress::list_subjects(&state.db, auth_state.user_id).await?;

    Ok(Json(serde_json::json!({ "subjects": subjects })))
}

async fn subject_progress(
    headers: HeaderMap,
    Path(subject_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<progress::SubjectProgress>, AppError> {
    let auth_state = authenticate(&headers, &state).await?;

    let report = progress::subject_progress(&state.db, auth_state.user_id, subject_id).await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct UpdateCompletedTopicsRequest {
    #[serde(alias = "_id")]
    id: Uuid,
    chapters: Vec<Chapter>,
}

async fn update_completed_topics(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<UpdateCompletedTopicsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let auth_state = authenticate(&headers, &state).await?;

    progress::update_completed_topics(&state.db, auth_state.user_id, req.id, &req.chapters).await?;

    Ok(Json(serde_json::json!({ "message": "Completed topics updated" })))
}

#[derive(Deserialize)]
struct SetGoalRequest {
    min: i32,
}

async fn set_study_goal(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<SetGoalRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let auth_state = authenticate(&headers, &state).await?;

    goals::set_goal(&state.db, auth_state.user_id, req.min).await?;

    Ok(Json(serde_json::json!({
        "status": 202,
        "message": "Study goal updated successfully"
    })))
}

async fn get_study_goal(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let auth_state = authenticate(&headers, &state).await?;

    let minutes = goals::get_goal(&state.db, auth_state.user_id).await?;
    Ok(Json(serde_json::json!({ "minutes": minutes })))
}

async fn get_streak(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let auth_state = authenticate(&headers, &state).await?;

    let streak = goals::get_streak(&state.db, auth_state.user_id).await?;
    Ok(Json(serde_json::json!({ "streak": streak })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordStudyTimeRequest {
    #[serde(alias = "min")]
    minutes: i32,
    subject_id: Uuid,
    #[serde(default)]
    number_of_completed_topics: i32,
}

async fn record_study_time(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<RecordStudyTimeRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let auth_state = authenticate(&headers, &state).await?;

    study_time::record_study_session(
        &state.db,
        auth_state.user_id,
        req.subject_id,
        req.minutes,
        req.number_of_completed_topics,
    )
    .await?;

    Ok(Json(serde_json::json!({ "message": "time is updated" })))
}

async fn get_today_study_time(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<study_time::TodayTotal>, AppError> {
    let auth_state = authenticate(&headers, &state).await?;

    let total = study_time::today_total(&state.db, auth_state.user_id).await?;
    Ok(Json(total))
}

async fn weekly_focus(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<study_time::DayFocus>>, AppError> {
    let auth_state = authenticate(&headers, &state).await?;

    let distribution = study_time::weekly_focus(&state.db, auth_state.user_id).await?;
    Ok(Json(distribution))
}

async fn weekly_mastery(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<study_time::WeeklyMastery>, AppError> {
    let auth_state = authenticate(&headers, &state).await?;

    let mastery = study_time::weekly_mastery(&state.db, auth_state.user_id).await?;
    Ok(Json(mastery))
}
