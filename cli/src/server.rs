use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

use crate::commands::{self, Ledger, MAX_HISTORY_DAYS};
use nutriledger_core::error::LedgerError;
use nutriledger_core::ledger::LoggedMeal;
use nutriledger_core::models::{
    DailyRecord, FoodItem, HealthAlert, MealType, WeeklyGoalSettings, WeeklySummary,
    parse_date_key,
};
use nutriledger_core::sync::{FlushReport, OutboxItem};

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB
const SYNC_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone)]
struct AppState {
    ledger: Arc<Ledger>,
    api_key: Option<String>,
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct FoodRequest {
    name: String,
    calories: f64,
    #[serde(default)]
    protein_g: f64,
    #[serde(default)]
    carbs_g: f64,
    #[serde(default)]
    fat_g: f64,
    sugar_g: Option<f64>,
    sodium_mg: Option<f64>,
    serving_size: Option<String>,
}

impl From<FoodRequest> for FoodItem {
    fn from(req: FoodRequest) -> Self {
        let mut food = FoodItem::new(req.name, req.calories, req.protein_g, req.carbs_g, req.fat_g);
        food.sugar_g = req.sugar_g;
        food.sodium_mg = req.sodium_mg;
        if let Some(serving) = req.serving_size {
            food.serving_size = serving;
        }
        food
    }
}

fn default_quantity() -> f64 {
    1.0
}

#[derive(Deserialize)]
struct AddMealRequest {
    food: FoodRequest,
    #[serde(default = "default_quantity")]
    quantity: f64,
    meal_type: String,
}

#[derive(Deserialize)]
struct GoalRequest {
    goal_calories: f64,
}

#[derive(Deserialize)]
struct MoveMealRequest {
    from: String,
    to: String,
    amount_kcal: f64,
}

#[derive(Deserialize)]
struct MoveDayRequest {
    from_date: String,
    to_date: String,
    amount_kcal: f64,
}

#[derive(Serialize)]
struct MoveDayResponse {
    from: DailyRecord,
    to: DailyRecord,
}

#[derive(Deserialize)]
struct HistoryQuery {
    days: Option<u32>,
}

#[derive(Serialize)]
struct SyncStatus {
    configured: bool,
    pending: Vec<OutboxItem>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        if err.is_validation() {
            Self::BadRequest(err.to_string())
        } else {
            Self::Internal(err.into())
        }
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, ApiError> {
    Ok(parse_date_key(s)?)
}

fn parse_meal(s: &str) -> Result<MealType, ApiError> {
    Ok(s.parse::<MealType>()?)
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

async fn get_day(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<DailyRecord>, ApiError> {
    let date = parse_date(&date)?;
    Ok(Json(state.ledger.get_or_create(date)?))
}

async fn add_meal(
    State(state): State<AppState>,
    Path(date): Path<String>,
    Json(req): Json<AddMealRequest>,
) -> Result<(StatusCode, Json<LoggedMeal>), ApiError> {
    let date = parse_date(&date)?;
    let meal_type = parse_meal(&req.meal_type)?;
    let logged = state
        .ledger
        .add_meal(date, req.food.into(), req.quantity, meal_type)?;
    Ok((StatusCode::CREATED, Json(logged)))
}

/// Unknown ids leave the day unchanged and return it as-is.
async fn remove_meal(
    State(state): State<AppState>,
    Path((date, id)): Path<(String, String)>,
) -> Result<Json<DailyRecord>, ApiError> {
    let date = parse_date(&date)?;
    Ok(Json(state.ledger.remove_meal(date, &id)?))
}

async fn update_goal(
    State(state): State<AppState>,
    Path(date): Path<String>,
    Json(req): Json<GoalRequest>,
) -> Result<Json<DailyRecord>, ApiError> {
    let date = parse_date(&date)?;
    Ok(Json(
        state.ledger.update_goal_calories(date, req.goal_calories)?,
    ))
}

async fn move_between_meals(
    State(state): State<AppState>,
    Path(date): Path<String>,
    Json(req): Json<MoveMealRequest>,
) -> Result<Json<DailyRecord>, ApiError> {
    let date = parse_date(&date)?;
    let from = parse_meal(&req.from)?;
    let to = parse_meal(&req.to)?;
    Ok(Json(
        state
            .ledger
            .move_between_meals(date, from, to, req.amount_kcal)?,
    ))
}

async fn move_across_days(
    State(state): State<AppState>,
    Json(req): Json<MoveDayRequest>,
) -> Result<Json<MoveDayResponse>, ApiError> {
    let from = parse_date(&req.from_date)?;
    let to = parse_date(&req.to_date)?;
    let (from, to) = state.ledger.move_across_days(from, to, req.amount_kcal)?;
    Ok(Json(MoveDayResponse { from, to }))
}

async fn get_weekly_summary(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<WeeklySummary>, ApiError> {
    let date = parse_date(&date)?;
    Ok(Json(state.ledger.get_weekly_summary(date)?))
}

async fn get_weekly_settings(
    State(state): State<AppState>,
) -> Result<Json<WeeklyGoalSettings>, ApiError> {
    Ok(Json(state.ledger.weekly_settings()?))
}

async fn update_weekly_settings(
    State(state): State<AppState>,
    Json(settings): Json<WeeklyGoalSettings>,
) -> Result<Json<WeeklySummary>, ApiError> {
    Ok(Json(state.ledger.update_weekly_settings(&settings)?))
}

async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<DailyRecord>>, ApiError> {
    let days = query.days.unwrap_or(7);
    if days > MAX_HISTORY_DAYS {
        return Err(ApiError::BadRequest(format!(
            "days must be at most {MAX_HISTORY_DAYS}"
        )));
    }
    Ok(Json(state.ledger.get_history_range(days)))
}

async fn get_alerts(State(state): State<AppState>) -> Json<Vec<HealthAlert>> {
    Json(state.ledger.alerts())
}

async fn clear_alerts(State(state): State<AppState>) -> StatusCode {
    state.ledger.clear_alerts();
    StatusCode::NO_CONTENT
}

async fn get_sync_status(State(state): State<AppState>) -> Result<Json<SyncStatus>, ApiError> {
    Ok(Json(SyncStatus {
        configured: state.ledger.has_remote(),
        pending: state.ledger.pending_sync()?,
    }))
}

async fn flush_sync(State(state): State<AppState>) -> Result<Json<FlushReport>, ApiError> {
    Ok(Json(commands::flush(state.ledger.clone()).await?))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/days/{date}", get(get_day))
        .route("/api/days/{date}/meals", post(add_meal))
        .route("/api/days/{date}/meals/{id}", delete(remove_meal))
        .route("/api/days/{date}/goal", put(update_goal))
        .route("/api/days/{date}/move", post(move_between_meals))
        .route("/api/move-day", post(move_across_days))
        .route("/api/weekly/{date}", get(get_weekly_summary))
        .route(
            "/api/weekly-settings",
            get(get_weekly_settings).put(update_weekly_settings),
        )
        .route("/api/history", get(get_history))
        .route("/api/alerts", get(get_alerts).delete(clear_alerts))
        .route("/api/sync", get(get_sync_status))
        .route("/api/sync/flush", post(flush_sync))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

/// Periodically push the outbox while the server runs.
fn spawn_sync_task(ledger: Arc<Ledger>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SYNC_INTERVAL);
        loop {
            interval.tick().await;
            match commands::flush(ledger.clone()).await {
                Ok(report) if !report.delivered.is_empty() => {
                    info!(delivered = report.delivered.len(), "sync flushed");
                }
                Ok(_) => {}
                Err(e) => warn!("sync flush failed: {e:#}"),
            }
        }
    });
}

// --- Server startup ---

/// First and last four characters of `key`, or `****` when it is too short to show any.
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 12 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

pub async fn start_server(
    ledger: Arc<Ledger>,
    port: u16,
    bind: &str,
    api_key: Option<String>,
    new_api_key: bool,
) -> anyhow::Result<()> {
    if ledger.has_remote() {
        spawn_sync_task(ledger.clone());
    }

    let state = AppState {
        ledger,
        api_key: api_key.clone(),
    };
    let app = build_router(state);

    match api_key {
        Some(ref key) if !new_api_key => {
            eprintln!(
                "API key: {} (see api_key file in data directory)",
                mask_key(key)
            );
        }
        Some(_) => {}
        None => {
            eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
            if bind != "127.0.0.1" && bind != "localhost" {
                eprintln!(
                    "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
                );
            }
        }
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    info!("listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
