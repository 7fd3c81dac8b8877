pub mod course;
pub mod extract;
pub mod progress;
pub mod purchase;
pub mod user;

use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderValue, Method, header},
    routing::get,
};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tower_cookies::CookieManagerLayer;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{config::Config, error::Result, purchase::provider::PaymentProvider};

/// Everything a handler can reach. Cloned per request, so every field is a handle.
#[derive(Clone)]
pub struct AppState {
    pub database: SqlitePool,
    pub config: Arc<Config>,
    pub payments: Arc<dyn PaymentProvider>,
}

impl AppState {
    pub fn new(database: SqlitePool, config: Config, payments: Arc<dyn PaymentProvider>) -> Self {
        Self {
            database,
            config: Arc::new(config),
            payments,
        }
    }
}

#[utoipa::path(
    context_path = "/api/v1",
    path = "/health",
    method(get),
    responses(
        (status = 200, description = "Service and database reachable"),
        (status = 500, description = "Database unreachable")
    )
)]
pub async fn health(State(state): State<AppState>) -> Result<Json<Value>> {
    sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.database)
        .await?;
    Ok(Json(json!({ "success": true, "status": "ok" })))
}

#[derive(OpenApi)]
#[openapi(
    info(title = "course server", description = "Courses, purchases and learning progress"),
    paths(
        health,
        user::register,
        user::login,
        user::logout,
        user::profile,
        user::update_profile,
        course::create_course,
        course::creator_courses,
        course::search_courses,
        course::published_courses,
        course::get_course,
        course::edit_course,
        course::remove_course,
        course::toggle_publish,
        course::create_lecture,
        course::course_lectures,
        course::edit_lecture,
        course::remove_lecture,
        purchase::create_checkout_session,
        purchase::webhook,
        purchase::purchased_courses,
        purchase::pending_purchases,
        purchase::my_learning,
        purchase::detail_with_status,
        purchase::instructor_sales,
        progress::get_progress,
        progress::view_lecture,
        progress::mark_completed,
        progress::mark_incomplete,
        progress::reset,
    )
)]
pub struct ApiDoc;

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// The whole service: every scope under `/api/v1`, Swagger UI at `/swagger-ui`.
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .merge(user::get_user_scope())
        .merge(course::get_course_scope())
        .merge(purchase::get_purchase_scope())
        .merge(progress::get_progress_scope());
    let timeout = Duration::from_secs(state.config.request_timeout_secs);
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api/v1", api)
        .layer(CookieManagerLayer::new())
        .layer(TimeoutLayer::new(timeout))
        .layer(CompressionLayer::new())
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
