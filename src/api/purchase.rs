use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;
use utoipa::ToSchema;

use crate::{
    auth::AuthUser,
    error::Result,
    purchase::{
        self, CheckoutResponse, CourseWithStatus, LearningEntry, PurchasedCourse, SalesReport,
        WebhookOutcome, webhook::SIGNATURE_HEADER,
    },
};

use super::{
    AppState,
    extract::{JsonBody, PathParams},
};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    pub course_id: i64,
}

#[utoipa::path(
    context_path = "/api/v1/purchase",
    path = "/checkout/create-checkout-session",
    method(post),
    request_body = CheckoutBody,
    responses(
        (status = 200, description = "Hosted checkout page url", body = CheckoutResponse),
        (status = 400, description = "Own, free or already purchased course"),
        (status = 404, description = "No such published course"),
        (status = 502, description = "Payment provider unavailable")
    )
)]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(CheckoutBody { course_id }): JsonBody<CheckoutBody>,
) -> Result<Json<CheckoutResponse>> {
    let response = purchase::create_checkout(
        &state.database,
        state.payments.as_ref(),
        &state.config,
        user.id,
        course_id,
    )
    .await?;
    Ok(Json(response))
}

/// The body is read raw, the signature covers its exact bytes.
#[utoipa::path(
    context_path = "/api/v1/purchase",
    path = "/webhook",
    method(post),
    request_body(content = String, content_type = "application/json", description = "Signed provider event"),
    responses(
        (status = 200, description = "Event acknowledged"),
        (status = 400, description = "Missing or invalid signature")
    )
)]
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let outcome =
        purchase::handle_webhook(&state.database, &state.config.payment, &body, signature).await?;
    if let WebhookOutcome::Completed(id) = outcome {
        info!("webhook completed purchase {}", id);
    }
    Ok(Json(json!({ "received": true })))
}

#[utoipa::path(
    context_path = "/api/v1/purchase",
    path = "",
    method(get),
    responses(
        (status = 200, description = "Completed purchases", body = Vec<PurchasedCourse>),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn purchased_courses(State(state): State<AppState>, user: AuthUser) -> Result<Json<Value>> {
    let purchased = purchase::purchased_courses(&state.database, user.id).await?;
    Ok(Json(json!({ "success": true, "purchasedCourse": purchased })))
}

#[utoipa::path(
    context_path = "/api/v1/purchase",
    path = "/pending",
    method(get),
    responses(
        (status = 200, description = "Purchases awaiting payment", body = Vec<PurchasedCourse>),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn pending_purchases(State(state): State<AppState>, user: AuthUser) -> Result<Json<Value>> {
    let pending = purchase::pending_purchases(&state.database, user.id).await?;
    Ok(Json(json!({ "success": true, "pendingPurchases": pending })))
}

#[utoipa::path(
    context_path = "/api/v1/purchase",
    path = "/my-learning",
    method(get),
    responses(
        (status = 200, description = "Bought and pending courses with progress", body = Vec<LearningEntry>),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn my_learning(State(state): State<AppState>, user: AuthUser) -> Result<Json<Value>> {
    let courses = purchase::my_learning(&state.database, user.id).await?;
    Ok(Json(json!({ "success": true, "courses": courses })))
}

#[utoipa::path(
    context_path = "/api/v1/purchase",
    path = "/courses/{course_id}/detail-with-status",
    method(get),
    params(("course_id" = i64, Path, description = "Course id")),
    responses(
        (status = 200, description = "Course detail with purchase flags", body = CourseWithStatus),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "No such course")
    )
)]
pub async fn detail_with_status(
    State(state): State<AppState>,
    user: AuthUser,
    PathParams(course_id): PathParams<i64>,
) -> Result<Json<CourseWithStatus>> {
    let detail = purchase::course_detail_with_status(&state.database, user.id, course_id).await?;
    Ok(Json(detail))
}

#[utoipa::path(
    context_path = "/api/v1/purchase",
    path = "/instructor/sales",
    method(get),
    responses(
        (status = 200, description = "Sales per course and totals", body = SalesReport),
        (status = 403, description = "Caller is not an instructor")
    )
)]
pub async fn instructor_sales(State(state): State<AppState>, user: AuthUser) -> Result<Json<Value>> {
    user.require_instructor()?;
    let report = purchase::instructor_sales(&state.database, user.id).await?;
    Ok(Json(json!({ "success": true, "report": report })))
}

pub fn get_purchase_scope() -> Router<AppState> {
    Router::new().nest(
        "/purchase",
        Router::new()
            .route("/", get(purchased_courses))
            .route("/checkout/create-checkout-session", post(create_checkout_session))
            .route("/webhook", post(webhook))
            .route("/pending", get(pending_purchases))
            .route("/my-learning", get(my_learning))
            .route("/courses/{course_id}/detail-with-status", get(detail_with_status))
            .route("/instructor/sales", get(instructor_sales)),
    )
}
