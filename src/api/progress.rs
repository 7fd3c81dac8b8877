use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::{auth::AuthUser, error::Result, progress::{self, CourseProgress}};

use super::{AppState, extract::PathParams};

#[utoipa::path(
    context_path = "/api/v1/progress",
    path = "/{course_id}",
    method(get),
    params(("course_id" = i64, Path, description = "Course id")),
    responses(
        (status = 200, description = "Course details with per-lecture progress", body = CourseProgress),
        (status = 403, description = "Course not purchased"),
        (status = 404, description = "No such course")
    )
)]
pub async fn get_progress(
    State(state): State<AppState>,
    user: AuthUser,
    PathParams(course_id): PathParams<i64>,
) -> Result<Json<Value>> {
    let progress = progress::get_progress(&state.database, user.id, course_id).await?;
    Ok(Json(json!({ "success": true, "data": progress })))
}

#[utoipa::path(
    context_path = "/api/v1/progress",
    path = "/{course_id}/lecture/{lecture_id}/view",
    method(post),
    params(
        ("course_id" = i64, Path, description = "Course id"),
        ("lecture_id" = i64, Path, description = "Lecture id")
    ),
    responses(
        (status = 200, description = "Lecture recorded as viewed", body = CourseProgress),
        (status = 403, description = "Course not purchased"),
        (status = 404, description = "Lecture is not part of the course")
    )
)]
pub async fn view_lecture(
    State(state): State<AppState>,
    user: AuthUser,
    PathParams((course_id, lecture_id)): PathParams<(i64, i64)>,
) -> Result<Json<Value>> {
    let progress =
        progress::mark_lecture_viewed(&state.database, user.id, course_id, lecture_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Lecture progress updated successfully.",
        "data": progress,
    })))
}

#[utoipa::path(
    context_path = "/api/v1/progress",
    path = "/{course_id}/complete",
    method(post),
    params(("course_id" = i64, Path, description = "Course id")),
    responses(
        (status = 200, description = "Course marked completed", body = CourseProgress),
        (status = 403, description = "Course not purchased")
    )
)]
pub async fn mark_completed(
    State(state): State<AppState>,
    user: AuthUser,
    PathParams(course_id): PathParams<i64>,
) -> Result<Json<Value>> {
    let progress = progress::set_completed(&state.database, user.id, course_id, true).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Course marked as completed.",
        "data": progress,
    })))
}

#[utoipa::path(
    context_path = "/api/v1/progress",
    path = "/{course_id}/incomplete",
    method(post),
    params(("course_id" = i64, Path, description = "Course id")),
    responses(
        (status = 200, description = "Course marked incomplete", body = CourseProgress),
        (status = 403, description = "Course not purchased")
    )
)]
pub async fn mark_incomplete(
    State(state): State<AppState>,
    user: AuthUser,
    PathParams(course_id): PathParams<i64>,
) -> Result<Json<Value>> {
    let progress = progress::set_completed(&state.database, user.id, course_id, false).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Course marked as incomplete.",
        "data": progress,
    })))
}

#[utoipa::path(
    context_path = "/api/v1/progress",
    path = "/{course_id}/reset",
    method(post),
    params(("course_id" = i64, Path, description = "Course id")),
    responses(
        (status = 200, description = "Viewed lectures forgotten", body = CourseProgress),
        (status = 403, description = "Course not purchased")
    )
)]
pub async fn reset(
    State(state): State<AppState>,
    user: AuthUser,
    PathParams(course_id): PathParams<i64>,
) -> Result<Json<Value>> {
    let progress = progress::reset_progress(&state.database, user.id, course_id).await?;
    Ok(Json(json!({ "success": true, "message": "Course progress reset.", "data": progress })))
}

pub fn get_progress_scope() -> Router<AppState> {
    Router::new().nest(
        "/progress",
        Router::new()
            .route("/{course_id}", get(get_progress))
            .route("/{course_id}/lecture/{lecture_id}/view", post(view_lecture))
            .route("/{course_id}/complete", post(mark_completed))
            .route("/{course_id}/incomplete", post(mark_incomplete))
            .route("/{course_id}/reset", post(reset)),
    )
}
