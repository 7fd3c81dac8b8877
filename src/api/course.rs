use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, patch, put},
};
use serde::Deserialize;
use serde_json::{Value, json};
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::AuthUser,
    course::{
        self, Course, CourseDetail, CourseSummary, CreateCourseRequest, EditCourseRequest, Lecture,
        LectureRequest, SearchQuery,
    },
    error::{Error, Result},
    purchase,
};

use super::{
    AppState,
    extract::{JsonBody, PathParams, QueryParams},
};

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct PublishQuery {
    /// `true` to publish, `false` to take the course down
    pub publish: bool,
}

#[utoipa::path(
    context_path = "/api/v1/course",
    path = "",
    method(post),
    request_body = CreateCourseRequest,
    responses(
        (status = 201, description = "Course created", body = Course),
        (status = 400, description = "Missing title or category"),
        (status = 403, description = "Caller is not an instructor")
    )
)]
pub async fn create_course(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(req): JsonBody<CreateCourseRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    user.require_instructor()?;
    let course = course::create_course(&state.database, user.id, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": "Course created.", "course": course })),
    ))
}

#[utoipa::path(
    context_path = "/api/v1/course",
    path = "",
    method(get),
    responses(
        (status = 200, description = "Courses created by the caller", body = Vec<Course>),
        (status = 403, description = "Caller is not an instructor")
    )
)]
pub async fn creator_courses(State(state): State<AppState>, user: AuthUser) -> Result<Json<Value>> {
    user.require_instructor()?;
    let courses = course::get_creator_courses(&state.database, user.id).await?;
    Ok(Json(json!({ "success": true, "courses": courses })))
}

#[utoipa::path(
    context_path = "/api/v1/course",
    path = "/search",
    method(get),
    params(SearchQuery),
    responses((status = 200, description = "Matching published courses", body = Vec<CourseSummary>))
)]
pub async fn search_courses(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<SearchQuery>,
) -> Result<Json<Value>> {
    let courses = course::search_courses(&state.database, &query).await?;
    Ok(Json(json!({ "success": true, "courses": courses })))
}

#[utoipa::path(
    context_path = "/api/v1/course",
    path = "/published-courses",
    method(get),
    responses((status = 200, description = "Every published course", body = Vec<CourseSummary>))
)]
pub async fn published_courses(State(state): State<AppState>) -> Result<Json<Value>> {
    let courses = course::get_published_courses(&state.database).await?;
    Ok(Json(json!({ "success": true, "courses": courses })))
}

#[utoipa::path(
    context_path = "/api/v1/course",
    path = "/{course_id}",
    method(get),
    params(("course_id" = i64, Path, description = "Course id")),
    responses(
        (status = 200, description = "Course with creator and lectures", body = CourseDetail),
        (status = 404, description = "No such course, or a draft of someone else")
    )
)]
pub async fn get_course(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    PathParams(course_id): PathParams<i64>,
) -> Result<Json<Value>> {
    let mut detail = course::get_course_detail(&state.database, course_id).await?;
    let viewer = user.map(|u| u.id);
    if !detail.course.is_published && viewer != Some(detail.course.creator_id) {
        return Err(Error::not_found("Course"));
    }
    let can_access = match viewer {
        Some(id) => purchase::access_check(&state.database, id, &detail.course).await?,
        None => false,
    };
    if !can_access {
        detail.redact_locked_lectures();
    }
    Ok(Json(json!({ "success": true, "course": detail })))
}

#[utoipa::path(
    context_path = "/api/v1/course",
    path = "/{course_id}",
    method(put),
    params(("course_id" = i64, Path, description = "Course id")),
    request_body = EditCourseRequest,
    responses(
        (status = 200, description = "Updated course", body = Course),
        (status = 400, description = "Negative price"),
        (status = 403, description = "Caller did not create the course"),
        (status = 404, description = "No such course")
    )
)]
pub async fn edit_course(
    State(state): State<AppState>,
    user: AuthUser,
    PathParams(course_id): PathParams<i64>,
    JsonBody(req): JsonBody<EditCourseRequest>,
) -> Result<Json<Value>> {
    let course = course::edit_course(&state.database, user.id, course_id, req).await?;
    Ok(Json(json!({ "success": true, "message": "Course updated successfully.", "course": course })))
}

#[utoipa::path(
    context_path = "/api/v1/course",
    path = "/{course_id}",
    method(delete),
    params(("course_id" = i64, Path, description = "Course id")),
    responses(
        (status = 200, description = "Course and its lectures removed"),
        (status = 403, description = "Caller did not create the course"),
        (status = 404, description = "No such course")
    )
)]
pub async fn remove_course(
    State(state): State<AppState>,
    user: AuthUser,
    PathParams(course_id): PathParams<i64>,
) -> Result<Json<Value>> {
    course::remove_course(&state.database, user.id, course_id).await?;
    Ok(Json(json!({ "success": true, "message": "Course removed successfully." })))
}

#[utoipa::path(
    context_path = "/api/v1/course",
    path = "/{course_id}/publish",
    method(patch),
    params(("course_id" = i64, Path, description = "Course id"), PublishQuery),
    responses(
        (status = 200, description = "Publish state changed", body = Course),
        (status = 400, description = "Course has no lectures"),
        (status = 403, description = "Caller did not create the course")
    )
)]
pub async fn toggle_publish(
    State(state): State<AppState>,
    user: AuthUser,
    PathParams(course_id): PathParams<i64>,
    QueryParams(PublishQuery { publish }): QueryParams<PublishQuery>,
) -> Result<Json<Value>> {
    let course = course::set_published(&state.database, user.id, course_id, publish).await?;
    let message = if publish {
        "Course is published"
    } else {
        "Course is unpublished"
    };
    Ok(Json(json!({ "success": true, "message": message, "course": course })))
}

#[utoipa::path(
    context_path = "/api/v1/course",
    path = "/{course_id}/lecture",
    method(post),
    params(("course_id" = i64, Path, description = "Course id")),
    request_body = LectureRequest,
    responses(
        (status = 201, description = "Lecture appended to the course", body = Lecture),
        (status = 400, description = "Missing lecture title"),
        (status = 403, description = "Caller did not create the course")
    )
)]
pub async fn create_lecture(
    State(state): State<AppState>,
    user: AuthUser,
    PathParams(course_id): PathParams<i64>,
    JsonBody(req): JsonBody<LectureRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let lecture = course::create_lecture(&state.database, user.id, course_id, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": "Lecture created successfully.", "lecture": lecture })),
    ))
}

#[utoipa::path(
    context_path = "/api/v1/course",
    path = "/{course_id}/lecture",
    method(get),
    params(("course_id" = i64, Path, description = "Course id")),
    responses(
        (status = 200, description = "Lectures in course order", body = Vec<Lecture>),
        (status = 403, description = "Caller did not create the course")
    )
)]
pub async fn course_lectures(
    State(state): State<AppState>,
    user: AuthUser,
    PathParams(course_id): PathParams<i64>,
) -> Result<Json<Value>> {
    course::get_owned_course(&state.database, user.id, course_id).await?;
    let lectures = course::get_lectures(&state.database, course_id).await?;
    Ok(Json(json!({ "success": true, "lectures": lectures })))
}

#[utoipa::path(
    context_path = "/api/v1/course",
    path = "/{course_id}/lecture/{lecture_id}",
    method(put),
    params(
        ("course_id" = i64, Path, description = "Course id"),
        ("lecture_id" = i64, Path, description = "Lecture id")
    ),
    request_body = LectureRequest,
    responses(
        (status = 200, description = "Updated lecture", body = Lecture),
        (status = 403, description = "Caller did not create the course"),
        (status = 404, description = "Lecture is not part of the course")
    )
)]
pub async fn edit_lecture(
    State(state): State<AppState>,
    user: AuthUser,
    PathParams((course_id, lecture_id)): PathParams<(i64, i64)>,
    JsonBody(req): JsonBody<LectureRequest>,
) -> Result<Json<Value>> {
    let lecture = course::edit_lecture(&state.database, user.id, course_id, lecture_id, req).await?;
    Ok(Json(json!({ "success": true, "message": "Lecture updated successfully.", "lecture": lecture })))
}

#[utoipa::path(
    context_path = "/api/v1/course",
    path = "/{course_id}/lecture/{lecture_id}",
    method(delete),
    params(
        ("course_id" = i64, Path, description = "Course id"),
        ("lecture_id" = i64, Path, description = "Lecture id")
    ),
    responses(
        (status = 200, description = "Lecture removed"),
        (status = 403, description = "Caller did not create the course"),
        (status = 404, description = "Lecture is not part of the course")
    )
)]
pub async fn remove_lecture(
    State(state): State<AppState>,
    user: AuthUser,
    PathParams((course_id, lecture_id)): PathParams<(i64, i64)>,
) -> Result<Json<Value>> {
    course::remove_lecture(&state.database, user.id, course_id, lecture_id).await?;
    Ok(Json(json!({ "success": true, "message": "Lecture removed successfully." })))
}

pub fn get_course_scope() -> Router<AppState> {
    Router::new().nest(
        "/course",
        Router::new()
            .route("/", get(creator_courses).post(create_course))
            .route("/search", get(search_courses))
            .route("/published-courses", get(published_courses))
            .route(
                "/{course_id}",
                get(get_course).put(edit_course).delete(remove_course),
            )
            .route("/{course_id}/publish", patch(toggle_publish))
            .route(
                "/{course_id}/lecture",
                get(course_lectures).post(create_lecture),
            )
            .route(
                "/{course_id}/lecture/{lecture_id}",
                put(edit_lecture).delete(remove_lecture),
            ),
    )
}
