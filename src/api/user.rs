use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_cookies::Cookies;
use utoipa::ToSchema;

use crate::{
    auth::{self, AuthUser},
    error::{Error, Result},
    user::{self, RegisterRequest, UpdateProfileRequest, UserInfo, UserProfile},
};

use super::{AppState, extract::JsonBody};

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct LoginRequest {
    /// Username or email
    pub username: Option<String>,
    pub password: Option<String>,
}

#[utoipa::path(
    context_path = "/api/v1/user",
    path = "/register",
    method(post),
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created"),
        (status = 400, description = "Missing fields or user already exists", body = crate::error::ErrorBody)
    )
)]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    user::create_user(&state.database, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": "Account created successfully." })),
    ))
}

#[utoipa::path(
    context_path = "/api/v1/user",
    path = "/login",
    method(post),
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued and auth cookie set", body = UserInfo),
        (status = 400, description = "Incorrect username or password")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    JsonBody(req): JsonBody<LoginRequest>,
) -> Result<Json<Value>> {
    let (Some(username), Some(password)) = (req.username, req.password) else {
        return Err(Error::BadRequest("All fields are required.".to_string()));
    };
    let user = user::login(&state.database, &username, &password).await?;
    let token = auth::issue_token(&state.config, user.id)?;
    cookies.add(auth::auth_cookie(&state.config, token.clone()));
    Ok(Json(json!({
        "success": true,
        "message": format!("Welcome back {}", user.first_name),
        "token": token,
        "user": user,
    })))
}

#[utoipa::path(
    context_path = "/api/v1/user",
    path = "/logout",
    method(get),
    responses((status = 200, description = "Auth cookie cleared"))
)]
pub async fn logout(cookies: Cookies) -> Json<Value> {
    cookies.remove(auth::removal_cookie());
    Json(json!({ "success": true, "message": "Logged out successfully." }))
}

#[utoipa::path(
    context_path = "/api/v1/user",
    path = "/profile",
    method(get),
    responses(
        (status = 200, description = "Profile with enrolled courses", body = UserProfile),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Profile not found")
    )
)]
pub async fn profile(State(state): State<AppState>, user: AuthUser) -> Result<Json<Value>> {
    let profile = user::get_profile(&state.database, user.id).await?;
    Ok(Json(json!({ "success": true, "user": profile })))
}

#[utoipa::path(
    context_path = "/api/v1/user",
    path = "/profile/update",
    method(put),
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated profile", body = UserInfo),
        (status = 400, description = "Invalid email or email taken"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(req): JsonBody<UpdateProfileRequest>,
) -> Result<Json<Value>> {
    let updated = user::update_profile(&state.database, user.id, req).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Profile updated successfully.",
        "user": updated,
    })))
}

pub fn get_user_scope() -> Router<AppState> {
    Router::new().nest(
        "/user",
        Router::new()
            .route("/register", post(register))
            .route("/login", post(login))
            .route("/logout", get(logout))
            .route("/profile", get(profile))
            .route("/profile/update", put(update_profile)),
    )
}
