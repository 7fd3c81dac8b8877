use std::sync::LazyLock;

use argon2::{
    Argon2, PasswordVerifier,
    password_hash::{PasswordHash, PasswordHasher, SaltString, rand_core::OsRng},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::info;
use utoipa::ToSchema;

use crate::{
    course::CourseSummary,
    error::{Error, Result},
    utils::now_utc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Student,
    Instructor,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_code: String,
    pub phone_number: String,
    pub role: Role,
    pub country: String,
    pub state: String,
    pub city: String,
    pub gender: String,
    pub photo_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: UserInfo,
    pub enrolled_courses: Vec<CourseSummary>,
}

/// Every field is required, a missing one is reported back by name.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone_code: Option<String>,
    pub phone_number: Option<String>,
    pub role: Option<Role>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub gender: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone_code: Option<String>,
    pub phone_number: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub gender: Option<String>,
    pub photo_url: Option<String>,
}

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

fn validate_email(email: &str) -> Result<()> {
    if EMAIL_RE.is_match(email) {
        Ok(())
    } else {
        Err(Error::BadRequest("Invalid email address".to_string()))
    }
}

struct NewUser {
    username: String,
    first_name: String,
    last_name: String,
    email: String,
    phone_code: String,
    phone_number: String,
    role: Role,
    country: String,
    state: String,
    city: String,
    gender: String,
    password: String,
}

fn required(missing: &mut Vec<String>, name: &str, value: Option<String>) -> String {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => v,
        _ => {
            missing.push(name.to_string());
            String::new()
        }
    }
}

impl TryFrom<RegisterRequest> for NewUser {
    type Error = Error;

    fn try_from(req: RegisterRequest) -> Result<Self> {
        let mut missing = Vec::new();
        let username = required(&mut missing, "username", req.username);
        let first_name = required(&mut missing, "firstName", req.first_name);
        let last_name = required(&mut missing, "lastName", req.last_name);
        let email = required(&mut missing, "email", req.email);
        let phone_code = required(&mut missing, "phoneCode", req.phone_code);
        let phone_number = required(&mut missing, "phoneNumber", req.phone_number);
        if req.role.is_none() {
            missing.push("role".to_string());
        }
        let country = required(&mut missing, "country", req.country);
        let state = required(&mut missing, "state", req.state);
        let city = required(&mut missing, "city", req.city);
        let gender = required(&mut missing, "gender", req.gender);
        // passwords are not trimmed
        let password = match req.password {
            Some(p) if !p.is_empty() => p,
            _ => {
                missing.push("password".to_string());
                String::new()
            }
        };
        let (Some(role), true) = (req.role, missing.is_empty()) else {
            return Err(Error::missing_fields(missing));
        };
        Ok(NewUser {
            username,
            first_name,
            last_name,
            email: email.to_lowercase(),
            phone_code,
            phone_number,
            role,
            country,
            state,
            city,
            gender,
            password,
        })
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();
    Ok(hash)
}

pub async fn create_user(database: &SqlitePool, req: RegisterRequest) -> Result<i64> {
    let user = NewUser::try_from(req)?;
    validate_email(&user.email)?;
    let existing = sqlx::query_as::<_, (String, String)>(
        "SELECT email, username FROM user WHERE email = ? OR username = ?",
    )
    .bind(&user.email)
    .bind(&user.username)
    .fetch_optional(database)
    .await?;
    if let Some((email, _)) = existing {
        let field = if email == user.email { "email" } else { "username" };
        return Err(Error::BadRequest(format!(
            "User already exists with this {field}"
        )));
    }
    let password_hash = hash_password(&user.password)?;
    let result = sqlx::query(
        "INSERT INTO user (username, first_name, last_name, email, phone_code, phone_number, role, country, state, city, gender, password, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&user.username)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.email)
    .bind(&user.phone_code)
    .bind(&user.phone_number)
    .bind(user.role)
    .bind(&user.country)
    .bind(&user.state)
    .bind(&user.city)
    .bind(&user.gender)
    .bind(password_hash)
    .bind(now_utc())
    .execute(database)
    .await?;
    let id = result.last_insert_rowid();
    info!("user {}-{} registered as {:?}", id, user.username, user.role);
    Ok(id)
}

/// Check credentials, `identifier` may be the username or the email.
pub async fn login(database: &SqlitePool, identifier: &str, password: &str) -> Result<UserInfo> {
    let rejected = || Error::BadRequest("Incorrect username or password".to_string());
    let identifier = identifier.trim();
    let row = sqlx::query_as::<_, (i64, String)>(
        "SELECT id, password FROM user WHERE username = ? OR email = ?",
    )
    .bind(identifier)
    .bind(identifier.to_lowercase())
    .fetch_optional(database)
    .await?;
    let Some((id, stored)) = row else {
        return Err(rejected());
    };
    let parsed_hash = PasswordHash::new(&stored)
        .map_err(|e| anyhow::anyhow!("Failed to parse password hash: {}", e))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| rejected())?;
    get_user_info(database, id).await
}

pub async fn get_user_info(database: &SqlitePool, id: i64) -> Result<UserInfo> {
    sqlx::query_as::<_, UserInfo>(
        "SELECT id, username, first_name, last_name, email, phone_code, phone_number, role, country, state, city, gender, photo_url, created_at
         FROM user WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(database)
    .await?
    .ok_or_else(|| Error::not_found("User"))
}

pub async fn get_user_role(database: &SqlitePool, id: i64) -> Result<Option<Role>> {
    let role = sqlx::query_scalar::<_, Role>("SELECT role FROM user WHERE id = ?")
        .bind(id)
        .fetch_optional(database)
        .await?;
    Ok(role)
}

pub async fn get_enrolled_courses(database: &SqlitePool, id: i64) -> Result<Vec<CourseSummary>> {
    let courses = sqlx::query_as::<_, CourseSummary>(
        "SELECT course.id, course.title, course.subtitle, course.category, course.course_level, course.price, course.thumbnail, course.creator_id
         FROM course INNER JOIN enrollment ON course.id = enrollment.course_id
         WHERE enrollment.user_id = ? ORDER BY enrollment.enrolled_at",
    )
    .bind(id)
    .fetch_all(database)
    .await?;
    Ok(courses)
}

pub async fn get_profile(database: &SqlitePool, id: i64) -> Result<UserProfile> {
    let user = get_user_info(database, id)
        .await
        .map_err(|_| Error::not_found("Profile"))?;
    let enrolled_courses = get_enrolled_courses(database, id).await?;
    Ok(UserProfile {
        user,
        enrolled_courses,
    })
}

/// Apply the non-empty fields of `req`, leaving the rest untouched.
pub async fn update_profile(
    database: &SqlitePool,
    id: i64,
    req: UpdateProfileRequest,
) -> Result<UserInfo> {
    let current = get_user_info(database, id).await?;
    let pick = |new: Option<String>, old: String| match new.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => v,
        _ => old,
    };
    let email = pick(req.email, current.email.clone()).to_lowercase();
    if email != current.email {
        validate_email(&email)?;
        let taken = sqlx::query_scalar::<_, i64>("SELECT id FROM user WHERE email = ? AND id != ?")
            .bind(&email)
            .bind(id)
            .fetch_optional(database)
            .await?;
        if taken.is_some() {
            return Err(Error::BadRequest(
                "User already exists with this email".to_string(),
            ));
        }
    }
    let photo_url = match req.photo_url {
        Some(url) if !url.trim().is_empty() => Some(url.trim().to_string()),
        _ => current.photo_url,
    };
    sqlx::query(
        "UPDATE user SET first_name = ?, last_name = ?, email = ?, phone_code = ?, phone_number = ?, country = ?, state = ?, city = ?, gender = ?, photo_url = ?
         WHERE id = ?",
    )
    .bind(pick(req.first_name, current.first_name))
    .bind(pick(req.last_name, current.last_name))
    .bind(email)
    .bind(pick(req.phone_code, current.phone_code))
    .bind(pick(req.phone_number, current.phone_number))
    .bind(pick(req.country, current.country))
    .bind(pick(req.state, current.state))
    .bind(pick(req.city, current.city))
    .bind(pick(req.gender, current.gender))
    .bind(photo_url)
    .bind(id)
    .execute(database)
    .await?;
    get_user_info(database, id).await
}
