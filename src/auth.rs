use axum::{
    RequestPartsExt,
    extract::{FromRef, FromRequestParts, OptionalFromRequestParts},
    http::request::Parts,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tower_cookies::{Cookie, Cookies, cookie::SameSite};

use crate::{
    api::AppState,
    config::Config,
    error::{Error, Result},
    user::{self, Role},
};

pub const AUTH_COOKIE: &str = "authToken";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i64,
    exp: i64,
}

/// Sign a bearer token for `user_id` valid for the configured lifetime.
pub fn issue_token(config: &Config, user_id: i64) -> Result<String> {
    let exp = (time::OffsetDateTime::now_utc() + time::Duration::hours(config.token_ttl_hours))
        .unix_timestamp();
    let claims = Claims { sub: user_id, exp };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| anyhow::anyhow!("Failed to sign token: {}", e))?;
    Ok(token)
}

pub fn verify_token(config: &Config, token: &str) -> Result<i64> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| Error::Unauthorized("Invalid or expired token".to_string()))?
    .claims;
    Ok(claims.sub)
}

pub fn auth_cookie(config: &Config, token: String) -> Cookie<'static> {
    Cookie::build((AUTH_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::None)
        .max_age(time::Duration::hours(config.token_ttl_hours))
        .build()
}

pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build((AUTH_COOKIE, "")).path("/").build()
}

/// The caller, resolved from the bearer header or the auth cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: i64,
    pub role: Role,
}

impl AuthUser {
    pub fn require_instructor(&self) -> Result<()> {
        match self.role {
            Role::Instructor => Ok(()),
            Role::Student => Err(Error::Forbidden(
                "Only instructors can perform this action".to_string(),
            )),
        }
    }
}

async fn token_from_parts<S: Send + Sync>(parts: &mut Parts, state: &S) -> Option<String> {
    if let Ok(TypedHeader(Authorization(bearer))) =
        parts.extract::<TypedHeader<Authorization<Bearer>>>().await
    {
        return Some(bearer.token().to_string());
    }
    let cookies = <Cookies as FromRequestParts<S>>::from_request_parts(parts, state)
        .await
        .ok()?;
    cookies
        .get(AUTH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

async fn resolve(state: &AppState, token: &str) -> Result<AuthUser> {
    let id = verify_token(&state.config, token)?;
    let Some(role) = user::get_user_role(&state.database, id).await? else {
        return Err(Error::Unauthorized("User no longer exists".to_string()));
    };
    Ok(AuthUser { id, role })
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let Some(token) = token_from_parts(parts, state).await else {
            return Err(Error::Unauthorized("User not authenticated".to_string()));
        };
        resolve(&AppState::from_ref(state), &token).await
    }
}

/// Anonymous callers and stale tokens both resolve to `None`.
impl<S> OptionalFromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Option<Self>> {
        let Some(token) = token_from_parts(parts, state).await else {
            return Ok(None);
        };
        Ok(resolve(&AppState::from_ref(state), &token).await.ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            jwt_secret: "test-secret".to_string(),
            client_url: "http://localhost:5173".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn token_round_trips_user_id() {
        let config = config();
        let token = issue_token(&config, 42).unwrap();
        assert_eq!(verify_token(&config, &token).unwrap(), 42);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = issue_token(&config(), 42).unwrap();
        let other = Config {
            jwt_secret: "other".to_string(),
            ..config()
        };
        assert!(matches!(
            verify_token(&other, &token),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = Config {
            token_ttl_hours: -1,
            ..config()
        };
        let token = issue_token(&config, 7).unwrap();
        assert!(verify_token(&config, &token).is_err());
    }

    #[test]
    fn auth_cookie_is_http_only() {
        let cookie = auth_cookie(&config(), "abc".to_string());
        assert_eq!(cookie.name(), AUTH_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::None));
    }
}
