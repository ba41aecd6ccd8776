use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, CheckResponse, LoginRequest, MessageResponse, PublicUser, SignupRequest},
        jwt::JwtKeys,
        password::{hash_password, verify_password},
        repo::is_unique_violation,
        repo_types::User,
    },
    error::AuthError,
    state::AppState,
};

pub const AUTH_COOKIE: &str = "auth_token";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/auth/check", get(check))
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Field checks run before any hash or store access.
fn validate_signup(name: &str, email: &str, password: &str) -> Result<(), AuthError> {
    let name_len = name.chars().count();
    if name_len < 2 || name_len > 50 {
        return Err(AuthError::Validation(
            "Name must be between 2 and 50 characters".into(),
        ));
    }
    if !is_valid_email(email) {
        return Err(AuthError::Validation("Invalid email address".into()));
    }
    if password.chars().count() < 8 {
        return Err(AuthError::Validation(
            "Password must be at least 8 characters".into(),
        ));
    }
    Ok(())
}

fn auth_cookie(token: String, max_age: time::Duration) -> Cookie<'static> {
    Cookie::build((AUTH_COOKIE, token))
        .http_only(true)
        .path("/")
        .max_age(max_age)
        .build()
}

/// Empty, immediately-expired overwrite that tells the client to discard.
fn clear_cookie() -> Cookie<'static> {
    auth_cookie(String::new(), time::Duration::ZERO)
}

fn session_cookie(keys: &JwtKeys, token: String) -> Cookie<'static> {
    auth_cookie(token, time::Duration::seconds(keys.ttl.as_secs() as i64))
}

#[instrument(skip(state, jar, payload))]
pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(mut payload): Json<SignupRequest>,
) -> Result<(StatusCode, CookieJar, Json<AuthResponse>), AuthError> {
    payload.name = payload.name.trim().to_string();
    payload.email = normalize_email(&payload.email);

    if let Err(e) = validate_signup(&payload.name, &payload.email, &payload.password) {
        warn!(email = %payload.email, error = %e, "signup rejected");
        return Err(e);
    }

    if User::find_by_email(&state.db, &payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(AuthError::DuplicateAccount);
    }

    let hash = hash_password(&payload.password)?;

    let user = match User::create(&state.db, &payload.name, &payload.email, &hash).await {
        Ok(u) => u,
        // Two concurrent signups can both pass the existence check; the
        // unique index decides the loser
        Err(e) if is_unique_violation(&e) => {
            warn!(email = %payload.email, "duplicate signup race");
            return Err(AuthError::DuplicateAccount);
        }
        Err(e) => return Err(AuthError::Unexpected(e.into())),
    };

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id, &user.email)?;
    let jar = jar.add(session_cookie(&keys, token));

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((
        StatusCode::CREATED,
        jar,
        Json(AuthResponse {
            message: "Account created successfully!".into(),
            user: PublicUser {
                id: user.id,
                name: user.name,
                email: user.email,
            },
        }),
    ))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(mut payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), AuthError> {
    payload.email = normalize_email(&payload.email);

    // Unknown email and wrong password produce the same failure so login
    // never reveals whether an account exists
    let user = match User::find_by_email(&state.db, &payload.email).await? {
        Some(u) => u,
        None => {
            warn!(email = %payload.email, "login unknown email");
            return Err(AuthError::InvalidCredentials);
        }
    };

    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(email = %payload.email, user_id = %user.id, "login invalid password");
        return Err(AuthError::InvalidCredentials);
    }

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id, &user.email)?;
    let jar = jar.add(session_cookie(&keys, token));

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok((
        jar,
        Json(AuthResponse {
            message: "Login successful".into(),
            user: PublicUser {
                id: user.id,
                name: user.name,
                email: user.email,
            },
        }),
    ))
}

#[instrument(skip(jar))]
pub async fn logout(jar: CookieJar) -> (CookieJar, Json<MessageResponse>) {
    // No token validation: unconditionally overwrite and report success
    let jar = jar.add(clear_cookie());
    (
        jar,
        Json(MessageResponse {
            message: "Logged out successfully".into(),
        }),
    )
}

#[instrument(skip(state, jar))]
pub async fn check(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (StatusCode, Json<CheckResponse>) {
    let Some(cookie) = jar.get(AUTH_COOKIE) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(CheckResponse {
                authenticated: false,
                user: None,
            }),
        );
    };

    let keys = JwtKeys::from_ref(&state);
    match keys.verify(cookie.value()) {
        Ok(claims) => (
            StatusCode::OK,
            Json(CheckResponse {
                authenticated: true,
                user: Some(claims.into()),
            }),
        ),
        // Expired, malformed and bad-signature tokens all look like absence
        Err(_) => {
            warn!("invalid or expired session token");
            (
                StatusCode::UNAUTHORIZED,
                Json(CheckResponse {
                    authenticated: false,
                    user: None,
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_trimmed_and_lowercased() {
        assert_eq!(normalize_email("Ada@Example.com "), "ada@example.com");
        assert_eq!(normalize_email("  USER@DOMAIN.TLD"), "user@domain.tld");
    }

    #[test]
    fn email_pattern_accepts_local_at_domain_tld() {
        assert!(is_valid_email("ada@example.com"));
        assert!(is_valid_email("a.b+c@sub.domain.org"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("missing@tld"));
        assert!(!is_valid_email("spaces in@example.com"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn short_password_is_rejected_before_hashing() {
        let err = validate_signup("Ada Lovelace", "ada@example.com", "short").unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn eight_char_password_passes_validation() {
        assert!(validate_signup("Ada Lovelace", "ada@example.com", "12345678").is_ok());
    }

    #[test]
    fn password_minimum_counts_characters_not_bytes() {
        // Five two-byte characters is still a five-character password
        assert!(validate_signup("Ada Lovelace", "ada@example.com", "ééééé").is_err());
        assert!(validate_signup("Ada Lovelace", "ada@example.com", "éééééééé").is_ok());
    }

    #[test]
    fn name_length_bounds_are_enforced() {
        assert!(validate_signup("A", "ada@example.com", "12345678").is_err());
        assert!(validate_signup("Al", "ada@example.com", "12345678").is_ok());
        let long = "x".repeat(51);
        assert!(validate_signup(&long, "ada@example.com", "12345678").is_err());
        let max = "x".repeat(50);
        assert!(validate_signup(&max, "ada@example.com", "12345678").is_ok());
    }

    #[tokio::test]
    async fn session_cookie_is_http_only_with_ttl() {
        let state = AppState::fake();
        let keys = JwtKeys::from_ref(&state);
        let cookie = session_cookie(&keys, "token-value".into());
        assert_eq!(cookie.name(), AUTH_COOKIE);
        assert_eq!(cookie.value(), "token-value");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::hours(24)));
    }

    #[test]
    fn clearing_cookie_is_empty_and_expired() {
        let cookie = clear_cookie();
        assert_eq!(cookie.name(), AUTH_COOKIE);
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
    }
}
