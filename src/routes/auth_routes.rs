//! Registration and login
//!
//! - POST /api/auth/register - create an account, returns a token (201)
//! - POST /api/auth/login    - exchange credentials for a token (200)

use bytes::Bytes;
use hyper::{Request, Response, StatusCode};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::db::schemas::UserDoc;
use crate::routes::response::{json_response, parse_json_body, BoxBody};
use crate::server::AppState;
use crate::types::{FieldError, MarqueeError, Result};

const MAX_NAME_CHARS: usize = 100;
const MIN_PASSWORD_CHARS: usize = 6;

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Trim and lower-case an email address
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

fn validate_email(email: Option<&str>, errors: &mut Vec<FieldError>) -> String {
    let email = normalize_email(email.unwrap_or_default());
    if !is_valid_email(&email) {
        errors.push(FieldError::new("email", "Valid email is required"));
    }
    email
}

struct NewAccount {
    name: String,
    email: String,
    password: String,
}

fn validate_registration(body: RegisterRequest) -> Result<NewAccount> {
    let mut errors = Vec::new();

    let name = body.name.as_deref().unwrap_or_default().trim().to_string();
    if name.is_empty() {
        errors.push(FieldError::new("name", "Name is required"));
    } else if name.chars().count() > MAX_NAME_CHARS {
        errors.push(FieldError::new(
            "name",
            format!("Name must be at most {} characters", MAX_NAME_CHARS),
        ));
    }

    let email = validate_email(body.email.as_deref(), &mut errors);

    let password = body.password.unwrap_or_default();
    if password.is_empty() {
        errors.push(FieldError::new("password", "Password is required"));
    } else if password.chars().count() < MIN_PASSWORD_CHARS {
        errors.push(FieldError::new(
            "password",
            format!("Password must be at least {} characters", MIN_PASSWORD_CHARS),
        ));
    }

    if !errors.is_empty() {
        return Err(MarqueeError::Validation(errors));
    }

    Ok(NewAccount {
        name,
        email,
        password,
    })
}

/// POST /api/auth/register
///
/// Flow:
/// 1. Validate name, email and password
/// 2. Reject an email that is already registered (409)
/// 3. Hash the password on the blocking pool
/// 4. Store the user; a unique-index race also yields 409
/// 5. Issue a token for the new user id
pub async fn handle_register(state: &AppState, req: Request<Bytes>) -> Result<Response<BoxBody>> {
    let body: RegisterRequest = parse_json_body(&req)?;
    let account = validate_registration(body)?;

    if state.users.find_by_email(&account.email).await?.is_some() {
        debug!(email = %account.email, "Registration rejected, email taken");
        return Err(MarqueeError::Conflict("Email already in use".into()));
    }

    let password_hash = state.hasher.hash_blocking(account.password).await?;
    let user = state
        .users
        .create(UserDoc::new(account.name, account.email, password_hash))
        .await?;
    let user_id = user.id_hex();

    let issued = state.tokens.issue(&user_id)?;
    info!(user_id = %user_id, "User registered");

    Ok(json_response(
        StatusCode::CREATED,
        &TokenResponse {
            token: issued.token,
        },
    ))
}

/// POST /api/auth/login
///
/// Unknown email and wrong password produce the same 401.
pub async fn handle_login(state: &AppState, req: Request<Bytes>) -> Result<Response<BoxBody>> {
    let body: LoginRequest = parse_json_body(&req)?;

    let mut errors = Vec::new();
    let email = validate_email(body.email.as_deref(), &mut errors);
    let password = body.password.unwrap_or_default();
    if password.is_empty() {
        errors.push(FieldError::new("password", "Password is required"));
    }
    if !errors.is_empty() {
        return Err(MarqueeError::Validation(errors));
    }

    let invalid = || MarqueeError::Unauthorized("Invalid credentials".into());

    let user = state.users.find_by_email(&email).await?.ok_or_else(invalid)?;

    let matches = state
        .hasher
        .verify_blocking(password, user.password_hash.clone())
        .await?;
    if !matches {
        debug!(user_id = %user.id_hex(), "Login rejected, wrong password");
        return Err(invalid());
    }

    let issued = state.tokens.issue(&user.id_hex())?;
    info!(user_id = %user.id_hex(), "User logged in");

    Ok(json_response(
        StatusCode::OK,
        &TokenResponse {
            token: issued.token,
        },
    ))
}
