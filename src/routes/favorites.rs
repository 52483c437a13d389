//! Favorite movies of the authenticated user
//!
//! Identifiers are stored as strings; numeric TMDB ids are accepted and
//! converted.

use bytes::Bytes;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::routes::response::{authenticate, json_response, parse_json_body, BoxBody};
use crate::server::AppState;
use crate::types::{FieldError, MarqueeError, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddFavoriteRequest {
    #[serde(default)]
    movie_id: Value,
}

#[derive(Debug, Serialize)]
struct FavoritesResponse {
    favorites: Vec<String>,
}

fn favorites_response(favorites: Vec<String>) -> Response<BoxBody> {
    json_response(StatusCode::OK, &FavoritesResponse { favorites })
}

fn user_gone() -> MarqueeError {
    MarqueeError::Unauthorized("User not found".into())
}

fn movie_id_from(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// GET /api/users/me/favorites
pub async fn handle_list(state: &AppState, req: Request<Bytes>) -> Result<Response<BoxBody>> {
    let claims = authenticate(&state.tokens, &req)?;
    let user = state
        .users
        .find_by_id(&claims.sub)
        .await?
        .ok_or_else(user_gone)?;
    Ok(favorites_response(user.favorites))
}

/// POST /api/users/me/favorites
pub async fn handle_add(state: &AppState, req: Request<Bytes>) -> Result<Response<BoxBody>> {
    let claims = authenticate(&state.tokens, &req)?;
    let body: AddFavoriteRequest = parse_json_body(&req)?;
    let movie_id = movie_id_from(&body.movie_id).ok_or_else(|| {
        MarqueeError::Validation(vec![FieldError::new("movieId", "movieId is required")])
    })?;

    let favorites = state
        .users
        .add_favorite(&claims.sub, &movie_id)
        .await?
        .ok_or_else(user_gone)?;
    Ok(favorites_response(favorites))
}

/// DELETE /api/users/me/favorites/:movieId
pub async fn handle_remove(
    state: &AppState,
    movie_id: &str,
    req: Request<Bytes>,
) -> Result<Response<BoxBody>> {
    let claims = authenticate(&state.tokens, &req)?;
    let favorites = state
        .users
        .remove_favorite(&claims.sub, movie_id)
        .await?
        .ok_or_else(user_gone)?;
    Ok(favorites_response(favorites))
}
