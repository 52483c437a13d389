//! Movie catalog routes
//!
//! - GET    /api/movies             - list, newest first
//! - GET    /api/movies/search      - TMDB passthrough (authenticated)
//! - GET    /api/movies/:id         - fetch one
//! - POST   /api/movies             - create
//! - PUT    /api/movies/:id         - partial update
//! - DELETE /api/movies/:id         - hard delete

use bytes::Bytes;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use crate::db::schemas::{MovieChanges, MovieDoc, MovieView};
use crate::routes::response::{authenticate, empty_response, json_response, parse_json_body, BoxBody};
use crate::server::AppState;
use crate::types::{FieldError, MarqueeError, Result};

const MIN_RATING: f64 = 0.0;
const MAX_RATING: f64 = 10.0;

#[derive(Debug, Default, Deserialize)]
pub struct MovieRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub rating: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    query: Option<String>,
}

fn movie_not_found() -> MarqueeError {
    MarqueeError::NotFound("Movie not found".into())
}

fn check_rating(rating: Option<f64>, errors: &mut Vec<FieldError>) {
    if let Some(rating) = rating {
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            errors.push(FieldError::new(
                "rating",
                format!("Rating must be between {} and {}", MIN_RATING, MAX_RATING),
            ));
        }
    }
}

fn validate_new_movie(body: MovieRequest) -> Result<MovieDoc> {
    let mut errors = Vec::new();

    let title = body.title.as_deref().unwrap_or_default().trim().to_string();
    if title.is_empty() {
        errors.push(FieldError::new("title", "Title is required"));
    }
    check_rating(body.rating, &mut errors);

    if !errors.is_empty() {
        return Err(MarqueeError::Validation(errors));
    }

    Ok(MovieDoc::new(
        title,
        body.description.unwrap_or_default(),
        body.year,
        body.rating,
    ))
}

fn validate_changes(body: MovieRequest) -> Result<MovieChanges> {
    let mut errors = Vec::new();

    let title = body.title.map(|t| t.trim().to_string());
    if title.as_deref() == Some("") {
        errors.push(FieldError::new("title", "Title cannot be empty"));
    }
    check_rating(body.rating, &mut errors);

    if !errors.is_empty() {
        return Err(MarqueeError::Validation(errors));
    }

    Ok(MovieChanges {
        title,
        description: body.description,
        year: body.year,
        rating: body.rating,
    })
}

/// GET /api/movies
pub async fn handle_list(state: &AppState) -> Result<Response<BoxBody>> {
    let movies: Vec<MovieView> = state
        .movies
        .list()
        .await?
        .iter()
        .map(MovieDoc::to_view)
        .collect();
    Ok(json_response(StatusCode::OK, &movies))
}

/// GET /api/movies/:id
pub async fn handle_get(state: &AppState, id: &str) -> Result<Response<BoxBody>> {
    let movie = state.movies.get(id).await?.ok_or_else(movie_not_found)?;
    Ok(json_response(StatusCode::OK, &movie.to_view()))
}

/// POST /api/movies
pub async fn handle_create(state: &AppState, req: Request<Bytes>) -> Result<Response<BoxBody>> {
    let body: MovieRequest = parse_json_body(&req)?;
    let movie = state.movies.create(validate_new_movie(body)?).await?;
    let view = movie.to_view();
    info!(movie_id = %view.id, title = %view.title, "Movie created");
    Ok(json_response(StatusCode::CREATED, &view))
}

/// PUT /api/movies/:id
pub async fn handle_update(
    state: &AppState,
    id: &str,
    req: Request<Bytes>,
) -> Result<Response<BoxBody>> {
    let body: MovieRequest = parse_json_body(&req)?;
    let changes = validate_changes(body)?;
    let movie = state
        .movies
        .update(id, changes)
        .await?
        .ok_or_else(movie_not_found)?;
    debug!(movie_id = %id, "Movie updated");
    Ok(json_response(StatusCode::OK, &movie.to_view()))
}

/// DELETE /api/movies/:id
pub async fn handle_delete(state: &AppState, id: &str) -> Result<Response<BoxBody>> {
    if !state.movies.delete(id).await? {
        return Err(movie_not_found());
    }
    info!(movie_id = %id, "Movie deleted");
    Ok(empty_response(StatusCode::NO_CONTENT))
}

/// GET /api/movies/search?query=
pub async fn handle_search(state: &AppState, req: Request<Bytes>) -> Result<Response<BoxBody>> {
    let claims = authenticate(&state.tokens, &req)?;

    let params: SearchQuery = serde_urlencoded::from_str(req.uri().query().unwrap_or(""))
        .map_err(|e| MarqueeError::BadRequest(format!("Invalid query string: {}", e)))?;
    let query = params
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| MarqueeError::BadRequest("Query parameter 'query' is required".into()))?;

    debug!(user_id = %claims.sub, query = %query, "Movie search");
    let results = state.search.search(query).await?;
    Ok(json_response(StatusCode::OK, &results))
}
