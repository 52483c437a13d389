//! Response and request helpers shared by all routes

use bytes::Bytes;
use http_body_util::{combinators::BoxBody as HttpBoxBody, BodyExt, Full, LengthLimitError, Limited};
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::auth::{extract_bearer_token, Claims, TokenService};
use crate::types::{MarqueeError, Result};

pub type BoxBody = HttpBoxBody<Bytes, hyper::Error>;

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = 64 * 1024;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());

    let mut response = Response::new(full_body(json));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub fn empty_response(status: StatusCode) -> Response<BoxBody> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = status;
    response
}

pub fn error_response(err: &MarqueeError) -> Response<BoxBody> {
    json_response(err.status_code(), &err.to_body())
}

/// Read the whole body, rejecting anything over `MAX_BODY_BYTES`
///
/// The limit is enforced per frame while reading, so an oversized or endless
/// body fails as soon as it crosses the limit.
pub async fn collect_body<B>(req: Request<B>) -> Result<Request<Bytes>>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    let bytes = Limited::new(body, MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| {
            if e.is::<LengthLimitError>() {
                MarqueeError::BadRequest("Request body too large".into())
            } else {
                MarqueeError::BadRequest(format!("Failed to read body: {}", e))
            }
        })?
        .to_bytes();

    Ok(Request::from_parts(parts, bytes))
}

pub fn parse_json_body<T: DeserializeOwned>(req: &Request<Bytes>) -> Result<T> {
    if req.body().is_empty() {
        return Err(MarqueeError::BadRequest("Request body is required".into()));
    }
    Ok(serde_json::from_slice(req.body())?)
}

pub fn get_auth_header<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// Resolve the caller's identity from the bearer token
pub fn authenticate<B>(tokens: &TokenService, req: &Request<B>) -> Result<Claims> {
    let token = extract_bearer_token(get_auth_header(req))
        .ok_or_else(|| MarqueeError::Unauthorized("Missing authorization token".into()))?;
    tokens.verify(token)
}
