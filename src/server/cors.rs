//! CORS policy
//!
//! Requests without an `Origin` header (curl, server-to-server) pass
//! through untouched. A listed origin is echoed back; anything else is
//! rejected with 403 before routing.

use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, VARY,
};
use hyper::{Response, StatusCode};

use crate::routes::response::{empty_response, json_response, BoxBody};
use crate::types::ErrorBody;

const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization";
const PREFLIGHT_MAX_AGE: &str = "86400";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsDecision {
    /// No Origin header
    NoOrigin,
    /// Origin allowed, echo it back
    Allowed(HeaderValue),
    Forbidden,
}

#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    allow_any: bool,
    origins: Vec<String>,
}

impl CorsPolicy {
    pub fn new(origins: Vec<String>) -> Self {
        let allow_any = origins.iter().any(|o| o == "*");
        let origins = origins.into_iter().filter(|o| o != "*").collect();
        Self { allow_any, origins }
    }

    pub fn check(&self, origin: Option<&HeaderValue>) -> CorsDecision {
        let Some(origin) = origin else {
            return CorsDecision::NoOrigin;
        };

        let allowed = self.allow_any
            || origin.to_str().is_ok_and(|value| {
                let value = value.trim_end_matches('/');
                self.origins.iter().any(|o| o.eq_ignore_ascii_case(value))
            });

        if allowed {
            CorsDecision::Allowed(origin.clone())
        } else {
            CorsDecision::Forbidden
        }
    }
}

/// Add CORS headers for an allowed origin
pub fn apply(response: &mut Response<BoxBody>, decision: &CorsDecision) {
    if let CorsDecision::Allowed(origin) = decision {
        let headers = response.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        headers.insert(VARY, HeaderValue::from_static("Origin"));
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        );
    }
}

/// CORS preflight response
pub fn preflight(decision: &CorsDecision) -> Response<BoxBody> {
    let mut response = empty_response(StatusCode::NO_CONTENT);
    apply(&mut response, decision);
    response.headers_mut().insert(
        ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(PREFLIGHT_MAX_AGE),
    );
    response
}

pub fn forbidden() -> Response<BoxBody> {
    json_response(
        StatusCode::FORBIDDEN,
        &ErrorBody {
            error: "Origin not allowed".into(),
            code: "CORS_FORBIDDEN",
            errors: None,
        },
    )
}
