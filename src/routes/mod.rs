//! HTTP routes for Marquee

pub mod auth_routes;
pub mod favorites;
pub mod health;
pub mod movies;
pub mod response;

pub use health::{health_check, readiness_check};
pub use response::{error_response, BoxBody};
