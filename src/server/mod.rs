//! HTTP server for Marquee

pub mod cors;
pub mod http;

pub use http::{route, serve, AppState};
