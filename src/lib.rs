//! Marquee - movie catalog and recommendation backend
//!
//! ## Services
//!
//! - **Auth**: registration and login issuing HS256 bearer tokens
//! - **Movies**: CRUD over the movie collection, newest first
//! - **Search**: authenticated passthrough to TMDB
//! - **Favorites**: per-user favorite movie identifiers
//!
//! The store connection is supervised by `db::ConnectionManager`, and
//! `lifecycle::Lifecycle` owns startup ordering and graceful shutdown.

pub mod auth;
pub mod config;
pub mod db;
pub mod lifecycle;
pub mod logging;
pub mod routes;
pub mod server;
pub mod services;
pub mod types;

pub use config::Args;
pub use lifecycle::{Lifecycle, ShutdownHandle, ShutdownTrigger};
pub use server::{route, AppState};
pub use types::{MarqueeError, Result};
