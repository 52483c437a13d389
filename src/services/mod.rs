//! Services layer for Marquee
//!
//! - **MovieSearch**: passthrough search against the TMDB API

pub mod movie_search;

pub use movie_search::{MovieSearch, TmdbClient};
