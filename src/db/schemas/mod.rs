//! Database schemas for Marquee

mod metadata;
mod movie;
mod user;

pub use metadata::Metadata;
pub use movie::{MovieChanges, MovieDoc, MovieView, MOVIE_COLLECTION};
pub use user::{UserDoc, USER_COLLECTION};
