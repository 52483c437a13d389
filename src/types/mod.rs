//! Shared types for Marquee

pub mod error;

pub use error::{ErrorBody, FieldError, MarqueeError, Result};
