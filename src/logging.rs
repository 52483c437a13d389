//! Tracing subscriber setup
//!
//! `RUST_LOG` wins when set; otherwise `marquee=<level>,info`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_tracing(log_level: &str, log_format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("marquee={},info", log_level).into());

    let registry = tracing_subscriber::registry().with(filter);

    if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
