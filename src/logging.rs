//! Logging setup
//!
//! The library only emits `tracing` events. Binaries call [`init`] once to
//! install a compact stderr subscriber. `RUST_LOG` directives are applied on
//! top of the default level.

use std::sync::Once;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding filter directives
pub const FILTER_ENV: &str = "RUST_LOG";

static INIT: Once = Once::new();

/// Install the subscriber; later calls are no-ops
pub fn init(debug: bool) {
    INIT.call_once(|| setup_logging(debug));
}

fn setup_logging(debug: bool) {
    let layer = fmt::layer()
        .event_format(fmt::format().compact())
        .with_writer(std::io::stderr)
        .with_filter(filters(debug));

    // A subscriber installed by an embedding application wins
    let _ = tracing_subscriber::registry().with(layer).try_init();
}

fn filters(debug: bool) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default_level(debug).into())
        .with_env_var(FILTER_ENV)
        .from_env_lossy()
}

fn default_level(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
}
