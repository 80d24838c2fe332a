//! Tracing initialization.
//!
//! One structured-logging stack for the whole engine: env-filtered fmt
//! output plus span-trace capture for error reports. Log lines never carry
//! secret plaintext; the secrets pipeline substitutes references before
//! content reaches any instrumented code path.

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global tracing subscriber. Safe to call once at startup;
/// subsequent calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(ErrorLayer::default())
        .try_init();
}
