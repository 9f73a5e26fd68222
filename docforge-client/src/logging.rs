//! Logging bootstrap.
//!
//! Structured logging is controlled by environment variables:
//!
//! - `DOCFORGE_DEBUG=true|1|yes` - Enable debug logging
//! - `DOCFORGE_LOG_LEVEL=trace|debug|info|warn|error` - Set a specific level
//! - `DOCFORGE_LOG_FORMAT=json|pretty|compact` - Output format (default: json)
//!
//! ```rust,no_run
//! use docforge_client::logging;
//!
//! // Call once at startup; later calls are no-ops.
//! logging::init();
//! ```
//!
//! A subscriber is only installed with the `tracing-subscriber` feature.
//! Without it, events go to whatever subscriber the application installed.

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

/// Whether `DOCFORGE_DEBUG` enables debug logging.
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var("DOCFORGE_DEBUG")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// The level from `DOCFORGE_LOG_LEVEL`.
///
/// Defaults to "debug" with `DOCFORGE_DEBUG`, otherwise "warn".
pub fn get_log_level() -> &'static str {
    let fallback = if is_debug_enabled() { "debug" } else { "warn" };
    match env::var("DOCFORGE_LOG_LEVEL") {
        Ok(level) => match level.to_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            "error" => "error",
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

/// The format from `DOCFORGE_LOG_FORMAT`, "json" by default.
pub fn get_log_format() -> &'static str {
    env::var("DOCFORGE_LOG_FORMAT")
        .map(|f| match f.to_lowercase().as_str() {
            "pretty" => "pretty",
            "compact" => "compact",
            _ => "json",
        })
        .unwrap_or("json")
}

/// Initialize logging. Subsequent calls are no-ops.
pub fn init() {
    INIT.call_once(|| {
        if !is_debug_enabled() && env::var("DOCFORGE_LOG_LEVEL").is_err() {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = get_log_level();
            let filter = EnvFilter::try_new(format!(
                "docforge={},docforge_client={},docforge_render={}",
                level, level, level
            ))
            .unwrap_or_else(|_| EnvFilter::new("warn"));

            let result = match get_log_format() {
                "json" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json())
                    .try_init(),
                "compact" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().compact())
                    .try_init(),
                _ => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().pretty())
                    .try_init(),
            };

            if result.is_ok() {
                tracing::info!(level = level, format = get_log_format(), "docforge logging initialized");
            }
        }
    });
}

/// Initialize logging at `level`.
///
/// # Safety
///
/// This function modifies environment variables, which is unsafe in
/// multi-threaded programs. Call it before spawning threads.
pub fn init_with_level(level: &str) {
    // SAFETY: only called at program startup before threads are spawned.
    unsafe {
        env::set_var("DOCFORGE_LOG_LEVEL", level);
    }
    init();
}
