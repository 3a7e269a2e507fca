// Tracing setup for the export service.
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

static LOG_RELOAD_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

/// Crates whose logs follow the configured level.
const SERVICE_TARGETS: &[&str] = &[
    "gnexport_server",
    "gnexport_search",
    "gnexport_output",
    "gnexport_db_postgres",
    "gnexport_db_memory",
    "tower_http",
];

/// Chatty dependencies, held at `warn` unless the level is stricter.
const QUIET_TARGETS: &[&str] = &["sqlx", "hyper", "hyper_util", "h2"];

/// Directive string for `level`: the service crates at `level`, the
/// connection-level crates no louder than `warn`.
pub fn filter_directives(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    let level = if level.is_empty() { "info".to_string() } else { level };
    let quiet = match level.as_str() {
        "error" | "off" => level.as_str(),
        _ => "warn",
    };

    let mut directives = vec![level.clone()];
    directives.extend(SERVICE_TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.extend(QUIET_TARGETS.iter().map(|t| format!("{t}={quiet}")));
    directives.join(",")
}

fn service_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(filter_directives(level)).unwrap_or_else(|_| {
        // unknown level names fall back to the default
        EnvFilter::new(filter_directives("info"))
    })
}

pub fn init_tracing() {
    init_tracing_with_level("info");
}

pub fn init_tracing_with_level(level: &str) {
    // RUST_LOG wins over the service defaults.
    let base_filter = std::env::var_os("RUST_LOG")
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| service_filter(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Swap in `[logging] level` once the configuration is loaded.
pub fn apply_logging_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    if let Some(handle) = LOG_RELOAD_HANDLE.get() {
        let filter = service_filter(level);
        if let Err(err) = handle.modify(|f| *f = filter) {
            tracing::warn!(error = %err, "could not apply logging level");
        }
    }
}
