use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,tern_smoke=debug,tern_reticulum=debug";

/// Install the global tracing subscriber. Safe to call more than once.
pub fn init() {
    let filter = filter_from_env().unwrap_or_else(|| {
        EnvFilter::try_new(DEFAULT_FILTER).unwrap_or_else(|_| EnvFilter::new("info"))
    });
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn filter_from_env() -> Option<EnvFilter> {
    for key in ["RUST_LOG", "TERN_SMOKE_LOG", "TERN_LOG"] {
        if let Ok(raw) = std::env::var(key)
            && !raw.trim().is_empty()
            && let Ok(filter) = EnvFilter::try_new(raw.trim())
        {
            return Some(filter);
        }
    }
    None
}
