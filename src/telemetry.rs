use tracing_subscriber::EnvFilter;

// RUST_LOG wins over the configured filter
fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install the global subscriber. Fails if one is already set.
pub fn init(default_filter: &str, json: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_filter))
        .with_target(false);

    if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}
