use anyhow::Result;
use tracing::subscriber;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

/// Install the global subscriber. `RUST_LOG` wins over `verbose` when set.
pub fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    let default_level = if verbose {
        "txtredirect=debug"
    } else {
        "txtredirect=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true).with_target(true));
        subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false));
        subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}
