use super::Severity;

/// Installs a compact stderr subscriber, filtered by `severity` or by `RUST_LOG` when `None`.
#[cfg(feature = "build-tracing")]
pub fn install_tracing_subscriber(severity: Option<Severity>) {
    use tracing_subscriber::{
        prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt, EnvFilter,
    };

    let formatter = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_thread_ids(true)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .compact();

    let registry = tracing_subscriber::registry().with(formatter);
    let result = match severity {
        Some(severity) => registry.with(severity.into_level_filter()).try_init(),
        None => registry.with(EnvFilter::from_default_env()).try_init(),
    };

    // tests install it once per test, only the first one wins
    result.unwrap_or_else(|_| eprintln!("Failed to set tracing subscriber."));
}

#[cfg(not(feature = "build-tracing"))]
pub fn install_tracing_subscriber(_severity: Option<Severity>) {}
