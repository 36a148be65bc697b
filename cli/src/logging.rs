use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

/// Initializes the global tracing subscriber. `QUIDS_LOG_LEVEL` (set via
/// `--log-level` or the environment) picks the default directive; `RUST_LOG`
/// still wins for per-module filters, matching `EnvFilter::from_env_lossy`.
pub fn init_tracing(default_level: Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(Directive::from(default_level))
        .from_env_lossy();

    let include_target = matches!(default_level, Level::DEBUG | Level::TRACE);
    let fmt_layer = fmt::layer().with_target(include_target);

    let subscriber = Registry::default().with(fmt_layer.with_filter(filter));
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("global tracing subscriber was already set");
    }
}
