use std::sync::Once;

use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt,
};

static INIT: Once = Once::new();

/// Logging options.
///
/// `level` accepts either a bare level ("debug") or a full EnvFilter spec
/// ("info,leadforge=debug,rusqlite=warn"). A `RUST_LOG` environment variable
/// overrides the configured level when set.
#[derive(Clone, Debug)]
pub struct Config {
    pub level: Option<String>,
    /// JSON lines when true, pretty text otherwise.
    pub json: bool,
    /// Include event targets in output.
    pub with_targets: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: Some("info".to_owned()),
            json: true,
            with_targets: false,
        }
    }
}

/// Install the global subscriber. Safe to call more than once; only the
/// first call takes effect.
pub fn init(cfg: &Config) {
    INIT.call_once(|| {
        // Route `log`-crate records from dependencies through tracing.
        let _ = LogTracer::init();

        let fmt_layer = if cfg.json {
            fmt::layer()
                .with_target(cfg.with_targets)
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .boxed()
        } else {
            fmt::layer()
                .with_target(cfg.with_targets)
                .with_ansi(true)
                .boxed()
        };

        let subscriber = Registry::default()
            .with(build_filter(cfg.level.as_deref()))
            .with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
            .expect("failed to set global tracing subscriber");
    });
}

fn build_filter(configured: Option<&str>) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_env("RUST_LOG") {
        return filter;
    }
    configured
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}
