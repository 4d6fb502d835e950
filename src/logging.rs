//! Logging setup and event macros.
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! the binary and tests. Output goes to stderr so the CLI can keep stdout for
//! query results.
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! default = "warn"
//!
//! [logging.modules]
//! "tokindex::watcher" = "debug"
//! ```
//!
//! `RUST_LOG` takes precedence over config:
//! ```bash
//! RUST_LOG=tokindex::indexing=trace tokindex src/
//! ```

use std::sync::Once;

use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Wall-clock time of day with milliseconds, e.g. `14:03:07.125`.
struct ClockTime;

impl FormatTime for ClockTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Filter directives for `config`: the default level, then module overrides
/// in name order so the result is stable.
fn directives(config: &LoggingConfig) -> String {
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort();
    std::iter::once(config.default.clone())
        .chain(modules.into_iter().map(|(module, level)| format!("{module}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

fn filter_for(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(config)))
}

/// Install the global subscriber. Later calls in the same process are no-ops.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_timer(ClockTime)
            .with_target(true)
            .with_filter(filter_for(config));

        // A subscriber installed elsewhere (e.g. by a host application) wins
        let _ = tracing_subscriber::registry().with(layer).try_init();
    });
}

/// Install the global subscriber at the default `warn` level.
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

#[doc(hidden)]
#[macro_export]
macro_rules! component_event {
    ($level:ident, $component:expr, $event:expr) => {
        tracing::$level!(component = $component, "[{}] {}", $component, $event)
    };
    ($level:ident, $component:expr, $event:expr, $($arg:tt)*) => {
        tracing::$level!(
            component = $component,
            "[{}] {}: {}",
            $component,
            $event,
            format_args!($($arg)*)
        )
    };
}

/// Info-level event tagged with the emitting component.
///
/// ```ignore
/// log_event!("registry", "watching", "{}", root.display());
/// ```
#[macro_export]
macro_rules! log_event {
    ($($arg:tt)+) => {
        $crate::component_event!(info, $($arg)+)
    };
}

/// Debug-level counterpart of [`log_event!`].
#[macro_export]
macro_rules! debug_event {
    ($($arg:tt)+) => {
        $crate::component_event!(debug, $($arg)+)
    };
}
