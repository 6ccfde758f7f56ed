use std::sync::OnceLock;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Set when running inside the Lambda runtime.
const LAMBDA_MARKER: &str = "AWS_LAMBDA_FUNCTION_NAME";

static FILTER: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Install the global fmt subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `info`, or `debug` when `VERBOSE=1`. CloudWatch
/// does not render colour codes, so ANSI is off under Lambda. The level can be changed
/// later with [`apply_verbosity`] once settings from a YAML file or event are known.
pub fn init_tracing() {
    let verbose = std::env::var("VERBOSE").map(|v| v == "1").unwrap_or(false);
    let on_lambda = std::env::var_os(LAMBDA_MARKER).is_some();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let (filter, handle) = reload::Layer::new(filter);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(!on_lambda).with_target(!on_lambda))
        .try_init();
    if installed.is_ok() {
        let _ = FILTER.set(handle);
    }
}

/// Switch between `info` and `debug` for resolved settings.
///
/// Does nothing when `RUST_LOG` is set or no subscriber was installed by [`init_tracing`].
pub fn apply_verbosity(verbose: bool) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    let Some(handle) = FILTER.get() else {
        return;
    };
    if let Err(e) = handle.reload(EnvFilter::new(default_directive(verbose))) {
        tracing::warn!(error = %e, "Could not change log level");
    }
}

/// The active filter directives, when [`init_tracing`] installed the subscriber.
pub fn current_filter() -> Option<String> {
    FILTER.get()?.with_current(|filter| filter.to_string()).ok()
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn verbose_switches_default_level() {
        assert_eq!(default_directive(false), "info");
        assert_eq!(default_directive(true), "debug");
    }

    #[test]
    #[serial]
    fn init_twice_is_harmless() {
        init_tracing();
        init_tracing();
        assert!(current_filter().is_some());
    }

    #[test]
    #[serial]
    fn verbosity_from_settings_changes_level() {
        std::env::remove_var("RUST_LOG");
        init_tracing();

        apply_verbosity(true);
        assert_eq!(current_filter().as_deref(), Some("debug"));
        assert!(tracing::enabled!(tracing::Level::DEBUG));

        apply_verbosity(false);
        assert_eq!(current_filter().as_deref(), Some("info"));
        assert!(!tracing::enabled!(tracing::Level::DEBUG));
    }

    #[test]
    #[serial]
    fn rust_log_wins_over_verbosity() {
        init_tracing();
        apply_verbosity(false);
        std::env::set_var("RUST_LOG", "warn");
        apply_verbosity(true);
        std::env::remove_var("RUST_LOG");
        assert_eq!(current_filter().as_deref(), Some("info"));
    }
}
