//! Logging initialisation.
//!
//! # Design
//! - One entry point installing the global tracing subscriber from the
//!   logging profile.
//! - `RUST_LOG` wins over the configured level when set.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use wharf_config::{LogFormat, LoggingProfile};

/// Output format after resolving `Auto` against the build profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResolvedFormat {
    Json,
    Pretty,
}

/// Configure and install the global tracing subscriber.
pub(crate) fn init(profile: &LoggingProfile) -> Result<(), TryInitError> {
    match resolve_format(profile.format) {
        ResolvedFormat::Json => tracing_subscriber::registry()
            .with(build_env_filter(&profile.level))
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_thread_ids(false),
            )
            .try_init(),
        ResolvedFormat::Pretty => tracing_subscriber::registry()
            .with(build_env_filter(&profile.level))
            .with(fmt::layer().with_target(false).with_thread_ids(false))
            .try_init(),
    }
}

/// Resolve `Auto` to JSON in release builds and pretty output otherwise.
pub(crate) const fn resolve_format(format: LogFormat) -> ResolvedFormat {
    match format {
        LogFormat::Json => ResolvedFormat::Json,
        LogFormat::Pretty => ResolvedFormat::Pretty,
        LogFormat::Auto => {
            if cfg!(debug_assertions) {
                ResolvedFormat::Pretty
            } else {
                ResolvedFormat::Json
            }
        }
    }
}

fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_formats_resolve_to_themselves() {
        assert_eq!(resolve_format(LogFormat::Json), ResolvedFormat::Json);
        assert_eq!(resolve_format(LogFormat::Pretty), ResolvedFormat::Pretty);
    }

    #[test]
    fn auto_resolves_from_the_build_profile() {
        let resolved = resolve_format(LogFormat::Auto);
        if cfg!(debug_assertions) {
            assert_eq!(resolved, ResolvedFormat::Pretty);
        } else {
            assert_eq!(resolved, ResolvedFormat::Json);
        }
    }

    #[test]
    fn init_installs_subscriber_once() {
        let profile = LoggingProfile::default();
        let _ = init(&profile);
    }
}
