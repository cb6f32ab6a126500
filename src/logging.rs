//! Logging setup.
//!
//! The engine only emits `tracing` events; front ends decide whether and
//! how to print them by calling [`init_logging`] once at startup.
//!
//! Filter precedence: `HYDRA_LOG`, then `RUST_LOG`, then the level derived
//! from [`Verbosity`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt as subscriber_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::error::HydraError;

/// environment variable holding a filter directive for this crate
pub const LOG_ENV: &str = "HYDRA_LOG";

/// How chatty the engine is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// errors only
    Quiet,
    /// warnings (swallowed I/O failures, dropped elements)
    #[default]
    Normal,
    /// commits, reverts and unit lifecycle
    Verbose,
    /// store, retrieve and search internals
    Debug,
    Trace,
}

impl Verbosity {
    /// the `tracing` level name this maps to
    pub fn level(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Verbose => "info",
            Verbosity::Debug => "debug",
            Verbosity::Trace => "trace",
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verbosity::Quiet => "quiet",
            Verbosity::Normal => "normal",
            Verbosity::Verbose => "verbose",
            Verbosity::Debug => "debug",
            Verbosity::Trace => "trace",
        };
        f.write_str(name)
    }
}

impl FromStr for Verbosity {
    type Err = HydraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quiet" | "error" => Ok(Verbosity::Quiet),
            "normal" | "warn" => Ok(Verbosity::Normal),
            "verbose" | "info" => Ok(Verbosity::Verbose),
            "debug" => Ok(Verbosity::Debug),
            "trace" => Ok(Verbosity::Trace),
            other => Err(HydraError::Internal(format!("unknown verbosity: {}", other))),
        }
    }
}

/// Build the filter, honouring the environment first.
pub fn build_env_filter(verbosity: Verbosity) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return filter;
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(verbosity.level())
}

/// Install a stderr subscriber.
///
/// Returns false if a global subscriber was already set (e.g. by the
/// embedding application or an earlier call).
pub fn init_logging(verbosity: Verbosity) -> bool {
    Registry::default()
        .with(build_env_filter(verbosity))
        .with(
            subscriber_fmt::layer()
                .with_target(true)
                .with_timer(ChronoUtc::rfc_3339())
                .with_writer(std::io::stderr),
        )
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_names() {
        for verbosity in [
            Verbosity::Quiet,
            Verbosity::Normal,
            Verbosity::Verbose,
            Verbosity::Debug,
            Verbosity::Trace,
        ] {
            assert_eq!(verbosity.to_string().parse::<Verbosity>().unwrap(), verbosity);
        }
        assert_eq!("INFO".parse::<Verbosity>().unwrap(), Verbosity::Verbose);
        assert!("loud".parse::<Verbosity>().is_err());
        assert!(Verbosity::Quiet < Verbosity::Debug);
    }

    #[test]
    fn test_init_is_idempotent() {
        init_logging(Verbosity::Quiet);
        // second install is refused rather than panicking
        assert!(!init_logging(Verbosity::Debug));
    }
}
