//! Unified error type.

use thiserror::Error;

/// Shorthand for results whose error is [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type returned by luddite's fallible operations.
///
/// Request-level failures (404, 406, 400 on a bad version, etc.) are
/// expressed as HTTP [`Response`](crate::Response) values, not as `Error`s.
/// This type surfaces setup and infrastructure failures: bad configuration,
/// route conflicts, binding to a port, loading TLS material.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(#[from] figment::Error),

    #[error("invalid API version range [{min}, {max}]: {reason}")]
    InvalidVersionRange {
        min: u32,
        max: u32,
        reason: &'static str,
    },

    #[error("invalid listen address `{0}`")]
    Addr(String),

    #[error("invalid route `{path}`: {source}")]
    Route {
        path: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("tls: {0}")]
    Tls(String),

    #[error("metrics: {0}")]
    Metrics(String),

    #[error("logging: {0}")]
    Logging(String),

    /// Handlers, resources and routes can only be added before the service
    /// starts running.
    #[error("service is already running")]
    Sealed,
}
