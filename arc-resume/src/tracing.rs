#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

//! # Structured Tracing for Resumption Handshakes
//!
//! - Subscriber setup honouring `RUST_LOG`
//! - One span per handshake with peer, role and timing
//!
//! Secret material never appears in any span or event; session ids are logged as hex.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{Level, Span, debug, info, span, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::handshake::HandshakeOutcome;

/// Tracing configuration
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default log level when `RUST_LOG` is not set
    pub log_level: Level,
    /// Include thread ids in log lines
    pub thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self { log_level: Level::INFO, thread_ids: false }
    }
}

impl TracingConfig {
    /// Enable debug logging
    #[must_use]
    pub fn debug() -> Self {
        Self { log_level: Level::DEBUG, ..Default::default() }
    }

    /// Enable trace logging
    #[must_use]
    pub fn trace() -> Self {
        Self { log_level: Level::TRACE, thread_ids: true }
    }
}

/// Initialize tracing
///
/// Must be called at most once per process.
///
/// # Example
/// ```no_run
/// use arc_resume::tracing::init_tracing;
///
/// init_tracing(&Default::default());
/// ```
pub fn init_tracing(config: &TracingConfig) {
    let filter =
        EnvFilter::builder().with_default_directive(config.log_level.into()).from_env_lossy();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(config.thread_ids))
        .with(filter)
        .init();
}

/// Span covering one handshake
#[derive(Debug)]
pub struct HandshakeSpan {
    span: Span,
    start_time: Instant,
}

impl HandshakeSpan {
    /// Span for an accepted server connection
    pub fn server(peer: Option<SocketAddr>) -> Self {
        let span = span!(
            Level::INFO,
            "resume_handshake",
            role = "server",
            peer = peer.map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string()),
        );
        span.in_scope(|| debug!("Starting server handshake"));
        Self { span, start_time: Instant::now() }
    }

    /// Span for an outgoing client connection
    pub fn client(addr: &str, domain: &str) -> Self {
        let span = span!(Level::INFO, "resume_handshake", role = "client", addr = %addr, domain = %domain);
        span.in_scope(|| debug!("Starting client handshake"));
        Self { span, start_time: Instant::now() }
    }

    /// The underlying span, for instrumenting futures
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Get elapsed time since span creation
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Close the span with the handshake outcome
    pub fn complete(self, outcome: &HandshakeOutcome) {
        let duration = self.start_time.elapsed();
        self.span.in_scope(|| {
            info!(
                session_id = %outcome.session_id.as_ref().map(|id| id.to_hex()).unwrap_or_default(),
                reused = outcome.reused,
                elapsed_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                "Handshake completed"
            );
        });
    }

    /// Close the span with an error
    pub fn error<E>(self, error: &E)
    where
        E: std::error::Error,
    {
        let duration = self.start_time.elapsed();
        self.span.in_scope(|| {
            warn!(
                error = %error,
                elapsed_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                "Handshake failed"
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_config_default() {
        let config = TracingConfig::default();
        assert_eq!(config.log_level, Level::INFO);
        assert!(!config.thread_ids);
        assert_eq!(TracingConfig::debug().log_level, Level::DEBUG);
    }

    #[test]
    fn test_handshake_span_creation() {
        let span = HandshakeSpan::client("127.0.0.1:4433", "localhost");
        assert!(span.elapsed() < Duration::from_secs(5));
        span.complete(&HandshakeOutcome::failed());
    }
}
