#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

//! # LatticeArc Session Resumption
//!
//! TLS 1.3 session resumption by session id: a bounded, expiring session cache and a
//! handshake coordinator that decides between resuming a cached session and negotiating a
//! fresh one, plus a server and a client role that exercise it over real connections.
//!
//! ## Features
//!
//! - **Session Cache**: capacity- and age-bounded [`SessionStore`] with atomic id allocation
//! - **Explicit State Machine**: [`HandshakeCoordinator`] owns every store mutation
//! - **Pluggable Engine**: the coordinator talks to [`ClientEngine`] / [`ServerEngine`];
//!   [`engine`] provides the rustls implementation
//! - **Comprehensive Error Handling**: error codes, severity, recovery hints and a clear
//!   per-connection versus fatal split
//!
//! ## Quick Start
//!
//! ```no_run
//! use arc_resume::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), TlsError> {
//! let config = TlsConfig::new();
//! let identity = PemFileIdentity::new("server.crt", "server.key");
//! let server = ServerRole::new(&config, &identity)?;
//! let listener = transport::listen("0.0.0.0:4433").await?;
//! server.run(listener, CancellationToken::new(), |outcome| println!("{:?}", outcome)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Resumption Exchange
//!
//! ```text
//! Client                                               Server
//!   │  TLS 1.3 handshake (rustls, no tickets)             │
//!   │◄═══════════════════════════════════════════════════►│
//!   │                                                     │
//!   │  Offer: version | id_len | id | HMAC binder         │
//!   │────────────────────────────────────────────────────►│  lookup, tag check,
//!   │                                                     │  binder verify
//!   │                 Verdict: kind | id_len | id         │
//!   │◄────────────────────────────────────────────────────│
//!   │                                                     │
//!   │  resumed: reuse cached secret                       │
//!   │  full:    both sides export a fresh secret          │
//! ```
//!
//! The binder is keyed with the cached secret over a per-connection exporter value, so an
//! id alone is not enough to resume a session.

use std::time::Duration;

pub mod client;
pub mod context;
pub mod engine;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod recovery;
pub mod server;
pub mod session;
pub mod session_store;
pub mod tls13;
pub mod tracing;
pub mod transport;

pub use client::ClientRole;
pub use context::{ClientContext, ServerContext};
pub use engine::{RustlsClientEngine, RustlsServerEngine};
pub use error::{ErrorCode, ErrorContext, ErrorSeverity, OperationPhase, RecoveryHint, TlsError};
pub use handshake::{
    ClientEngine, HandshakeCoordinator, HandshakeOutcome, HandshakeResult, HandshakeState, Role,
    ServerEngine,
};
pub use identity::{IdentityProvider, PemFileIdentity, ServerIdentity};
pub use recovery::{RetryPolicy, retry_with_policy};
pub use server::ServerRole;
pub use session::{
    ContextTag, MAX_SESSION_ID_LEN, RandomIdGenerator, SessionId, SessionIdGenerator,
    SessionRecord,
};
pub use session_store::SessionStore;
pub use tracing::{HandshakeSpan, TracingConfig, init_tracing};

/// Default server session cache size
pub const DEFAULT_SERVER_CACHE_SIZE: usize = 20 * 1024;

/// Default client session cache size
pub const DEFAULT_CLIENT_CACHE_SIZE: usize = 32;

/// Default session lifetime
pub const DEFAULT_SESSION_LIFETIME: Duration = Duration::from_secs(300);

/// Default server session id context
pub const DEFAULT_SESSION_ID_CONTEXT: &str = "SRV";

/// Default demo port
pub const DEFAULT_PORT: u16 = 4433;

/// Longest accepted session id context, in bytes
pub const MAX_SESSION_ID_CONTEXT_LEN: usize = 32;

/// Session cache sizing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCacheConfig {
    /// Maximum number of sessions to cache
    pub max_sessions: usize,
    /// Maximum age of a cached session
    pub session_lifetime: Duration,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self { max_sessions: DEFAULT_SERVER_CACHE_SIZE, session_lifetime: DEFAULT_SESSION_LIFETIME }
    }
}

impl SessionCacheConfig {
    /// Create a cache configuration
    #[must_use]
    pub fn new(max_sessions: usize, session_lifetime: Duration) -> Self {
        Self { max_sessions, session_lifetime }
    }

    /// Client-side defaults: a handful of sessions, one per server context
    #[must_use]
    pub fn client() -> Self {
        Self { max_sessions: DEFAULT_CLIENT_CACHE_SIZE, ..Self::default() }
    }

    /// Validate the cache configuration
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::Config`] if the capacity or the lifetime is zero.
    pub fn validate(&self) -> Result<(), TlsError> {
        if self.max_sessions == 0 {
            return Err(TlsError::config(
                "Session cache capacity must be at least 1",
                "max_sessions",
                "Use a positive capacity (default 20480 for servers, 32 for clients)",
            ));
        }
        if self.session_lifetime.is_zero() {
            return Err(TlsError::config(
                "Session lifetime must be non-zero",
                "session_lifetime",
                "Use a positive lifetime (default 300s)",
            ));
        }
        Ok(())
    }
}

/// Configuration shared by the server and client roles
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Server session cache
    pub server_cache: SessionCacheConfig,
    /// Client session cache
    pub client_cache: SessionCacheConfig,
    /// Server session id context, stamped on every issued record
    pub session_id_context: String,
    /// Upper bound on each engine step of a handshake
    pub handshake_timeout: Duration,
    /// Upper bound on a transport connect
    pub connect_timeout: Duration,
    /// Fresh-id attempts before a collision is reported as fatal
    pub max_id_attempts: u32,
    /// PEM file with trust anchors for the client (None for system roots)
    pub ca_certs: Option<String>,
    /// Retry policy for client transport connects
    pub retry_policy: Option<RetryPolicy>,
    /// Emit per-handshake timing spans
    pub enable_tracing: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            server_cache: SessionCacheConfig::default(),
            client_cache: SessionCacheConfig::client(),
            session_id_context: DEFAULT_SESSION_ID_CONTEXT.to_string(),
            handshake_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            max_id_attempts: 4,
            ca_certs: None,
            retry_policy: None,
            enable_tracing: false,
        }
    }
}

impl TlsConfig {
    /// Create a configuration with defaults
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use arc_resume::TlsConfig;
    ///
    /// let config = TlsConfig::new()
    ///     .with_session_id_context("edge")
    ///     .with_session_lifetime(Duration::from_secs(600))
    ///     .with_tracing();
    /// assert!(config.validate().is_ok());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server session cache capacity
    #[must_use]
    pub fn with_server_cache(mut self, max_sessions: usize) -> Self {
        self.server_cache.max_sessions = max_sessions;
        self
    }

    /// Set the client session cache capacity
    #[must_use]
    pub fn with_client_cache(mut self, max_sessions: usize) -> Self {
        self.client_cache.max_sessions = max_sessions;
        self
    }

    /// Set the session lifetime for both caches
    #[must_use]
    pub fn with_session_lifetime(mut self, lifetime: Duration) -> Self {
        self.server_cache.session_lifetime = lifetime;
        self.client_cache.session_lifetime = lifetime;
        self
    }

    /// Set the server session id context
    #[must_use]
    pub fn with_session_id_context(mut self, context: impl Into<String>) -> Self {
        self.session_id_context = context.into();
        self
    }

    /// Set the per-step handshake timeout
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the transport connect timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set how many fresh ids the server tries before giving up
    #[must_use]
    pub fn with_max_id_attempts(mut self, attempts: u32) -> Self {
        self.max_id_attempts = attempts;
        self
    }

    /// Trust the CA certificates in the given PEM file instead of system roots
    #[must_use]
    pub fn with_ca_certs(mut self, path: impl Into<String>) -> Self {
        self.ca_certs = Some(path.into());
        self
    }

    /// Set retry policy for client connects
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Enable tracing spans
    #[must_use]
    pub fn with_tracing(mut self) -> Self {
        self.enable_tracing = true;
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::Config`] if:
    /// - Either cache has zero capacity or zero lifetime
    /// - The session id context is empty or longer than 32 bytes
    /// - A timeout is zero
    /// - `max_id_attempts` is zero
    pub fn validate(&self) -> Result<(), TlsError> {
        self.server_cache.validate()?;
        self.client_cache.validate()?;

        if self.session_id_context.is_empty()
            || self.session_id_context.len() > MAX_SESSION_ID_CONTEXT_LEN
        {
            return Err(TlsError::config(
                format!(
                    "Session id context must be 1 to {} bytes, got {}",
                    MAX_SESSION_ID_CONTEXT_LEN,
                    self.session_id_context.len()
                ),
                "session_id_context",
                "Use a short server identifier such as \"SRV\"",
            ));
        }
        if self.handshake_timeout.is_zero() {
            return Err(TlsError::config(
                "Handshake timeout must be non-zero",
                "handshake_timeout",
                "Use a positive timeout (default 10s)",
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(TlsError::config(
                "Connect timeout must be non-zero",
                "connect_timeout",
                "Use a positive timeout (default 10s)",
            ));
        }
        if self.max_id_attempts == 0 {
            return Err(TlsError::config(
                "At least one session id attempt is required",
                "max_id_attempts",
                "Use the default of 4",
            ));
        }
        Ok(())
    }
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
