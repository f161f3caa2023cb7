#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

//! # Session Resumption Errors
//!
//! Every failure carries a numeric [`ErrorCode`], a severity, the phase it happened in and
//! a [`RecoveryHint`].
//!
//! Two classes matter to the roles:
//!
//! | Class           | Variants                                                     | Effect                         |
//! |-----------------|--------------------------------------------------------------|--------------------------------|
//! | Per-connection  | `Io`, `Tls`, `Handshake`                                     | logged, connection abandoned   |
//! | Fatal           | `IdentityUnavailable`, `InvalidRecord`, `IdCollision`, `Config` | role stops                  |
//!
//! A per-connection failure never mutates a session store.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// How bad an error is for the role that hit it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Worth noting, nothing failed
    Info,
    /// The connection failed but the cause is usually transient
    Warning,
    /// The connection failed; the role keeps serving
    Error,
    /// The role cannot continue
    Critical,
}

/// Where in the connection lifecycle the error surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationPhase {
    /// Configuration checks and identity loading
    Initialization,
    /// TCP connect or accept
    ConnectionSetup,
    /// TLS handshake or the offer/verdict exchange
    Handshake,
    /// Session store update
    SessionCache,
}

/// Stable numeric error codes, grouped by range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // 1xxx transport
    /// Peer refused the connection.
    ConnectionRefused = 1001,
    /// Connect did not finish in time.
    ConnectionTimeout = 1002,
    /// Peer reset the connection or the pipe broke.
    ConnectionReset = 1003,

    // 2xxx handshake
    /// TLS or resumption handshake did not complete.
    HandshakeFailed = 2001,
    /// Offer or verdict frame could not be parsed.
    InvalidHandshakeMessage = 2004,
    /// Message arrived in a state that does not expect it.
    UnexpectedMessage = 2005,
    /// Engine step exceeded the handshake timeout.
    HandshakeTimeout = 2006,

    // 3xxx identity
    /// PEM certificate data is malformed.
    CertificateParseError = 3001,
    /// Certificate was rejected, or does not match the private key.
    CertificateInvalid = 3005,

    // 4xxx session cache
    /// Record with an empty or oversized id, or an empty secret.
    InvalidRecord = 4001,
    /// Freshly generated session id already in use.
    IdCollision = 4002,

    // 6xxx io
    /// Any other I/O failure.
    IoError = 6001,
    /// Stream ended in the middle of a frame.
    UnexpectedEof = 6004,

    // 7xxx configuration
    /// Configuration value out of range.
    InvalidConfig = 7001,
    /// Certificate file missing or empty.
    MissingCertificate = 7002,
    /// Private key file missing or unreadable.
    MissingPrivateKey = 7003,
    /// Crypto provider cannot offer TLS 1.3.
    InvalidProtocolVersion = 7005,

    // 9xxx internal
    /// Placeholder for contexts built without a specific code.
    InternalError = 9001,
}

impl ErrorCode {
    /// Upper snake case name used in logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ConnectionRefused => "CONNECTION_REFUSED",
            ErrorCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorCode::ConnectionReset => "CONNECTION_RESET",
            ErrorCode::HandshakeFailed => "HANDSHAKE_FAILED",
            ErrorCode::InvalidHandshakeMessage => "INVALID_HANDSHAKE_MESSAGE",
            ErrorCode::UnexpectedMessage => "UNEXPECTED_MESSAGE",
            ErrorCode::HandshakeTimeout => "HANDSHAKE_TIMEOUT",
            ErrorCode::CertificateParseError => "CERTIFICATE_PARSE_ERROR",
            ErrorCode::CertificateInvalid => "CERTIFICATE_INVALID",
            ErrorCode::InvalidRecord => "INVALID_RECORD",
            ErrorCode::IdCollision => "ID_COLLISION",
            ErrorCode::IoError => "IO_ERROR",
            ErrorCode::UnexpectedEof => "UNEXPECTED_EOF",
            ErrorCode::InvalidConfig => "INVALID_CONFIG",
            ErrorCode::MissingCertificate => "MISSING_CERTIFICATE",
            ErrorCode::MissingPrivateKey => "MISSING_PRIVATE_KEY",
            ErrorCode::InvalidProtocolVersion => "INVALID_PROTOCOL_VERSION",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller can do about an error
#[derive(Debug, Clone)]
pub enum RecoveryHint {
    /// Nothing short of a code or deployment fix
    NoRecovery,
    /// A new attempt may succeed
    Retry {
        /// Attempts worth making.
        max_attempts: u32,
        /// Suggested delay between attempts, in milliseconds.
        backoff_ms: u64,
    },
    /// Change a configuration value and restart
    Reconfigure {
        /// Offending configuration field.
        field: String,
        /// What to set it to instead.
        suggestion: String,
    },
    /// Check that the peer is reachable
    CheckNetworkConnectivity,
    /// Check the certificate, key and trust anchor files
    VerifyCertificates,
}

/// Diagnostic details attached to every [`TlsError`]
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Process-unique id, `RESERR_` followed by 16 hex digits
    pub error_id: String,
    /// Error code
    pub code: ErrorCode,
    /// Severity
    pub severity: ErrorSeverity,
    /// Phase the error surfaced in
    pub phase: OperationPhase,
    /// Remote address, once known
    pub peer_addr: Option<String>,
    /// When the error was created
    pub timestamp: DateTime<Utc>,
    /// Free-form key/value details (never secret material)
    pub extra: HashMap<String, String>,
}

impl ErrorContext {
    /// Fresh context stamped with a new id and the current time
    #[must_use]
    pub fn new(code: ErrorCode, severity: ErrorSeverity, phase: OperationPhase) -> Self {
        Self {
            error_id: next_error_id(),
            code,
            severity,
            phase,
            peer_addr: None,
            timestamp: Utc::now(),
            extra: HashMap::new(),
        }
    }

    fn with_extra(mut self, key: &str, value: String) -> Self {
        self.extra.insert(key.to_owned(), value);
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new(ErrorCode::InternalError, ErrorSeverity::Error, OperationPhase::Initialization)
    }
}

fn next_error_id() -> String {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    format!("RESERR_{:016x}", NEXT.fetch_add(1, Ordering::Relaxed))
}

/// Error type for the resumption layer
#[derive(Error, Debug)]
pub enum TlsError {
    /// Transport failure while connecting, accepting, reading or writing
    #[error("IO error: {message}")]
    Io {
        /// Description.
        message: String,
        /// Underlying I/O error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        /// Error code.
        code: ErrorCode,
        /// Diagnostic context.
        context: Box<ErrorContext>,
        /// Recovery hint.
        recovery: Box<RecoveryHint>,
    },

    /// Rustls rejected the handshake
    #[error("TLS error: {message}")]
    Tls {
        /// Description.
        message: String,
        /// Error code.
        code: ErrorCode,
        /// Diagnostic context.
        context: Box<ErrorContext>,
        /// Recovery hint.
        recovery: Box<RecoveryHint>,
    },

    /// Resumption exchange failed or timed out
    #[error("Handshake error in state {state}: {message}")]
    Handshake {
        /// Description.
        message: String,
        /// Coordinator state the failure happened in.
        state: String,
        /// Error code.
        code: ErrorCode,
        /// Diagnostic context.
        context: Box<ErrorContext>,
        /// Recovery hint.
        recovery: Box<RecoveryHint>,
    },

    /// Server certificate or private key could not be loaded
    #[error("Identity unavailable: {message}")]
    IdentityUnavailable {
        /// Description.
        message: String,
        /// File that failed, when the failure is tied to one.
        source_path: Option<String>,
        /// Error code.
        code: ErrorCode,
        /// Diagnostic context.
        context: Box<ErrorContext>,
        /// Recovery hint.
        recovery: Box<RecoveryHint>,
    },

    /// Malformed record handed to a session store
    #[error("Invalid session record: {message}")]
    InvalidRecord {
        /// Description.
        message: String,
        /// Error code.
        code: ErrorCode,
        /// Diagnostic context.
        context: Box<ErrorContext>,
        /// Recovery hint.
        recovery: Box<RecoveryHint>,
    },

    /// No free session id was found
    #[error("Session id collision after {attempts} attempt(s)")]
    IdCollision {
        /// Ids generated before giving up.
        attempts: u32,
        /// Error code.
        code: ErrorCode,
        /// Diagnostic context.
        context: Box<ErrorContext>,
        /// Recovery hint.
        recovery: Box<RecoveryHint>,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Description.
        message: String,
        /// Offending field.
        field: Option<String>,
        /// Error code.
        code: ErrorCode,
        /// Diagnostic context.
        context: Box<ErrorContext>,
        /// Recovery hint.
        recovery: Box<RecoveryHint>,
    },
}

impl TlsError {
    /// Handshake failure in the given coordinator state
    #[must_use]
    pub fn handshake(message: impl Into<String>, state: impl Into<String>, code: ErrorCode) -> Self {
        TlsError::Handshake {
            message: message.into(),
            state: state.into(),
            code,
            context: Box::new(ErrorContext::new(code, ErrorSeverity::Error, OperationPhase::Handshake)),
            recovery: Box::new(RecoveryHint::Retry { max_attempts: 1, backoff_ms: 0 }),
        }
    }

    /// Identity material could not be loaded
    #[must_use]
    pub fn identity_unavailable(
        message: impl Into<String>,
        source_path: Option<&str>,
        code: ErrorCode,
    ) -> Self {
        TlsError::IdentityUnavailable {
            message: message.into(),
            source_path: source_path.map(str::to_owned),
            code,
            context: Box::new(ErrorContext::new(
                code,
                ErrorSeverity::Critical,
                OperationPhase::Initialization,
            )),
            recovery: Box::new(RecoveryHint::VerifyCertificates),
        }
    }

    /// Malformed session record
    #[must_use]
    pub fn invalid_record(message: impl Into<String>) -> Self {
        TlsError::InvalidRecord {
            message: message.into(),
            code: ErrorCode::InvalidRecord,
            context: Box::new(ErrorContext::new(
                ErrorCode::InvalidRecord,
                ErrorSeverity::Critical,
                OperationPhase::SessionCache,
            )),
            recovery: Box::new(RecoveryHint::NoRecovery),
        }
    }

    /// Session id allocation gave up after `attempts` ids
    #[must_use]
    pub fn id_collision(attempts: u32) -> Self {
        TlsError::IdCollision {
            attempts,
            code: ErrorCode::IdCollision,
            context: Box::new(ErrorContext::new(
                ErrorCode::IdCollision,
                ErrorSeverity::Critical,
                OperationPhase::SessionCache,
            )),
            recovery: Box::new(RecoveryHint::NoRecovery),
        }
    }

    /// Invalid configuration value
    #[must_use]
    pub fn config(message: impl Into<String>, field: &str, suggestion: impl Into<String>) -> Self {
        TlsError::Config {
            message: message.into(),
            field: Some(field.to_owned()),
            code: ErrorCode::InvalidConfig,
            context: Box::new(ErrorContext::new(
                ErrorCode::InvalidConfig,
                ErrorSeverity::Critical,
                OperationPhase::Initialization,
            )),
            recovery: Box::new(RecoveryHint::Reconfigure {
                field: field.to_owned(),
                suggestion: suggestion.into(),
            }),
        }
    }

    /// Error code
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.context().code
    }

    /// Severity
    #[must_use]
    pub fn severity(&self) -> ErrorSeverity {
        self.context().severity
    }

    /// Diagnostic context
    #[must_use]
    pub fn context(&self) -> &ErrorContext {
        match self {
            TlsError::Io { context, .. }
            | TlsError::Tls { context, .. }
            | TlsError::Handshake { context, .. }
            | TlsError::IdentityUnavailable { context, .. }
            | TlsError::InvalidRecord { context, .. }
            | TlsError::IdCollision { context, .. }
            | TlsError::Config { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            TlsError::Io { context, .. }
            | TlsError::Tls { context, .. }
            | TlsError::Handshake { context, .. }
            | TlsError::IdentityUnavailable { context, .. }
            | TlsError::InvalidRecord { context, .. }
            | TlsError::IdCollision { context, .. }
            | TlsError::Config { context, .. } => context,
        }
    }

    /// Recovery hint
    #[must_use]
    pub fn recovery_hint(&self) -> &RecoveryHint {
        match self {
            TlsError::Io { recovery, .. }
            | TlsError::Tls { recovery, .. }
            | TlsError::Handshake { recovery, .. }
            | TlsError::IdentityUnavailable { recovery, .. }
            | TlsError::InvalidRecord { recovery, .. }
            | TlsError::IdCollision { recovery, .. }
            | TlsError::Config { recovery, .. } => recovery,
        }
    }

    /// False only for [`RecoveryHint::NoRecovery`]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.recovery_hint(), RecoveryHint::NoRecovery)
    }

    /// Whether the error must stop the owning role.
    ///
    /// Transport and handshake failures only abandon the current connection.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TlsError::IdentityUnavailable { .. }
                | TlsError::InvalidRecord { .. }
                | TlsError::IdCollision { .. }
                | TlsError::Config { .. }
        )
    }

    /// Record the remote address in the error context
    #[must_use]
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.context_mut().peer_addr = Some(peer.into());
        self
    }
}

impl From<std::io::Error> for TlsError {
    fn from(err: std::io::Error) -> Self {
        // tokio-rustls reports engine failures as io::Error wrapping rustls::Error
        if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<rustls::Error>()) {
            return TlsError::from(inner.clone());
        }

        use std::io::ErrorKind;
        let (code, severity, recovery) = match err.kind() {
            ErrorKind::ConnectionRefused => {
                (ErrorCode::ConnectionRefused, ErrorSeverity::Error, RecoveryHint::CheckNetworkConnectivity)
            }
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => (
                ErrorCode::ConnectionReset,
                ErrorSeverity::Warning,
                RecoveryHint::Retry { max_attempts: 3, backoff_ms: 1000 },
            ),
            ErrorKind::TimedOut => (
                ErrorCode::ConnectionTimeout,
                ErrorSeverity::Error,
                RecoveryHint::Retry { max_attempts: 2, backoff_ms: 2000 },
            ),
            ErrorKind::UnexpectedEof => (
                ErrorCode::UnexpectedEof,
                ErrorSeverity::Warning,
                RecoveryHint::Retry { max_attempts: 1, backoff_ms: 0 },
            ),
            _ => (ErrorCode::IoError, ErrorSeverity::Error, RecoveryHint::NoRecovery),
        };
        let context = ErrorContext::new(code, severity, OperationPhase::ConnectionSetup)
            .with_extra("io_kind", format!("{:?}", err.kind()));

        TlsError::Io {
            message: err.to_string(),
            source: Some(Box::new(err)),
            code,
            context: Box::new(context),
            recovery: Box::new(recovery),
        }
    }
}

impl From<rustls::Error> for TlsError {
    fn from(err: rustls::Error) -> Self {
        let (code, recovery) = match &err {
            rustls::Error::InvalidMessage(_) => {
                (ErrorCode::InvalidHandshakeMessage, RecoveryHint::NoRecovery)
            }
            rustls::Error::InappropriateMessage { .. }
            | rustls::Error::InappropriateHandshakeMessage { .. } => {
                (ErrorCode::UnexpectedMessage, RecoveryHint::NoRecovery)
            }
            rustls::Error::InvalidCertificate(_) | rustls::Error::NoCertificatesPresented => {
                (ErrorCode::CertificateInvalid, RecoveryHint::VerifyCertificates)
            }
            rustls::Error::HandshakeNotComplete => {
                (ErrorCode::HandshakeFailed, RecoveryHint::Retry { max_attempts: 1, backoff_ms: 0 })
            }
            _ => (ErrorCode::HandshakeFailed, RecoveryHint::NoRecovery),
        };
        let context = ErrorContext::new(code, ErrorSeverity::Error, OperationPhase::Handshake)
            .with_extra("rustls_error", err.to_string());

        TlsError::Tls {
            message: err.to_string(),
            code,
            context: Box::new(context),
            recovery: Box::new(recovery),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_names() {
        assert_eq!(ErrorCode::ConnectionRefused.to_string(), "CONNECTION_REFUSED");
        assert_eq!(ErrorCode::IdCollision.to_string(), "ID_COLLISION");
        assert_eq!(ErrorCode::InvalidRecord.as_str(), "INVALID_RECORD");
    }

    #[test]
    fn test_error_ids_are_unique() {
        let a = ErrorContext::default();
        let b = ErrorContext::default();
        assert!(a.error_id.starts_with("RESERR_"));
        assert_ne!(a.error_id, b.error_id);
        assert_eq!(a.code, ErrorCode::InternalError);
    }

    #[test]
    fn test_refused_connect_is_per_connection() {
        let err = TlsError::from(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "no"));
        assert_eq!(err.code(), ErrorCode::ConnectionRefused);
        assert_eq!(err.severity(), ErrorSeverity::Error);
        assert_eq!(err.context().extra.get("io_kind").map(String::as_str), Some("ConnectionRefused"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_wrapped_rustls_error_is_unwrapped() {
        let io_err = std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            rustls::Error::HandshakeNotComplete,
        );
        let err = TlsError::from(io_err);
        assert!(matches!(err, TlsError::Tls { .. }));
        assert_eq!(err.code(), ErrorCode::HandshakeFailed);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(TlsError::id_collision(4).is_fatal());
        assert!(TlsError::invalid_record("empty id").is_fatal());
        assert!(
            TlsError::identity_unavailable("missing", Some("server.crt"), ErrorCode::MissingCertificate)
                .is_fatal()
        );
        assert!(TlsError::config("bad", "max_sessions", "use 1").is_fatal());
        assert!(!TlsError::handshake("boom", "Deciding", ErrorCode::HandshakeFailed).is_fatal());
        assert!(!TlsError::from(rustls::Error::NoCertificatesPresented).is_fatal());
    }

    #[test]
    fn test_with_peer_records_address() {
        let err = TlsError::handshake("boom", "Deciding", ErrorCode::HandshakeTimeout)
            .with_peer("127.0.0.1:4433");
        assert_eq!(err.context().peer_addr.as_deref(), Some("127.0.0.1:4433"));
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("Deciding"));
    }
}
