#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

//! # Client Role
//!
//! Owns one [`ClientContext`] for the life of the process and connects repeatedly to a
//! single target. Every attempt shares the same store, so a later attempt offers the
//! session negotiated by an earlier one.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tracing::{Instrument, Span, info, warn};

use crate::TlsConfig;
use crate::context::ClientContext;
use crate::engine::RustlsClientEngine;
use crate::error::TlsError;
use crate::handshake::{HandshakeCoordinator, HandshakeOutcome};
use crate::recovery::retry_with_policy;
use crate::session::ContextTag;
use crate::session_store::SessionStore;
use crate::tls13::create_client_config;
use crate::tracing::HandshakeSpan;
use crate::transport;

/// Connecting side of the resumption demo
pub struct ClientRole {
    context: ClientContext,
    connector: TlsConnector,
    addr: String,
    domain: String,
    server_name: ServerName<'static>,
    target: ContextTag,
}

impl std::fmt::Debug for ClientRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRole")
            .field("addr", &self.addr)
            .field("domain", &self.domain)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl ClientRole {
    /// Client for the server at `addr`, verified against `domain`
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::Config`] for an invalid configuration, an invalid domain, or
    /// missing trust anchors.
    pub fn new(config: &TlsConfig, addr: impl Into<String>, domain: &str) -> Result<Self, TlsError> {
        config.validate()?;
        let addr = addr.into();
        let server_name = ServerName::try_from(domain.to_owned()).map_err(|e| {
            TlsError::config(
                format!("Invalid server name '{}': {}", domain, e),
                "domain",
                "Use a DNS name or IP address present in the server certificate",
            )
        })?;
        let connector = TlsConnector::from(Arc::new(create_client_config(config)?));
        let target = ContextTag::new(format!("{}@{}", domain, addr));

        Ok(Self {
            context: ClientContext::new(config),
            connector,
            addr,
            domain: domain.to_owned(),
            server_name,
            target,
        })
    }

    /// Client context
    #[must_use]
    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    /// Remembered sessions
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        self.context.store()
    }

    /// Tag under which sessions for this target are remembered
    #[must_use]
    pub fn target(&self) -> &ContextTag {
        &self.target
    }

    /// Connect once and run a resumption handshake
    ///
    /// The transport connect is retried according to the configured [`RetryPolicy`]
    /// (if any); the handshake itself is attempted once.
    ///
    /// [`RetryPolicy`]: crate::recovery::RetryPolicy
    ///
    /// # Errors
    ///
    /// Returns transport, TLS or handshake errors for this attempt, or a fatal error if
    /// the negotiated record could not be stored.
    pub async fn connect_once(&self) -> Result<HandshakeOutcome, TlsError> {
        let timeout = self.context.config().connect_timeout;
        let stream = match &self.context.config().retry_policy {
            Some(policy) => {
                retry_with_policy(policy, || transport::connect(&self.addr, timeout), "connect")
                    .await?
            }
            None => transport::connect(&self.addr, timeout).await?,
        };
        self.handshake_over(stream).await
    }

    /// Run a resumption handshake over an already connected transport and close it
    ///
    /// # Errors
    ///
    /// See [`ClientRole::connect_once`].
    pub async fn handshake_over<IO>(&self, io: IO) -> Result<HandshakeOutcome, TlsError>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let span = self
            .context
            .config()
            .enable_tracing
            .then(|| HandshakeSpan::client(&self.addr, &self.domain));
        let instrument = span.as_ref().map_or_else(Span::none, |s| s.span().clone());

        let mut engine = RustlsClientEngine::new(self.connector.clone(), self.server_name.clone(), io);
        let result = async {
            let mut coordinator = HandshakeCoordinator::for_client(&self.context, self.target.clone());
            let result = coordinator.run_client(&mut engine).await;
            engine.close().await;
            result
        }
        .instrument(instrument)
        .await;

        match (&result, span) {
            (Ok(outcome), Some(span)) => span.complete(outcome),
            (Err(err), Some(span)) => span.error(err),
            (_, None) => {}
        }
        result.map_err(|err| err.with_peer(self.addr.clone()))
    }

    /// Connect `attempts` times, pausing `pause` between attempts
    ///
    /// Failed attempts are logged and reported as [`HandshakeOutcome::failed`].
    ///
    /// # Errors
    ///
    /// Returns the first fatal error.
    pub async fn run(
        &self,
        attempts: u32,
        pause: Duration,
    ) -> Result<Vec<HandshakeOutcome>, TlsError> {
        let mut outcomes = Vec::new();
        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(pause).await;
            }
            match self.connect_once().await {
                Ok(outcome) => {
                    info!(attempt, reused = outcome.reused, "Connection attempt finished");
                    outcomes.push(outcome);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(attempt, error = %err, "Connection attempt failed");
                    outcomes.push(HandshakeOutcome::failed());
                }
            }
        }
        Ok(outcomes)
    }
}
