#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

//! # Server Role
//!
//! Loads the identity once, then accepts connections one at a time. Each connection runs
//! a server [`HandshakeCoordinator`] against the long-lived [`ServerContext`].
//!
//! Per-connection failures (transport, TLS, timeout) are logged and the loop moves on.
//! Fatal errors ([`TlsError::is_fatal`]) stop the loop and are returned.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};

use crate::TlsConfig;
use crate::context::ServerContext;
use crate::engine::RustlsServerEngine;
use crate::error::TlsError;
use crate::handshake::{HandshakeCoordinator, HandshakeOutcome};
use crate::identity::IdentityProvider;
use crate::session::SessionIdGenerator;
use crate::session_store::SessionStore;
use crate::tls13::create_server_config;
use crate::tracing::HandshakeSpan;
use crate::transport;

/// Accepting side of the resumption demo
pub struct ServerRole {
    context: ServerContext,
    acceptor: TlsAcceptor,
}

impl std::fmt::Debug for ServerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRole").field("context", &self.context).finish_non_exhaustive()
    }
}

impl ServerRole {
    /// Validate the configuration and load the server identity
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::Config`] for an invalid configuration and
    /// [`TlsError::IdentityUnavailable`] if the certificate or key cannot be loaded.
    pub fn new(config: &TlsConfig, identity: &dyn IdentityProvider) -> Result<Self, TlsError> {
        config.validate()?;
        let server_config = create_server_config(identity.load_identity()?)?;
        info!(context = %config.session_id_context, "Server identity ready");
        Ok(Self {
            context: ServerContext::new(config),
            acceptor: TlsAcceptor::from(Arc::new(server_config)),
        })
    }

    /// Replace the session id generator
    #[must_use]
    pub fn with_id_generator(mut self, generator: Arc<dyn SessionIdGenerator>) -> Self {
        self.context = self.context.with_id_generator(generator);
        self
    }

    /// Server context
    #[must_use]
    pub fn context(&self) -> &ServerContext {
        &self.context
    }

    /// Server session cache
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        self.context.store()
    }

    /// Run one handshake over an accepted transport and close it
    ///
    /// # Errors
    ///
    /// Returns the coordinator's error; use [`TlsError::is_fatal`] to decide whether the
    /// server must stop.
    pub async fn serve_connection<IO>(
        &self,
        io: IO,
        peer: Option<SocketAddr>,
    ) -> Result<HandshakeOutcome, TlsError>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let span = self.context.config().enable_tracing.then(|| HandshakeSpan::server(peer));
        let instrument = span.as_ref().map_or_else(Span::none, |s| s.span().clone());

        let mut engine = RustlsServerEngine::new(self.acceptor.clone(), io);
        let result = async {
            let mut coordinator = HandshakeCoordinator::for_server(&self.context);
            let result = coordinator.run_server(&mut engine).await;
            engine.close().await;
            result
        }
        .instrument(instrument)
        .await;

        match result {
            Ok(outcome) => {
                if let Some(span) = span {
                    span.complete(&outcome);
                }
                Ok(outcome)
            }
            Err(err) => {
                let err = match peer {
                    Some(peer) => err.with_peer(peer.to_string()),
                    None => err,
                };
                if let Some(span) = span {
                    span.error(&err);
                }
                Err(err)
            }
        }
    }

    /// Accept loop
    ///
    /// Serves connections sequentially until `shutdown` is cancelled. Expired sessions are
    /// evicted before each handshake. `report` sees every completed handshake.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error; per-connection failures are only logged.
    pub async fn run<F>(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
        mut report: F,
    ) -> Result<(), TlsError>
    where
        F: FnMut(&HandshakeOutcome),
    {
        loop {
            let (stream, peer) = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!(sessions = self.store().len(), "Server shutting down");
                    return Ok(());
                }
                accepted = transport::accept(&listener) => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "Accept failed");
                        continue;
                    }
                },
            };

            let evicted = self.store().evict_expired(Utc::now());
            if evicted > 0 {
                debug!(evicted, "Evicted expired sessions before handshake");
            }

            match self.serve_connection(stream, Some(peer)).await {
                Ok(outcome) => report(&outcome),
                Err(err) if err.is_fatal() => {
                    error!(%peer, error = %err, code = %err.code(), "Fatal error, stopping server");
                    return Err(err);
                }
                Err(err) => {
                    warn!(%peer, error = %err, code = %err.code(), "Connection abandoned");
                }
            }
        }
    }
}
