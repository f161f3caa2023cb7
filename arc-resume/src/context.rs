#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

//! # Role Contexts
//!
//! Long-lived state owned by each role and lent to every
//! [`HandshakeCoordinator`](crate::handshake::HandshakeCoordinator) it creates:
//! the session store, the configuration and (server side) the context tag and
//! id generator. There is no process-global context.

use std::sync::Arc;

use crate::TlsConfig;
use crate::session::{ContextTag, RandomIdGenerator, SessionIdGenerator};
use crate::session_store::SessionStore;

/// Server identity context: one per listening server
pub struct ServerContext {
    tag: ContextTag,
    store: SessionStore,
    config: TlsConfig,
    id_generator: Arc<dyn SessionIdGenerator>,
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("tag", &self.tag)
            .field("sessions", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl ServerContext {
    /// Context tagged with `config.session_id_context` and an empty store
    #[must_use]
    pub fn new(config: &TlsConfig) -> Self {
        Self {
            tag: ContextTag::new(config.session_id_context.clone()),
            store: SessionStore::from_config(&config.server_cache),
            config: config.clone(),
            id_generator: Arc::new(RandomIdGenerator),
        }
    }

    /// Replace the session id generator
    #[must_use]
    pub fn with_id_generator(mut self, generator: Arc<dyn SessionIdGenerator>) -> Self {
        self.id_generator = generator;
        self
    }

    /// Context tag stamped on every record this server issues
    #[must_use]
    pub fn tag(&self) -> &ContextTag {
        &self.tag
    }

    /// Server session cache
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &TlsConfig {
        &self.config
    }

    /// Session id generator
    #[must_use]
    pub fn id_generator(&self) -> &Arc<dyn SessionIdGenerator> {
        &self.id_generator
    }
}

/// Client context: the remembered sessions for this process
#[derive(Debug)]
pub struct ClientContext {
    store: SessionStore,
    config: TlsConfig,
}

impl ClientContext {
    /// Context with an empty client store
    #[must_use]
    pub fn new(config: &TlsConfig) -> Self {
        Self { store: SessionStore::from_config(&config.client_cache), config: config.clone() }
    }

    /// Client session cache
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &TlsConfig {
        &self.config
    }
}
