#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

//! # Resumption Handshake Coordination
//!
//! The [`HandshakeCoordinator`] drives one connection attempt through the
//! resumption state machine and is the only component that mutates a
//! [`SessionStore`] as a result of a handshake. Cryptography and framing belong
//! to the engine behind [`ClientEngine`] / [`ServerEngine`].
//!
//! ## State Machine
//!
//! ```text
//! Start ──► OfferingOrAwaiting ──► Deciding ──┬──► Resumed ─────────┬──► Complete
//!                                             └──► FullNegotiation ─┘
//!   (any state) ──────────────────────────────────────────────────────► Failed
//! ```
//!
//! ### Client
//! 1. `Start`: look up the saved record for the target server context
//! 2. `OfferingOrAwaiting`: hand its id (if any) to the engine
//! 3. `Deciding`: engine reports whether the server resumed
//! 4. `Resumed`: nothing stored; outcome carries the existing id
//! 5. `FullNegotiation`: new record replaces the one saved for this context
//!
//! ### Server
//! 1. `Start` / `OfferingOrAwaiting`: receive the offered id, if any
//! 2. `Deciding`: offered, cached, same context tag and proven by the engine → `Resumed`
//! 3. `FullNegotiation`: fresh secret from the engine, id allocated with an atomic
//!    check-and-insert, then announced to the peer
//!
//! A `Failed` attempt leaves the store exactly as it found it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::context::{ClientContext, ServerContext};
use crate::error::{ErrorCode, TlsError};
use crate::session::{ContextTag, RandomIdGenerator, SessionId, SessionIdGenerator, SessionRecord};
use crate::session_store::SessionStore;

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Initial state
    Start,
    /// Client offering a saved id / server waiting for the offer
    OfferingOrAwaiting,
    /// Waiting on the engine's resumption verdict
    Deciding,
    /// Cached session reused
    Resumed,
    /// Fresh key negotiation
    FullNegotiation,
    /// Handshake finished, outcome reported
    Complete,
    /// Handshake aborted, store untouched
    Failed,
}

impl HandshakeState {
    /// True for `Complete` and `Failed`
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Complete | HandshakeState::Failed)
    }
}

/// Which side of the connection a coordinator drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Connecting side
    Client,
    /// Accepting side
    Server,
}

/// Result of one handshake attempt, reported and then discarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOutcome {
    /// Session id in use (absent on failure)
    pub session_id: Option<SessionId>,
    /// True if a cached session was reused
    pub reused: bool,
    /// True if the handshake completed
    pub success: bool,
}

impl HandshakeOutcome {
    /// Successful outcome
    #[must_use]
    pub fn completed(session_id: SessionId, reused: bool) -> Self {
        Self { session_id: Some(session_id), reused, success: true }
    }

    /// Failed outcome
    #[must_use]
    pub fn failed() -> Self {
        Self { session_id: None, reused: false, success: false }
    }
}

/// What the client engine reports once the handshake is done
#[derive(Debug)]
pub struct HandshakeResult {
    /// Server accepted the offered id
    pub resumed: bool,
    /// Id the server resumed or issued
    pub session_id: SessionId,
    /// Secret material of the session in use
    pub secret_material: Zeroizing<Vec<u8>>,
}

/// Client side of the TLS engine
pub trait ClientEngine {
    /// Run the handshake, offering `offer`'s id if present.
    fn begin_handshake(
        &mut self,
        offer: Option<&SessionRecord>,
    ) -> impl Future<Output = Result<HandshakeResult, TlsError>> + Send;
}

/// Server side of the TLS engine, split at the resumption decision
pub trait ServerEngine {
    /// Wait for the client's offered id, if any.
    fn receive_offer(&mut self) -> impl Future<Output = Result<Option<SessionId>, TlsError>> + Send;

    /// Try to resume `record`. Returns `false` if the client cannot prove it holds
    /// the record's secret; the coordinator then falls back to full negotiation.
    fn resume(
        &mut self,
        record: &SessionRecord,
    ) -> impl Future<Output = Result<bool, TlsError>> + Send;

    /// Complete a fresh negotiation and return its secret material.
    fn negotiate(&mut self) -> impl Future<Output = Result<Zeroizing<Vec<u8>>, TlsError>> + Send;

    /// Announce the newly allocated id to the client.
    fn issue(&mut self, id: &SessionId) -> impl Future<Output = Result<(), TlsError>> + Send;
}

/// Drives one connection attempt against a session store
pub struct HandshakeCoordinator<'a> {
    role: Role,
    store: &'a SessionStore,
    context_tag: ContextTag,
    id_generator: Arc<dyn SessionIdGenerator>,
    handshake_timeout: Duration,
    max_id_attempts: u32,
    state: HandshakeState,
    transitions: Vec<HandshakeState>,
}

impl std::fmt::Debug for HandshakeCoordinator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeCoordinator")
            .field("role", &self.role)
            .field("context_tag", &self.context_tag)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<'a> HandshakeCoordinator<'a> {
    /// Coordinator for one client connection to the server identified by `target`
    #[must_use]
    pub fn for_client(context: &'a ClientContext, target: ContextTag) -> Self {
        Self::new(
            Role::Client,
            context.store(),
            target,
            Arc::new(RandomIdGenerator),
            context.config().handshake_timeout,
            context.config().max_id_attempts,
        )
    }

    /// Coordinator for one accepted server connection
    #[must_use]
    pub fn for_server(context: &'a ServerContext) -> Self {
        Self::new(
            Role::Server,
            context.store(),
            context.tag().clone(),
            Arc::clone(context.id_generator()),
            context.config().handshake_timeout,
            context.config().max_id_attempts,
        )
    }

    fn new(
        role: Role,
        store: &'a SessionStore,
        context_tag: ContextTag,
        id_generator: Arc<dyn SessionIdGenerator>,
        handshake_timeout: Duration,
        max_id_attempts: u32,
    ) -> Self {
        Self {
            role,
            store,
            context_tag,
            id_generator,
            handshake_timeout,
            max_id_attempts: max_id_attempts.max(1),
            state: HandshakeState::Start,
            transitions: vec![HandshakeState::Start],
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Every state visited so far, in order
    #[must_use]
    pub fn transitions(&self) -> &[HandshakeState] {
        &self.transitions
    }

    /// Role this coordinator drives
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    fn transition(&mut self, next: HandshakeState) {
        debug!(role = ?self.role, from = ?self.state, to = ?next, "Handshake transition");
        self.state = next;
        self.transitions.push(next);
    }

    fn fail(&mut self, err: TlsError) -> TlsError {
        warn!(role = ?self.role, state = ?self.state, error = %err, "Handshake failed");
        self.transition(HandshakeState::Failed);
        err
    }

    /// Await an engine step, bounded by the handshake timeout
    async fn bounded<T>(
        &self,
        step: impl Future<Output = Result<T, TlsError>>,
    ) -> Result<T, TlsError> {
        match tokio::time::timeout(self.handshake_timeout, step).await {
            Ok(result) => result,
            Err(_elapsed) => Err(TlsError::handshake(
                format!("engine did not respond within {:?}", self.handshake_timeout),
                format!("{:?}", self.state),
                ErrorCode::HandshakeTimeout,
            )),
        }
    }

    /// Drive a client handshake
    ///
    /// # Errors
    ///
    /// Returns the engine's error (transport, TLS, timeout) after moving to
    /// `Failed`; the store is not touched in that case. A server claiming to resume
    /// an id that was not offered is reported as [`ErrorCode::HandshakeFailed`].
    pub async fn run_client<E: ClientEngine>(
        &mut self,
        engine: &mut E,
    ) -> Result<HandshakeOutcome, TlsError> {
        let saved = self.store.latest_for_context(&self.context_tag);
        match &saved {
            Some(record) => debug!(session_id = %record.id(), "Offering saved session"),
            None => debug!(target = %self.context_tag, "No saved session to offer"),
        }
        self.transition(HandshakeState::OfferingOrAwaiting);

        self.transition(HandshakeState::Deciding);
        let result = match self.bounded(engine.begin_handshake(saved.as_ref())).await {
            Ok(result) => result,
            Err(err) => return Err(self.fail(err)),
        };

        if result.resumed {
            let Some(record) = saved.filter(|record| record.id() == &result.session_id) else {
                let err = TlsError::handshake(
                    format!("server resumed session {} which was not offered", result.session_id),
                    "Deciding",
                    ErrorCode::HandshakeFailed,
                );
                return Err(self.fail(err));
            };
            self.transition(HandshakeState::Resumed);
            self.transition(HandshakeState::Complete);
            info!(session_id = %record.id(), reused = true, "Client handshake complete");
            return Ok(HandshakeOutcome::completed(record.id().clone(), true));
        }

        self.transition(HandshakeState::FullNegotiation);
        let record = SessionRecord::new(
            result.session_id.clone(),
            result.secret_material,
            self.context_tag.clone(),
        );
        if let Err(err) = self.store.replace_for_context(record) {
            return Err(self.fail(err));
        }
        self.transition(HandshakeState::Complete);
        info!(session_id = %result.session_id, reused = false, "Client handshake complete");
        Ok(HandshakeOutcome::completed(result.session_id, false))
    }

    /// Drive a server handshake
    ///
    /// # Errors
    ///
    /// Returns the engine's error after moving to `Failed`, with the store left as
    /// it was. Returns [`TlsError::IdCollision`] if no free id was found within the
    /// configured number of attempts; that error is fatal to the server.
    pub async fn run_server<E: ServerEngine>(
        &mut self,
        engine: &mut E,
    ) -> Result<HandshakeOutcome, TlsError> {
        self.transition(HandshakeState::OfferingOrAwaiting);
        let offered = match self.bounded(engine.receive_offer()).await {
            Ok(offered) => offered,
            Err(err) => return Err(self.fail(err)),
        };

        self.transition(HandshakeState::Deciding);
        if let Some(record) = offered.as_ref().and_then(|id| self.resumable(id)) {
            match self.bounded(engine.resume(&record)).await {
                Ok(true) => {
                    self.transition(HandshakeState::Resumed);
                    self.transition(HandshakeState::Complete);
                    info!(session_id = %record.id(), reused = true, "Server resumed session");
                    return Ok(HandshakeOutcome::completed(record.id().clone(), true));
                }
                Ok(false) => {
                    warn!(session_id = %record.id(), "Client failed to prove session ownership");
                }
                Err(err) => return Err(self.fail(err)),
            }
        }

        self.transition(HandshakeState::FullNegotiation);
        let secret = match self.bounded(engine.negotiate()).await {
            Ok(secret) => secret,
            Err(err) => return Err(self.fail(err)),
        };
        let id = match self.allocate(secret) {
            Ok(id) => id,
            Err(err) => return Err(self.fail(err)),
        };
        if let Err(err) = self.bounded(engine.issue(&id)).await {
            self.store.invalidate(&id);
            return Err(self.fail(err));
        }

        self.transition(HandshakeState::Complete);
        info!(session_id = %id, reused = false, "Server issued new session");
        Ok(HandshakeOutcome::completed(id, false))
    }

    /// Cached record for `id` that this server context may resume
    fn resumable(&self, id: &SessionId) -> Option<SessionRecord> {
        let Some(record) = self.store.get(id) else {
            debug!(session_id = %id, "Offered session not cached");
            return None;
        };
        if record.context_tag() != &self.context_tag {
            debug!(
                session_id = %id,
                issued_by = %record.context_tag(),
                "Offered session belongs to another context"
            );
            return None;
        }
        Some(record)
    }

    /// Generate and atomically claim a fresh id, retrying on collision
    fn allocate(&self, secret: Zeroizing<Vec<u8>>) -> Result<SessionId, TlsError> {
        for attempt in 1..=self.max_id_attempts {
            let id = self.id_generator.generate();
            let record = SessionRecord::new(id.clone(), secret.clone(), self.context_tag.clone());
            match self.store.insert_new(record) {
                Ok(()) => return Ok(id),
                Err(TlsError::IdCollision { .. }) => {
                    warn!(attempt, session_id = %id, "Session id collision, regenerating");
                }
                Err(err) => return Err(err),
            }
        }
        Err(TlsError::id_collision(self.max_id_attempts))
    }
}
