#![deny(unsafe_code)]
// Test files use unwrap() and panic for assertions
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

//! Handshake coordinator behaviour against scripted engines

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use arc_resume::*;
use parking_lot::Mutex;
use zeroize::Zeroizing;

/// Engine step at which a scripted engine fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailAt {
    Offer,
    Resume,
    Negotiate,
    Issue,
}

fn dropped(step: &str) -> TlsError {
    TlsError::from(std::io::Error::new(std::io::ErrorKind::ConnectionReset, step.to_string()))
}

#[derive(Default)]
struct ScriptedServer {
    offer: Option<SessionId>,
    proves_ownership: bool,
    fail_at: Option<FailAt>,
    stall: bool,
    issued: Option<SessionId>,
    resumed: Option<SessionId>,
}

impl ScriptedServer {
    fn offering(id: Option<SessionId>) -> Self {
        Self { offer: id, proves_ownership: true, ..Default::default() }
    }

    fn check(&self, step: FailAt) -> Result<(), TlsError> {
        if self.fail_at == Some(step) { Err(dropped(&format!("{:?}", step))) } else { Ok(()) }
    }
}

impl ServerEngine for ScriptedServer {
    async fn receive_offer(&mut self) -> Result<Option<SessionId>, TlsError> {
        if self.stall {
            std::future::pending::<()>().await;
        }
        self.check(FailAt::Offer)?;
        Ok(self.offer.clone())
    }

    async fn resume(&mut self, record: &SessionRecord) -> Result<bool, TlsError> {
        self.check(FailAt::Resume)?;
        if self.proves_ownership {
            self.resumed = Some(record.id().clone());
        }
        Ok(self.proves_ownership)
    }

    async fn negotiate(&mut self) -> Result<Zeroizing<Vec<u8>>, TlsError> {
        self.check(FailAt::Negotiate)?;
        Ok(Zeroizing::new(vec![0x42; 32]))
    }

    async fn issue(&mut self, id: &SessionId) -> Result<(), TlsError> {
        self.check(FailAt::Issue)?;
        self.issued = Some(id.clone());
        Ok(())
    }
}

/// Hands out a fixed sequence of ids, then random ones
struct SequenceIds(Mutex<VecDeque<SessionId>>);

impl SequenceIds {
    fn new(ids: impl IntoIterator<Item = SessionId>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(ids.into_iter().collect())))
    }
}

impl SessionIdGenerator for SequenceIds {
    fn generate(&self) -> SessionId {
        self.0.lock().pop_front().unwrap_or_else(|| RandomIdGenerator.generate())
    }
}

fn id(byte: u8) -> SessionId {
    SessionId::new(vec![byte; 32])
}

fn record(byte: u8, tag: &str) -> SessionRecord {
    SessionRecord::new(id(byte), Zeroizing::new(vec![byte; 32]), ContextTag::new(tag))
}

fn server_context() -> ServerContext {
    ServerContext::new(&TlsConfig::new())
}

#[cfg(test)]
mod server_decisions {
    use super::*;

    #[tokio::test]
    async fn test_no_offer_negotiates_and_adds_exactly_one_id() {
        let context = server_context();
        context.store().put(record(1, "SRV")).unwrap();
        let before = context.store().ids();

        let mut engine = ScriptedServer::offering(None);
        let outcome =
            HandshakeCoordinator::for_server(&context).run_server(&mut engine).await.unwrap();

        assert!(outcome.success);
        assert!(!outcome.reused);
        let new_id = outcome.session_id.unwrap();
        assert_eq!(engine.issued.as_ref(), Some(&new_id));

        let after = context.store().ids();
        assert_eq!(after.len(), before.len() + 1);
        assert!(!before.contains(&new_id));
        assert!(after.contains(&new_id));
        assert_eq!(context.store().get(&new_id).unwrap().context_tag().as_str(), "SRV");
    }

    #[tokio::test]
    async fn test_unknown_id_falls_back_to_full() {
        let context = server_context();
        let mut engine = ScriptedServer::offering(Some(id(9)));
        let outcome =
            HandshakeCoordinator::for_server(&context).run_server(&mut engine).await.unwrap();

        assert!(!outcome.reused);
        assert_ne!(outcome.session_id, Some(id(9)));
        assert!(engine.resumed.is_none());
        assert_eq!(context.store().len(), 1);
    }

    #[tokio::test]
    async fn test_known_id_resumes_without_store_change() {
        let context = server_context();
        context.store().put(record(5, "SRV")).unwrap();
        let before = context.store().ids();

        let mut engine = ScriptedServer::offering(Some(id(5)));
        let mut coordinator = HandshakeCoordinator::for_server(&context);
        let outcome = coordinator.run_server(&mut engine).await.unwrap();

        assert!(outcome.reused);
        assert_eq!(outcome.session_id, Some(id(5)));
        assert!(engine.issued.is_none());
        assert_eq!(context.store().ids(), before);
        assert_eq!(
            coordinator.transitions(),
            &[
                HandshakeState::Start,
                HandshakeState::OfferingOrAwaiting,
                HandshakeState::Deciding,
                HandshakeState::Resumed,
                HandshakeState::Complete,
            ]
        );
    }

    #[tokio::test]
    async fn test_context_mismatch_falls_back_to_full() {
        let context = server_context();
        context.store().put(record(5, "OTHER")).unwrap();

        let mut engine = ScriptedServer::offering(Some(id(5)));
        let outcome =
            HandshakeCoordinator::for_server(&context).run_server(&mut engine).await.unwrap();

        assert!(!outcome.reused);
        assert_ne!(outcome.session_id, Some(id(5)));
        assert!(engine.resumed.is_none());
        // the foreign record is left alone
        assert!(context.store().contains(&id(5)));
        assert_eq!(context.store().len(), 2);
    }

    #[tokio::test]
    async fn test_unproven_offer_falls_back_to_full() {
        let context = server_context();
        context.store().put(record(5, "SRV")).unwrap();

        let mut engine =
            ScriptedServer { offer: Some(id(5)), proves_ownership: false, ..Default::default() };
        let outcome =
            HandshakeCoordinator::for_server(&context).run_server(&mut engine).await.unwrap();

        assert!(!outcome.reused);
        assert_ne!(outcome.session_id, Some(id(5)));
        assert!(context.store().contains(&id(5)));
    }

    #[tokio::test]
    async fn test_expired_offer_falls_back_to_full() {
        let config = TlsConfig::new().with_session_lifetime(Duration::from_secs(60));
        let context = ServerContext::new(&config);
        let old = chrono::Utc::now() - chrono::Duration::seconds(120);
        let stale = SessionRecord::negotiated_at(
            id(5),
            Zeroizing::new(vec![5; 32]),
            ContextTag::new("SRV"),
            old,
        );
        context.store().put_at(stale, old).unwrap();

        let mut engine = ScriptedServer::offering(Some(id(5)));
        let outcome =
            HandshakeCoordinator::for_server(&context).run_server(&mut engine).await.unwrap();
        assert!(!outcome.reused);
        assert!(!context.store().contains(&id(5)));
    }
}

#[cfg(test)]
mod server_failures {
    use super::*;

    async fn assert_store_untouched(fail_at: FailAt, offer: Option<SessionId>) {
        let context = server_context();
        context.store().put(record(5, "SRV")).unwrap();
        let before = context.store().ids();

        let mut engine = ScriptedServer {
            offer,
            proves_ownership: true,
            fail_at: Some(fail_at),
            ..Default::default()
        };
        let mut coordinator = HandshakeCoordinator::for_server(&context);
        let err = coordinator.run_server(&mut engine).await.unwrap_err();

        assert!(!err.is_fatal(), "{:?} should be per-connection", fail_at);
        assert_eq!(coordinator.state(), HandshakeState::Failed);
        assert_eq!(context.store().ids(), before, "store changed after failure at {:?}", fail_at);
    }

    #[tokio::test]
    async fn test_failure_at_any_step_leaves_store_identical() {
        assert_store_untouched(FailAt::Offer, None).await;
        assert_store_untouched(FailAt::Resume, Some(id(5))).await;
        assert_store_untouched(FailAt::Negotiate, None).await;
        assert_store_untouched(FailAt::Issue, None).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_engine_times_out() {
        let config = TlsConfig::new().with_handshake_timeout(Duration::from_secs(2));
        let context = ServerContext::new(&config);
        let mut engine = ScriptedServer { stall: true, ..Default::default() };

        let err = HandshakeCoordinator::for_server(&context)
            .run_server(&mut engine)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::HandshakeTimeout);
        assert!(context.store().is_empty());
    }

    #[tokio::test]
    async fn test_collision_is_retried() {
        let context = server_context().with_id_generator(SequenceIds::new([id(5), id(5), id(6)]));
        context.store().put(record(5, "SRV")).unwrap();

        let mut engine = ScriptedServer::offering(None);
        let outcome =
            HandshakeCoordinator::for_server(&context).run_server(&mut engine).await.unwrap();

        assert_eq!(outcome.session_id, Some(id(6)));
        assert_eq!(context.store().len(), 2);
    }

    #[tokio::test]
    async fn test_collision_exhaustion_is_fatal() {
        let config = TlsConfig::new().with_max_id_attempts(3);
        let context = ServerContext::new(&config)
            .with_id_generator(SequenceIds::new([id(5), id(5), id(5), id(6)]));
        context.store().put(record(5, "SRV")).unwrap();
        let before = context.store().ids();

        let mut engine = ScriptedServer::offering(None);
        let err = HandshakeCoordinator::for_server(&context)
            .run_server(&mut engine)
            .await
            .unwrap_err();

        assert!(matches!(err, TlsError::IdCollision { attempts: 3, .. }));
        assert!(err.is_fatal());
        assert!(engine.issued.is_none());
        assert_eq!(context.store().ids(), before);
    }
}

#[cfg(test)]
mod client_decisions {
    use super::*;

    struct ScriptedClient {
        verdict: Result<(bool, SessionId), FailAt>,
        offered: Option<SessionId>,
    }

    impl ClientEngine for ScriptedClient {
        async fn begin_handshake(
            &mut self,
            offer: Option<&SessionRecord>,
        ) -> Result<HandshakeResult, TlsError> {
            self.offered = offer.map(|record| record.id().clone());
            let (resumed, session_id) = self.verdict.clone().map_err(|step| dropped(&format!("{:?}", step)))?;
            Ok(HandshakeResult { resumed, session_id, secret_material: Zeroizing::new(vec![7; 32]) })
        }
    }

    fn target() -> ContextTag {
        ContextTag::new("localhost@127.0.0.1:4433")
    }

    #[tokio::test]
    async fn test_full_handshake_replaces_saved_session() {
        let context = ClientContext::new(&TlsConfig::new());
        context.store().replace_for_context(record(1, target().as_str())).unwrap();

        let mut engine = ScriptedClient { verdict: Ok((false, id(2))), offered: None };
        let outcome = HandshakeCoordinator::for_client(&context, target())
            .run_client(&mut engine)
            .await
            .unwrap();

        assert_eq!(engine.offered, Some(id(1)));
        assert!(!outcome.reused);
        assert_eq!(context.store().ids(), vec![id(2)]);
    }

    #[tokio::test]
    async fn test_sessions_are_kept_per_target() {
        let context = ClientContext::new(&TlsConfig::new());
        context.store().replace_for_context(record(1, "other@10.0.0.1:4433")).unwrap();

        let mut engine = ScriptedClient { verdict: Ok((false, id(2))), offered: None };
        HandshakeCoordinator::for_client(&context, target()).run_client(&mut engine).await.unwrap();

        assert!(engine.offered.is_none());
        assert_eq!(context.store().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_handshake_keeps_saved_session() {
        let context = ClientContext::new(&TlsConfig::new());
        context.store().replace_for_context(record(1, target().as_str())).unwrap();

        let mut engine = ScriptedClient { verdict: Err(FailAt::Offer), offered: None };
        let mut coordinator = HandshakeCoordinator::for_client(&context, target());
        assert!(coordinator.run_client(&mut engine).await.is_err());

        assert_eq!(coordinator.state(), HandshakeState::Failed);
        assert_eq!(context.store().ids(), vec![id(1)]);
    }

    #[tokio::test]
    async fn test_resumption_of_unoffered_id_is_rejected() {
        let context = ClientContext::new(&TlsConfig::new());
        context.store().replace_for_context(record(1, target().as_str())).unwrap();

        let mut engine = ScriptedClient { verdict: Ok((true, id(3))), offered: None };
        let err = HandshakeCoordinator::for_client(&context, target())
            .run_client(&mut engine)
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::HandshakeFailed);
        assert_eq!(context.store().ids(), vec![id(1)]);
    }
}
