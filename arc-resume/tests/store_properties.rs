#![deny(unsafe_code)]
// Test files use unwrap() and panic for assertions
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

//! Property tests for the session store

use std::collections::HashSet;
use std::time::Duration;

use arc_resume::{ContextTag, ErrorCode, SessionId, SessionRecord, SessionStore};
use proptest::prelude::*;
use zeroize::Zeroizing;

fn valid_id() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 1..=32)
}

fn valid_secret() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 1..=64)
}

fn record(id: Vec<u8>, secret: Vec<u8>, tag: &str) -> SessionRecord {
    SessionRecord::new(SessionId::new(id), Zeroizing::new(secret), ContextTag::new(tag))
}

proptest! {
    #[test]
    fn prop_put_then_get_returns_the_record(
        id in valid_id(),
        secret in valid_secret(),
        tag in "[A-Za-z0-9]{1,16}",
    ) {
        let store = SessionStore::new(16, Duration::from_secs(300));
        let rec = record(id, secret, &tag);
        store.put(rec.clone()).unwrap();
        prop_assert_eq!(store.get(rec.id()), Some(rec));
    }

    #[test]
    fn prop_invalid_records_never_change_the_store(
        existing in proptest::collection::vec(valid_id(), 0..8),
        bad_id_len in prop_oneof![Just(0usize), 33usize..64],
    ) {
        let store = SessionStore::new(16, Duration::from_secs(300));
        for id in existing {
            store.put(record(id, vec![1], "SRV")).unwrap();
        }
        let before = store.ids();

        let err = store.put(record(vec![0xee; bad_id_len], vec![1], "SRV")).unwrap_err();
        prop_assert_eq!(err.code(), ErrorCode::InvalidRecord);
        let err = store.insert_new(record(vec![0xee; bad_id_len], vec![1], "SRV")).unwrap_err();
        prop_assert_eq!(err.code(), ErrorCode::InvalidRecord);
        prop_assert_eq!(store.ids(), before);
    }

    #[test]
    fn prop_capacity_keeps_the_newest(
        ids in proptest::collection::hash_set(valid_id(), 1..40),
        capacity in 1usize..10,
    ) {
        let store = SessionStore::new(capacity, Duration::from_secs(300));
        let ids: Vec<Vec<u8>> = ids.into_iter().collect();
        for id in &ids {
            store.put(record(id.clone(), vec![1], "SRV")).unwrap();
        }

        prop_assert!(store.len() <= capacity);
        prop_assert_eq!(store.len(), ids.len().min(capacity));
        let expected: Vec<SessionId> =
            ids[ids.len() - store.len()..].iter().cloned().map(SessionId::new).collect();
        prop_assert_eq!(store.ids(), expected);
    }

    #[test]
    fn prop_insert_new_never_overwrites_live_records(
        ids in proptest::collection::vec(valid_id(), 1..20),
    ) {
        let store = SessionStore::new(64, Duration::from_secs(300));
        let mut seen = HashSet::new();
        for id in ids {
            let fresh = seen.insert(id.clone());
            let result = store.insert_new(record(id.clone(), vec![seen.len() as u8 | 1], "SRV"));
            prop_assert_eq!(result.is_ok(), fresh);
        }
        prop_assert_eq!(store.len(), seen.len());
    }
}
