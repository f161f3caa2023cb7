#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

//! Session cache for TLS session resumption
//!
//! An in-process map from [`SessionId`] to [`SessionRecord`], bounded in both size
//! and age. Servers keep one record per completed full handshake; clients keep one
//! record per server context to offer on the next connection.
//!
//! ## Eviction Policy
//!
//! - Records older than the session lifetime are never returned and are dropped
//!   on access or by [`SessionStore::evict_expired`]
//! - When an insert would exceed capacity, expired records are dropped first,
//!   then the oldest insertion (FIFO). Replacing a record moves it to the back.
//!
//! ## Concurrency
//!
//! Every operation takes the single internal lock for its whole duration, so
//! [`SessionStore::insert_new`] is an atomic check-and-insert. No operation blocks
//! on I/O.
//!
//! ## Security Considerations
//!
//! - Secret material is zeroized when a record is evicted or the store is dropped
//! - Nothing is persisted; a restart starts from an empty cache

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::session::{ContextTag, SessionId, SessionRecord};
use crate::{SessionCacheConfig, TlsError};

/// Bounded, expiring session cache
#[derive(Debug)]
pub struct SessionStore {
    /// Maximum number of sessions to cache
    max_sessions: usize,
    /// Maximum age of a cached session
    session_lifetime: Duration,
    inner: Mutex<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    records: HashMap<SessionId, SessionRecord>,
    /// Insertion order, oldest first
    order: VecDeque<SessionId>,
}

impl StoreInner {
    fn remove(&mut self, id: &SessionId) -> Option<SessionRecord> {
        let removed = self.records.remove(id)?;
        self.order.retain(|queued| queued != id);
        Some(removed)
    }

    fn insert(&mut self, record: SessionRecord) {
        let id = record.id().clone();
        if self.records.insert(id.clone(), record).is_some() {
            self.order.retain(|queued| queued != &id);
        }
        self.order.push_back(id);
    }

    fn evict_expired(&mut self, now: DateTime<Utc>, lifetime: Duration) -> usize {
        let expired: Vec<SessionId> = self
            .records
            .values()
            .filter(|record| is_expired(record, now, lifetime))
            .map(|record| record.id().clone())
            .collect();
        for id in &expired {
            self.remove(id);
        }
        expired.len()
    }

    /// Make room for one more record
    fn make_room(&mut self, now: DateTime<Utc>, max_sessions: usize, lifetime: Duration) {
        if self.records.len() < max_sessions {
            return;
        }
        let expired = self.evict_expired(now, lifetime);
        if expired > 0 {
            trace!(expired, "Evicted expired sessions to make room");
        }
        while self.records.len() >= max_sessions {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.records.remove(&oldest);
            debug!(session_id = %oldest, "Evicted oldest session (capacity reached)");
        }
    }
}

fn is_expired(record: &SessionRecord, now: DateTime<Utc>, lifetime: Duration) -> bool {
    record.age_at(now) > lifetime
}

impl SessionStore {
    /// Create a store with the given capacity and session lifetime
    ///
    /// A capacity of zero is raised to one; use [`SessionCacheConfig::validate`]
    /// to reject it up front.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use arc_resume::session_store::SessionStore;
    ///
    /// let store = SessionStore::new(100, Duration::from_secs(300));
    /// assert_eq!(store.capacity(), 100);
    /// assert!(store.is_empty());
    /// ```
    #[must_use]
    pub fn new(max_sessions: usize, session_lifetime: Duration) -> Self {
        Self {
            max_sessions: max_sessions.max(1),
            session_lifetime,
            inner: Mutex::new(StoreInner::default()),
        }
    }

    /// Create a store from cache configuration
    #[must_use]
    pub fn from_config(config: &SessionCacheConfig) -> Self {
        Self::new(config.max_sessions, config.session_lifetime)
    }

    /// Maximum number of sessions this store can hold
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_sessions
    }

    /// Maximum age of a cached session
    #[must_use]
    pub fn session_lifetime(&self) -> Duration {
        self.session_lifetime
    }

    /// Insert or replace the record under its id
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::InvalidRecord`] if the id is empty or longer than 32
    /// bytes, or the secret material is empty. The store is left unchanged.
    pub fn put(&self, record: SessionRecord) -> Result<(), TlsError> {
        self.put_at(record, Utc::now())
    }

    /// [`SessionStore::put`] with an explicit clock
    ///
    /// # Errors
    ///
    /// See [`SessionStore::put`].
    pub fn put_at(&self, record: SessionRecord, now: DateTime<Utc>) -> Result<(), TlsError> {
        record.validate()?;
        let mut inner = self.inner.lock();
        if !inner.records.contains_key(record.id()) {
            inner.make_room(now, self.max_sessions, self.session_lifetime);
        }
        trace!(session_id = %record.id(), "Storing session");
        inner.insert(record);
        Ok(())
    }

    /// Insert a record whose id must not already be present
    ///
    /// The presence check and the insert happen under one lock acquisition, so two
    /// concurrent allocations can never both claim the same id.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::IdCollision`] if the id is already cached (expired
    /// entries do not count), or [`TlsError::InvalidRecord`] as for
    /// [`SessionStore::put`].
    pub fn insert_new(&self, record: SessionRecord) -> Result<(), TlsError> {
        self.insert_new_at(record, Utc::now())
    }

    /// [`SessionStore::insert_new`] with an explicit clock
    ///
    /// # Errors
    ///
    /// See [`SessionStore::insert_new`].
    pub fn insert_new_at(&self, record: SessionRecord, now: DateTime<Utc>) -> Result<(), TlsError> {
        record.validate()?;
        let mut inner = self.inner.lock();
        let live = inner
            .records
            .get(record.id())
            .map(|existing| !is_expired(existing, now, self.session_lifetime));
        match live {
            Some(true) => return Err(TlsError::id_collision(1)),
            Some(false) => {
                inner.remove(record.id());
            }
            None => {}
        }
        inner.make_room(now, self.max_sessions, self.session_lifetime);
        inner.insert(record);
        Ok(())
    }

    /// Look up an unexpired record
    ///
    /// Absence is normal and not an error. An expired record found here is dropped.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<SessionRecord> {
        self.get_at(id, Utc::now())
    }

    /// [`SessionStore::get`] with an explicit clock
    #[must_use]
    pub fn get_at(&self, id: &SessionId, now: DateTime<Utc>) -> Option<SessionRecord> {
        let mut inner = self.inner.lock();
        let expired = is_expired(inner.records.get(id)?, now, self.session_lifetime);
        if expired {
            inner.remove(id);
            debug!(session_id = %id, "Dropped expired session on lookup");
            return None;
        }
        inner.records.get(id).cloned()
    }

    /// Remove a record; no-op if absent
    pub fn invalidate(&self, id: &SessionId) {
        if self.inner.lock().remove(id).is_some() {
            debug!(session_id = %id, "Invalidated session");
        }
    }

    /// Remove every record older than the session lifetime
    ///
    /// Returns the number of records removed.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let removed = self.inner.lock().evict_expired(now, self.session_lifetime);
        if removed > 0 {
            debug!(removed, "Evicted expired sessions");
        }
        removed
    }

    /// Save a record as the one to offer next time for its server context
    ///
    /// Any other record carrying the same context tag is dropped first, so the store
    /// holds at most one record per context and the last successful handshake wins.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::InvalidRecord`] as for [`SessionStore::put`]; the store
    /// is left unchanged.
    pub fn replace_for_context(&self, record: SessionRecord) -> Result<(), TlsError> {
        self.replace_for_context_at(record, Utc::now())
    }

    /// [`SessionStore::replace_for_context`] with an explicit clock
    ///
    /// # Errors
    ///
    /// See [`SessionStore::replace_for_context`].
    pub fn replace_for_context_at(
        &self,
        record: SessionRecord,
        now: DateTime<Utc>,
    ) -> Result<(), TlsError> {
        record.validate()?;
        let mut inner = self.inner.lock();
        let previous: Vec<SessionId> = inner
            .records
            .values()
            .filter(|existing| existing.context_tag() == record.context_tag())
            .map(|existing| existing.id().clone())
            .collect();
        for id in &previous {
            inner.remove(id);
        }
        inner.make_room(now, self.max_sessions, self.session_lifetime);
        inner.insert(record);
        Ok(())
    }

    /// Newest unexpired record issued by the given server context
    #[must_use]
    pub fn latest_for_context(&self, tag: &ContextTag) -> Option<SessionRecord> {
        self.latest_for_context_at(tag, Utc::now())
    }

    /// [`SessionStore::latest_for_context`] with an explicit clock
    #[must_use]
    pub fn latest_for_context_at(
        &self,
        tag: &ContextTag,
        now: DateTime<Utc>,
    ) -> Option<SessionRecord> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.records.get(id))
            .find(|record| {
                record.context_tag() == tag && !is_expired(record, now, self.session_lifetime)
            })
            .cloned()
    }

    /// True if a record (expired or not) is held under `id`
    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.inner.lock().records.contains_key(id)
    }

    /// Number of records held, including any not yet evicted after expiry
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// True if the store holds no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    /// Ids in insertion order, oldest first
    #[must_use]
    pub fn ids(&self) -> Vec<SessionId> {
        self.inner.lock().order.iter().cloned().collect()
    }

    /// Drop every record
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.records.clear();
        inner.order.clear();
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::from_config(&SessionCacheConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use zeroize::Zeroizing;

    fn record_at(id: u8, tag: &str, at: DateTime<Utc>) -> SessionRecord {
        SessionRecord::negotiated_at(
            SessionId::new(vec![id; 4]),
            Zeroizing::new(vec![id; 32]),
            ContextTag::new(tag),
            at,
        )
    }

    fn record(id: u8) -> SessionRecord {
        record_at(id, "SRV", Utc::now())
    }

    #[test]
    fn test_put_then_get_round_trip() {
        let store = SessionStore::new(8, Duration::from_secs(300));
        let rec = record(1);
        store.put(rec.clone()).unwrap();
        assert_eq!(store.get(rec.id()), Some(rec));
    }

    #[test]
    fn test_put_replaces_existing_id() {
        let store = SessionStore::new(8, Duration::from_secs(300));
        store.put(record_at(1, "A", Utc::now())).unwrap();
        store.put(record_at(1, "B", Utc::now())).unwrap();
        assert_eq!(store.len(), 1);
        let got = store.get(&SessionId::new(vec![1; 4])).unwrap();
        assert_eq!(got.context_tag().as_str(), "B");
    }

    #[test]
    fn test_invalid_record_leaves_store_unchanged() {
        let store = SessionStore::new(8, Duration::from_secs(300));
        store.put(record(1)).unwrap();
        let before = store.ids();

        let empty_id =
            SessionRecord::new(SessionId::new(Vec::new()), Zeroizing::new(vec![1]), "SRV".into());
        let empty_secret =
            SessionRecord::new(SessionId::new(vec![9]), Zeroizing::new(Vec::new()), "SRV".into());

        for bad in [empty_id, empty_secret] {
            let err = store.put(bad).unwrap_err();
            assert_eq!(err.code(), crate::ErrorCode::InvalidRecord);
        }
        assert_eq!(store.ids(), before);
    }

    #[test]
    fn test_get_missing_is_none() {
        let store = SessionStore::new(8, Duration::from_secs(300));
        assert!(store.get(&SessionId::new(vec![42])).is_none());
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        let store = SessionStore::new(8, Duration::from_secs(300));
        let rec = record(1);
        store.put(rec.clone()).unwrap();
        store.invalidate(rec.id());
        store.invalidate(rec.id());
        assert!(store.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let store = SessionStore::new(3, Duration::from_secs(300));
        for id in 1..=4 {
            store.put(record(id)).unwrap();
        }
        assert_eq!(store.len(), 3);
        assert!(store.get(&SessionId::new(vec![1; 4])).is_none());
        assert!(store.get(&SessionId::new(vec![4; 4])).is_some());
    }

    #[test]
    fn test_replacing_refreshes_eviction_position() {
        let store = SessionStore::new(2, Duration::from_secs(300));
        store.put(record(1)).unwrap();
        store.put(record(2)).unwrap();
        store.put(record(1)).unwrap();
        store.put(record(3)).unwrap();
        assert!(store.contains(&SessionId::new(vec![1; 4])));
        assert!(!store.contains(&SessionId::new(vec![2; 4])));
    }

    #[test]
    fn test_expired_records_are_not_returned() {
        let store = SessionStore::new(8, Duration::from_secs(60));
        let created = Utc::now();
        let rec = record_at(1, "SRV", created);
        store.put_at(rec.clone(), created).unwrap();

        assert!(store.get_at(rec.id(), created + chrono::Duration::seconds(30)).is_some());
        assert!(store.get_at(rec.id(), created + chrono::Duration::seconds(61)).is_none());
        assert!(!store.contains(rec.id()));
    }

    #[test]
    fn test_evict_expired_counts_removed() {
        let store = SessionStore::new(8, Duration::from_secs(60));
        let old = Utc::now() - chrono::Duration::seconds(120);
        store.put_at(record_at(1, "SRV", old), old).unwrap();
        store.put(record(2)).unwrap();

        assert_eq!(store.evict_expired(Utc::now()), 1);
        assert_eq!(store.ids(), vec![SessionId::new(vec![2; 4])]);
    }

    #[test]
    fn test_expired_records_evicted_before_oldest_live() {
        let store = SessionStore::new(2, Duration::from_secs(60));
        let now = Utc::now();
        store.put_at(record(1), now).unwrap();
        let stale = now - chrono::Duration::seconds(600);
        store.put_at(record_at(2, "SRV", stale), now).unwrap();

        store.put_at(record(3), now).unwrap();
        assert!(store.contains(&SessionId::new(vec![1; 4])));
        assert!(!store.contains(&SessionId::new(vec![2; 4])));
    }

    #[test]
    fn test_insert_new_rejects_live_duplicate() {
        let store = SessionStore::new(8, Duration::from_secs(300));
        store.insert_new(record(1)).unwrap();
        let err = store.insert_new(record(1)).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::IdCollision);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_insert_new_reuses_expired_slot() {
        let store = SessionStore::new(8, Duration::from_secs(60));
        let old = Utc::now() - chrono::Duration::seconds(120);
        store.put_at(record_at(1, "SRV", old), old).unwrap();
        assert!(store.insert_new(record(1)).is_ok());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_replace_for_context_keeps_one_per_context() {
        let store = SessionStore::new(8, Duration::from_secs(300));
        store.replace_for_context(record_at(1, "server-a:4433", Utc::now())).unwrap();
        store.replace_for_context(record_at(2, "server-b:4433", Utc::now())).unwrap();
        store.replace_for_context(record_at(3, "server-a:4433", Utc::now())).unwrap();

        assert_eq!(store.len(), 2);
        let latest = store.latest_for_context(&ContextTag::new("server-a:4433")).unwrap();
        assert_eq!(latest.id(), &SessionId::new(vec![3; 4]));
        assert!(!store.contains(&SessionId::new(vec![1; 4])));
    }

    #[test]
    fn test_latest_for_context_skips_expired() {
        let store = SessionStore::new(8, Duration::from_secs(60));
        let old = Utc::now() - chrono::Duration::seconds(120);
        store.put_at(record_at(1, "SRV", old), old).unwrap();
        assert!(store.latest_for_context(&ContextTag::new("SRV")).is_none());
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let store = SessionStore::new(0, Duration::from_secs(60));
        assert_eq!(store.capacity(), 1);
        store.put(record(1)).unwrap();
        store.put(record(2)).unwrap();
        assert_eq!(store.ids(), vec![SessionId::new(vec![2; 4])]);
    }

    #[test]
    fn test_concurrent_insert_new_never_double_allocates() {
        use std::sync::Arc;

        let store = Arc::new(SessionStore::new(64, Duration::from_secs(300)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.insert_new(record(7)).is_ok())
            })
            .collect();
        let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|won| *won).count();
        assert_eq!(winners, 1);
        assert_eq!(store.len(), 1);
    }
}
