#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

//! Session identity and negotiated session state
//!
//! A [`SessionRecord`] is created exactly once, at the end of a successful full
//! handshake, and is never mutated afterwards. Resumed connections reference the
//! same record by its [`SessionId`].
//!
//! ## Security Considerations
//!
//! - Secret material is held in [`Zeroizing`] storage and wiped on drop
//! - `Debug` output redacts the secret
//! - Session ids are drawn from the OS CSPRNG

use std::fmt;

use chrono::{DateTime, Utc};
use rand::RngCore;
use zeroize::Zeroizing;

/// Maximum session id length in bytes (TLS `legacy_session_id` bound)
pub const MAX_SESSION_ID_LEN: usize = 32;

/// Length of ids produced by [`RandomIdGenerator`]
pub const GENERATED_SESSION_ID_LEN: usize = 32;

/// Opaque session identifier
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Vec<u8>);

impl SessionId {
    /// Wrap raw id bytes. Length is checked when the id enters a store.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw id bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Id length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for a zero-length id
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if the id is between 1 and [`MAX_SESSION_ID_LEN`] bytes long
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && self.0.len() <= MAX_SESSION_ID_LEN
    }

    /// Fixed-width uppercase hexadecimal rendering, two digits per byte
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.to_hex())
    }
}

impl From<Vec<u8>> for SessionId {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for SessionId {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// Identifier binding a session to the server context that issued it
///
/// Plays the role of a TLS session id context: a server only resumes records
/// whose tag equals its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextTag(String);

impl ContextTag {
    /// Create a context tag
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Tag as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextTag {
    fn from(tag: &str) -> Self {
        Self(tag.to_owned())
    }
}

/// Immutable snapshot of one negotiated session
#[derive(Clone, PartialEq, Eq)]
pub struct SessionRecord {
    id: SessionId,
    secret_material: Zeroizing<Vec<u8>>,
    negotiated_at: DateTime<Utc>,
    context_tag: ContextTag,
}

impl SessionRecord {
    /// Record negotiated now
    #[must_use]
    pub fn new(id: SessionId, secret_material: Zeroizing<Vec<u8>>, context_tag: ContextTag) -> Self {
        Self::negotiated_at(id, secret_material, context_tag, Utc::now())
    }

    /// Record with an explicit creation time
    #[must_use]
    pub fn negotiated_at(
        id: SessionId,
        secret_material: Zeroizing<Vec<u8>>,
        context_tag: ContextTag,
        negotiated_at: DateTime<Utc>,
    ) -> Self {
        Self { id, secret_material, negotiated_at, context_tag }
    }

    /// Session id
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Resumption secret. Must not leave the engine boundary.
    #[must_use]
    pub fn secret_material(&self) -> &[u8] {
        &self.secret_material
    }

    /// Creation time
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.negotiated_at
    }

    /// Issuing server context
    #[must_use]
    pub fn context_tag(&self) -> &ContextTag {
        &self.context_tag
    }

    /// Age of the record at `now`; zero if `now` precedes creation
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.negotiated_at).to_std().unwrap_or_default()
    }

    /// Structural validity: 1–32 byte id and non-empty secret
    pub(crate) fn validate(&self) -> Result<(), crate::TlsError> {
        if self.id.is_empty() {
            return Err(crate::TlsError::invalid_record("session id is empty"));
        }
        if self.id.len() > MAX_SESSION_ID_LEN {
            return Err(crate::TlsError::invalid_record(format!(
                "session id is {} bytes, maximum is {}",
                self.id.len(),
                MAX_SESSION_ID_LEN
            )));
        }
        if self.secret_material.is_empty() {
            return Err(crate::TlsError::invalid_record("secret material is empty"));
        }
        Ok(())
    }
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("id", &self.id)
            .field("secret_material", &"<redacted>")
            .field("negotiated_at", &self.negotiated_at)
            .field("context_tag", &self.context_tag)
            .finish()
    }
}

/// Source of fresh session ids for the full-handshake path
pub trait SessionIdGenerator: Send + Sync {
    /// Produce a candidate id. Uniqueness is enforced by the store, not the generator.
    fn generate(&self) -> SessionId;
}

/// 32-byte ids from the operating system CSPRNG
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl SessionIdGenerator for RandomIdGenerator {
    fn generate(&self) -> SessionId {
        let mut bytes = vec![0u8; GENERATED_SESSION_ID_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        SessionId(bytes)
    }
}
