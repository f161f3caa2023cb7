#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

//! # Rustls Resumption Engine
//!
//! [`ClientEngine`] and [`ServerEngine`] over a tokio-rustls TLS 1.3 channel.
//!
//! Rustls does not expose TLS session ids, so the resumption decision is carried in-band
//! right after the channel is established:
//!
//! | Frame   | Layout                                                     |
//! |---------|------------------------------------------------------------|
//! | Offer   | `version (1)` `id_len (1)` `id` `binder (32, if id_len > 0)` |
//! | Verdict | `kind (1)` `id_len (1)` `id`                               |
//!
//! `kind` is `1` for resumed and `0` for a fresh session.
//!
//! ## Security Considerations
//!
//! - The binder is `HMAC-SHA256(cached_secret, exporter("EXPORTER-arc-resume binder"))`. The
//!   exporter value is unique to the connection, so a binder cannot be replayed and an id
//!   without its secret never resumes.
//! - Fresh secret material is exported from the connection by both sides and never sent.
//! - Binder comparison is constant time (`aws_lc_rs::hmac::verify`).

use aws_lc_rs::hmac;
use rustls::client::ClientConnectionData;
use rustls::pki_types::ServerName;
use rustls::server::ServerConnectionData;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::{TlsAcceptor, TlsConnector, client, server};
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::error::{ErrorCode, TlsError};
use crate::handshake::{ClientEngine, HandshakeResult, ServerEngine};
use crate::session::{MAX_SESSION_ID_LEN, SessionId, SessionRecord};

/// Version byte of the offer frame
pub const RESUME_PROTOCOL_VERSION: u8 = 1;

const BINDER_LABEL: &[u8] = b"EXPORTER-arc-resume binder";
const SECRET_LABEL: &[u8] = b"EXPORTER-arc-resume secret";
const BINDER_LEN: usize = 32;
const SECRET_LEN: usize = 32;

const VERDICT_FULL: u8 = 0;
const VERDICT_RESUMED: u8 = 1;

fn malformed(message: impl Into<String>, state: &str) -> TlsError {
    TlsError::handshake(message, state, ErrorCode::InvalidHandshakeMessage)
}

fn not_started(state: &str) -> TlsError {
    TlsError::handshake("TLS channel not established", state, ErrorCode::UnexpectedMessage)
}

fn export<D>(
    conn: &rustls::ConnectionCommon<D>,
    label: &[u8],
    len: usize,
) -> Result<Zeroizing<Vec<u8>>, TlsError> {
    let mut out = Zeroizing::new(vec![0u8; len]);
    conn.export_keying_material(out.as_mut_slice(), label, None)?;
    Ok(out)
}

fn binder_for(secret: &[u8], exporter: &[u8]) -> hmac::Tag {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hmac::sign(&key, exporter)
}

fn id_len_byte(id: &SessionId) -> Result<u8, TlsError> {
    u8::try_from(id.len())
        .ok()
        .filter(|len| usize::from(*len) <= MAX_SESSION_ID_LEN)
        .ok_or_else(|| TlsError::invalid_record(format!("session id is {} bytes", id.len())))
}

/// Client offer as read by the server
#[derive(Debug, Default, PartialEq, Eq)]
struct Offer {
    id: Option<SessionId>,
    binder: Option<[u8; BINDER_LEN]>,
}

fn encode_offer(offered: Option<(&SessionId, &[u8])>) -> Result<Vec<u8>, TlsError> {
    let mut frame = vec![RESUME_PROTOCOL_VERSION];
    match offered {
        Some((id, binder)) => {
            frame.push(id_len_byte(id)?);
            frame.extend_from_slice(id.as_bytes());
            frame.extend_from_slice(binder);
        }
        None => frame.push(0),
    }
    Ok(frame)
}

async fn read_id<S: AsyncRead + Unpin>(stream: &mut S, state: &str) -> Result<SessionId, TlsError> {
    let len = usize::from(stream.read_u8().await?);
    if len > MAX_SESSION_ID_LEN {
        return Err(malformed(format!("session id length {} exceeds {}", len, MAX_SESSION_ID_LEN), state));
    }
    let mut id = vec![0u8; len];
    stream.read_exact(&mut id).await?;
    Ok(SessionId::new(id))
}

async fn read_offer<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Offer, TlsError> {
    let version = stream.read_u8().await?;
    if version != RESUME_PROTOCOL_VERSION {
        return Err(malformed(
            format!("unsupported resumption protocol version {}", version),
            "OfferingOrAwaiting",
        ));
    }
    let id = read_id(stream, "OfferingOrAwaiting").await?;
    if id.is_empty() {
        return Ok(Offer::default());
    }
    let mut binder = [0u8; BINDER_LEN];
    stream.read_exact(&mut binder).await?;
    Ok(Offer { id: Some(id), binder: Some(binder) })
}

fn encode_verdict(kind: u8, id: &SessionId) -> Result<Vec<u8>, TlsError> {
    let mut frame = vec![kind, id_len_byte(id)?];
    frame.extend_from_slice(id.as_bytes());
    Ok(frame)
}

async fn read_verdict<S: AsyncRead + Unpin>(stream: &mut S) -> Result<(u8, SessionId), TlsError> {
    let kind = stream.read_u8().await?;
    if kind != VERDICT_FULL && kind != VERDICT_RESUMED {
        return Err(malformed(format!("unknown verdict {}", kind), "Deciding"));
    }
    let id = read_id(stream, "Deciding").await?;
    if id.is_empty() {
        return Err(malformed("server verdict carries no session id", "Deciding"));
    }
    Ok((kind, id))
}

async fn send<S: AsyncWrite + Unpin>(stream: &mut S, frame: &[u8]) -> Result<(), TlsError> {
    stream.write_all(frame).await?;
    stream.flush().await?;
    Ok(())
}

/// Client half of the rustls engine, usable for one handshake
pub struct RustlsClientEngine<IO> {
    connector: TlsConnector,
    server_name: ServerName<'static>,
    io: Option<IO>,
    stream: Option<client::TlsStream<IO>>,
}

impl<IO> std::fmt::Debug for RustlsClientEngine<IO> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustlsClientEngine")
            .field("server_name", &self.server_name)
            .field("established", &self.stream.is_some())
            .finish_non_exhaustive()
    }
}

impl<IO> RustlsClientEngine<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Engine that will run TLS over `io` to `server_name`
    #[must_use]
    pub fn new(connector: TlsConnector, server_name: ServerName<'static>, io: IO) -> Self {
        Self { connector, server_name, io: Some(io), stream: None }
    }

    /// Send close_notify and shut the transport down; errors are only logged
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take()
            && let Err(e) = stream.shutdown().await
        {
            debug!(error = %e, "Client shutdown did not complete cleanly");
        }
    }
}

impl<IO> ClientEngine for RustlsClientEngine<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn begin_handshake(
        &mut self,
        offer: Option<&SessionRecord>,
    ) -> Result<HandshakeResult, TlsError> {
        let io = self.io.take().ok_or_else(|| not_started("Start"))?;
        let mut stream = self.connector.connect(self.server_name.clone(), io).await?;
        trace!("TLS channel established");

        let frame = match offer {
            Some(record) => {
                let exporter = export::<ClientConnectionData>(
                    stream.get_ref().1,
                    BINDER_LABEL,
                    BINDER_LEN,
                )?;
                let binder = binder_for(record.secret_material(), &exporter);
                encode_offer(Some((record.id(), binder.as_ref())))?
            }
            None => encode_offer(None)?,
        };
        send(&mut stream, &frame).await?;

        let (kind, session_id) = read_verdict(&mut stream).await?;
        let result = match (kind, offer) {
            (VERDICT_RESUMED, Some(record)) => HandshakeResult {
                resumed: true,
                session_id,
                secret_material: Zeroizing::new(record.secret_material().to_vec()),
            },
            (VERDICT_RESUMED, None) => {
                return Err(TlsError::handshake(
                    "server resumed a session that was never offered",
                    "Deciding",
                    ErrorCode::UnexpectedMessage,
                ));
            }
            _ => HandshakeResult {
                resumed: false,
                session_id,
                secret_material: export::<ClientConnectionData>(
                    stream.get_ref().1,
                    SECRET_LABEL,
                    SECRET_LEN,
                )?,
            },
        };

        self.stream = Some(stream);
        Ok(result)
    }
}

/// Server half of the rustls engine, usable for one handshake
pub struct RustlsServerEngine<IO> {
    acceptor: TlsAcceptor,
    io: Option<IO>,
    stream: Option<server::TlsStream<IO>>,
    binder: Option<[u8; BINDER_LEN]>,
}

impl<IO> std::fmt::Debug for RustlsServerEngine<IO> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustlsServerEngine")
            .field("established", &self.stream.is_some())
            .finish_non_exhaustive()
    }
}

impl<IO> RustlsServerEngine<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Engine that will accept TLS on `io`
    #[must_use]
    pub fn new(acceptor: TlsAcceptor, io: IO) -> Self {
        Self { acceptor, io: Some(io), stream: None, binder: None }
    }

    /// Send close_notify and shut the transport down; errors are only logged
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take()
            && let Err(e) = stream.shutdown().await
        {
            debug!(error = %e, "Server shutdown did not complete cleanly");
        }
    }

    fn stream(&mut self, state: &str) -> Result<&mut server::TlsStream<IO>, TlsError> {
        self.stream.as_mut().ok_or_else(|| not_started(state))
    }
}

impl<IO> ServerEngine for RustlsServerEngine<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn receive_offer(&mut self) -> Result<Option<SessionId>, TlsError> {
        let io = self.io.take().ok_or_else(|| not_started("OfferingOrAwaiting"))?;
        let stream = self.stream.insert(self.acceptor.accept(io).await?);
        trace!("TLS channel accepted");

        let offer = read_offer(stream).await?;
        self.binder = offer.binder;
        Ok(offer.id)
    }

    async fn resume(&mut self, record: &SessionRecord) -> Result<bool, TlsError> {
        let Some(binder) = self.binder.take() else {
            return Ok(false);
        };
        let stream = self.stream("Deciding")?;
        let exporter = export::<ServerConnectionData>(stream.get_ref().1, BINDER_LABEL, BINDER_LEN)?;
        let verified = {
            let key = hmac::Key::new(hmac::HMAC_SHA256, record.secret_material());
            hmac::verify(&key, &exporter, &binder).is_ok()
        };
        if !verified {
            debug!(session_id = %record.id(), "Resumption binder mismatch");
            return Ok(false);
        }

        send(stream, &encode_verdict(VERDICT_RESUMED, record.id())?).await?;
        Ok(true)
    }

    async fn negotiate(&mut self) -> Result<Zeroizing<Vec<u8>>, TlsError> {
        let stream = self.stream("FullNegotiation")?;
        export::<ServerConnectionData>(stream.get_ref().1, SECRET_LABEL, SECRET_LEN)
    }

    async fn issue(&mut self, id: &SessionId) -> Result<(), TlsError> {
        let frame = encode_verdict(VERDICT_FULL, id)?;
        send(self.stream("FullNegotiation")?, &frame).await
    }
}
