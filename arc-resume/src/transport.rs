#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

//! TCP transport for the roles

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::error::TlsError;

/// Open a TCP connection, bounded by `timeout`
///
/// # Errors
///
/// Returns [`TlsError::Io`] with `ConnectionTimeout` if the timeout expires, or the
/// underlying connect error otherwise.
pub async fn connect(addr: &str, timeout: Duration) -> Result<TcpStream, TlsError> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(connected) => connected?,
        Err(_elapsed) => {
            return Err(TlsError::from(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {} timed out after {:?}", addr, timeout),
            ))
            .with_peer(addr));
        }
    };
    stream.set_nodelay(true)?;
    debug!(addr, "TCP connection established");
    Ok(stream)
}

/// Bind a listener
///
/// # Errors
///
/// Returns [`TlsError::Io`] if the address cannot be bound.
pub async fn listen(addr: &str) -> Result<TcpListener, TlsError> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Listening");
    Ok(listener)
}

/// Accept the next connection
///
/// # Errors
///
/// Returns [`TlsError::Io`] if the accept fails.
pub async fn accept(listener: &TcpListener) -> Result<(TcpStream, SocketAddr), TlsError> {
    let (stream, peer) = listener.accept().await?;
    stream.set_nodelay(true)?;
    debug!(%peer, "Accepted connection");
    Ok((stream, peer))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn test_connect_and_accept() {
        let listener = listen("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (client, accepted) =
            tokio::join!(connect(&addr, Duration::from_secs(5)), accept(&listener));
        let client = client.unwrap();
        let (_server, peer) = accepted.unwrap();
        assert_eq!(client.local_addr().unwrap(), peer);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = listen("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = connect(&addr, Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConnectionRefused);
        assert!(!err.is_fatal());
    }
}
