//! Handshake entry points that scope a PSK registration to the handshake.
//!
//! The registration guard is created right before the native handshake is
//! delegated to and dropped right after it returns, success or failure. That
//! keeps the registry bounded by the number of in-flight handshakes and
//! guarantees a trampoline firing late (renegotiation, teardown races) sees
//! "no key" instead of a stale provider.

use std::pin::Pin;

use openssl::ssl::Ssl;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_openssl::SslStream;
use tracing::debug;

use crate::errors::{HandshakeError, PskError};
use crate::provider::{ClientPsk, ServerPsk};
use crate::registry::Registration;
use crate::trampoline;

/// Runs a client handshake on `stream`, installing `psk` for its duration.
///
/// With `None` this is a plain tokio-openssl connect; PSK participation
/// never alters behavior for connections that do not opt in.
pub async fn connect<S>(
    mut ssl: Ssl,
    stream: S,
    psk: Option<ClientPsk>,
) -> Result<SslStream<S>, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let registration = psk
        .map(|psk| trampoline::install_client_psk(&mut ssl, psk))
        .transpose()?;
    let mut stream = SslStream::new(ssl, stream).map_err(PskError::from)?;
    match Pin::new(&mut stream).connect().await {
        Ok(()) => {
            if let Some(registration) = &registration {
                debug!(connection = %registration.id(), "client PSK handshake complete");
            }
            Ok(stream)
        }
        Err(error) => Err(handshake_failure(registration, error)),
    }
}

/// Runs a server handshake on `stream`, installing `psk` and the identity
/// `hint` for its duration.
///
/// With `psk` set to `None` this is a plain tokio-openssl accept; `hint` is
/// ignored in that case since there is no PSK negotiation to hint at.
pub async fn accept<S>(
    mut ssl: Ssl,
    stream: S,
    psk: Option<ServerPsk>,
    hint: Option<Vec<u8>>,
) -> Result<SslStream<S>, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let registration = psk
        .map(|psk| trampoline::install_server_psk(&mut ssl, psk, hint.as_deref()))
        .transpose()?;
    let mut stream = SslStream::new(ssl, stream).map_err(PskError::from)?;
    match Pin::new(&mut stream).accept().await {
        Ok(()) => {
            if let Some(registration) = &registration {
                debug!(connection = %registration.id(), "server PSK handshake complete");
            }
            Ok(stream)
        }
        Err(error) => Err(handshake_failure(registration, error)),
    }
}

/// Attaches the provider error captured at the trampoline, when one explains
/// the native failure.
fn handshake_failure(
    registration: Option<Registration>,
    error: openssl::ssl::Error,
) -> HandshakeError {
    match registration.as_ref().and_then(Registration::take_failure) {
        Some(source) => HandshakeError::Provider {
            handshake: error,
            source,
        },
        None => HandshakeError::Handshake(error),
    }
}
