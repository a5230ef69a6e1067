use openssl::error::ErrorStack;
use thiserror::Error;

use crate::registry::ConnectionId;

/// Error returned by a caller-supplied key provider.
///
/// Providers may fail with anything; the bridge captures the error at the
/// native callback boundary and replays it through [`HandshakeError`].
pub type ProviderError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the bridge API itself.
#[derive(Error, Debug)]
pub enum PskError {
    /// A provider is already registered for this connection identifier.
    ///
    /// This indicates a bug in the caller (or an allocator collision, which
    /// a 64-bit counter rules out in practice); the existing entry is never
    /// overwritten.
    #[error("connection {0} already has a registered PSK provider")]
    DuplicateRegistration(ConnectionId),

    /// The server identity hint contains a NUL byte and cannot be passed to
    /// OpenSSL as a C string.
    #[error("PSK identity hint contains a NUL byte")]
    InvalidHint(#[from] std::ffi::NulError),

    #[error(transparent)]
    OpenSsl(#[from] ErrorStack),
}

/// Errors surfaced by [`connect`](crate::connect) and
/// [`accept`](crate::accept).
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// PSK installation failed before the handshake started.
    #[error(transparent)]
    Bridge(#[from] PskError),

    /// The native handshake failed.
    #[error("TLS handshake failed")]
    Handshake(#[source] openssl::ssl::Error),

    /// The native handshake failed after the PSK provider for this
    /// connection reported an error. Provider errors cannot cross the C
    /// callback boundary, so the trampoline converts them into the "no key"
    /// sentinel and the original error is attached here.
    #[error("TLS handshake failed after PSK provider error ({handshake})")]
    Provider {
        handshake: openssl::ssl::Error,
        #[source]
        source: ProviderError,
    },
}
