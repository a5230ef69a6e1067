//! TLS-PSK (RFC 4279) support for OpenSSL connections.
//!
//! OpenSSL negotiates PSK cipher suites through C callbacks that it invokes
//! from inside the handshake. Those callbacks are plain function pointers with
//! no room for per-connection context, so this crate bridges them to
//! caller-supplied key providers: each connection gets a process-unique
//! identifier stored in SSL ex-data, a shared registry maps identifiers to
//! providers, and a fixed pair of trampoline callbacks resolves the provider
//! for the firing connection and marshals its result into OpenSSL's
//! buffer/length contract.
//!
//! The easiest entry points are [`connect`] and [`accept`], which install the
//! PSK material for exactly the duration of a tokio-openssl handshake:
//!
//! ```no_run
//! use openssl::ssl::{Ssl, SslContext, SslMethod, SslVersion};
//! use openssl_psk::ClientPsk;
//! use tokio::net::TcpStream;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut builder = SslContext::builder(SslMethod::tls_client())?;
//! // Callback-based PSK is a TLS <= 1.2 mechanism.
//! builder.set_max_proto_version(Some(SslVersion::TLS1_2))?;
//! builder.set_cipher_list("PSK")?;
//! let ctx = builder.build();
//!
//! let stream = TcpStream::connect("127.0.0.1:4433").await?;
//! let psk = ClientPsk::Key(b"secret".to_vec());
//! let tls = openssl_psk::connect(Ssl::new(&ctx)?, stream, Some(psk)).await?;
//! # drop(tls);
//! # Ok(())
//! # }
//! ```
//!
//! Callers that drive the handshake themselves can use
//! [`install_client_psk`]/[`install_server_psk`] directly and hold on to the
//! returned [`Registration`] until the handshake is over.

mod errors;
mod handshake;
mod provider;
mod registry;
pub mod telemetry;
mod trampoline;

pub use errors::{HandshakeError, ProviderError, PskError};
pub use handshake::{accept, connect};
pub use provider::{ClientKeys, ClientPsk, ServerPsk};
pub use registry::{ConnectionId, Registration, active_registrations};
pub use trampoline::{install_client_psk, install_server_psk};
