use openssl::ssl::{SslContext, SslMethod, SslVersion};
use openssl_psk::telemetry;

/// A PSK-only cipher so every handshake in the tests must go through the PSK
/// callbacks. Callback-based PSK is a TLS <= 1.2 mechanism, so both sides
/// pin TLS 1.2.
pub const PSK_CIPHER: &str = "PSK-AES256-GCM-SHA384";

pub fn init() {
    telemetry::init_tracing();
}

#[allow(dead_code)]
pub fn psk_client_context() -> SslContext {
    let mut builder = SslContext::builder(SslMethod::tls_client()).unwrap();
    builder
        .set_max_proto_version(Some(SslVersion::TLS1_2))
        .unwrap();
    builder.set_cipher_list(PSK_CIPHER).unwrap();
    builder.build()
}

#[allow(dead_code)]
pub fn psk_server_context() -> SslContext {
    let mut builder = SslContext::builder(SslMethod::tls_server()).unwrap();
    builder
        .set_min_proto_version(Some(SslVersion::TLS1_2))
        .unwrap();
    builder
        .set_max_proto_version(Some(SslVersion::TLS1_2))
        .unwrap();
    builder.set_cipher_list(PSK_CIPHER).unwrap();
    builder.build()
}
