use std::sync::OnceLock;
use tracing_subscriber::{
    EnvFilter,
    fmt,
    layer::SubscriberExt as _,
    util::SubscriberInitExt as _,
};

static INIT: OnceLock<()> = OnceLock::new();

/// Installs a global tracing subscriber honoring `RUST_LOG`.
///
/// Callers embedding this crate normally bring their own subscriber; this is
/// for binaries and tests that want handshake logs without wiring one up.
pub fn init_tracing() {
    let _ = INIT.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::registry()
            .with(fmt::layer())
            .with(env_filter)
            .try_init();
    });
}
