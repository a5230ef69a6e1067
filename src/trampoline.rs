//! The two fixed callbacks handed to libssl, and their installation.
//!
//! OpenSSL's PSK callback registration accepts one static function pointer;
//! per-connection context has to travel out of band. The installers below
//! stash a [`ConnectionId`] in the connection's ex-data and register the
//! caller's provider under it, and the trampolines recover the identifier
//! when libssl calls back from inside the handshake. All marshaling between
//! provider results and the native buffer/length contract happens here and
//! nowhere else.

use std::ffi::{CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::OnceLock;

use foreign_types::ForeignTypeRef;
use libc::{c_char, c_int, c_uchar, c_uint};
use openssl::error::ErrorStack;
use openssl::ex_data::Index;
use openssl::ssl::{Ssl, SslRef};
use openssl_sys as ffi;
use tracing::{debug, trace, warn};

use crate::errors::PskError;
use crate::provider::{ClientPsk, Provider, ServerPsk};
use crate::registry::{self, ConnectionId, Registration};

type ClientPskCallback =
    extern "C" fn(*mut ffi::SSL, *const c_char, *mut c_char, c_uint, *mut c_uchar, c_uint) -> c_uint;
type ServerPskCallback = extern "C" fn(*mut ffi::SSL, *const c_char, *mut c_uchar, c_uint) -> c_uint;

// Per-connection PSK setters. libssl has carried these since 1.0.0, but
// rust-openssl only wraps the context-level variants.
unsafe extern "C" {
    fn SSL_set_psk_client_callback(ssl: *mut ffi::SSL, callback: Option<ClientPskCallback>);
    fn SSL_set_psk_server_callback(ssl: *mut ffi::SSL, callback: Option<ServerPskCallback>);
    fn SSL_use_psk_identity_hint(ssl: *mut ffi::SSL, hint: *const c_char) -> c_int;
}

/// Ex-data slot carrying the connection identifier, allocated once per
/// process.
fn connection_id_index() -> Result<Index<Ssl, ConnectionId>, ErrorStack> {
    static INDEX: OnceLock<Index<Ssl, ConnectionId>> = OnceLock::new();
    match INDEX.get() {
        Some(index) => Ok(*index),
        None => {
            let index = Ssl::new_ex_index()?;
            Ok(*INDEX.get_or_init(|| index))
        }
    }
}

fn connection_id(ssl: &SslRef) -> Option<ConnectionId> {
    let index = connection_id_index().ok()?;
    ssl.ex_data(index).copied()
}

/// Installs the client-side PSK trampoline on `ssl` and registers the
/// normalized provider for this connection.
///
/// The returned guard must outlive the handshake; dropping it removes the
/// registration, after which the trampoline reports "no key" for this
/// connection.
pub fn install_client_psk(ssl: &mut SslRef, psk: ClientPsk) -> Result<Registration, PskError> {
    let id = ConnectionId::allocate();
    let registration = registry::global().register(id, psk.into_provider())?;
    ssl.set_ex_data(connection_id_index()?, id);
    unsafe {
        SSL_set_psk_client_callback(ssl.as_ptr(), Some(psk_client_trampoline));
    }
    debug!(connection = %id, "installed client PSK callback");
    Ok(registration)
}

/// Installs the server-side PSK trampoline on `ssl`, sets the identity hint
/// sent to the client (empty when none is given), and registers the
/// normalized provider for this connection.
pub fn install_server_psk(
    ssl: &mut SslRef,
    psk: ServerPsk,
    hint: Option<&[u8]>,
) -> Result<Registration, PskError> {
    let hint = CString::new(hint.unwrap_or_default())?;
    let id = ConnectionId::allocate();
    let registration = registry::global().register(id, psk.into_provider())?;
    ssl.set_ex_data(connection_id_index()?, id);
    unsafe {
        if SSL_use_psk_identity_hint(ssl.as_ptr(), hint.as_ptr()) != 1 {
            return Err(ErrorStack::get().into());
        }
        SSL_set_psk_server_callback(ssl.as_ptr(), Some(psk_server_trampoline));
    }
    debug!(connection = %id, "installed server PSK callback");
    Ok(registration)
}

/// Client trampoline: writes the NUL-terminated identity and the key bytes
/// into libssl's buffers and returns the key length. 0 means "no key" and
/// aborts PSK negotiation. Nothing may panic or unwind out of here.
extern "C" fn psk_client_trampoline(
    ssl: *mut ffi::SSL,
    hint: *const c_char,
    identity: *mut c_char,
    max_identity_len: c_uint,
    psk: *mut c_uchar,
    max_psk_len: c_uint,
) -> c_uint {
    // SAFETY: libssl hands us the live SSL handle the handshake runs on.
    let ssl = unsafe { SslRef::from_ptr(ssl) };
    let Some(id) = connection_id(ssl) else {
        warn!("client PSK callback fired on a connection with no identifier");
        return 0;
    };
    let Some(entry) = registry::global().resolve(id) else {
        // Normal during teardown races: the registration is gone, so the
        // handshake is told there is no key.
        debug!(connection = %id, "client PSK callback fired for an unregistered connection");
        return 0;
    };
    let Provider::Client(provider) = entry.provider() else {
        warn!(connection = %id, "server PSK provider registered on a client connection");
        return 0;
    };

    // SAFETY: when present, the hint is a NUL-terminated string owned by
    // libssl for the duration of this call.
    let hint = (!hint.is_null()).then(|| unsafe { CStr::from_ptr(hint) }.to_bytes());
    trace!(
        connection = %id,
        hint = %hex::encode(hint.unwrap_or_default()),
        "invoking client PSK provider"
    );

    let keys = match panic::catch_unwind(AssertUnwindSafe(|| provider(hint))) {
        Ok(Ok(keys)) => keys,
        Ok(Err(error)) => {
            warn!(connection = %id, %error, "client PSK provider failed");
            entry.record_failure(error);
            return 0;
        }
        Err(_) => {
            warn!(connection = %id, "client PSK provider panicked");
            entry.record_failure("client PSK provider panicked".into());
            return 0;
        }
    };

    if keys.key.is_empty() || keys.key.len() > max_psk_len as usize {
        warn!(
            connection = %id,
            key_len = keys.key.len(),
            max_psk_len,
            "client PSK provider returned an unusable key"
        );
        entry.record_failure(
            format!(
                "PSK of {} bytes does not fit the native limit of {max_psk_len} bytes",
                keys.key.len()
            )
            .into(),
        );
        return 0;
    }
    // The identity is written as a C string, so it needs one spare byte for
    // the terminator and no interior NUL.
    if keys.identity.len() >= max_identity_len as usize || keys.identity.contains(&0) {
        warn!(
            connection = %id,
            identity_len = keys.identity.len(),
            max_identity_len,
            "client PSK provider returned an unusable identity"
        );
        entry.record_failure("PSK identity does not fit the native identity buffer".into());
        return 0;
    }

    // SAFETY: the destination buffers hold max_identity_len and max_psk_len
    // bytes respectively, and both lengths were checked above.
    unsafe {
        ptr::copy_nonoverlapping(
            keys.identity.as_ptr(),
            identity.cast::<u8>(),
            keys.identity.len(),
        );
        identity.add(keys.identity.len()).write(0);
        ptr::copy_nonoverlapping(keys.key.as_ptr(), psk, keys.key.len());
    }
    keys.key.len() as c_uint
}

/// Server trampoline: writes the key for the presented identity into
/// libssl's buffer and returns its length, or 0 when no key is available.
extern "C" fn psk_server_trampoline(
    ssl: *mut ffi::SSL,
    identity: *const c_char,
    psk: *mut c_uchar,
    max_psk_len: c_uint,
) -> c_uint {
    // SAFETY: libssl hands us the live SSL handle the handshake runs on.
    let ssl = unsafe { SslRef::from_ptr(ssl) };
    let Some(id) = connection_id(ssl) else {
        warn!("server PSK callback fired on a connection with no identifier");
        return 0;
    };
    let Some(entry) = registry::global().resolve(id) else {
        debug!(connection = %id, "server PSK callback fired for an unregistered connection");
        return 0;
    };
    let Provider::Server(provider) = entry.provider() else {
        warn!(connection = %id, "client PSK provider registered on a server connection");
        return 0;
    };

    // SAFETY: the identity is a NUL-terminated string owned by libssl for
    // the duration of this call.
    let identity = if identity.is_null() {
        &[][..]
    } else {
        unsafe { CStr::from_ptr(identity) }.to_bytes()
    };
    debug!(
        connection = %id,
        identity = %hex::encode(identity),
        "invoking server PSK provider"
    );

    let key = match panic::catch_unwind(AssertUnwindSafe(|| provider(identity))) {
        Ok(Ok(Some(key))) if !key.is_empty() => key,
        Ok(Ok(_)) => {
            debug!(connection = %id, "no PSK for the presented identity");
            return 0;
        }
        Ok(Err(error)) => {
            warn!(connection = %id, %error, "server PSK provider failed");
            entry.record_failure(error);
            return 0;
        }
        Err(_) => {
            warn!(connection = %id, "server PSK provider panicked");
            entry.record_failure("server PSK provider panicked".into());
            return 0;
        }
    };

    if key.len() > max_psk_len as usize {
        warn!(
            connection = %id,
            key_len = key.len(),
            max_psk_len,
            "server PSK does not fit the native buffer"
        );
        entry.record_failure(
            format!(
                "PSK of {} bytes does not fit the native limit of {max_psk_len} bytes",
                key.len()
            )
            .into(),
        );
        return 0;
    }
    // SAFETY: the destination buffer holds max_psk_len bytes and the length
    // was checked above.
    unsafe {
        ptr::copy_nonoverlapping(key.as_ptr(), psk, key.len());
    }
    key.len() as c_uint
}
