use std::fmt;

use crate::errors::ProviderError;

/// Key material a PSK client presents during the handshake: the pre-shared
/// key itself and the identity string sent to the server alongside it.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientKeys {
    pub key: Vec<u8>,
    pub identity: Vec<u8>,
}

impl fmt::Debug for ClientKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key bytes stay out of logs.
        f.debug_struct("ClientKeys")
            .field("key_len", &self.key.len())
            .field("identity", &hex::encode(&self.identity))
            .finish()
    }
}

/// Client-side key lookup, invoked with the identity hint sent by the server
/// (`None` when the server sent none).
pub type ClientCallback =
    Box<dyn Fn(Option<&[u8]>) -> Result<ClientKeys, ProviderError> + Send + Sync>;

/// Server-side key lookup, invoked with the identity presented by the client.
/// `Ok(None)` means "no key for this identity" and fails the handshake.
pub type ServerCallback =
    Box<dyn Fn(&[u8]) -> Result<Option<Vec<u8>>, ProviderError> + Send + Sync>;

/// PSK material for a client connection.
///
/// The constant variants are normalized into providers when the material is
/// installed: `Key(k)` yields `(k, empty identity)` and
/// `KeyWithIdentity(k, i)` yields `(k, i)`, whatever hint the server sends.
pub enum ClientPsk {
    Key(Vec<u8>),
    KeyWithIdentity(Vec<u8>, Vec<u8>),
    Callback(ClientCallback),
}

impl ClientPsk {
    /// Wraps a closure that picks the key and identity based on the server's
    /// identity hint.
    pub fn from_callback<F>(callback: F) -> Self
    where
        F: Fn(Option<&[u8]>) -> Result<ClientKeys, ProviderError> + Send + Sync + 'static,
    {
        Self::Callback(Box::new(callback))
    }

    pub(crate) fn into_provider(self) -> Provider {
        match self {
            Self::Key(key) => Provider::Client(Box::new(move |_hint| {
                Ok(ClientKeys {
                    key: key.clone(),
                    identity: Vec::new(),
                })
            })),
            Self::KeyWithIdentity(key, identity) => Provider::Client(Box::new(move |_hint| {
                Ok(ClientKeys {
                    key: key.clone(),
                    identity: identity.clone(),
                })
            })),
            Self::Callback(callback) => Provider::Client(callback),
        }
    }
}

impl From<Vec<u8>> for ClientPsk {
    fn from(key: Vec<u8>) -> Self {
        Self::Key(key)
    }
}

impl From<&[u8]> for ClientPsk {
    fn from(key: &[u8]) -> Self {
        Self::Key(key.to_vec())
    }
}

impl From<(Vec<u8>, Vec<u8>)> for ClientPsk {
    fn from((key, identity): (Vec<u8>, Vec<u8>)) -> Self {
        Self::KeyWithIdentity(key, identity)
    }
}

/// PSK material for a server connection.
///
/// `Key(k)` is normalized into a provider that returns `k` for every
/// presented identity.
pub enum ServerPsk {
    Key(Vec<u8>),
    Callback(ServerCallback),
}

impl ServerPsk {
    /// Wraps a closure that looks up the key for the identity the client
    /// presented.
    pub fn from_callback<F>(callback: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Option<Vec<u8>>, ProviderError> + Send + Sync + 'static,
    {
        Self::Callback(Box::new(callback))
    }

    pub(crate) fn into_provider(self) -> Provider {
        match self {
            Self::Key(key) => Provider::Server(Box::new(move |_identity| Ok(Some(key.clone())))),
            Self::Callback(callback) => Provider::Server(callback),
        }
    }
}

impl From<Vec<u8>> for ServerPsk {
    fn from(key: Vec<u8>) -> Self {
        Self::Key(key)
    }
}

impl From<&[u8]> for ServerPsk {
    fn from(key: &[u8]) -> Self {
        Self::Key(key.to_vec())
    }
}

/// Uniform provider shape stored in the registry. The connection's role is
/// carried by the variant, so the trampolines can reject a provider installed
/// for the wrong side.
pub(crate) enum Provider {
    Client(ClientCallback),
    Server(ServerCallback),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_client(provider: &Provider, hint: Option<&[u8]>) -> ClientKeys {
        match provider {
            Provider::Client(callback) => callback(hint).unwrap(),
            Provider::Server(_) => panic!("expected a client provider"),
        }
    }

    fn call_server(provider: &Provider, identity: &[u8]) -> Option<Vec<u8>> {
        match provider {
            Provider::Server(callback) => callback(identity).unwrap(),
            Provider::Client(_) => panic!("expected a server provider"),
        }
    }

    #[test]
    fn constant_client_key_normalizes_to_empty_identity() {
        let provider = ClientPsk::Key(b"secret".to_vec()).into_provider();
        for hint in [None, Some(&b"srv-hint"[..])] {
            let keys = call_client(&provider, hint);
            assert_eq!(keys.key, b"secret");
            assert!(keys.identity.is_empty());
        }
    }

    #[test]
    fn constant_client_pair_keeps_identity_for_any_hint() {
        let provider =
            ClientPsk::KeyWithIdentity(b"secret".to_vec(), b"alice".to_vec()).into_provider();
        for hint in [None, Some(&b"ignored"[..])] {
            let keys = call_client(&provider, hint);
            assert_eq!(keys.key, b"secret");
            assert_eq!(keys.identity, b"alice");
        }
    }

    #[test]
    fn constant_server_key_answers_any_identity() {
        let provider = ServerPsk::Key(b"secret".to_vec()).into_provider();
        for identity in [&b""[..], &b"alice"[..], &b"bob"[..]] {
            assert_eq!(call_server(&provider, identity), Some(b"secret".to_vec()));
        }
    }

    #[test]
    fn client_callback_sees_the_hint() {
        let provider = ClientPsk::from_callback(|hint| {
            Ok(ClientKeys {
                key: hint.unwrap_or(b"default").to_vec(),
                identity: Vec::new(),
            })
        })
        .into_provider();
        assert_eq!(
            call_client(&provider, Some(&b"from-hint"[..])).key,
            b"from-hint"
        );
        assert_eq!(call_client(&provider, None).key, b"default");
    }

    #[test]
    fn conversions_pick_the_expected_variant() {
        assert!(matches!(ClientPsk::from(b"k".to_vec()), ClientPsk::Key(_)));
        assert!(matches!(
            ClientPsk::from((b"k".to_vec(), b"i".to_vec())),
            ClientPsk::KeyWithIdentity(..)
        ));
        assert!(matches!(ServerPsk::from(&b"k"[..]), ServerPsk::Key(_)));
    }
}
