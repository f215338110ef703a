//! russh client handler.
//!
//! Accepts the server host key (the equivalent of
//! `StrictHostKeyChecking=no`) and captures it so `SshSession::info` can
//! report the key algorithm and fingerprint after the handshake.

use std::sync::{Arc, Mutex};

use russh::client;
use russh::keys::PublicKey;
use tracing::debug;

/// Client handler that accepts all host keys and records the one presented.
///
/// Host key verification against known_hosts is out of scope for this crate;
/// callers needing it can inspect `SshSession::info` after connecting.
pub(crate) struct ClientHandler {
    server_key: Arc<Mutex<Option<PublicKey>>>,
}

impl ClientHandler {
    pub(crate) fn new(server_key: Arc<Mutex<Option<PublicKey>>>) -> Self {
        Self { server_key }
    }
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            "Server key: {} {}",
            server_public_key.algorithm(),
            server_public_key.fingerprint(russh::keys::ssh_key::HashAlg::Sha256)
        );

        if let Ok(mut slot) = self.server_key.lock() {
            *slot = Some(server_public_key.clone());
        }

        Ok(true)
    }
}
