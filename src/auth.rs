//! Authentication strategies and the fixed-priority chain.
//!
//! Strategies are tried in a fixed order - public key, then password, then
//! keyboard-interactive - stopping at the first success. A strategy is only
//! attempted when the server's offered method list advertises it AND the
//! required credentials are configured (readable key files, or a password).
//!
//! The keyboard-interactive strategy answers every server prompt with the
//! configured password; the answer is passed directly to the respond call,
//! so no global or thread-local password stash exists.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, AuthResult, KeyboardInteractiveAuthResponse};
use russh::{MethodKind, keys};
use tracing::debug;

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::handler::ClientHandler;

/// Which authentication method established the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethodUsed {
    /// The server accepted the probe without credentials.
    None,
    Publickey,
    Password,
    KeyboardInteractive,
}

impl AuthMethodUsed {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethodUsed::None => "none",
            AuthMethodUsed::Publickey => "publickey",
            AuthMethodUsed::Password => "password",
            AuthMethodUsed::KeyboardInteractive => "keyboard-interactive",
        }
    }
}

/// Trait for SSH authentication strategies.
///
/// Implementations must be thread-safe (`Send + Sync`). Each strategy
/// represents one userauth method.
#[async_trait]
pub(crate) trait AuthStrategy: Send + Sync {
    /// Attempt to authenticate with the SSH server.
    ///
    /// * `Ok(true)` - authentication succeeded
    /// * `Ok(false)` - credentials rejected; the chain moves on
    /// * `Err(_)` - error during the attempt; the chain moves on
    async fn authenticate(
        &self,
        handle: &mut client::Handle<ClientHandler>,
        username: &str,
    ) -> Result<bool>;

    /// The userauth method this strategy implements.
    fn method(&self) -> MethodKind;

    /// Which [`AuthMethodUsed`] to report on success.
    fn used(&self) -> AuthMethodUsed;

    /// Strategy name for logging.
    fn name(&self) -> &'static str;
}

/// Public key authentication from a private key file.
pub(crate) struct PublickeyAuth {
    private_key: PathBuf,
}

impl PublickeyAuth {
    pub(crate) fn new(private_key: impl Into<PathBuf>) -> Self {
        Self {
            private_key: private_key.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for PublickeyAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<ClientHandler>,
        username: &str,
    ) -> Result<bool> {
        let path = Path::new(&self.private_key);

        let key_pair = keys::load_secret_key(path, None).map_err(|e| {
            Error::Key(format!(
                "failed to load private key from {:?}: {}",
                self.private_key, e
            ))
        })?;

        // For RSA keys, use the best hash algorithm the server supports.
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        debug!("Using RSA hash algorithm for key auth: {:?}", hash_alg);

        let key_with_hash = keys::PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg);

        let result = handle
            .authenticate_publickey(username, key_with_hash)
            .await?;

        Ok(result.success())
    }

    fn method(&self) -> MethodKind {
        MethodKind::PublicKey
    }

    fn used(&self) -> AuthMethodUsed {
        AuthMethodUsed::Publickey
    }

    fn name(&self) -> &'static str {
        "publickey"
    }
}

/// Password authentication.
pub(crate) struct PasswordAuth {
    password: String,
}

impl PasswordAuth {
    pub(crate) fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for PasswordAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<ClientHandler>,
        username: &str,
    ) -> Result<bool> {
        let result = handle
            .authenticate_password(username, &self.password)
            .await?;

        Ok(result.success())
    }

    fn method(&self) -> MethodKind {
        MethodKind::Password
    }

    fn used(&self) -> AuthMethodUsed {
        AuthMethodUsed::Password
    }

    fn name(&self) -> &'static str {
        "password"
    }
}

/// Keyboard-interactive authentication answering prompts with the password.
///
/// Servers configured for keyboard-interactive typically present a single
/// password prompt; every prompt in an info request is answered with the
/// configured password.
pub(crate) struct KeyboardInteractiveAuth {
    password: String,
}

impl KeyboardInteractiveAuth {
    pub(crate) fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for KeyboardInteractiveAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<ClientHandler>,
        username: &str,
    ) -> Result<bool> {
        let mut response = handle
            .authenticate_keyboard_interactive_start(username, None)
            .await?;

        loop {
            match response {
                KeyboardInteractiveAuthResponse::Success => return Ok(true),
                KeyboardInteractiveAuthResponse::Failure { .. } => return Ok(false),
                KeyboardInteractiveAuthResponse::InfoRequest { ref prompts, .. } => {
                    let responses = if prompts.is_empty() {
                        Vec::new()
                    } else {
                        vec![self.password.clone(); prompts.len()]
                    };
                    response = handle
                        .authenticate_keyboard_interactive_respond(responses)
                        .await?;
                }
            }
        }
    }

    fn method(&self) -> MethodKind {
        MethodKind::KeyboardInteractive
    }

    fn used(&self) -> AuthMethodUsed {
        AuthMethodUsed::KeyboardInteractive
    }

    fn name(&self) -> &'static str {
        "keyboard-interactive"
    }
}

/// Fixed-priority authentication chain.
pub(crate) struct AuthChain {
    strategies: Vec<Box<dyn AuthStrategy>>,
}

impl AuthChain {
    /// Build the chain from the configured credentials, in the fixed
    /// priority order: publickey, password, keyboard-interactive.
    ///
    /// Public key authentication requires both the private and the public
    /// key path to be configured; the password-based strategies require a
    /// password. Credentials that are absent simply leave their strategy
    /// out of the chain.
    pub(crate) fn from_credentials(
        private_key: Option<&Path>,
        public_key: Option<&Path>,
        password: Option<&str>,
    ) -> Self {
        let mut strategies: Vec<Box<dyn AuthStrategy>> = Vec::new();

        if let (Some(private), Some(_public)) = (private_key, public_key) {
            strategies.push(Box::new(PublickeyAuth::new(private)));
        }

        if let Some(password) = password {
            strategies.push(Box::new(PasswordAuth::new(password)));
            strategies.push(Box::new(KeyboardInteractiveAuth::new(password)));
        }

        Self { strategies }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    #[cfg(test)]
    fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run the chain against the server's offered method list.
    ///
    /// Each strategy is skipped unless its method is offered. The first
    /// success wins and names the method used; rejections and errors move
    /// the chain along. Returns `Ok(None)` when no strategy succeeded.
    pub(crate) async fn authenticate(
        &self,
        handle: &mut client::Handle<ClientHandler>,
        username: &str,
        offered: &[MethodKind],
        deadline: &Deadline,
    ) -> Result<Option<AuthMethodUsed>> {
        for strategy in &self.strategies {
            if !offered.contains(&strategy.method()) {
                debug!(
                    "Skipping {} authentication: not offered by server",
                    strategy.name()
                );
                continue;
            }

            debug!("Trying authentication strategy: {}", strategy.name());

            match deadline
                .bound(strategy.name(), strategy.authenticate(handle, username))
                .await?
            {
                Ok(true) => {
                    debug!("Authentication succeeded with strategy: {}", strategy.name());
                    return Ok(Some(strategy.used()));
                }
                Ok(false) => {
                    debug!("Authentication rejected for strategy: {}", strategy.name());
                }
                Err(e) => {
                    debug!(
                        "Authentication error with strategy {}: {}",
                        strategy.name(),
                        e
                    );
                }
            }
        }

        Ok(None)
    }
}

/// Extract the offered method list from a failed auth probe.
pub(crate) fn offered_methods(result: &AuthResult) -> Vec<MethodKind> {
    match result {
        AuthResult::Success => Vec::new(),
        AuthResult::Failure {
            remaining_methods, ..
        } => remaining_methods.iter().copied().collect(),
    }
}

/// Render a method list for error messages.
pub(crate) fn format_method_list(methods: &[MethodKind]) -> String {
    if methods.is_empty() {
        return "none".to_string();
    }
    methods
        .iter()
        .map(|method| {
            let label: &'static str = method.into();
            label
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    mod chain_construction {
        use super::*;

        #[test]
        fn test_empty_without_credentials() {
            let chain = AuthChain::from_credentials(None, None, None);
            assert!(chain.is_empty());
        }

        #[test]
        fn test_password_adds_both_password_strategies() {
            let chain = AuthChain::from_credentials(None, None, Some("secret"));
            assert_eq!(chain.names(), vec!["password", "keyboard-interactive"]);
        }

        #[test]
        fn test_key_requires_both_paths() {
            let chain =
                AuthChain::from_credentials(Some(Path::new("/k/id_rsa")), None, None);
            assert!(chain.is_empty());
        }

        #[test]
        fn test_full_credentials_preserve_priority_order() {
            let chain = AuthChain::from_credentials(
                Some(Path::new("/k/id_rsa")),
                Some(Path::new("/k/id_rsa.pub")),
                Some("secret"),
            );
            assert_eq!(
                chain.names(),
                vec!["publickey", "password", "keyboard-interactive"]
            );
        }
    }

    mod method_formatting {
        use super::*;

        #[test]
        fn test_empty_list() {
            assert_eq!(format_method_list(&[]), "none");
        }

        #[test]
        fn test_joined_labels() {
            let formatted =
                format_method_list(&[MethodKind::PublicKey, MethodKind::Password]);
            assert!(formatted.contains(','));
        }
    }

    mod method_names {
        use super::*;

        #[test]
        fn test_used_labels() {
            assert_eq!(AuthMethodUsed::Publickey.as_str(), "publickey");
            assert_eq!(AuthMethodUsed::Password.as_str(), "password");
            assert_eq!(
                AuthMethodUsed::KeyboardInteractive.as_str(),
                "keyboard-interactive"
            );
            assert_eq!(AuthMethodUsed::None.as_str(), "none");
        }
    }
}
