//! SSH transport session: connection state machine, authentication,
//! channel registry and channel factories.
//!
//! # Connection lifecycle
//!
//! 1. **TCP connect** to the configured host and port, bounded by the
//!    operation's time budget.
//! 2. **Transport handshake** (key exchange, host key capture, negotiation)
//!    via the russh client, under the same budget.
//! 3. **Auth probe**: a `none` authentication request learns the server's
//!    offered method list (and occasionally succeeds outright).
//! 4. **Authentication chain** in fixed priority order - publickey,
//!    password, keyboard-interactive - where each method is attempted only
//!    if the server offers it and credentials for it are configured.
//! 5. On success the session holds the transport handle; keepalive runs at
//!    the configured interval.
//!
//! A timeout anywhere in connect or disconnect tears the connection down:
//! the protocol state after an abandoned partial exchange is indeterminate.
//!
//! # Concurrency model
//!
//! One `tokio::sync::Mutex` guards the whole session state. Every public
//! operation - on the session, on any of its channels, on the SFTP client -
//! holds it for the operation's full duration, so the transport processes
//! one logical operation at a time.
//!
//! # Channel ownership
//!
//! Channels register in an arena (`u64` id -> cancellation token) owned by
//! the session. Session teardown cancels every token (a forced local free,
//! not a negotiated close); a channel closing on its own removes its entry
//! by id. Neither side holds a reference into the other.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use russh::keys::PublicKey;
use russh::{Disconnect, client};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthChain, AuthMethodUsed, format_method_list, offered_methods};
use crate::channel::{Channel, RusshChannel};
use crate::config;
use crate::deadline::Deadline;
use crate::error::{Error, Result, is_transient};
use crate::handler::ClientHandler;
use crate::scp;
use crate::sftp::SftpState;
use crate::types::{ScpFileInfo, SessionInfo};

/// Established-connection state.
pub(crate) struct Connected {
    pub(crate) handle: client::Handle<ClientHandler>,
    pub(crate) auth: AuthMethodUsed,
    pub(crate) server_key: Option<PublicKey>,
    pub(crate) connected_at: DateTime<Utc>,
}

/// Session connection state.
pub(crate) enum State {
    Disconnected,
    Connected(Connected),
}

/// The session state guarded by the single per-session mutex.
pub(crate) struct Inner {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) user: String,
    pub(crate) password: Option<String>,
    pub(crate) private_key: Option<PathBuf>,
    pub(crate) public_key: Option<PathBuf>,
    pub(crate) keepalive_secs: u64,
    pub(crate) compression: bool,
    pub(crate) state: State,
    /// Arena of live channels: stable id -> force-close token.
    pub(crate) channels: HashMap<u64, CancellationToken>,
    pub(crate) next_channel_id: u64,
    /// At most one SFTP subsystem per session.
    pub(crate) sftp: Option<SftpState>,
    /// Remembered SFTP working directory; survives subsystem reconnects.
    pub(crate) sftp_cwd: Option<String>,
}

impl Inner {
    pub(crate) fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected(_))
    }
}

/// An SSH transport session. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct SshSession {
    pub(crate) inner: Arc<Mutex<Inner>>,
}

impl SshSession {
    /// Create a disconnected session for `host:port`.
    ///
    /// The username is pre-filled from the `USER`/`USERNAME` environment,
    /// and the first readable default identity pair (`~/.ssh/id_*` with its
    /// `.pub` sibling) is picked up automatically. Both can be overridden
    /// with the setters before connecting.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();

        let (private_key, public_key) = default_identity();

        Self {
            inner: Arc::new(Mutex::new(Inner {
                host: host.into(),
                port,
                user,
                password: None,
                private_key,
                public_key,
                keepalive_secs: config::resolve_keepalive_secs(),
                compression: config::resolve_compression(),
                state: State::Disconnected,
                channels: HashMap::new(),
                next_channel_id: 1,
                sftp: None,
                sftp_cwd: None,
            })),
        }
    }

    /// Set the username. Only allowed while disconnected.
    pub async fn set_user(&self, user: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.is_connected() {
            return Err(Error::AlreadyConnected("set_user"));
        }
        inner.user = user.to_string();
        Ok(())
    }

    /// Set the password used for password and keyboard-interactive
    /// authentication. Only allowed while disconnected.
    pub async fn set_password(&self, password: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.is_connected() {
            return Err(Error::AlreadyConnected("set_password"));
        }
        inner.password = Some(password.to_string());
        Ok(())
    }

    /// Set the key pair used for public key authentication. Only allowed
    /// while disconnected. A missing public key path defaults to
    /// `<private>.pub`; both files must be readable.
    pub async fn set_keys(&self, private_key: &Path, public_key: Option<&Path>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.is_connected() {
            return Err(Error::AlreadyConnected("set_keys"));
        }

        let public = match public_key {
            Some(path) => path.to_path_buf(),
            None => sibling_public_key(private_key),
        };

        for path in [private_key, public.as_path()] {
            if !is_readable_file(path) {
                return Err(Error::Key(format!("key file {:?} is not readable", path)));
            }
        }

        inner.private_key = Some(private_key.to_path_buf());
        inner.public_key = Some(public);
        Ok(())
    }

    /// Whether the session currently holds an established transport.
    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.is_connected()
    }

    /// Connection metadata; safe to call whether connected or not.
    pub async fn info(&self) -> SessionInfo {
        let inner = self.inner.lock().await;
        session_info_locked(&inner)
    }

    /// Establish the transport: TCP connect, handshake, authenticate.
    ///
    /// `timeout_ms` bounds the whole sequence (negative = indefinite,
    /// absent = the configured connect default). A connected session is
    /// torn down before reconnecting.
    pub async fn connect(&self, timeout_ms: Option<i64>) -> Result<()> {
        let deadline = Deadline::new(config::resolve_connect_timeout_ms(timeout_ms));
        let mut inner = deadline.bound("connect", self.inner.lock()).await?;
        connect_locked(&mut inner, &deadline).await
    }

    /// [`SshSession::connect`] with exponential backoff and jitter for
    /// transient failures. Authentication failures are never retried.
    /// Returns the number of retries that were needed.
    pub async fn connect_with_retry(
        &self,
        timeout_ms: Option<i64>,
        max_retries: u32,
        min_delay_ms: u64,
    ) -> Result<u32> {
        let (host, user) = {
            let inner = self.inner.lock().await;
            (inner.host.clone(), inner.user.clone())
        };

        let attempt_counter = AtomicU32::new(0);

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(min_delay_ms))
            .with_max_delay(config::MAX_RETRY_DELAY)
            .with_max_times(max_retries as usize)
            .with_jitter();

        let result = (|| async {
            let current_attempt = attempt_counter.fetch_add(1, Ordering::SeqCst);
            if current_attempt > 0 {
                warn!(
                    "SSH connection retry attempt {} to {}@{}",
                    current_attempt, user, host
                );
            }
            self.connect(timeout_ms).await
        })
        .retry(backoff)
        .when(|e| {
            let retryable = is_transient(e);
            if !retryable {
                warn!(
                    "SSH connection to {}@{} failed with non-retryable error: {}",
                    user, host, e
                );
            }
            retryable
        })
        .notify(|err, dur| {
            warn!("SSH connection failed: {}. Retrying in {:?}", err, dur);
        })
        .await;

        let total_attempts = attempt_counter.load(Ordering::SeqCst);
        let retry_count = total_attempts.saturating_sub(1);

        match result {
            Ok(()) => {
                if retry_count > 0 {
                    info!(
                        "SSH connection to {}@{} succeeded after {} retry attempt(s)",
                        user, host, retry_count
                    );
                }
                Ok(retry_count)
            }
            Err(e) => {
                error!(
                    "SSH connection to {}@{} failed after {} attempt(s). Last error: {}",
                    user, host, total_attempts, e
                );
                Err(e)
            }
        }
    }

    /// Tear the session down: force-close all registered channels, attempt
    /// a graceful transport disconnect within the budget, then drop the
    /// socket regardless.
    ///
    /// On a disconnected session this is an error unless `force` is set,
    /// in which case it is a silent no-op.
    pub async fn disconnect(&self, force: bool, timeout_ms: Option<i64>) -> Result<()> {
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let mut inner = deadline.bound("disconnect", self.inner.lock()).await?;
        disconnect_locked(&mut inner, force, &deadline).await
    }

    /// Open a session channel for command execution, shells or subsystems.
    pub async fn open_session_channel(&self, timeout_ms: Option<i64>) -> Result<Channel> {
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let mut inner = deadline.bound("open channel", self.inner.lock()).await?;
        let raw = open_session_channel_locked(&mut inner, &deadline).await?;
        Ok(self.register_channel(&mut inner, raw))
    }

    /// Open a direct-tcpip channel to `host:port`. The originator address
    /// defaults to `127.0.0.1:22` when not given.
    pub async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u16,
        originator: Option<(&str, u16)>,
        timeout_ms: Option<i64>,
    ) -> Result<Channel> {
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let mut inner = deadline.bound("open direct-tcpip", self.inner.lock()).await?;
        let State::Connected(conn) = &inner.state else {
            return Err(Error::NotConnected);
        };
        let (src_host, src_port) = originator.unwrap_or(("127.0.0.1", 22));
        let raw = deadline
            .bound(
                "open direct-tcpip",
                conn.handle
                    .channel_open_direct_tcpip(host, port as u32, src_host, src_port as u32),
            )
            .await??;
        debug!("direct-tcpip channel open to {}:{}", host, port);
        Ok(self.register_channel(&mut inner, raw))
    }

    /// Open an SCP receive channel for `path`.
    ///
    /// Returns the channel positioned at the first content byte together
    /// with the remote file's announced metadata; read exactly
    /// `info.size` bytes off stream 0.
    pub async fn scp_get(
        &self,
        path: &str,
        timeout_ms: Option<i64>,
    ) -> Result<(Channel, ScpFileInfo)> {
        if path.is_empty() {
            return Err(Error::usage("scp_get requires a non-empty path"));
        }
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let mut inner = deadline.bound("scp_get", self.inner.lock()).await?;
        let raw = open_session_channel_locked(&mut inner, &deadline).await?;
        let mut channel = self.register_channel(&mut inner, raw);
        match scp::source_handshake(&mut channel, path, &deadline).await {
            Ok(file_info) => Ok((channel, file_info)),
            Err(e) => {
                inner.channels.remove(&channel.id());
                Err(e)
            }
        }
    }

    /// Open an SCP send channel for `path`, announcing `size` bytes with
    /// the given mode and optional timestamps.
    ///
    /// Write exactly `size` bytes to stream 0, then a single zero byte,
    /// then signal EOF.
    #[allow(clippy::too_many_arguments)]
    pub async fn scp_put(
        &self,
        path: &str,
        size: u64,
        mode: u32,
        mtime: Option<u64>,
        atime: Option<u64>,
        timeout_ms: Option<i64>,
    ) -> Result<Channel> {
        if path.is_empty() {
            return Err(Error::usage("scp_put requires a non-empty path"));
        }
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let mut inner = deadline.bound("scp_put", self.inner.lock()).await?;
        let raw = open_session_channel_locked(&mut inner, &deadline).await?;
        let mut channel = self.register_channel(&mut inner, raw);
        match scp::sink_handshake(&mut channel, path, size, mode, mtime, atime, &deadline).await {
            Ok(()) => Ok(channel),
            Err(e) => {
                inner.channels.remove(&channel.id());
                Err(e)
            }
        }
    }

    fn register_channel(&self, inner: &mut Inner, raw: RusshChannel) -> Channel {
        let id = inner.next_channel_id;
        inner.next_channel_id += 1;
        let token = CancellationToken::new();
        inner.channels.insert(id, token.clone());
        Channel::new(self.inner.clone(), id, token, raw)
    }
}

/// Build the russh client configuration.
///
/// Keepalive keeps half-dead NAT paths from going stale; the inactivity
/// timeout stays disabled because sessions are explicitly torn down.
fn build_client_config(keepalive_secs: u64, compression: bool) -> Arc<client::Config> {
    let compression_pref = if compression {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression: compression_pref,
        ..Default::default()
    };

    let keepalive_interval = if keepalive_secs > 0 {
        Some(Duration::from_secs(keepalive_secs))
    } else {
        None
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval,
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// Establish the transport while holding the session lock.
pub(crate) async fn connect_locked(inner: &mut Inner, deadline: &Deadline) -> Result<()> {
    if inner.user.is_empty() {
        return Err(Error::Config("username is not set".to_string()));
    }

    // Reconnecting always tears down the previous transport first.
    if inner.is_connected() {
        disconnect_locked(inner, true, deadline).await?;
    }

    let addr = format!("{}:{}", inner.host, inner.port);
    info!("Connecting to {}@{}", inner.user, addr);

    let tcp = deadline
        .bound("tcp connect", TcpStream::connect(&addr))
        .await?
        .map_err(|e| Error::Connect(format!("failed to connect to {addr}: {e}")))?;

    let client_config = build_client_config(inner.keepalive_secs, inner.compression);
    let server_key_slot = Arc::new(StdMutex::new(None));
    let handler = ClientHandler::new(server_key_slot.clone());

    let mut handle = deadline
        .bound(
            "ssh handshake",
            client::connect_stream(client_config, tcp, handler),
        )
        .await??;

    debug!("SSH handshake completed with {}", addr);

    // Probe with `none` to learn the offered method list.
    let probe = deadline
        .bound("auth probe", handle.authenticate_none(&inner.user))
        .await??;

    let auth = if probe.success() {
        AuthMethodUsed::None
    } else {
        let offered = offered_methods(&probe);
        debug!(
            "Server offers authentication methods: {}",
            format_method_list(&offered)
        );

        let chain = AuthChain::from_credentials(
            inner.private_key.as_deref(),
            inner.public_key.as_deref(),
            inner.password.as_deref(),
        );

        if chain.is_empty() {
            return Err(Error::Auth(
                "no credentials configured (set a password or a key pair)".to_string(),
            ));
        }

        match chain
            .authenticate(&mut handle, &inner.user, &offered, deadline)
            .await?
        {
            Some(method) => method,
            None => {
                return Err(Error::Auth(format!(
                    "no authentication method succeeded; server offered: {}",
                    format_method_list(&offered)
                )));
            }
        }
    };

    info!(
        "Authenticated to {}@{} via {}",
        inner.user,
        addr,
        auth.as_str()
    );

    let server_key = server_key_slot.lock().ok().and_then(|slot| slot.clone());

    inner.state = State::Connected(Connected {
        handle,
        auth,
        server_key,
        connected_at: Utc::now(),
    });

    Ok(())
}

/// Tear the transport down while holding the session lock.
pub(crate) async fn disconnect_locked(
    inner: &mut Inner,
    force: bool,
    deadline: &Deadline,
) -> Result<()> {
    if !inner.is_connected() {
        return if force { Ok(()) } else { Err(Error::NotConnected) };
    }

    // Forced local free of every registered channel; no per-channel close
    // handshake on teardown.
    let live = inner.channels.len();
    for (_, token) in inner.channels.drain() {
        token.cancel();
    }
    if live > 0 {
        debug!("force-closed {} channel(s) on disconnect", live);
    }

    inner.sftp = None;
    inner.sftp_cwd = None;

    if let State::Connected(conn) = std::mem::replace(&mut inner.state, State::Disconnected) {
        match deadline
            .bound(
                "disconnect",
                conn.handle.disconnect(Disconnect::ByApplication, "", "en"),
            )
            .await
        {
            Ok(Ok(())) => debug!("graceful disconnect sent"),
            Ok(Err(e)) => debug!("graceful disconnect failed: {}", e),
            // Dropping the handle closes the socket even when the graceful
            // message never made it out.
            Err(e) => warn!("graceful disconnect timed out: {}", e),
        }
    }

    Ok(())
}

/// Open a raw session channel while holding the session lock.
pub(crate) async fn open_session_channel_locked(
    inner: &mut Inner,
    deadline: &Deadline,
) -> Result<RusshChannel> {
    let State::Connected(conn) = &inner.state else {
        return Err(Error::NotConnected);
    };
    let raw = deadline
        .bound("open channel", conn.handle.channel_open_session())
        .await??;
    Ok(raw)
}

/// Build the `info()` record from locked state.
pub(crate) fn session_info_locked(inner: &Inner) -> SessionInfo {
    let (connected, authenticated, connected_at, host_key_algorithm, host_key_fingerprint) =
        match &inner.state {
            State::Disconnected => (false, None, None, None, None),
            State::Connected(conn) => (
                true,
                Some(conn.auth.as_str().to_string()),
                Some(conn.connected_at.to_rfc3339()),
                conn.server_key.as_ref().map(|k| k.algorithm().to_string()),
                conn.server_key.as_ref().map(|k| {
                    k.fingerprint(russh::keys::ssh_key::HashAlg::Sha256)
                        .to_string()
                }),
            ),
        };

    SessionInfo {
        host: inner.host.clone(),
        port: inner.port,
        user: inner.user.clone(),
        private_key: inner
            .private_key
            .as_ref()
            .map(|p| p.display().to_string()),
        public_key: inner.public_key.as_ref().map(|p| p.display().to_string()),
        connected,
        authenticated,
        connected_at,
        host_key_algorithm,
        host_key_fingerprint,
        keepalive_secs: inner.keepalive_secs,
    }
}

/// `<private>.pub` next to the private key.
fn sibling_public_key(private_key: &Path) -> PathBuf {
    let mut name = private_key.as_os_str().to_os_string();
    name.push(".pub");
    PathBuf::from(name)
}

fn is_readable_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// First default identity pair where both halves are readable.
fn default_identity() -> (Option<PathBuf>, Option<PathBuf>) {
    for private in config::DEFAULT_IDENTITY_FILES.iter() {
        let public = sibling_public_key(private);
        if is_readable_file(private) && is_readable_file(&public) {
            return (Some(private.clone()), Some(public));
        }
    }
    (None, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    mod lifecycle {
        use super::*;

        #[tokio::test]
        async fn test_new_session_is_disconnected() {
            let session = SshSession::new("203.0.113.7", 22);
            assert!(!session.is_connected().await);
        }

        #[tokio::test]
        async fn test_disconnect_when_disconnected_is_state_error() {
            let session = SshSession::new("203.0.113.7", 22);
            let err = session.disconnect(false, Some(1000)).await.expect_err("state error");
            assert!(matches!(err, Error::NotConnected));
        }

        #[tokio::test]
        async fn test_forced_disconnect_when_disconnected_is_noop() {
            let session = SshSession::new("203.0.113.7", 22);
            session
                .disconnect(true, Some(1000))
                .await
                .expect("silent no-op");
        }

        #[tokio::test]
        async fn test_connect_without_user_is_config_error() {
            let session = SshSession::new("203.0.113.7", 22);
            session.set_user("").await.expect("setter");
            let err = session.connect(Some(1000)).await.expect_err("no user");
            assert!(matches!(err, Error::Config(_)));
        }

        #[tokio::test]
        async fn test_channel_factory_requires_connection() {
            let session = SshSession::new("203.0.113.7", 22);
            session.set_user("alice").await.expect("setter");
            let err = session
                .open_session_channel(Some(1000))
                .await
                .expect_err("not connected");
            assert!(matches!(err, Error::NotConnected));
        }

        #[tokio::test]
        async fn test_scp_get_rejects_empty_path_before_wire_io() {
            let session = SshSession::new("203.0.113.7", 22);
            let err = session.scp_get("", Some(1000)).await.expect_err("usage");
            assert!(matches!(err, Error::Usage(_)));
        }
    }

    mod setters {
        use super::*;

        #[tokio::test]
        async fn test_set_user_while_disconnected() {
            let session = SshSession::new("203.0.113.7", 22);
            session.set_user("alice").await.expect("setter");
            assert_eq!(session.info().await.user, "alice");
        }

        #[tokio::test]
        async fn test_set_password_is_not_reported_by_info() {
            let session = SshSession::new("203.0.113.7", 22);
            session.set_password("secret").await.expect("setter");
            let json = serde_json::to_string(&session.info().await).expect("serialize");
            assert!(!json.contains("secret"));
        }

        #[tokio::test]
        async fn test_set_keys_rejects_unreadable_paths() {
            let session = SshSession::new("203.0.113.7", 22);
            let err = session
                .set_keys(Path::new("/nonexistent/id_rsa"), None)
                .await
                .expect_err("unreadable key");
            assert!(matches!(err, Error::Key(_)));
        }

        #[tokio::test]
        async fn test_set_keys_defaults_public_to_pub_sibling() {
            let dir = std::env::temp_dir().join("sshc-test-keys");
            std::fs::create_dir_all(&dir).expect("tmp dir");
            let private = dir.join("id_test");
            let public = dir.join("id_test.pub");
            std::fs::write(&private, "private").expect("write");
            std::fs::write(&public, "public").expect("write");

            let session = SshSession::new("203.0.113.7", 22);
            session.set_keys(&private, None).await.expect("setter");
            let info = session.info().await;
            assert!(info.public_key.expect("public key").ends_with("id_test.pub"));

            let _ = std::fs::remove_file(&private);
            let _ = std::fs::remove_file(&public);
        }
    }

    mod info {
        use super::*;

        #[tokio::test]
        async fn test_info_reports_identity_without_connection() {
            let session = SshSession::new("203.0.113.7", 2222);
            session.set_user("alice").await.expect("setter");
            let info = session.info().await;
            assert_eq!(info.host, "203.0.113.7");
            assert_eq!(info.port, 2222);
            assert_eq!(info.user, "alice");
            assert!(!info.connected);
            assert!(info.authenticated.is_none());
            assert!(info.host_key_fingerprint.is_none());
        }
    }

    mod helpers {
        use super::*;

        #[test]
        fn test_sibling_public_key() {
            assert_eq!(
                sibling_public_key(Path::new("/home/u/.ssh/id_rsa")),
                PathBuf::from("/home/u/.ssh/id_rsa.pub")
            );
        }

        #[test]
        fn test_client_config_keepalive() {
            let cfg = build_client_config(30, true);
            assert_eq!(cfg.keepalive_interval, Some(Duration::from_secs(30)));
            assert_eq!(cfg.keepalive_max, 3);
            assert_eq!(cfg.inactivity_timeout, None);
        }

        #[test]
        fn test_client_config_keepalive_disabled() {
            let cfg = build_client_config(0, false);
            assert_eq!(cfg.keepalive_interval, None);
        }
    }
}
