//! Error taxonomy for SSH sessions, channels and SFTP operations.
//!
//! Errors fall into the following classes:
//!
//! 1. **Usage errors**: a bad argument (empty path, negative stream id,
//!    non-positive block size, disallowed permission bits). Detected before
//!    any wire I/O, no state change.
//!
//! 2. **State errors**: the object is in the wrong state for the call
//!    (not connected, already connected, channel closed). Also detected
//!    before wire I/O.
//!
//! 3. **Timeout errors**: the operation's time budget ran out. Always kept
//!    distinct from protocol errors so callers can tell "server slow" from
//!    "server rejected".
//!
//! 4. **Protocol/transport errors**: the underlying library reported a hard
//!    failure; wrapped with its message. SFTP failures additionally carry
//!    the path that failed.
//!
//! `is_transient` classifies errors for the opt-in reconnect helper:
//! authentication failures are never retried (retrying cannot fix bad
//! credentials and risks account lockouts), while connection-level and
//! timeout failures are.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all session, channel and SFTP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is incomplete or invalid (e.g. no username set).
    #[error("configuration error: {0}")]
    Config(String),

    /// Bad argument detected before any wire I/O.
    #[error("usage error: {0}")]
    Usage(String),

    /// The session is not connected.
    #[error("session is not connected")]
    NotConnected,

    /// The call is only allowed while disconnected.
    #[error("cannot {0} while connected")]
    AlreadyConnected(&'static str),

    /// The channel has been closed; no further operations are possible.
    #[error("channel is closed")]
    ChannelClosed,

    /// The operation's time budget ran out.
    #[error("timed out during {op} after {elapsed_ms} ms")]
    Timeout { op: String, elapsed_ms: u64 },

    /// TCP connect or transport establishment failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// No authentication method succeeded.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Private/public key file problem.
    #[error("key error: {0}")]
    Key(String),

    /// The server refused a channel request (setenv, pty, exec, ...).
    #[error("channel request '{0}' refused by server")]
    RequestDenied(&'static str),

    /// The channel's data stream ended before an exact-size read finished.
    #[error("end of stream after {got} of {want} requested bytes")]
    Eof { got: usize, want: usize },

    /// Hard failure reported by the SSH transport library.
    #[error("ssh protocol error: {0}")]
    Protocol(#[from] russh::Error),

    /// Failure reported by the SFTP subsystem, with the path that failed.
    #[error("sftp error on '{path}': {source}")]
    Sftp {
        path: String,
        #[source]
        source: russh_sftp::client::error::Error,
    },

    /// SCP wire protocol violation or remote scp error message.
    #[error("scp protocol error: {0}")]
    Scp(String),

    /// I/O error outside the SSH transport (key files, local sockets).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn timeout(op: impl Into<String>, elapsed_ms: u64) -> Self {
        Error::Timeout {
            op: op.into(),
            elapsed_ms,
        }
    }

    pub(crate) fn usage(msg: impl Into<String>) -> Self {
        Error::Usage(msg.into())
    }

    pub(crate) fn sftp(path: impl Into<String>, source: russh_sftp::client::error::Error) -> Self {
        Error::Sftp {
            path: path.into(),
            source,
        }
    }

    /// True when the error names an exhausted time budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// True when the SFTP subsystem reported "no such file".
    pub fn is_not_found(&self) -> bool {
        use russh_sftp::protocol::StatusCode;
        matches!(
            self,
            Error::Sftp {
                source: russh_sftp::client::error::Error::Status(s),
                ..
            } if s.status_code == StatusCode::NoSuchFile
        )
    }
}

/// Classify an error as transient (worth retrying a connect) or permanent.
///
/// Authentication and configuration failures are permanent: they will not
/// resolve by retrying. Connection-level errors, timeouts and I/O errors are
/// transient. Transport protocol errors are transient only for the variants
/// that describe a dropped or timed-out connection rather than a protocol
/// violation.
pub(crate) fn is_transient(error: &Error) -> bool {
    match error {
        Error::Auth(_) | Error::Config(_) | Error::Usage(_) | Error::Key(_) => false,
        Error::AlreadyConnected(_) | Error::ChannelClosed | Error::NotConnected => false,
        Error::Timeout { .. } | Error::Connect(_) | Error::Io(_) => true,
        Error::Protocol(e) => is_transient_ssh(e),
        Error::Sftp { source, .. } => is_transient_sftp(source),
        Error::RequestDenied(_) | Error::Eof { .. } | Error::Scp(_) => false,
    }
}

fn is_transient_ssh(e: &russh::Error) -> bool {
    matches!(
        e,
        russh::Error::KexInit
            | russh::Error::Kex
            | russh::Error::Disconnect
            | russh::Error::HUP
            | russh::Error::ConnectionTimeout
            | russh::Error::KeepaliveTimeout
            | russh::Error::InactivityTimeout
            | russh::Error::SendError
            | russh::Error::Pending
            | russh::Error::IO(_)
            | russh::Error::Elapsed(_)
    )
}

fn is_transient_sftp(e: &russh_sftp::client::error::Error) -> bool {
    use russh_sftp::protocol::StatusCode;
    match e {
        russh_sftp::client::error::Error::Timeout => true,
        russh_sftp::client::error::Error::IO(_) => true,
        russh_sftp::client::error::Error::Status(status) => matches!(
            status.status_code,
            StatusCode::NoConnection | StatusCode::ConnectionLost | StatusCode::BadMessage
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod permanent_errors {
        use super::*;

        #[test]
        fn test_auth_not_transient() {
            assert!(!is_transient(&Error::Auth("rejected".into())));
        }

        #[test]
        fn test_config_not_transient() {
            assert!(!is_transient(&Error::Config("no user".into())));
        }

        #[test]
        fn test_usage_not_transient() {
            assert!(!is_transient(&Error::usage("negative stream id")));
        }

        #[test]
        fn test_key_not_transient() {
            assert!(!is_transient(&Error::Key("unreadable".into())));
        }

        #[test]
        fn test_state_errors_not_transient() {
            assert!(!is_transient(&Error::NotConnected));
            assert!(!is_transient(&Error::AlreadyConnected("set_user")));
            assert!(!is_transient(&Error::ChannelClosed));
        }

        #[test]
        fn test_request_denied_not_transient() {
            assert!(!is_transient(&Error::RequestDenied("setenv")));
        }
    }

    mod transient_errors {
        use super::*;

        #[test]
        fn test_timeout_transient() {
            assert!(is_transient(&Error::timeout("handshake", 5000)));
        }

        #[test]
        fn test_connect_transient() {
            assert!(is_transient(&Error::Connect("connection refused".into())));
        }

        #[test]
        fn test_io_transient() {
            let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
            assert!(is_transient(&Error::Io(io)));
        }

        #[test]
        fn test_ssh_disconnect_transient() {
            assert!(is_transient(&Error::Protocol(russh::Error::Disconnect)));
        }

        #[test]
        fn test_ssh_keepalive_timeout_transient() {
            assert!(is_transient(&Error::Protocol(
                russh::Error::KeepaliveTimeout
            )));
        }
    }

    mod display {
        use super::*;

        #[test]
        fn test_timeout_names_operation_and_elapsed() {
            let err = Error::timeout("read_block (3/16 bytes)", 10_000);
            let msg = err.to_string();
            assert!(msg.contains("read_block"));
            assert!(msg.contains("10000 ms"));
        }

        #[test]
        fn test_eof_reports_counts() {
            let err = Error::Eof { got: 3, want: 16 };
            assert_eq!(err.to_string(), "end of stream after 3 of 16 requested bytes");
        }

        #[test]
        fn test_not_connected_message() {
            assert_eq!(Error::NotConnected.to_string(), "session is not connected");
        }
    }

    mod classification_helpers {
        use super::*;

        #[test]
        fn test_is_timeout() {
            assert!(Error::timeout("connect", 1).is_timeout());
            assert!(!Error::NotConnected.is_timeout());
        }

        #[test]
        fn test_sftp_timeout_transient() {
            let err = Error::sftp("/tmp/x", russh_sftp::client::error::Error::Timeout);
            assert!(is_transient(&err));
        }
    }
}
