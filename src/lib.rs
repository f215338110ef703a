//! Async SSH2 client: transport sessions, multiplexed channels, SFTP and
//! SCP file transfer.
//!
//! The crate is organized into the following modules:
//!
//! - `session`: the transport session state machine (connect, authenticate,
//!   disconnect) and channel factories
//! - `channel`: one logical stream multiplexed over a session, with
//!   per-stream buffering and request/response operations
//! - `sftp`: the SFTP subsystem layered on a session channel
//! - `scp`: the SCP wire protocol for single-file transfer channels
//! - `auth`: authentication strategies and the fixed-priority chain
//! - `deadline`: the shared time-budget primitive used by every operation
//! - `error`: error taxonomy
//! - `types`: serializable record types
//!
//! # Timeouts
//!
//! Every operation takes an optional millisecond budget: a negative value
//! waits indefinitely, zero or positive is a hard budget shared by all of
//! the operation's protocol steps. An absent value falls back to a 10 s
//! default for channel reads and to the configured connect default for
//! connection establishment; everything else defaults to indefinite.
//!
//! # Example
//!
//! ```no_run
//! use sshc::SshSession;
//!
//! # async fn demo() -> sshc::Result<()> {
//! let session = SshSession::new("server.example.com", 22);
//! session.set_user("alice").await?;
//! session.set_password("secret").await?;
//! session.connect(Some(10_000)).await?;
//!
//! let mut channel = session.open_session_channel(None).await?;
//! channel.exec("uname -a", Some(5_000)).await?;
//! let output = channel.read(0, None).await?;
//! println!("{output}");
//!
//! let sftp = session.sftp();
//! let listing = sftp.list(Some("/etc"), None).await?;
//! println!("{:?}", listing.files);
//!
//! session.disconnect(false, Some(5_000)).await?;
//! # Ok(())
//! # }
//! ```

mod auth;
mod channel;
mod config;
mod deadline;
mod error;
mod handler;
mod scp;
mod session;
mod sftp;
mod types;

pub use auth::AuthMethodUsed;
pub use channel::{Channel, ExtendedDataMode};
pub use deadline::Deadline;
pub use error::{Error, Result};
pub use session::SshSession;
pub use sftp::SftpClient;
pub use types::{
    AttrStatus, DirectoryListing, EntryInfo, EntryKind, FileAttrs, ScpFileInfo, SessionInfo,
    SftpInfo, mode_string,
};

// Terminal mode constants for `Channel::request_pty`.
pub use russh::Pty;
