//! One logical stream multiplexed over a transport session.
//!
//! A `Channel` is obtained from `SshSession` factory methods (session
//! channel, direct-tcpip channel, SCP transfer channel) - there is no
//! standalone constructor. It owns per-stream read buffers (stream 0 is the
//! primary stream, stream 1 the conventional stderr stream), routes extended
//! data according to the configured [`ExtendedDataMode`], and records the
//! remote EOF/close/exit-status events as they arrive.
//!
//! All operations on channels of one session are serialized through the
//! session's mutex: the underlying transport processes one logical operation
//! at a time, and interleaving between channels happens only through the
//! caller's own alternating calls.
//!
//! Two read contracts exist deliberately:
//!
//! - [`Channel::read`] / [`Channel::read_binary`] settle quickly: they
//!   return whatever is buffered once the first batch of data has arrived,
//!   without draining data that shows up later. Interactive callers rely on
//!   the prompt return.
//! - [`Channel::read_block`] / [`Channel::read_binary_block`] always return
//!   exactly the requested byte count or fail - never a short buffer.

use std::sync::Arc;

use futures::FutureExt;
use russh::{ChannelMsg, Pty, client};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::session::Inner;

pub(crate) type RusshChannel = russh::Channel<client::Msg>;

/// How extended (stderr) data received on the channel is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtendedDataMode {
    /// Extended data accumulates in stream 1, queryable separately.
    #[default]
    Separate,
    /// Extended data is merged into the primary stream 0.
    Merged,
    /// Extended data is discarded on arrival.
    Ignored,
}

/// Text encodings supported by the non-binary read variants.
const SUPPORTED_ENCODINGS: &[&str] = &["utf-8", "utf8", "ascii", "us-ascii"];

/// Outcome of routing one channel message.
enum Routed {
    /// Server confirmed the pending channel request.
    Success,
    /// Server refused the pending channel request.
    Failure,
    /// Data/state message; already dispatched into the channel state.
    Other,
}

/// One logical bidirectional stream on an `SshSession`.
pub struct Channel {
    session: Arc<Mutex<Inner>>,
    id: u64,
    cancel: CancellationToken,
    channel: RusshChannel,
    open: bool,
    remote_eof: bool,
    remote_closed: bool,
    exit_status: Option<u32>,
    ext_mode: ExtendedDataMode,
    encoding: &'static str,
    bufs: [Vec<u8>; 2],
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("open", &self.open)
            .field("remote_eof", &self.remote_eof)
            .field("remote_closed", &self.remote_closed)
            .field("exit_status", &self.exit_status)
            .field("ext_mode", &self.ext_mode)
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub(crate) fn new(
        session: Arc<Mutex<Inner>>,
        id: u64,
        cancel: CancellationToken,
        channel: RusshChannel,
    ) -> Self {
        Self {
            session,
            id,
            cancel,
            channel,
            open: true,
            remote_eof: false,
            remote_closed: false,
            exit_status: None,
            ext_mode: ExtendedDataMode::Separate,
            encoding: "utf-8",
            bufs: [Vec::new(), Vec::new()],
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Fail fast when the channel is no longer usable. A session teardown
    /// cancels the registry token, which counts as closed here.
    fn ensure_open(&mut self) -> Result<()> {
        if self.cancel.is_cancelled() {
            self.open = false;
        }
        if !self.open {
            return Err(Error::ChannelClosed);
        }
        Ok(())
    }

    fn stream_index(stream_id: i32) -> Result<usize> {
        if stream_id < 0 {
            return Err(Error::usage(format!("negative stream id {stream_id}")));
        }
        match stream_id {
            0 => Ok(0),
            1 => Ok(1),
            other => Err(Error::usage(format!("unsupported stream id {other}"))),
        }
    }

    /// Dispatch one received message into the channel state.
    fn route(&mut self, msg: ChannelMsg) -> Routed {
        match msg {
            ChannelMsg::Data { data } => {
                self.bufs[0].extend_from_slice(&data);
                Routed::Other
            }
            ChannelMsg::ExtendedData { data, ext } => {
                if ext == 1 {
                    match self.ext_mode {
                        ExtendedDataMode::Separate => self.bufs[1].extend_from_slice(&data),
                        ExtendedDataMode::Merged => self.bufs[0].extend_from_slice(&data),
                        ExtendedDataMode::Ignored => {}
                    }
                }
                Routed::Other
            }
            ChannelMsg::ExitStatus { exit_status } => {
                self.exit_status = Some(exit_status);
                Routed::Other
            }
            ChannelMsg::Eof => {
                self.remote_eof = true;
                Routed::Other
            }
            ChannelMsg::Close => {
                self.remote_closed = true;
                Routed::Other
            }
            ChannelMsg::Success => Routed::Success,
            ChannelMsg::Failure => Routed::Failure,
            _ => Routed::Other,
        }
    }

    /// Consume every message that is already queued, without waiting.
    fn drain_ready(&mut self) {
        while let Some(next) = self.channel.wait().now_or_never() {
            match next {
                Some(msg) => {
                    let _ = self.route(msg);
                }
                None => {
                    self.remote_closed = true;
                    break;
                }
            }
        }
    }

    /// Wait for the next message within the budget. `Ok(false)` means the
    /// message stream has ended (remote side went away).
    async fn pump(&mut self, op: &str, deadline: &Deadline) -> Result<bool> {
        match deadline.bound(op, self.channel.wait()).await? {
            Some(msg) => {
                let _ = self.route(msg);
                Ok(true)
            }
            None => {
                self.remote_closed = true;
                Ok(false)
            }
        }
    }

    /// Pump messages until the server confirms or refuses the pending
    /// channel request.
    async fn await_reply(&mut self, op: &'static str, deadline: &Deadline) -> Result<()> {
        loop {
            let Some(msg) = deadline.bound(op, self.channel.wait()).await? else {
                self.remote_closed = true;
                return Err(Error::ChannelClosed);
            };
            match self.route(msg) {
                Routed::Success => return Ok(()),
                Routed::Failure => return Err(Error::RequestDenied(op)),
                Routed::Other => {}
            }
        }
    }

    // --- request/response operations -------------------------------------

    pub(crate) async fn setenv_locked(
        &mut self,
        name: &str,
        value: &str,
        deadline: &Deadline,
    ) -> Result<()> {
        self.ensure_open()?;
        deadline
            .bound("setenv", self.channel.set_env(true, name, value))
            .await??;
        self.await_reply("setenv", deadline).await
    }

    pub(crate) async fn request_pty_locked(
        &mut self,
        term: &str,
        modes: &[(Pty, u32)],
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        deadline: &Deadline,
    ) -> Result<()> {
        self.ensure_open()?;
        deadline
            .bound(
                "request_pty",
                self.channel.request_pty(
                    true, term, col_width, row_height, pix_width, pix_height, modes,
                ),
            )
            .await??;
        self.await_reply("request_pty", deadline).await
    }

    pub(crate) async fn shell_locked(&mut self, deadline: &Deadline) -> Result<()> {
        self.ensure_open()?;
        deadline
            .bound("shell", self.channel.request_shell(true))
            .await??;
        self.await_reply("shell", deadline).await
    }

    pub(crate) async fn exec_locked(&mut self, command: &str, deadline: &Deadline) -> Result<()> {
        self.ensure_open()?;
        deadline
            .bound("exec", self.channel.exec(true, command))
            .await??;
        self.await_reply("exec", deadline).await
    }

    pub(crate) async fn subsystem_locked(&mut self, name: &str, deadline: &Deadline) -> Result<()> {
        self.ensure_open()?;
        deadline
            .bound("subsystem", self.channel.request_subsystem(true, name))
            .await??;
        self.await_reply("subsystem", deadline).await
    }

    pub(crate) async fn request_x11_locked(
        &mut self,
        screen: u32,
        single_connection: bool,
        auth_protocol: &str,
        auth_cookie: &str,
        deadline: &Deadline,
    ) -> Result<()> {
        self.ensure_open()?;
        deadline
            .bound(
                "request_x11",
                self.channel.request_x11(
                    true,
                    single_connection,
                    auth_protocol,
                    auth_cookie,
                    screen,
                ),
            )
            .await??;
        self.await_reply("request_x11", deadline).await
    }

    pub(crate) async fn send_eof_locked(&mut self, deadline: &Deadline) -> Result<()> {
        self.ensure_open()?;
        deadline.bound("send_eof", self.channel.eof()).await??;
        Ok(())
    }

    pub(crate) async fn wait_eof_locked(&mut self, deadline: &Deadline) -> Result<()> {
        self.ensure_open()?;
        self.drain_ready();
        while !self.remote_eof && !self.remote_closed {
            if !self.pump("wait_eof", deadline).await? {
                break;
            }
        }
        Ok(())
    }

    pub(crate) async fn wait_closed_locked(&mut self, deadline: &Deadline) -> Result<()> {
        self.ensure_open()?;
        self.drain_ready();
        while !self.remote_closed {
            if !self.pump("wait_closed", deadline).await? {
                break;
            }
        }
        Ok(())
    }

    pub(crate) async fn close_locked(&mut self, deadline: &Deadline) -> Result<()> {
        self.ensure_open()?;
        let result: Result<()> = async {
            deadline.bound("close", self.channel.close()).await??;
            while !self.remote_closed {
                if !self.pump("close", deadline).await? {
                    break;
                }
            }
            Ok(())
        }
        .await;
        // The local side is freed exactly once, even when the negotiated
        // close timed out; the protocol state is not trustworthy after an
        // abandoned exchange.
        self.open = false;
        result
    }

    // --- data transfer ---------------------------------------------------

    pub(crate) async fn read_locked(&mut self, idx: usize, deadline: &Deadline) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.drain_ready();
        if self.bufs[idx].is_empty() && !self.remote_eof && !self.remote_closed {
            // Nothing buffered yet: wait for the first batch, then settle.
            loop {
                if !self.pump("read", deadline).await? {
                    break;
                }
                if !self.bufs[idx].is_empty() || self.remote_eof || self.remote_closed {
                    break;
                }
            }
            self.drain_ready();
        }
        Ok(std::mem::take(&mut self.bufs[idx]))
    }

    pub(crate) async fn read_block_locked(
        &mut self,
        want: usize,
        idx: usize,
        deadline: &Deadline,
    ) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let mut out = Vec::with_capacity(want);
        loop {
            self.drain_ready();
            if !self.bufs[idx].is_empty() {
                let take = (want - out.len()).min(self.bufs[idx].len());
                out.extend(self.bufs[idx].drain(..take));
            }
            if out.len() == want {
                return Ok(out);
            }
            if self.remote_eof || self.remote_closed {
                return Err(Error::Eof {
                    got: out.len(),
                    want,
                });
            }
            // Each blocking gap consumes the shared budget; expiry reports
            // progress so far against the requested count.
            let op = format!("read_block ({}/{} bytes)", out.len(), want);
            self.pump(&op, deadline).await?;
        }
    }

    pub(crate) async fn write_locked(
        &mut self,
        data: &[u8],
        idx: usize,
        deadline: &Deadline,
    ) -> Result<u64> {
        self.ensure_open()?;
        if data.is_empty() {
            return Ok(0);
        }
        let mut written: u64 = 0;
        for chunk in data.chunks(config::TRANSFER_CHUNK_SIZE) {
            if idx == 0 {
                deadline.bound("write", self.channel.data(chunk)).await??;
            } else {
                deadline
                    .bound("write", self.channel.extended_data(1, chunk))
                    .await??;
            }
            written += chunk.len() as u64;
        }
        Ok(written)
    }

    // --- public surface --------------------------------------------------

    /// Set a remote environment variable on the channel.
    pub async fn setenv(&mut self, name: &str, value: &str, timeout_ms: Option<i64>) -> Result<()> {
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let session = self.session.clone();
        let _guard = deadline.bound("setenv", session.lock()).await?;
        self.setenv_locked(name, value, &deadline).await
    }

    /// Request a pseudo-terminal on the channel.
    #[allow(clippy::too_many_arguments)]
    pub async fn request_pty(
        &mut self,
        term: &str,
        modes: &[(Pty, u32)],
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        timeout_ms: Option<i64>,
    ) -> Result<()> {
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let session = self.session.clone();
        let _guard = deadline.bound("request_pty", session.lock()).await?;
        self.request_pty_locked(
            term, modes, col_width, row_height, pix_width, pix_height, &deadline,
        )
        .await
    }

    /// Start the remote user's login shell on the channel.
    pub async fn shell(&mut self, timeout_ms: Option<i64>) -> Result<()> {
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let session = self.session.clone();
        let _guard = deadline.bound("shell", session.lock()).await?;
        self.shell_locked(&deadline).await
    }

    /// Execute a command on the channel.
    pub async fn exec(&mut self, command: &str, timeout_ms: Option<i64>) -> Result<()> {
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let session = self.session.clone();
        let _guard = deadline.bound("exec", session.lock()).await?;
        self.exec_locked(command, &deadline).await
    }

    /// Start a named subsystem (e.g. `sftp`) on the channel.
    pub async fn subsystem(&mut self, name: &str, timeout_ms: Option<i64>) -> Result<()> {
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let session = self.session.clone();
        let _guard = deadline.bound("subsystem", session.lock()).await?;
        self.subsystem_locked(name, &deadline).await
    }

    /// Request X11 forwarding for the channel.
    pub async fn request_x11_forwarding(
        &mut self,
        screen: u32,
        single_connection: bool,
        auth_protocol: &str,
        auth_cookie: &str,
        timeout_ms: Option<i64>,
    ) -> Result<()> {
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let session = self.session.clone();
        let _guard = deadline.bound("request_x11", session.lock()).await?;
        self.request_x11_locked(
            screen,
            single_connection,
            auth_protocol,
            auth_cookie,
            &deadline,
        )
        .await
    }

    /// Whether the remote end has signaled end-of-stream. Local query of
    /// already-received state; performs no wire round-trip.
    pub fn eof(&mut self) -> bool {
        if self.open && !self.cancel.is_cancelled() {
            self.drain_ready();
        }
        self.remote_eof || self.remote_closed
    }

    /// Signal end-of-stream to the remote end.
    pub async fn send_eof(&mut self, timeout_ms: Option<i64>) -> Result<()> {
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let session = self.session.clone();
        let _guard = deadline.bound("send_eof", session.lock()).await?;
        self.send_eof_locked(&deadline).await
    }

    /// Wait until the remote end signals end-of-stream.
    pub async fn wait_eof(&mut self, timeout_ms: Option<i64>) -> Result<()> {
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let session = self.session.clone();
        let _guard = deadline.bound("wait_eof", session.lock()).await?;
        self.wait_eof_locked(&deadline).await
    }

    /// Negotiated close: send the close message, wait for the remote close,
    /// then free the local side and deregister from the session.
    pub async fn close(&mut self, timeout_ms: Option<i64>) -> Result<()> {
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let session = self.session.clone();
        let mut guard = deadline.bound("close", session.lock()).await?;
        let result = self.close_locked(&deadline).await;
        guard.channels.remove(&self.id);
        result
    }

    /// Wait until the remote end closes the channel.
    pub async fn wait_closed(&mut self, timeout_ms: Option<i64>) -> Result<()> {
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let session = self.session.clone();
        let _guard = deadline.bound("wait_closed", session.lock()).await?;
        self.wait_closed_locked(&deadline).await
    }

    /// Exit code of the remote process, once the remote end reported it.
    /// Only valid while the channel is still open; the value stays `None`
    /// until the remote side has finished.
    pub fn exit_status(&mut self) -> Result<Option<u32>> {
        self.ensure_open()?;
        self.drain_ready();
        Ok(self.exit_status)
    }

    /// Read whatever is available on the stream and decode it as text.
    ///
    /// Settles after the first batch: data arriving once something is
    /// already buffered is left for the next call.
    pub async fn read(&mut self, stream_id: i32, timeout_ms: Option<i64>) -> Result<String> {
        let bytes = self.read_binary(stream_id, timeout_ms).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Binary variant of [`Channel::read`]; the encoding is not applied.
    pub async fn read_binary(
        &mut self,
        stream_id: i32,
        timeout_ms: Option<i64>,
    ) -> Result<Vec<u8>> {
        let idx = Self::stream_index(stream_id)?;
        let deadline = Deadline::new(config::resolve_read_timeout_ms(timeout_ms));
        let session = self.session.clone();
        let _guard = deadline.bound("read", session.lock()).await?;
        self.read_locked(idx, &deadline).await
    }

    /// Read exactly `size` bytes and decode them as text.
    pub async fn read_block(
        &mut self,
        size: i64,
        stream_id: i32,
        timeout_ms: Option<i64>,
    ) -> Result<String> {
        let bytes = self.read_binary_block(size, stream_id, timeout_ms).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read exactly `size` bytes, or fail with a timeout/EOF error that
    /// reports progress; never returns a short buffer.
    pub async fn read_binary_block(
        &mut self,
        size: i64,
        stream_id: i32,
        timeout_ms: Option<i64>,
    ) -> Result<Vec<u8>> {
        let idx = Self::stream_index(stream_id)?;
        if size <= 0 {
            return Err(Error::usage(format!("block size must be positive, got {size}")));
        }
        let deadline = Deadline::new(config::resolve_read_timeout_ms(timeout_ms));
        let session = self.session.clone();
        let _guard = deadline.bound("read_block", session.lock()).await?;
        self.read_block_locked(size as usize, idx, &deadline).await
    }

    /// Write the whole buffer to the stream, returning the byte count.
    /// An empty buffer is a silent no-op with no wire I/O.
    pub async fn write(
        &mut self,
        data: &[u8],
        stream_id: i32,
        timeout_ms: Option<i64>,
    ) -> Result<u64> {
        let idx = Self::stream_index(stream_id)?;
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let session = self.session.clone();
        let _guard = deadline.bound("write", session.lock()).await?;
        self.write_locked(data, idx, &deadline).await
    }

    /// Route extended data into its own stream (the default).
    pub fn extended_data_normal(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.ext_mode = ExtendedDataMode::Separate;
        Ok(())
    }

    /// Merge extended data into the primary stream.
    pub fn extended_data_merge(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.ext_mode = ExtendedDataMode::Merged;
        Ok(())
    }

    /// Discard extended data on arrival.
    pub fn extended_data_ignore(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.ext_mode = ExtendedDataMode::Ignored;
        Ok(())
    }

    /// Select the text encoding used by the non-binary read variants.
    pub fn set_encoding(&mut self, name: &str) -> Result<()> {
        let normalized = name.trim().to_lowercase();
        match SUPPORTED_ENCODINGS
            .iter()
            .find(|candidate| **candidate == normalized)
        {
            Some(canonical) => {
                self.encoding = canonical;
                Ok(())
            }
            None => Err(Error::usage(format!("unsupported encoding '{name}'"))),
        }
    }

    /// Name of the current text encoding.
    pub fn encoding(&self) -> &str {
        self.encoding
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            // Best-effort deregistration; the protocol side is freed when
            // the russh channel drops. Never blocks, never panics.
            if let Ok(mut inner) = self.session.try_lock() {
                inner.channels.remove(&self.id);
            }
            debug!("channel {} dropped while open", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod stream_ids {
        use super::*;

        #[test]
        fn test_primary_and_auxiliary_map_to_buffers() {
            assert_eq!(Channel::stream_index(0).expect("primary"), 0);
            assert_eq!(Channel::stream_index(1).expect("auxiliary"), 1);
        }

        #[test]
        fn test_negative_stream_id_is_usage_error() {
            let err = Channel::stream_index(-1).expect_err("negative id");
            assert!(matches!(err, Error::Usage(_)));
        }

        #[test]
        fn test_out_of_range_stream_id_is_usage_error() {
            let err = Channel::stream_index(7).expect_err("unknown stream");
            assert!(matches!(err, Error::Usage(_)));
        }
    }

    mod extended_data_mode {
        use super::*;

        #[test]
        fn test_default_is_separate() {
            assert_eq!(ExtendedDataMode::default(), ExtendedDataMode::Separate);
        }
    }

    mod encodings {
        use super::*;

        #[test]
        fn test_supported_table_contains_utf8() {
            assert!(SUPPORTED_ENCODINGS.contains(&"utf-8"));
            assert!(SUPPORTED_ENCODINGS.contains(&"ascii"));
        }
    }
}
