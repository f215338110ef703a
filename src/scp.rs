//! Client side of the SCP wire protocol.
//!
//! SCP runs over a session channel executing the remote `scp` program in
//! source (`-f`) or sink (`-t`) mode. The wire format is line-oriented:
//! `C<mode> <size> <name>` announces a file, `T<mtime> 0 <atime> 0`
//! optionally precedes it with timestamps, and every step is acknowledged
//! with a single status byte (0 = ok, 1 = warning, 2 = fatal error, both
//! followed by a message line).
//!
//! `source_handshake` drives the remote source up to the first content
//! byte, so the caller can pull exactly `size` bytes off the channel.
//! `sink_handshake` drives the remote sink up to the point where it expects
//! the content, so the caller can push `size` bytes and finish with the
//! trailing ack.

use tracing::debug;

use crate::channel::Channel;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::types::ScpFileInfo;

const SCP_OK: u8 = 0;
const SCP_WARNING: u8 = 1;
const SCP_ERROR: u8 = 2;

/// Quote a path for the remote shell command line.
pub(crate) fn shell_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', "'\\''"))
}

/// Parse a `C<mode> <size> <name>` file header.
///
/// The mode is masked to the user/group/other permission bits; setuid,
/// setgid and sticky bits announced by a remote source are not honored.
pub(crate) fn parse_file_header(line: &str) -> Result<(u32, u64, String)> {
    let body = line
        .strip_prefix('C')
        .ok_or_else(|| Error::Scp(format!("expected file header, got '{line}'")))?;
    let parts: Vec<&str> = body.splitn(3, ' ').collect();
    if parts.len() != 3 {
        return Err(Error::Scp(format!("malformed file header '{line}'")));
    }
    let mode = u32::from_str_radix(parts[0], 8)
        .map_err(|_| Error::Scp(format!("invalid mode in header '{line}'")))?
        & 0o777;
    let size: u64 = parts[1]
        .parse()
        .map_err(|_| Error::Scp(format!("invalid size in header '{line}'")))?;
    let name = parts[2].trim().to_string();
    if name.is_empty() {
        return Err(Error::Scp(format!("empty file name in header '{line}'")));
    }
    Ok((mode, size, name))
}

/// Parse a `T<mtime> 0 <atime> 0` timestamp header.
pub(crate) fn parse_time_header(line: &str) -> Result<(u64, u64)> {
    let body = line
        .strip_prefix('T')
        .ok_or_else(|| Error::Scp(format!("expected time header, got '{line}'")))?;
    let fields: Vec<&str> = body.split_whitespace().collect();
    if fields.len() != 4 {
        return Err(Error::Scp(format!("malformed time header '{line}'")));
    }
    let mtime: u64 = fields[0]
        .parse()
        .map_err(|_| Error::Scp(format!("invalid mtime in header '{line}'")))?;
    let atime: u64 = fields[2]
        .parse()
        .map_err(|_| Error::Scp(format!("invalid atime in header '{line}'")))?;
    Ok((mtime, atime))
}

/// Format the file header sent to a remote sink.
pub(crate) fn format_file_header(mode: u32, size: u64, name: &str) -> String {
    format!("C{:04o} {} {}\n", mode & 0o777, size, name)
}

/// Format the timestamp header sent to a remote sink.
pub(crate) fn format_time_header(mtime: u64, atime: u64) -> String {
    format!("T{mtime} 0 {atime} 0\n")
}

async fn send_ack(channel: &mut Channel, deadline: &Deadline) -> Result<()> {
    channel.write_locked(&[SCP_OK], 0, deadline).await?;
    Ok(())
}

/// Read one status byte; warnings and errors carry a message line.
async fn expect_ack(channel: &mut Channel, deadline: &Deadline) -> Result<()> {
    let byte = channel.read_block_locked(1, 0, deadline).await?;
    match byte[0] {
        SCP_OK => Ok(()),
        status @ (SCP_WARNING | SCP_ERROR) => {
            let message = read_line(channel, deadline).await.unwrap_or_default();
            if status == SCP_WARNING {
                debug!("scp warning: {}", message);
                Ok(())
            } else {
                Err(Error::Scp(format!("remote scp error: {message}")))
            }
        }
        other => Err(Error::Scp(format!("unexpected scp status byte {other}"))),
    }
}

/// Read a newline-terminated protocol line off the channel.
async fn read_line(channel: &mut Channel, deadline: &Deadline) -> Result<String> {
    let mut line = Vec::new();
    loop {
        let byte = channel.read_block_locked(1, 0, deadline).await?;
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > 4096 {
            return Err(Error::Scp("scp header line too long".to_string()));
        }
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// Drive a source-mode (`scp -f`) channel to the first content byte.
///
/// On return the caller reads exactly `size` bytes of file content off the
/// channel, followed by the remote's trailing status byte.
pub(crate) async fn source_handshake(
    channel: &mut Channel,
    path: &str,
    deadline: &Deadline,
) -> Result<ScpFileInfo> {
    channel
        .exec_locked(&format!("scp -f -- {}", shell_quote(path)), deadline)
        .await?;

    // The source waits for our ready signal before announcing anything.
    send_ack(channel, deadline).await?;

    let mut mtime = None;
    let mut atime = None;
    loop {
        let status = channel.read_block_locked(1, 0, deadline).await?;
        match status[0] {
            b'T' => {
                let line = read_line(channel, deadline).await?;
                let (m, a) = parse_time_header(&format!("T{line}"))?;
                mtime = Some(m);
                atime = Some(a);
                send_ack(channel, deadline).await?;
            }
            b'C' => {
                let line = read_line(channel, deadline).await?;
                let (mode, size, name) = parse_file_header(&format!("C{line}"))?;
                // Acknowledge the header; content follows immediately.
                send_ack(channel, deadline).await?;
                debug!("scp source announced {} ({} bytes)", name, size);
                return Ok(ScpFileInfo {
                    name,
                    size,
                    mode,
                    mtime,
                    atime,
                });
            }
            SCP_WARNING | SCP_ERROR => {
                let message = read_line(channel, deadline).await.unwrap_or_default();
                return Err(Error::Scp(format!("remote scp error: {message}")));
            }
            other => {
                return Err(Error::Scp(format!(
                    "unexpected scp control byte {other} while waiting for file header"
                )));
            }
        }
    }
}

/// Drive a sink-mode (`scp -t`) channel to the point where it expects
/// exactly `size` bytes of content.
///
/// The caller pushes the content, then a single zero byte, and finally
/// waits for the sink's acknowledgment (see `Channel::write` /
/// `Channel::send_eof`).
pub(crate) async fn sink_handshake(
    channel: &mut Channel,
    path: &str,
    size: u64,
    mode: u32,
    mtime: Option<u64>,
    atime: Option<u64>,
    deadline: &Deadline,
) -> Result<()> {
    let times = mtime.is_some() || atime.is_some();
    let flags = if times { "-p -t" } else { "-t" };
    channel
        .exec_locked(&format!("scp {} -- {}", flags, shell_quote(path)), deadline)
        .await?;

    // The sink signals readiness before and after every header.
    expect_ack(channel, deadline).await?;

    if times {
        let header = format_time_header(mtime.unwrap_or(0), atime.unwrap_or(0));
        channel.write_locked(header.as_bytes(), 0, deadline).await?;
        expect_ack(channel, deadline).await?;
    }

    let name = path.rsplit('/').next().unwrap_or(path);
    let header = format_file_header(mode, size, name);
    channel.write_locked(header.as_bytes(), 0, deadline).await?;
    expect_ack(channel, deadline).await?;

    debug!("scp sink ready for {} ({} bytes)", name, size);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    mod file_headers {
        use super::*;

        #[test]
        fn test_parse_plain_header() {
            let (mode, size, name) = parse_file_header("C0644 1234 notes.txt").expect("header");
            assert_eq!(mode, 0o644);
            assert_eq!(size, 1234);
            assert_eq!(name, "notes.txt");
        }

        #[test]
        fn test_parse_masks_setuid_bits() {
            let (mode, _, _) = parse_file_header("C4755 10 tool").expect("header");
            assert_eq!(mode, 0o755);
        }

        #[test]
        fn test_parse_name_with_spaces() {
            let (_, _, name) = parse_file_header("C0600 5 with space.txt").expect("header");
            assert_eq!(name, "with space.txt");
        }

        #[test]
        fn test_parse_rejects_missing_fields() {
            assert!(parse_file_header("C0644 1234").is_err());
        }

        #[test]
        fn test_parse_rejects_bad_mode() {
            assert!(parse_file_header("C09xx 1 f").is_err());
        }

        #[test]
        fn test_format_round_trip() {
            let line = format_file_header(0o640, 42, "data.bin");
            assert_eq!(line, "C0640 42 data.bin\n");
            let (mode, size, name) = parse_file_header(line.trim_end()).expect("round trip");
            assert_eq!((mode, size, name.as_str()), (0o640, 42, "data.bin"));
        }

        #[test]
        fn test_format_masks_mode() {
            assert_eq!(format_file_header(0o4755, 1, "x"), "C0755 1 x\n");
        }
    }

    mod time_headers {
        use super::*;

        #[test]
        fn test_parse_time_header() {
            let (mtime, atime) = parse_time_header("T1700000000 0 1700000100 0").expect("header");
            assert_eq!(mtime, 1_700_000_000);
            assert_eq!(atime, 1_700_000_100);
        }

        #[test]
        fn test_parse_rejects_short_header() {
            assert!(parse_time_header("T170 0").is_err());
        }

        #[test]
        fn test_format_round_trip() {
            let line = format_time_header(100, 200);
            let (mtime, atime) = parse_time_header(line.trim_end()).expect("round trip");
            assert_eq!((mtime, atime), (100, 200));
        }
    }

    mod quoting {
        use super::*;

        #[test]
        fn test_plain_path() {
            assert_eq!(shell_quote("/tmp/file"), "'/tmp/file'");
        }

        #[test]
        fn test_path_with_space() {
            assert_eq!(shell_quote("/tmp/my file"), "'/tmp/my file'");
        }

        #[test]
        fn test_path_with_quote() {
            assert_eq!(shell_quote("it's"), "'it'\\''s'");
        }
    }
}
