//! SFTP client layered on one subsystem channel of a session.
//!
//! The subsystem channel and the remembered working directory live in the
//! session's shared state, so at most one SFTP subsystem exists per
//! transport session and all SFTP operations serialize with session and
//! channel operations.
//!
//! Every public operation implicitly connects: first the transport (a
//! failed implicit connect surfaces as that connect error, not as a
//! generic "not connected"), then the subsystem. The working directory is
//! seeded from the server-side realpath of `.` only when none was
//! previously recorded, so it survives subsystem reconnects.
//!
//! # Path resolution
//!
//! Applied before every wire call, never cached: an empty path means the
//! working directory itself; a path starting with `/` is used as-is; any
//! other path is joined as `<cwd>/<path>`.

use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::config;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::session::{
    Inner, SshSession, connect_locked, open_session_channel_locked, session_info_locked,
};
use crate::types::{
    AttrStatus, DirectoryListing, EntryInfo, EntryKind, FileAttrs, SftpInfo, mode_string,
};

/// Subsystem state stored in the session.
pub(crate) struct SftpState {
    pub(crate) session: SftpSession,
}

/// SFTP operations on an [`SshSession`]. Cheap to clone; clones share the
/// session's state and working directory.
#[derive(Clone)]
pub struct SftpClient {
    inner: std::sync::Arc<tokio::sync::Mutex<Inner>>,
}

impl SshSession {
    /// The SFTP client for this session.
    pub fn sftp(&self) -> SftpClient {
        SftpClient {
            inner: self.inner.clone(),
        }
    }
}

/// Resolve a path argument against the working directory.
pub(crate) fn resolve_path(cwd: &str, path: &str) -> String {
    if path.is_empty() {
        cwd.to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        let base = cwd.trim_end_matches('/');
        format!("{base}/{path}")
    }
}

fn is_not_found(e: &russh_sftp::client::error::Error) -> bool {
    matches!(
        e,
        russh_sftp::client::error::Error::Status(s)
            if s.status_code == StatusCode::NoSuchFile
    )
}

/// Ensure transport and subsystem are up; seed the working directory on
/// first connect.
async fn ensure_sftp_locked(inner: &mut Inner, deadline: &Deadline) -> Result<()> {
    if !inner.is_connected() {
        connect_locked(inner, deadline).await?;
    }

    if inner.sftp.is_none() {
        let raw = open_session_channel_locked(inner, deadline).await?;
        deadline
            .bound("sftp subsystem", raw.request_subsystem(true, "sftp"))
            .await??;
        let session = deadline
            .bound("sftp init", SftpSession::new(raw.into_stream()))
            .await?
            .map_err(|e| Error::sftp(".", e))?;
        debug!("SFTP subsystem established");
        inner.sftp = Some(SftpState { session });
    }

    if inner.sftp_cwd.is_none() {
        let resolved = match inner.sftp.as_ref() {
            Some(state) => {
                deadline
                    .bound("realpath", state.session.canonicalize("."))
                    .await
            }
            None => return Err(Error::NotConnected),
        };
        match resolved {
            Ok(Ok(cwd)) => {
                debug!("SFTP working directory seeded to {}", cwd);
                inner.sftp_cwd = Some(cwd);
            }
            Ok(Err(e)) => {
                // Without a working directory the session is unusable;
                // tear the subsystem down again.
                inner.sftp = None;
                return Err(Error::sftp(".", e));
            }
            Err(timeout) => {
                inner.sftp = None;
                return Err(timeout);
            }
        }
    }

    Ok(())
}

fn sftp_state(inner: &Inner) -> Result<&SftpState> {
    inner.sftp.as_ref().ok_or(Error::NotConnected)
}

fn working_dir(inner: &Inner) -> String {
    inner.sftp_cwd.clone().unwrap_or_else(|| "/".to_string())
}

/// Attribute record with the pairing rules applied: times and owner ids
/// are reported as pairs or not at all.
fn build_file_attrs(path: String, attrs: &FileAttributes) -> FileAttrs {
    let (atime, mtime) = match (attrs.atime, attrs.mtime) {
        (Some(a), Some(m)) => (Some(a), Some(m)),
        _ => (None, None),
    };
    let (uid, gid) = match (attrs.uid, attrs.gid) {
        (Some(u), Some(g)) => (Some(u), Some(g)),
        _ => (None, None),
    };
    FileAttrs {
        path,
        size: attrs.size,
        atime,
        mtime,
        uid,
        gid,
        permissions: attrs.permissions,
        mode_string: attrs.permissions.map(mode_string),
    }
}

fn build_entry_info(name: String, attrs: &FileAttributes) -> EntryInfo {
    match attrs.permissions {
        Some(perms) => EntryInfo {
            name,
            size: attrs.size,
            atime: attrs.atime,
            mtime: attrs.mtime,
            uid: attrs.uid,
            gid: attrs.gid,
            permissions: Some(perms),
            kind: EntryKind::from_mode(perms),
            mode_string: Some(mode_string(perms)),
        },
        // No permission metadata from the server: report the name only.
        None => EntryInfo {
            name,
            size: None,
            atime: None,
            mtime: None,
            uid: None,
            gid: None,
            permissions: None,
            kind: EntryKind::Unknown,
            mode_string: None,
        },
    }
}

impl SftpClient {
    /// Connect the SFTP subsystem (and the transport, if needed).
    pub async fn connect(&self, timeout_ms: Option<i64>) -> Result<()> {
        let deadline = Deadline::new(config::resolve_connect_timeout_ms(timeout_ms));
        let mut inner = deadline.bound("sftp connect", self.inner.lock()).await?;
        ensure_sftp_locked(&mut inner, &deadline).await
    }

    /// Tear down the subsystem channel. The remembered working directory
    /// survives and is reused on the next implicit connect.
    pub async fn disconnect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.sftp.take().is_some() {
            debug!("SFTP subsystem closed");
        }
        Ok(())
    }

    /// Transport and subsystem metadata.
    pub async fn info(&self) -> SftpInfo {
        let inner = self.inner.lock().await;
        SftpInfo {
            session: session_info_locked(&inner),
            subsystem_connected: inner.sftp.is_some(),
            working_directory: inner.sftp_cwd.clone(),
        }
    }

    /// The current remote working directory, connecting implicitly.
    pub async fn path(&self) -> Result<String> {
        let deadline = Deadline::new(config::resolve_connect_timeout_ms(None));
        let mut inner = deadline.bound("sftp path", self.inner.lock()).await?;
        ensure_sftp_locked(&mut inner, &deadline).await?;
        Ok(working_dir(&inner))
    }

    /// List a directory, bucketing entry names into sorted directory,
    /// file and symlink lists.
    pub async fn list(
        &self,
        path: Option<&str>,
        timeout_ms: Option<i64>,
    ) -> Result<DirectoryListing> {
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let mut inner = deadline.bound("list", self.inner.lock()).await?;
        ensure_sftp_locked(&mut inner, &deadline).await?;
        let resolved = resolve_path(&working_dir(&inner), path.unwrap_or(""));
        let state = sftp_state(&inner)?;

        let dir = deadline
            .bound("list", state.session.read_dir(&resolved))
            .await?
            .map_err(|e| Error::sftp(&resolved, e))?;

        let mut directories = Vec::new();
        let mut files = Vec::new();
        let mut links = Vec::new();
        for entry in dir {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let attrs = entry.metadata();
            if attrs.is_dir() {
                directories.push(name);
            } else if attrs.is_symlink() {
                links.push(name);
            } else {
                // Entries without reported type bits count as files.
                files.push(name);
            }
        }
        directories.sort();
        files.sort();
        links.sort();

        Ok(DirectoryListing {
            path: resolved,
            directories,
            files,
            links,
        })
    }

    /// List a directory as one record per entry, in server order.
    pub async fn list_full(
        &self,
        path: Option<&str>,
        timeout_ms: Option<i64>,
    ) -> Result<Vec<EntryInfo>> {
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let mut inner = deadline.bound("list_full", self.inner.lock()).await?;
        ensure_sftp_locked(&mut inner, &deadline).await?;
        let resolved = resolve_path(&working_dir(&inner), path.unwrap_or(""));
        let state = sftp_state(&inner)?;

        let dir = deadline
            .bound("list_full", state.session.read_dir(&resolved))
            .await?
            .map_err(|e| Error::sftp(&resolved, e))?;

        let mut entries = Vec::new();
        for entry in dir {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let attrs = entry.metadata();
            entries.push(build_entry_info(name, &attrs));
        }
        Ok(entries)
    }

    /// Stat a path. `Ok(None)` is the distinct "does not exist" outcome;
    /// other failures raise.
    pub async fn stat(&self, path: &str, timeout_ms: Option<i64>) -> Result<Option<FileAttrs>> {
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let mut inner = deadline.bound("stat", self.inner.lock()).await?;
        ensure_sftp_locked(&mut inner, &deadline).await?;
        let resolved = resolve_path(&working_dir(&inner), path);
        let state = sftp_state(&inner)?;

        let real = match deadline
            .bound("realpath", state.session.canonicalize(&resolved))
            .await?
        {
            Ok(real) => real,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(Error::sftp(&resolved, e)),
        };

        match deadline.bound("stat", state.session.metadata(&real)).await? {
            Ok(attrs) => Ok(Some(build_file_attrs(real, &attrs))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(Error::sftp(&real, e)),
        }
    }

    /// Three-way attribute query: found, not-found, or not-connected.
    pub async fn get_attributes(
        &self,
        path: &str,
        timeout_ms: Option<i64>,
    ) -> Result<AttrStatus> {
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let mut inner = deadline.bound("get_attributes", self.inner.lock()).await?;
        if ensure_sftp_locked(&mut inner, &deadline).await.is_err() {
            return Ok(AttrStatus::NotConnected);
        }
        let resolved = resolve_path(&working_dir(&inner), path);
        let state = sftp_state(&inner)?;

        match deadline
            .bound("get_attributes", state.session.metadata(&resolved))
            .await?
        {
            Ok(attrs) => Ok(AttrStatus::Found(build_file_attrs(resolved, &attrs))),
            Err(e) if is_not_found(&e) => Ok(AttrStatus::NotFound),
            Err(e) => Err(Error::sftp(&resolved, e)),
        }
    }

    /// Change the user/group/other permission bits of a path.
    ///
    /// Modes carrying bits outside `0o777` (setuid, setgid, sticky) are
    /// rejected before any wire I/O. The current attributes are read and
    /// merged so the file type bits survive the write-back. A failed
    /// setstat is tolerated when a re-read shows the permissions were
    /// applied anyway - some servers signal an error and apply the change.
    pub async fn chmod(&self, path: &str, mode: u32, timeout_ms: Option<i64>) -> Result<()> {
        if mode & !0o777 != 0 {
            return Err(Error::usage(format!(
                "mode {mode:o} has bits outside the user/group/other permission range"
            )));
        }
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let mut inner = deadline.bound("chmod", self.inner.lock()).await?;
        ensure_sftp_locked(&mut inner, &deadline).await?;
        let resolved = resolve_path(&working_dir(&inner), path);
        let state = sftp_state(&inner)?;

        let mut attrs = deadline
            .bound("chmod stat", state.session.metadata(&resolved))
            .await?
            .map_err(|e| Error::sftp(&resolved, e))?;

        let current = attrs.permissions.unwrap_or(0);
        let target = (current & !0o777) | mode;
        attrs.permissions = Some(target);

        match deadline
            .bound("chmod setstat", state.session.set_metadata(&resolved, attrs))
            .await?
        {
            Ok(()) => Ok(()),
            Err(e) => {
                // Compatibility: re-read once and accept when the server
                // applied the change despite reporting an error.
                let reread = deadline
                    .bound("chmod re-stat", state.session.metadata(&resolved))
                    .await?;
                if let Ok(after) = reread
                    && after.permissions.map(|p| p & 0o777) == Some(mode)
                {
                    warn!(
                        "setstat on '{}' reported an error but applied mode {:o}",
                        resolved, mode
                    );
                    return Ok(());
                }
                Err(Error::sftp(&resolved, e))
            }
        }
    }

    /// Create a directory with the given permission bits.
    pub async fn mkdir(&self, path: &str, mode: u32, timeout_ms: Option<i64>) -> Result<()> {
        if path.is_empty() {
            return Err(Error::usage("mkdir requires a non-empty path"));
        }
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let mut inner = deadline.bound("mkdir", self.inner.lock()).await?;
        ensure_sftp_locked(&mut inner, &deadline).await?;
        let resolved = resolve_path(&working_dir(&inner), path);
        let state = sftp_state(&inner)?;

        deadline
            .bound("mkdir", state.session.create_dir(&resolved))
            .await?
            .map_err(|e| Error::sftp(&resolved, e))?;

        let mut attrs = FileAttributes::default();
        attrs.permissions = Some(mode & 0o777);
        deadline
            .bound("mkdir setstat", state.session.set_metadata(&resolved, attrs))
            .await?
            .map_err(|e| Error::sftp(&resolved, e))?;

        info!("created remote directory {}", resolved);
        Ok(())
    }

    /// Remove an empty directory.
    pub async fn rmdir(&self, path: &str, timeout_ms: Option<i64>) -> Result<()> {
        if path.is_empty() {
            return Err(Error::usage("rmdir requires a non-empty path"));
        }
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let mut inner = deadline.bound("rmdir", self.inner.lock()).await?;
        ensure_sftp_locked(&mut inner, &deadline).await?;
        let resolved = resolve_path(&working_dir(&inner), path);
        let state = sftp_state(&inner)?;

        deadline
            .bound("rmdir", state.session.remove_dir(&resolved))
            .await?
            .map_err(|e| Error::sftp(&resolved, e))
    }

    /// Remove a file.
    pub async fn remove_file(&self, path: &str, timeout_ms: Option<i64>) -> Result<()> {
        if path.is_empty() {
            return Err(Error::usage("remove_file requires a non-empty path"));
        }
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let mut inner = deadline.bound("remove_file", self.inner.lock()).await?;
        ensure_sftp_locked(&mut inner, &deadline).await?;
        let resolved = resolve_path(&working_dir(&inner), path);
        let state = sftp_state(&inner)?;

        deadline
            .bound("remove_file", state.session.remove_file(&resolved))
            .await?
            .map_err(|e| Error::sftp(&resolved, e))
    }

    /// Rename a file or directory.
    pub async fn rename(&self, from: &str, to: &str, timeout_ms: Option<i64>) -> Result<()> {
        if from.is_empty() || to.is_empty() {
            return Err(Error::usage("rename requires non-empty paths"));
        }
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let mut inner = deadline.bound("rename", self.inner.lock()).await?;
        ensure_sftp_locked(&mut inner, &deadline).await?;
        let cwd = working_dir(&inner);
        let resolved_from = resolve_path(&cwd, from);
        let resolved_to = resolve_path(&cwd, to);
        let state = sftp_state(&inner)?;

        deadline
            .bound("rename", state.session.rename(&resolved_from, &resolved_to))
            .await?
            .map_err(|e| Error::sftp(format!("{resolved_from} -> {resolved_to}"), e))
    }

    /// Change the working directory.
    ///
    /// The requested path is resolved, canonicalized server-side and
    /// verified to be a listable directory; only then is it committed.
    /// Any failure leaves the working directory unchanged.
    pub async fn chdir(&self, path: Option<&str>, timeout_ms: Option<i64>) -> Result<String> {
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let mut inner = deadline.bound("chdir", self.inner.lock()).await?;
        ensure_sftp_locked(&mut inner, &deadline).await?;
        let resolved = resolve_path(&working_dir(&inner), path.unwrap_or(""));

        let canonical = {
            let state = sftp_state(&inner)?;
            let canonical = deadline
                .bound("chdir realpath", state.session.canonicalize(&resolved))
                .await?
                .map_err(|e| Error::sftp(&resolved, e))?;

            // Directory check: open the listing and discard it.
            deadline
                .bound("chdir open", state.session.read_dir(&canonical))
                .await?
                .map_err(|e| Error::sftp(&canonical, e))?;
            canonical
        };

        debug!("SFTP working directory changed to {}", canonical);
        inner.sftp_cwd = Some(canonical.clone());
        Ok(canonical)
    }

    /// Read a whole remote file.
    ///
    /// The reported size is read in chunks; a shorter result is tolerated
    /// when the remote file shrank between stat and read.
    pub async fn get_file(&self, path: &str, timeout_ms: Option<i64>) -> Result<Vec<u8>> {
        if path.is_empty() {
            return Err(Error::usage("get_file requires a non-empty path"));
        }
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let mut inner = deadline.bound("get_file", self.inner.lock()).await?;
        ensure_sftp_locked(&mut inner, &deadline).await?;
        let resolved = resolve_path(&working_dir(&inner), path);
        let state = sftp_state(&inner)?;

        let attrs = deadline
            .bound("get_file stat", state.session.metadata(&resolved))
            .await?
            .map_err(|e| Error::sftp(&resolved, e))?;
        let size = attrs.size.unwrap_or(0);

        let mut file = deadline
            .bound(
                "get_file open",
                state.session.open_with_flags(&resolved, OpenFlags::READ),
            )
            .await?
            .map_err(|e| Error::sftp(&resolved, e))?;

        let mut out = Vec::with_capacity(size as usize);
        let mut chunk = vec![0u8; config::TRANSFER_CHUNK_SIZE];
        while (out.len() as u64) < size {
            let n = deadline
                .bound("get_file read", file.read(&mut chunk))
                .await??;
            if n == 0 {
                // The remote file shrank; return what was read.
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }

        debug!("read {} bytes from {}", out.len(), resolved);
        Ok(out)
    }

    /// Read a whole remote file and decode it as text.
    pub async fn get_text_file(&self, path: &str, timeout_ms: Option<i64>) -> Result<String> {
        let bytes = self.get_file(path, timeout_ms).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Create (or truncate) a remote file with the given content and mode.
    ///
    /// The close is part of the contract: a failed close is an error even
    /// after every byte was written, because it acknowledges durability.
    pub async fn put_file(
        &self,
        data: &[u8],
        path: &str,
        mode: u32,
        timeout_ms: Option<i64>,
    ) -> Result<u64> {
        if path.is_empty() {
            return Err(Error::usage("put_file requires a non-empty path"));
        }
        let deadline = Deadline::new(timeout_ms.unwrap_or(-1));
        let mut inner = deadline.bound("put_file", self.inner.lock()).await?;
        ensure_sftp_locked(&mut inner, &deadline).await?;
        let resolved = resolve_path(&working_dir(&inner), path);
        let state = sftp_state(&inner)?;

        let mut file = deadline
            .bound(
                "put_file open",
                state.session.open_with_flags(
                    &resolved,
                    OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
                ),
            )
            .await?
            .map_err(|e| Error::sftp(&resolved, e))?;

        for chunk in data.chunks(config::TRANSFER_CHUNK_SIZE) {
            deadline
                .bound("put_file write", file.write_all(chunk))
                .await??;
        }
        deadline.bound("put_file flush", file.flush()).await??;
        deadline.bound("put_file close", file.shutdown()).await??;

        let mut attrs = FileAttributes::default();
        attrs.permissions = Some(mode & 0o777);
        deadline
            .bound("put_file chmod", state.session.set_metadata(&resolved, attrs))
            .await?
            .map_err(|e| Error::sftp(&resolved, e))?;

        debug!("wrote {} bytes to {}", data.len(), resolved);
        Ok(data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod path_resolution {
        use super::*;

        #[test]
        fn test_empty_path_is_working_directory() {
            assert_eq!(resolve_path("/home/alice", ""), "/home/alice");
        }

        #[test]
        fn test_absolute_path_used_as_is() {
            assert_eq!(resolve_path("/home/alice", "/etc/hosts"), "/etc/hosts");
        }

        #[test]
        fn test_relative_path_joined_to_working_directory() {
            assert_eq!(resolve_path("/home/alice", "notes.txt"), "/home/alice/notes.txt");
        }

        #[test]
        fn test_relative_path_with_subdirectories() {
            assert_eq!(resolve_path("/home/alice", "a/b/c"), "/home/alice/a/b/c");
        }

        #[test]
        fn test_root_working_directory_does_not_double_slash() {
            assert_eq!(resolve_path("/", "etc"), "/etc");
        }

        #[test]
        fn test_dot_is_relative() {
            assert_eq!(resolve_path("/home/alice", "."), "/home/alice/.");
        }

        #[test]
        fn test_resolution_is_not_cached_between_calls() {
            assert_eq!(resolve_path("/a", "x"), "/a/x");
            assert_eq!(resolve_path("/b", "x"), "/b/x");
        }
    }

    mod chmod_validation {
        use super::*;

        // The bit check happens before any wire I/O, so a disconnected
        // client exercises it fully.

        #[tokio::test]
        async fn test_sticky_bit_rejected() {
            let session = SshSession::new("203.0.113.7", 22);
            let err = session
                .sftp()
                .chmod("f.txt", 0o1644, Some(1000))
                .await
                .expect_err("sticky bit");
            assert!(matches!(err, Error::Usage(_)));
        }

        #[tokio::test]
        async fn test_setuid_bit_rejected() {
            let session = SshSession::new("203.0.113.7", 22);
            let err = session
                .sftp()
                .chmod("f.txt", 0o4755, Some(1000))
                .await
                .expect_err("setuid bit");
            assert!(matches!(err, Error::Usage(_)));
        }

        #[tokio::test]
        async fn test_plain_ugo_mode_passes_validation() {
            // With valid bits the call proceeds to the implicit connect,
            // which fails against an unset username - a different error
            // class than the usage rejection.
            let session = SshSession::new("203.0.113.7", 22);
            session.set_user("").await.expect("setter");
            let err = session
                .sftp()
                .chmod("f.txt", 0o600, Some(1000))
                .await
                .expect_err("connect failure");
            assert!(!matches!(err, Error::Usage(_)));
        }
    }

    mod usage_validation {
        use super::*;

        #[tokio::test]
        async fn test_mkdir_rejects_empty_path() {
            let session = SshSession::new("203.0.113.7", 22);
            let err = session
                .sftp()
                .mkdir("", 0o755, Some(1000))
                .await
                .expect_err("empty path");
            assert!(matches!(err, Error::Usage(_)));
        }

        #[tokio::test]
        async fn test_rename_rejects_empty_paths() {
            let session = SshSession::new("203.0.113.7", 22);
            let err = session
                .sftp()
                .rename("a", "", Some(1000))
                .await
                .expect_err("empty target");
            assert!(matches!(err, Error::Usage(_)));
        }

        #[tokio::test]
        async fn test_put_file_rejects_empty_path() {
            let session = SshSession::new("203.0.113.7", 22);
            let err = session
                .sftp()
                .put_file(b"data", "", 0o644, Some(1000))
                .await
                .expect_err("empty path");
            assert!(matches!(err, Error::Usage(_)));
        }
    }

    mod implicit_connect {
        use super::*;

        #[tokio::test]
        async fn test_list_surfaces_the_connect_error() {
            // Implicit connect with no username fails with the connect
            // path's config error, not a generic "not connected".
            let session = SshSession::new("203.0.113.7", 22);
            session.set_user("").await.expect("setter");
            let err = session
                .sftp()
                .list(None, Some(1000))
                .await
                .expect_err("implicit connect failure");
            assert!(matches!(err, Error::Config(_)));
        }

        #[tokio::test]
        async fn test_get_attributes_reports_not_connected() {
            let session = SshSession::new("203.0.113.7", 22);
            session.set_user("").await.expect("setter");
            let status = session
                .sftp()
                .get_attributes("/etc/hosts", Some(1000))
                .await
                .expect("three-way outcome");
            assert!(matches!(status, AttrStatus::NotConnected));
        }

        #[tokio::test]
        async fn test_info_reports_disconnected_subsystem() {
            let session = SshSession::new("203.0.113.7", 22);
            let info = session.sftp().info().await;
            assert!(!info.subsystem_connected);
            assert!(info.working_directory.is_none());
        }
    }
}
