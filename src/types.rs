//! Serializable record types returned by sessions, channels and SFTP calls.

use serde::{Deserialize, Serialize};

/// Connection metadata reported by `SshSession::info`.
///
/// Safe to produce whether connected or not; fields that only exist for an
/// established connection are optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Configured private key path, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// Configured public key path, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    pub connected: bool,
    /// Name of the authentication method that succeeded, if connected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated: Option<String>,
    /// When the connection was established (RFC3339 format).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<String>,
    /// Negotiated host key algorithm name, if connected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_key_algorithm: Option<String>,
    /// SHA-256 fingerprint of the server host key, if connected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_key_fingerprint: Option<String>,
    /// Keepalive interval in seconds (0 = disabled).
    pub keepalive_secs: u64,
}

/// Metadata reported by `SftpClient::info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpInfo {
    /// Transport-level connection metadata.
    pub session: SessionInfo,
    /// Whether the SFTP subsystem channel is currently open.
    pub subsystem_connected: bool,
    /// Remembered remote working directory, if one has been resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

/// Result of `SftpClient::list`: entry names bucketed by kind.
///
/// The three lists are each sorted ascending and together partition the
/// directory's entries: symlinks go to `links`, directories to
/// `directories`, and everything else (including entries whose type the
/// server did not report) to `files`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryListing {
    /// The resolved directory path that was listed.
    pub path: String,
    pub directories: Vec<String>,
    pub files: Vec<String>,
    pub links: Vec<String>,
}

/// File type tag derived from the SFTP permission bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum EntryKind {
    Regular,
    Directory,
    SymbolicLink,
    BlockDevice,
    CharacterDevice,
    Fifo,
    Socket,
    Unknown,
}

impl EntryKind {
    /// Classify from the full mode word (type bits included).
    pub fn from_mode(mode: u32) -> Self {
        match mode & 0o170000 {
            0o100000 => EntryKind::Regular,
            0o040000 => EntryKind::Directory,
            0o120000 => EntryKind::SymbolicLink,
            0o060000 => EntryKind::BlockDevice,
            0o020000 => EntryKind::CharacterDevice,
            0o010000 => EntryKind::Fifo,
            0o140000 => EntryKind::Socket,
            _ => EntryKind::Unknown,
        }
    }

    fn type_char(self) -> char {
        match self {
            EntryKind::Regular => '-',
            EntryKind::Directory => 'd',
            EntryKind::SymbolicLink => 'l',
            EntryKind::BlockDevice => 'b',
            EntryKind::CharacterDevice => 'c',
            EntryKind::Fifo => 'p',
            EntryKind::Socket => 's',
            EntryKind::Unknown => '?',
        }
    }
}

/// One record of `SftpClient::list_full`.
///
/// Entries for which the server reported no permission metadata carry only
/// `name` and `kind == Unknown`; all other fields stay `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atime: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    /// Full mode word including type bits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<u32>,
    pub kind: EntryKind,
    /// 10-character `ls -l` style permission string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_string: Option<String>,
}

/// Attribute record returned by `stat`/`get_attributes`.
///
/// Each field is present only when the server set the corresponding
/// attribute flag; size, the time pair, the owner pair and permissions are
/// independent of each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttrs {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Access/modify times, present as a pair or not at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atime: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<u32>,
    /// Owner ids, present as a pair or not at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_string: Option<String>,
}

/// Three-way outcome of `SftpClient::get_attributes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "attrs")]
pub enum AttrStatus {
    /// The path exists; attributes attached.
    Found(FileAttrs),
    /// The server reported "no such file" - a valid negative outcome.
    NotFound,
    /// The transport is not connected and the implicit connect failed.
    NotConnected,
}

/// Remote file metadata learned during the SCP source-mode handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScpFileInfo {
    /// Base name announced by the remote scp.
    pub name: String,
    /// Content length in bytes.
    pub size: u64,
    /// Permission bits (already masked to `0o777`).
    pub mode: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atime: Option<u64>,
}

/// Render the 10-character `ls -l` style string for a full mode word.
///
/// Setuid/setgid render as `s` over an executable bit and `S` over a
/// non-executable one; the sticky bit renders as `t`/`T` in the last slot.
pub fn mode_string(mode: u32) -> String {
    let kind = EntryKind::from_mode(mode);
    let mut out = String::with_capacity(10);
    out.push(kind.type_char());

    let triplet = |out: &mut String, shift: u32, special: u32, special_char: (char, char)| {
        let r = mode >> shift & 0o4 != 0;
        let w = mode >> shift & 0o2 != 0;
        let x = mode >> shift & 0o1 != 0;
        out.push(if r { 'r' } else { '-' });
        out.push(if w { 'w' } else { '-' });
        if mode & special != 0 {
            out.push(if x { special_char.0 } else { special_char.1 });
        } else {
            out.push(if x { 'x' } else { '-' });
        }
    };

    triplet(&mut out, 6, 0o4000, ('s', 'S'));
    triplet(&mut out, 3, 0o2000, ('s', 'S'));
    triplet(&mut out, 0, 0o1000, ('t', 'T'));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    mod entry_kind {
        use super::*;

        #[test]
        fn test_regular_file() {
            assert_eq!(EntryKind::from_mode(0o100644), EntryKind::Regular);
        }

        #[test]
        fn test_directory() {
            assert_eq!(EntryKind::from_mode(0o040755), EntryKind::Directory);
        }

        #[test]
        fn test_symlink() {
            assert_eq!(EntryKind::from_mode(0o120777), EntryKind::SymbolicLink);
        }

        #[test]
        fn test_devices_and_special() {
            assert_eq!(EntryKind::from_mode(0o060660), EntryKind::BlockDevice);
            assert_eq!(EntryKind::from_mode(0o020620), EntryKind::CharacterDevice);
            assert_eq!(EntryKind::from_mode(0o010600), EntryKind::Fifo);
            assert_eq!(EntryKind::from_mode(0o140755), EntryKind::Socket);
        }

        #[test]
        fn test_no_type_bits_is_unknown() {
            assert_eq!(EntryKind::from_mode(0o644), EntryKind::Unknown);
        }
    }

    mod mode_string_format {
        use super::*;

        #[test]
        fn test_regular_rw_r_r() {
            assert_eq!(mode_string(0o100644), "-rw-r--r--");
        }

        #[test]
        fn test_directory_rwx() {
            assert_eq!(mode_string(0o040755), "drwxr-xr-x");
        }

        #[test]
        fn test_symlink_all() {
            assert_eq!(mode_string(0o120777), "lrwxrwxrwx");
        }

        #[test]
        fn test_setuid_over_executable() {
            assert_eq!(mode_string(0o104755), "-rwsr-xr-x");
        }

        #[test]
        fn test_setuid_without_execute() {
            assert_eq!(mode_string(0o104655), "-rwSr-xr-x");
        }

        #[test]
        fn test_setgid_over_executable() {
            assert_eq!(mode_string(0o102755), "-rwxr-sr-x");
        }

        #[test]
        fn test_sticky_directory() {
            assert_eq!(mode_string(0o041777), "drwxrwxrwt");
        }

        #[test]
        fn test_sticky_without_execute() {
            assert_eq!(mode_string(0o041776), "drwxrwxrwT");
        }

        #[test]
        fn test_length_is_always_ten() {
            for mode in [0o100000, 0o040777, 0o107777, 0o0] {
                assert_eq!(mode_string(mode).len(), 10);
            }
        }
    }

    mod serialization {
        use super::*;

        #[test]
        fn test_entry_kind_screaming_kebab() {
            let json = serde_json::to_string(&EntryKind::SymbolicLink).expect("serialize");
            assert_eq!(json, "\"SYMBOLIC-LINK\"");
            let json = serde_json::to_string(&EntryKind::BlockDevice).expect("serialize");
            assert_eq!(json, "\"BLOCK-DEVICE\"");
        }

        #[test]
        fn test_attr_status_tagging() {
            let json = serde_json::to_string(&AttrStatus::NotFound).expect("serialize");
            assert!(json.contains("not_found"));
        }

        #[test]
        fn test_session_info_omits_absent_fields() {
            let info = SessionInfo {
                host: "example.com".to_string(),
                port: 22,
                user: "alice".to_string(),
                private_key: None,
                public_key: None,
                connected: false,
                authenticated: None,
                connected_at: None,
                host_key_algorithm: None,
                host_key_fingerprint: None,
                keepalive_secs: 30,
            };
            let json = serde_json::to_string(&info).expect("serialize");
            assert!(!json.contains("authenticated"));
            assert!(!json.contains("host_key_fingerprint"));
        }
    }
}
