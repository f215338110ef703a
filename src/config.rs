//! Configuration defaults for sessions and transfers.
//!
//! Values are resolved with a three-tier priority system:
//!
//! 1. **Parameter** - Explicitly provided function parameter (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SSHC_CONNECT_TIMEOUT_MS` | 30000 | Connect/handshake/auth budget in milliseconds |
//! | `SSHC_READ_TIMEOUT_MS` | 10000 | Default channel read budget in milliseconds |
//! | `SSHC_KEEPALIVE_SECS` | 30 | Transport keepalive interval (0 disables) |
//! | `SSHC_COMPRESSION` | true | Offer zlib compression during negotiation |
//!
//! A negative timeout anywhere in the crate means "wait indefinitely"; the
//! defaults above only apply when the caller passes no explicit value.

use std::env;
use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default connect/handshake/authentication budget in milliseconds.
pub(crate) const DEFAULT_CONNECT_TIMEOUT_MS: i64 = 30_000;

/// Default budget for channel reads in milliseconds.
pub(crate) const DEFAULT_READ_TIMEOUT_MS: i64 = 10_000;

/// Default transport keepalive interval in seconds.
pub(crate) const DEFAULT_KEEPALIVE_SECS: u64 = 30;

/// Chunk size for channel writes and SFTP/SCP content loops.
pub(crate) const TRANSFER_CHUNK_SIZE: usize = 32 * 1024;

/// Maximum retry delay cap for the reconnect helper.
pub(crate) const MAX_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(10);

/// Environment variable name for the connect timeout.
pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SSHC_CONNECT_TIMEOUT_MS";

/// Environment variable name for the default read timeout.
pub(crate) const READ_TIMEOUT_ENV_VAR: &str = "SSHC_READ_TIMEOUT_MS";

/// Environment variable name for the keepalive interval.
pub(crate) const KEEPALIVE_ENV_VAR: &str = "SSHC_KEEPALIVE_SECS";

/// Environment variable name for compression negotiation.
pub(crate) const COMPRESSION_ENV_VAR: &str = "SSHC_COMPRESSION";

/// Identity files probed when no key pair was configured explicitly,
/// in preference order, relative to `~/.ssh`.
pub(crate) static DEFAULT_IDENTITY_FILES: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    ["id_rsa", "id_ed25519", "id_ecdsa"]
        .iter()
        .map(|name| home.join(".ssh").join(name))
        .collect()
});

/// Resolve the connect timeout with priority: parameter -> env var -> default.
pub(crate) fn resolve_connect_timeout_ms(timeout_param: Option<i64>) -> i64 {
    if let Some(timeout) = timeout_param {
        return timeout;
    }

    if let Ok(env_timeout) = env::var(CONNECT_TIMEOUT_ENV_VAR)
        && let Ok(timeout) = env_timeout.parse::<i64>()
    {
        return timeout;
    }

    DEFAULT_CONNECT_TIMEOUT_MS
}

/// Resolve the default channel read timeout with priority: parameter -> env var -> default.
pub(crate) fn resolve_read_timeout_ms(timeout_param: Option<i64>) -> i64 {
    if let Some(timeout) = timeout_param {
        return timeout;
    }

    if let Ok(env_timeout) = env::var(READ_TIMEOUT_ENV_VAR)
        && let Ok(timeout) = env_timeout.parse::<i64>()
    {
        return timeout;
    }

    DEFAULT_READ_TIMEOUT_MS
}

/// Resolve the keepalive interval with priority: env var -> default. Zero disables.
pub(crate) fn resolve_keepalive_secs() -> u64 {
    if let Ok(env_keepalive) = env::var(KEEPALIVE_ENV_VAR)
        && let Ok(secs) = env_keepalive.parse::<u64>()
    {
        return secs;
    }

    DEFAULT_KEEPALIVE_SECS
}

/// Resolve the compression setting with priority: env var -> default (true).
pub(crate) fn resolve_compression() -> bool {
    if let Ok(env_compression) = env::var(COMPRESSION_ENV_VAR) {
        let normalized = env_compression.trim().to_lowercase();
        return matches!(normalized.as_str(), "1" | "true" | "yes" | "on");
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var mutation is process-global, so these tests only exercise the
    // parameter and default tiers; the env tier shares the same parse path.

    mod connect_timeout {
        use super::*;

        #[test]
        fn test_parameter_takes_priority() {
            assert_eq!(resolve_connect_timeout_ms(Some(5_000)), 5_000);
        }

        #[test]
        fn test_negative_parameter_means_indefinite() {
            assert_eq!(resolve_connect_timeout_ms(Some(-1)), -1);
        }

        #[test]
        fn test_default_applies_without_parameter() {
            if env::var(CONNECT_TIMEOUT_ENV_VAR).is_err() {
                assert_eq!(resolve_connect_timeout_ms(None), DEFAULT_CONNECT_TIMEOUT_MS);
            }
        }
    }

    mod read_timeout {
        use super::*;

        #[test]
        fn test_parameter_takes_priority() {
            assert_eq!(resolve_read_timeout_ms(Some(250)), 250);
        }

        #[test]
        fn test_default_is_ten_seconds() {
            assert_eq!(DEFAULT_READ_TIMEOUT_MS, 10_000);
        }
    }

    mod defaults {
        use super::*;

        #[test]
        fn test_chunk_size_is_reasonable() {
            assert!(TRANSFER_CHUNK_SIZE >= 4 * 1024);
            assert!(TRANSFER_CHUNK_SIZE <= 256 * 1024);
        }

        #[test]
        fn test_max_retry_delay_value() {
            assert_eq!(MAX_RETRY_DELAY, std::time::Duration::from_secs(10));
        }

        #[test]
        fn test_identity_candidates_live_under_dot_ssh() {
            for path in DEFAULT_IDENTITY_FILES.iter() {
                assert!(path.to_string_lossy().contains(".ssh"));
            }
        }
    }
}
