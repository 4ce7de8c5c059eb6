use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_KEYCHAIN_PASSPHRASE: &str = "password";
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_SEARCH_LIMIT: u32 = 50;

/// Everything the request handlers need to know about their environment.
///
/// Built once at startup and shared read-only; tests construct their own
/// with a scratch staging root and a fake tool.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path or name of the ipatool binary.
    pub tool_path: PathBuf,
    pub keychain_passphrase: String,
    /// Parent of the `ipatool_<nanos>` acquisition directories.
    pub staging_root: PathBuf,
    pub tool_timeout: Duration,
    pub search_limit: u32,
    /// Host used in manifest URLs instead of the request's Host header.
    pub public_host: Option<String>,
    /// Directory holding `cert.pem` and `key.pem`.
    pub ssl_dir: PathBuf,
    /// Set when the server terminates TLS itself.
    pub tls_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tool_path: PathBuf::from("ipatool"),
            keychain_passphrase: DEFAULT_KEYCHAIN_PASSPHRASE.to_string(),
            staging_root: std::env::temp_dir(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            search_limit: DEFAULT_SEARCH_LIMIT,
            public_host: None,
            ssl_dir: PathBuf::from("ssl"),
            tls_enabled: false,
        }
    }
}

impl Config {
    pub fn cert_path(&self) -> PathBuf {
        self.ssl_dir.join("cert.pem")
    }

    pub fn key_path(&self) -> PathBuf {
        self.ssl_dir.join("key.pem")
    }

    /// Both halves of the TLS identity are present on disk.
    pub fn has_tls_identity(&self) -> bool {
        self.cert_path().is_file() && self.key_path().is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_ipatool_conventions() {
        let config = Config::default();
        assert_eq!(config.tool_path, PathBuf::from("ipatool"));
        assert_eq!(config.tool_timeout, Duration::from_secs(300));
        assert_eq!(config.search_limit, 50);
        assert!(!config.tls_enabled);
        assert_eq!(config.cert_path(), PathBuf::from("ssl/cert.pem"));
    }

    #[test]
    fn tls_identity_requires_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            ssl_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        assert!(!config.has_tls_identity());

        std::fs::write(config.cert_path(), "cert").unwrap();
        assert!(!config.has_tls_identity());

        std::fs::write(config.key_path(), "key").unwrap();
        assert!(config.has_tls_identity());
    }
}
