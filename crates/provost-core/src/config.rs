//! Daemon configuration.
//!
//! Settings load from a TOML file; every field has a default so a partial
//! file (or none at all) still produces a usable configuration. Secrets are
//! plain strings here, the file's permissions are the operator's problem.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Error loading or parsing a configuration file.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Daemon-wide settings.
    pub daemon: DaemonConfig,
    /// Directory settings.
    pub ldap: LdapConfig,
    /// Mail settings.
    pub smtp: SmtpConfig,
}

/// `[daemon]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DaemonConfig {
    /// Path to the ledger database.
    pub db_path: PathBuf,
    /// Seconds between observer scan cycles.
    pub interval_secs: u64,
    /// Base URL of the portal, used to build confirmation links.
    pub portal_url: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("provost.db"),
            interval_secs: 15,
            portal_url: "http://localhost:8080".to_string(),
        }
    }
}

/// `[ldap]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LdapConfig {
    /// Where and what to search.
    pub search: LdapSearchConfig,
    /// Bind credentials for writes.
    pub creds: LdapCredsConfig,
    /// Uid number pool for account creation.
    pub pool: LdapPoolConfig,
}

/// `[ldap.search]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LdapSearchConfig {
    /// Directory host.
    pub host: String,
    /// Directory port.
    pub port: u16,
    /// Base DN for searches and new entries.
    pub query: String,
    /// Search filter for account discovery.
    pub filter: String,
}

impl Default for LdapSearchConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 389,
            query: "ou=People,o=hpc,dc=rl,dc=ac,dc=uk".to_string(),
            filter: "(objectclass=posixAccount)".to_string(),
        }
    }
}

/// `[ldap.creds]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LdapCredsConfig {
    /// Bind DN.
    pub user: String,
    /// Bind password.
    pub password: String,
    /// Whether to require TLS for write connections.
    pub use_ssl: bool,
}

/// `[ldap.pool]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LdapPoolConfig {
    /// First uid number available for allocation.
    pub uid_start: u32,
    /// One past the last uid number available for allocation.
    pub uid_stop: u32,
}

impl Default for LdapPoolConfig {
    fn default() -> Self {
        Self {
            uid_start: 7_000_000,
            uid_stop: 7_010_000,
        }
    }
}

/// `[smtp]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SmtpConfig {
    /// Mail transfer agent.
    pub mta: SmtpMtaConfig,
    /// Message envelope defaults.
    pub src: SmtpSrcConfig,
}

/// `[smtp.mta]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SmtpMtaConfig {
    /// MTA host to relay through.
    pub host: String,
}

impl Default for SmtpMtaConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
        }
    }
}

/// `[smtp.src]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SmtpSrcConfig {
    /// `From:` address on outbound mail.
    pub from: String,
    /// `Subject:` line on confirmation mail.
    pub subject: String,
}

impl Default for SmtpSrcConfig {
    fn default() -> Self {
        Self {
            from: "registration@localhost".to_string(),
            subject: "Portal account registration".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read and
    /// [`ConfigError::Parse`] when its contents do not fit the schema.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the text does not fit the schema.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// The configured uid number pool as a half-open range.
    #[must_use]
    pub fn uid_pool(&self) -> Range<u32> {
        self.ldap.pool.uid_start..self.ldap.pool.uid_stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_defaults() {
        let cfg = Config::from_toml("").unwrap();
        assert_eq!(cfg.daemon.interval_secs, 15);
        assert_eq!(cfg.ldap.search.port, 389);
        assert_eq!(cfg.ldap.search.filter, "(objectclass=posixAccount)");
        assert!(!cfg.ldap.creds.use_ssl);
        assert_eq!(cfg.uid_pool().start, 7_000_000);
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let cfg = Config::from_toml(
            r#"
            [daemon]
            db_path = "/var/lib/provost/ledger.db"
            interval_secs = 5

            [ldap.search]
            host = "ldap.example.ac.uk"

            [ldap.pool]
            uid_start = 1000
            uid_stop = 2000

            [smtp.src]
            from = "registration@example.ac.uk"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.daemon.db_path, PathBuf::from("/var/lib/provost/ledger.db"));
        assert_eq!(cfg.daemon.interval_secs, 5);
        assert_eq!(cfg.ldap.search.host, "ldap.example.ac.uk");
        assert_eq!(cfg.uid_pool(), 1000..2000);
        assert_eq!(cfg.smtp.src.from, "registration@example.ac.uk");
        // Untouched sections keep their defaults.
        assert_eq!(cfg.smtp.mta.host, "localhost");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::from_toml("[daemon]\nintervalsecs = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_reports_the_path() {
        let err = Config::from_file("/no/such/provost.toml").unwrap_err();
        let text = err.to_string();
        assert!(text.contains("/no/such/provost.toml"), "{text}");
    }
}
