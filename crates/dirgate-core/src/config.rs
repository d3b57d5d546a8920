//! Configuration for dirgate

use dirgate_crypto::PasswordEncoding;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::dn::{join_dn, DnPattern};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirgateConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub directory: DirectoryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DirgateConfig {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::InvalidConfig(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::InvalidConfig(format!("Failed to parse config: {}", e)))
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("DIRGATE_BIND_ADDRESS") {
            config.server.bind_address = addr;
        }
        if let Ok(port) = std::env::var("DIRGATE_PORT") {
            if let Ok(p) = port.parse() {
                config.server.port = p;
            }
        }
        if let Ok(level) = std::env::var("DIRGATE_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("DIRGATE_LOG_FORMAT") {
            config.logging.format = format;
        }

        // Directory from environment
        if let Ok(url) = std::env::var("DIRGATE_LDAP_URL") {
            config.directory.url = url;
        }
        if let Ok(base) = std::env::var("DIRGATE_LDAP_BASE_DN") {
            config.directory.base_dn = Some(base);
        }
        if let Ok(dn) = std::env::var("DIRGATE_LDAP_BIND_DN") {
            config.directory.bind_dn = Some(dn);
        }
        if let Ok(password) = std::env::var("DIRGATE_LDAP_BIND_PASSWORD") {
            config.directory.bind_password = Some(password);
        }
        if let Ok(path) = std::env::var("DIRGATE_LDIF") {
            config.directory.ldif = Some(PathBuf::from(path));
        }
        // DNs contain commas, so patterns are separated by semicolons
        if let Ok(patterns) = std::env::var("DIRGATE_USER_DN_PATTERNS") {
            config.directory.user_dn_patterns = patterns
                .split(';')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(base) = std::env::var("DIRGATE_GROUP_SEARCH_BASE") {
            config.directory.group_search_base = Some(base).filter(|b| !b.is_empty());
        }
        if let Ok(timeout) = std::env::var("DIRGATE_LDAP_TIMEOUT") {
            if let Ok(t) = timeout.parse() {
                config.directory.timeout_seconds = t;
            }
        }
        if std::env::var("DIRGATE_PASSWORD_COMPARE").map(|v| v == "true").unwrap_or(false) {
            config.directory.comparison = ComparisonPolicy::PasswordCompare {
                encoding: PasswordEncoding::default(),
            };
        }

        config
    }

    /// Check everything that can be checked without contacting the directory
    pub fn validate(&self) -> crate::Result<()> {
        self.directory.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Realm announced in `WWW-Authenticate` challenges
    pub realm: String,
}

fn default_realm() -> String {
    "dirgate".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            realm: default_realm(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// How a presented password is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ComparisonPolicy {
    /// Bind to the directory as the user; the stored secret is never read
    #[default]
    Bind,
    /// Read the stored secret and compare locally
    PasswordCompare {
        #[serde(default)]
        encoding: PasswordEncoding,
    },
}

/// Search-based user resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSearchConfig {
    /// Search base, relative to the base DN
    #[serde(default)]
    pub base: String,

    /// Filter with a `{0}` placeholder, e.g. `(uid={0})`
    #[serde(default = "default_user_search_filter")]
    pub filter: String,
}

fn default_user_search_filter() -> String {
    "(uid={0})".to_string()
}

/// Directory connection and lookup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Directory URL (ldap:// or ldaps://). A path component is used as the
    /// base DN when `base_dn` is not set, e.g. `ldap://localhost:8389/dc=example,dc=org`
    #[serde(default = "default_url")]
    pub url: String,

    /// Serve lookups from an LDIF file instead of a remote directory
    #[serde(default)]
    pub ldif: Option<PathBuf>,

    #[serde(default)]
    pub base_dn: Option<String>,

    /// Use STARTTLS for connection upgrade
    #[serde(default)]
    pub start_tls: bool,

    /// Service account used for searches; anonymous when unset
    #[serde(default)]
    pub bind_dn: Option<String>,

    #[serde(default)]
    pub bind_password: Option<String>,

    /// DN templates, tried in order. Mutually exclusive with `user_search`
    #[serde(default)]
    pub user_dn_patterns: Vec<String>,

    #[serde(default)]
    pub user_search: Option<UserSearchConfig>,

    /// Subtree searched for group entries, relative to the base DN
    #[serde(default)]
    pub group_search_base: Option<String>,

    #[serde(default = "default_group_member_attribute")]
    pub group_member_attribute: String,

    #[serde(default = "default_group_name_attribute")]
    pub group_name_attribute: String,

    /// Attribute holding the stored secret
    #[serde(default = "default_password_attribute")]
    pub password_attribute: String,

    #[serde(default)]
    pub comparison: ComparisonPolicy,

    /// Forward empty passwords to the directory instead of rejecting them
    #[serde(default)]
    pub allow_empty_password: bool,

    /// Bound on a whole authentication attempt, and on each directory
    /// operation within it
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_url() -> String {
    "ldap://localhost:389".to_string()
}

fn default_group_member_attribute() -> String {
    "uniqueMember".to_string()
}

fn default_group_name_attribute() -> String {
    "cn".to_string()
}

fn default_password_attribute() -> String {
    "userPassword".to_string()
}

fn default_timeout() -> u64 {
    10
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            ldif: None,
            base_dn: None,
            start_tls: false,
            bind_dn: None,
            bind_password: None,
            user_dn_patterns: vec!["uid={0},ou=people".to_string()],
            user_search: None,
            group_search_base: Some("ou=groups".to_string()),
            group_member_attribute: default_group_member_attribute(),
            group_name_attribute: default_group_name_attribute(),
            password_attribute: default_password_attribute(),
            comparison: ComparisonPolicy::default(),
            allow_empty_password: false,
            timeout_seconds: default_timeout(),
        }
    }
}

impl DirectoryConfig {
    /// Effective base DN: `base_dn`, else the path of `url`
    pub fn base_dn(&self) -> Option<String> {
        if let Some(base) = self.base_dn.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
            return Some(base.to_string());
        }

        let url = Url::parse(&self.url).ok()?;
        let path = url.path().trim_start_matches('/');
        if path.is_empty() {
            return None;
        }
        Some(percent_decode_str(path).decode_utf8_lossy().into_owned())
    }

    /// `url` without the base DN path, as handed to the LDAP client
    pub fn server_url(&self) -> String {
        match Url::parse(&self.url) {
            Ok(mut url) => {
                url.set_path("");
                url.set_query(None);
                url.to_string().trim_end_matches('/').to_string()
            }
            Err(_) => self.url.clone(),
        }
    }

    /// Qualify a DN relative to the base DN
    pub fn qualify(&self, dn: &str) -> String {
        join_dn(dn, self.base_dn().as_deref())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Parsed DN patterns; fails on the first malformed template
    pub fn dn_patterns(&self) -> crate::Result<Vec<DnPattern>> {
        self.user_dn_patterns
            .iter()
            .map(|p| DnPattern::parse(p))
            .collect()
    }

    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |msg: &str| Err(crate::Error::InvalidConfig(msg.to_string()));

        if self.ldif.is_none() {
            if self.url.is_empty() {
                return invalid("Directory URL is required");
            }
            if !["ldap://", "ldaps://", "ldapi://"]
                .iter()
                .any(|scheme| self.url.starts_with(scheme))
            {
                return invalid("Directory URL must start with ldap://, ldaps:// or ldapi://");
            }
        }

        if self.timeout_seconds == 0 {
            return invalid("timeout_seconds must be greater than zero");
        }

        if self.bind_dn.is_some() && self.bind_password.is_none() {
            return invalid("bind_password is required when bind_dn is set");
        }

        match (&self.user_search, self.user_dn_patterns.is_empty()) {
            (Some(_), false) => {
                return invalid("user_dn_patterns and user_search are mutually exclusive")
            }
            (None, true) => return invalid("one of user_dn_patterns or user_search is required"),
            (Some(search), true) => {
                if search.filter.matches("{0}").count() == 0 {
                    return invalid("user_search.filter must contain the {0} placeholder");
                }
            }
            (None, false) => {
                self.dn_patterns()?;
            }
        }

        if self.password_attribute.trim().is_empty() {
            return invalid("password_attribute must not be empty");
        }
        if self.group_member_attribute.trim().is_empty()
            || self.group_name_attribute.trim().is_empty()
        {
            return invalid("group attributes must not be empty");
        }

        Ok(())
    }
}
