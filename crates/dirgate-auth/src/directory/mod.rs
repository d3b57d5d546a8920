//! Directory access
//!
//! The authenticator talks to a directory only through the [`Directory`]
//! trait: a simple bind and a search. Two implementations are provided:
//! - [`LdapDirectory`]: a remote LDAP server via `ldap3`
//! - [`MemoryDirectory`]: entries loaded from LDIF, for development and tests

mod filter;
mod ldap;
mod ldif;
mod memory;

pub use filter::{Filter, FilterError};
pub use ldap::LdapDirectory;
pub use ldif::{parse_ldif, LdifError};
pub use memory::MemoryDirectory;

use async_trait::async_trait;
use dirgate_core::DirectoryConfig;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Directory client errors
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Directory unreachable: {0}")]
    Unreachable(String),

    #[error("Directory operation timed out")]
    Timeout,

    #[error("Directory protocol error: {0}")]
    Protocol(String),
}

/// Search scope relative to the search base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Base,
    OneLevel,
    Subtree,
}

/// An entry as returned by a search
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: HashMap::new(),
        }
    }

    /// Builder-style attribute value append
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.add_value(name, value);
        self
    }

    /// All values of an attribute; names compare case-insensitively
    pub fn values(&self, name: &str) -> &[String] {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
            .unwrap_or_default()
    }

    /// First value of an attribute
    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }

    pub fn add_value(&mut self, name: &str, value: impl Into<String>) {
        let key = self
            .attributes
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()
            .unwrap_or_else(|| name.to_string());
        self.attributes.entry(key).or_default().push(value.into());
    }

    /// Remove every value equal to `value`; returns whether anything was removed
    pub fn remove_value(&mut self, name: &str, value: &str) -> bool {
        let mut removed = false;
        self.attributes.retain(|k, values| {
            if k.eq_ignore_ascii_case(name) {
                let before = values.len();
                values.retain(|v| v != value);
                removed |= values.len() != before;
                !values.is_empty()
            } else {
                true
            }
        });
        removed
    }

    /// Drop an attribute entirely
    pub fn without(mut self, name: &str) -> Self {
        self.attributes.retain(|k, _| !k.eq_ignore_ascii_case(name));
        self
    }
}

/// Minimal directory capability used by the authenticator.
///
/// Implementations must be safe to call from many tasks at once.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Simple bind as `dn`. `Ok(false)` means the directory rejected the credential.
    async fn bind(&self, dn: &str, password: &str) -> Result<bool, DirectoryError>;

    /// Search below `base`. A base that does not exist yields no entries.
    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryError>;
}

/// Build the directory client described by `config`
pub fn open_directory(config: &DirectoryConfig) -> dirgate_core::Result<Arc<dyn Directory>> {
    match &config.ldif {
        Some(path) => {
            let directory = MemoryDirectory::from_ldif_file(path).map_err(|e| {
                dirgate_core::Error::DirectorySetup(format!("{}: {}", path.display(), e))
            })?;
            info!(
                "Serving directory from {} ({} entries)",
                path.display(),
                directory.len()
            );
            Ok(Arc::new(directory))
        }
        None => {
            info!("Using LDAP directory at {}", config.server_url());
            Ok(Arc::new(LdapDirectory::new(config)))
        }
    }
}
