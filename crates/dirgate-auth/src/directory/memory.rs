//! In-memory directory backed by LDIF
//!
//! Used for local development (`directory.ldif` in the config) and as the
//! test double for the authenticator. Entries can be changed at runtime to
//! simulate directory updates, and every bind or search is counted.

use async_trait::async_trait;
use dirgate_core::dn::{is_descendant_of, normalize_dn, parent_dn};
use dirgate_crypto::verify_stored;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::filter::Filter;
use super::ldif::{parse_ldif, LdifError};
use super::{Directory, DirectoryEntry, DirectoryError, SearchScope};

const PASSWORD_ATTRIBUTE: &str = "userPassword";

pub struct MemoryDirectory {
    entries: RwLock<Vec<DirectoryEntry>>,
    binds: AtomicUsize,
    searches: AtomicUsize,
    latency: RwLock<Option<Duration>>,
    unreachable: AtomicBool,
}

impl MemoryDirectory {
    pub fn new(entries: Vec<DirectoryEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
            binds: AtomicUsize::new(0),
            searches: AtomicUsize::new(0),
            latency: RwLock::new(None),
            unreachable: AtomicBool::new(false),
        }
    }

    pub fn from_ldif(input: &str) -> Result<Self, LdifError> {
        Ok(Self::new(parse_ldif(input)?))
    }

    pub fn from_ldif_file(path: impl AsRef<Path>) -> Result<Self, LdifError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_ldif(&content)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Delay every operation, to exercise timeouts
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// Fail every operation as if the server were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn bind_count(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    /// Total binds and searches served so far
    pub fn operation_count(&self) -> usize {
        self.bind_count() + self.search_count()
    }

    /// Insert an entry, replacing any entry with the same DN
    pub fn upsert(&self, entry: DirectoryEntry) {
        let key = normalize_dn(&entry.dn);
        let mut entries = self.entries.write();
        entries.retain(|e| normalize_dn(&e.dn) != key);
        entries.push(entry);
    }

    pub fn remove(&self, dn: &str) -> bool {
        let key = normalize_dn(dn);
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| normalize_dn(&e.dn) != key);
        entries.len() != before
    }

    pub fn add_value(&self, dn: &str, attribute: &str, value: &str) -> bool {
        self.with_entry(dn, |entry| {
            entry.add_value(attribute, value);
            true
        })
    }

    pub fn remove_value(&self, dn: &str, attribute: &str, value: &str) -> bool {
        self.with_entry(dn, |entry| entry.remove_value(attribute, value))
    }

    pub fn get(&self, dn: &str) -> Option<DirectoryEntry> {
        let key = normalize_dn(dn);
        self.entries
            .read()
            .iter()
            .find(|e| normalize_dn(&e.dn) == key)
            .cloned()
    }

    fn with_entry(&self, dn: &str, f: impl FnOnce(&mut DirectoryEntry) -> bool) -> bool {
        let key = normalize_dn(dn);
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|e| normalize_dn(&e.dn) == key) {
            Some(entry) => f(entry),
            None => false,
        }
    }

    async fn simulate_network(&self) -> Result<(), DirectoryError> {
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unreachable(
                "connection refused (simulated)".to_string(),
            ));
        }
        Ok(())
    }
}

fn in_scope(dn: &str, base: &str, scope: SearchScope) -> bool {
    match scope {
        SearchScope::Base => normalize_dn(dn) == normalize_dn(base),
        SearchScope::OneLevel => parent_dn(dn)
            .map(|parent| normalize_dn(&parent) == normalize_dn(base))
            .unwrap_or(false),
        SearchScope::Subtree => is_descendant_of(dn, base),
    }
}

fn project(entry: &DirectoryEntry, attributes: &[&str]) -> DirectoryEntry {
    if attributes.is_empty() || attributes.contains(&"*") {
        return entry.clone();
    }

    let mut projected = DirectoryEntry::new(entry.dn.clone());
    for (name, values) in &entry.attributes {
        if attributes.iter().any(|a| a.eq_ignore_ascii_case(name)) {
            projected.attributes.insert(name.clone(), values.clone());
        }
    }
    projected
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn bind(&self, dn: &str, password: &str) -> Result<bool, DirectoryError> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        self.simulate_network().await?;

        // anonymous and unauthenticated binds grant nothing here
        if password.is_empty() {
            return Ok(false);
        }

        let Some(entry) = self.get(dn) else {
            debug!("Bind for unknown DN");
            return Ok(false);
        };

        let accepted = entry.values(PASSWORD_ATTRIBUTE).iter().any(|stored| {
            verify_stored(password, stored).unwrap_or_else(|e| {
                warn!("Unusable {} on {}: {}", PASSWORD_ATTRIBUTE, entry.dn, e);
                false
            })
        });
        Ok(accepted)
    }

    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.simulate_network().await?;

        let filter = Filter::parse(filter)
            .map_err(|e| DirectoryError::Protocol(format!("bad search filter: {}", e)))?;

        let entries = self.entries.read();
        let found: Vec<DirectoryEntry> = entries
            .iter()
            .filter(|e| in_scope(&e.dn, base, scope))
            .filter(|e| filter.matches(e))
            .map(|e| project(e, attributes))
            .collect();

        debug!("Search under {:?} ({:?}) matched {} entries", base, scope, found.len());
        Ok(found)
    }
}
