//! LDAP directory client
//!
//! Searches share one service-bound connection; ldap3 multiplexes concurrent
//! operations over it through cloned handles. User binds change the identity
//! of a connection, so each bind gets a dedicated connection that is unbound
//! as soon as the result is known.

use async_trait::async_trait;
use dirgate_core::DirectoryConfig;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Scope, SearchEntry, SearchResult};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Directory, DirectoryEntry, DirectoryError, SearchScope};

/// LDAP result code: success
const RC_SUCCESS: u32 = 0;
/// LDAP result code: noSuchObject
const RC_NO_SUCH_OBJECT: u32 = 32;
/// LDAP result code: invalidCredentials
const RC_INVALID_CREDENTIALS: u32 = 49;
/// LDAP result code: unwillingToPerform (often disabled or locked accounts)
const RC_UNWILLING_TO_PERFORM: u32 = 53;

pub struct LdapDirectory {
    server_url: String,
    start_tls: bool,
    timeout: Duration,
    service_account: Option<(String, String)>,
    search_conn: Mutex<Option<Ldap>>,
}

impl LdapDirectory {
    pub fn new(config: &DirectoryConfig) -> Self {
        let service_account = match (&config.bind_dn, &config.bind_password) {
            (Some(dn), Some(password)) => Some((dn.clone(), password.clone())),
            _ => None,
        };

        Self {
            server_url: config.server_url(),
            start_tls: config.start_tls,
            timeout: config.timeout(),
            service_account,
            search_conn: Mutex::new(None),
        }
    }

    /// Open a connection with the configured TLS and timeout settings
    async fn connect(&self) -> Result<Ldap, DirectoryError> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.timeout)
            .set_starttls(self.start_tls);

        debug!("Connecting to LDAP server: {}", self.server_url);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &self.server_url)
            .await
            .map_err(connection_error)?;

        ldap3::drive!(conn);
        Ok(ldap)
    }

    /// Handle to the shared search connection, establishing it when needed
    async fn search_handle(&self) -> Result<Ldap, DirectoryError> {
        let mut guard = self.search_conn.lock().await;

        if let Some(ldap) = guard.as_mut() {
            if !ldap.is_closed() {
                return Ok(ldap.clone());
            }
            debug!("Search connection closed, reconnecting");
        }

        let mut ldap = self.connect().await?;

        if let Some((dn, password)) = &self.service_account {
            let result = ldap
                .with_timeout(self.timeout)
                .simple_bind(dn, password)
                .await
                .map_err(connection_error)?;

            if result.rc != RC_SUCCESS {
                let _ = ldap.unbind().await;
                return Err(DirectoryError::Protocol(format!(
                    "Service account bind failed with code: {}",
                    result.rc
                )));
            }
        }

        info!("Established LDAP search connection to {}", self.server_url);
        *guard = Some(ldap.clone());
        Ok(ldap)
    }

    async fn discard_search_connection(&self) {
        if let Some(mut ldap) = self.search_conn.lock().await.take() {
            let _ = ldap.unbind().await;
        }
    }
}

fn connection_error(e: LdapError) -> DirectoryError {
    match e {
        LdapError::Timeout { .. } => DirectoryError::Timeout,
        other => DirectoryError::Unreachable(other.to_string()),
    }
}

fn to_ldap_scope(scope: SearchScope) -> Scope {
    match scope {
        SearchScope::Base => Scope::Base,
        SearchScope::OneLevel => Scope::OneLevel,
        SearchScope::Subtree => Scope::Subtree,
    }
}

fn to_entry(entry: SearchEntry) -> DirectoryEntry {
    let mut attributes = entry.attrs;

    // userPassword is commonly returned as binary; keep the UTF-8 ones
    for (name, values) in entry.bin_attrs {
        let values: Vec<String> = values
            .into_iter()
            .filter_map(|v| String::from_utf8(v).ok())
            .collect();
        if !values.is_empty() {
            attributes.entry(name).or_default().extend(values);
        }
    }

    DirectoryEntry {
        dn: entry.dn,
        attributes,
    }
}

#[async_trait]
impl Directory for LdapDirectory {
    async fn bind(&self, dn: &str, password: &str) -> Result<bool, DirectoryError> {
        let mut ldap = self.connect().await?;

        let result = ldap
            .with_timeout(self.timeout)
            .simple_bind(dn, password)
            .await;
        let _ = ldap.unbind().await;

        let result = result.map_err(connection_error)?;
        match result.rc {
            RC_SUCCESS => Ok(true),
            RC_INVALID_CREDENTIALS => Ok(false),
            RC_UNWILLING_TO_PERFORM => {
                debug!("Bind refused by server (code {}): {}", result.rc, result.text);
                Ok(false)
            }
            // busy, unavailable and the like say nothing about the credential
            rc => Err(DirectoryError::Protocol(format!(
                "Bind failed with code {}: {}",
                rc, result.text
            ))),
        }
    }

    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let mut ldap = self.search_handle().await?;

        debug!("Searching {:?} ({:?}) with filter: {}", base, scope, filter);

        let outcome = ldap
            .with_timeout(self.timeout)
            .search(base, to_ldap_scope(scope), filter, attributes.to_vec())
            .await;

        let SearchResult(entries, result) = match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!("LDAP search failed, dropping connection: {}", e);
                self.discard_search_connection().await;
                return Err(connection_error(e));
            }
        };

        match result.rc {
            RC_SUCCESS => Ok(entries
                .into_iter()
                .map(|e| to_entry(SearchEntry::construct(e)))
                .collect()),
            RC_NO_SUCH_OBJECT => Ok(Vec::new()),
            rc => Err(DirectoryError::Protocol(format!(
                "Search failed with code {}: {}",
                rc, result.text
            ))),
        }
    }
}
