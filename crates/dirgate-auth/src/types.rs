//! Authentication types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A username/password pair presented for one verification.
///
/// The password is redacted from `Debug` output.
#[derive(Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Username as presented at login
    pub username: String,

    /// DN of the directory entry
    pub dn: String,

    /// Names of the groups listing this DN as a member
    pub groups: BTreeSet<String>,

    /// Entry attributes, without the stored secret
    #[serde(default)]
    pub attributes: HashMap<String, Vec<String>>,
}

impl Principal {
    /// Display name for greetings
    pub fn name(&self) -> &str {
        &self.username
    }

    pub fn is_member_of(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g.eq_ignore_ascii_case(group))
    }
}

/// Caller-facing outcome of an authentication attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AuthenticationVerdict {
    pub authenticated: bool,
    pub principal_dn: String,
    pub groups: BTreeSet<String>,
}

impl AuthenticationVerdict {
    pub fn granted(principal: &Principal) -> Self {
        Self {
            authenticated: true,
            principal_dn: principal.dn.clone(),
            groups: principal.groups.clone(),
        }
    }

    pub fn denied() -> Self {
        Self::default()
    }
}
