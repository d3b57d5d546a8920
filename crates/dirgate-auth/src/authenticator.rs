//! Directory-backed credential verification
//!
//! An attempt runs three steps against the directory:
//! 1. resolve the user's DN, from DN patterns or a search
//! 2. verify the password, by binding as the user or by comparing against
//!    the stored secret locally
//! 3. collect the names of the groups that list the DN as a member
//!
//! Nothing is cached between attempts and no step is retried.

use dirgate_core::{ComparisonPolicy, DirectoryConfig, DnPattern};
use dirgate_crypto::PasswordEncoding;
use ldap3::{dn_escape, ldap_escape};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::audit::{AuditEvent, AuditSink, TracingAuditSink};
use crate::directory::{Directory, DirectoryEntry, DirectoryError, SearchScope};
use crate::error::AuthError;
use crate::types::{AuthenticationVerdict, Credential, Principal};

const ANY_OBJECT: &str = "(objectClass=*)";

/// How a username becomes a DN
#[derive(Debug, Clone)]
enum UserResolution {
    Patterns(Vec<DnPattern>),
    Search { base: String, filter: String },
}

pub struct DirectoryAuthenticator {
    directory: Arc<dyn Directory>,
    audit: Arc<dyn AuditSink>,
    base_dn: Option<String>,
    resolution: UserResolution,
    group_search_base: Option<String>,
    group_member_attribute: String,
    group_name_attribute: String,
    password_attribute: String,
    comparison: ComparisonPolicy,
    allow_empty_password: bool,
    timeout: Duration,
}

impl DirectoryAuthenticator {
    /// Build an authenticator from validated configuration.
    ///
    /// Fails with [`AuthError::MalformedDnPattern`] when a DN pattern cannot
    /// be used; this is a startup error, never a per-attempt one.
    pub fn new(config: &DirectoryConfig, directory: Arc<dyn Directory>) -> Result<Self, AuthError> {
        let base_dn = config.base_dn();

        let resolution = match &config.user_search {
            Some(search) => UserResolution::Search {
                base: config.qualify(&search.base),
                filter: search.filter.clone(),
            },
            None => {
                let patterns = config.dn_patterns().map_err(|e| match e {
                    dirgate_core::Error::MalformedDnPattern(msg) => {
                        AuthError::MalformedDnPattern(msg)
                    }
                    other => AuthError::MalformedDnPattern(other.to_string()),
                })?;
                if patterns.is_empty() {
                    return Err(AuthError::MalformedDnPattern(
                        "no user DN pattern configured".to_string(),
                    ));
                }
                UserResolution::Patterns(patterns)
            }
        };

        Ok(Self {
            directory,
            audit: Arc::new(TracingAuditSink),
            group_search_base: config.group_search_base.as_deref().map(|b| config.qualify(b)),
            base_dn,
            resolution,
            group_member_attribute: config.group_member_attribute.clone(),
            group_name_attribute: config.group_name_attribute.clone(),
            password_attribute: config.password_attribute.clone(),
            comparison: config.comparison,
            allow_empty_password: config.allow_empty_password,
            timeout: config.timeout(),
        })
    }

    /// Replace the audit sink
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn comparison(&self) -> ComparisonPolicy {
        self.comparison
    }

    /// Decide whether the credential is valid.
    ///
    /// Every failure collapses into a denied verdict; the specific reason is
    /// only reported to the audit sink.
    pub async fn authenticate(&self, username: &str, password: &str) -> AuthenticationVerdict {
        match self.verify(username, password).await {
            Ok(principal) => AuthenticationVerdict::granted(&principal),
            Err(_) => AuthenticationVerdict::denied(),
        }
    }

    /// [`authenticate`](Self::authenticate) for a [`Credential`]
    pub async fn authenticate_credential(&self, credential: &Credential) -> AuthenticationVerdict {
        self.authenticate(&credential.username, &credential.password).await
    }

    /// Verify the credential and report the detailed outcome.
    ///
    /// Intended for callers that must react to outages differently from bad
    /// credentials. The attempt is audited either way.
    pub async fn verify(&self, username: &str, password: &str) -> Result<Principal, AuthError> {
        let result = match tokio::time::timeout(self.timeout, self.attempt(username, password)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Authentication attempt timed out after {:?}", self.timeout);
                Err(AuthError::DirectoryUnreachable(format!(
                    "attempt timed out after {:?}",
                    self.timeout
                )))
            }
        };

        match &result {
            Ok(principal) => self.audit.record(&AuditEvent::success(username, &principal.dn)),
            Err(e) => self.audit.record(&AuditEvent::failure(username, e)),
        }

        result
    }

    async fn attempt(&self, username: &str, password: &str) -> Result<Principal, AuthError> {
        if username.is_empty() {
            return Err(AuthError::UserNotFound);
        }

        // an empty password would turn the user bind into an anonymous one
        if password.is_empty() && !self.allow_empty_password {
            return Err(AuthError::EmptyPasswordRejected);
        }

        let entry = self.resolve(username).await?;
        debug!("Resolved {} to {}", username, entry.dn);

        self.check_password(&entry, password).await?;

        let groups = self.groups_for(&entry.dn).await?;
        debug!("Found {} groups for {}", groups.len(), entry.dn);

        let attributes = entry.without(&self.password_attribute);
        Ok(Principal {
            username: username.to_string(),
            dn: attributes.dn,
            groups,
            attributes: attributes.attributes,
        })
    }

    /// Run one directory operation; the whole attempt shares the same bound
    async fn bounded<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T, DirectoryError>>,
    ) -> Result<T, AuthError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!("Directory {} failed: {}", operation, e);
                Err(AuthError::DirectoryUnreachable(format!("{}: {}", operation, e)))
            }
            Err(_) => {
                warn!("Directory {} timed out after {:?}", operation, self.timeout);
                Err(AuthError::DirectoryUnreachable(format!(
                    "{} timed out after {:?}",
                    operation, self.timeout
                )))
            }
        }
    }

    fn entry_attributes(&self) -> Vec<&str> {
        match self.comparison {
            ComparisonPolicy::Bind => vec!["*"],
            ComparisonPolicy::PasswordCompare { .. } => vec!["*", self.password_attribute.as_str()],
        }
    }

    async fn resolve(&self, username: &str) -> Result<DirectoryEntry, AuthError> {
        let attributes = self.entry_attributes();

        match &self.resolution {
            UserResolution::Patterns(patterns) => {
                let escaped = dn_escape(username);
                for pattern in patterns {
                    let dn = dirgate_core::dn::join_dn(
                        &pattern.substitute(&escaped),
                        self.base_dn.as_deref(),
                    );
                    let mut found = self
                        .bounded(
                            "user lookup",
                            self.directory.search(&dn, SearchScope::Base, ANY_OBJECT, &attributes),
                        )
                        .await?;

                    match found.len() {
                        0 => continue,
                        1 => return Ok(found.remove(0)),
                        n => return Err(AuthError::AmbiguousUser(n)),
                    }
                }
                Err(AuthError::UserNotFound)
            }
            UserResolution::Search { base, filter } => {
                let filter = filter.replace("{0}", &ldap_escape(username));
                let mut found = self
                    .bounded(
                        "user search",
                        self.directory.search(base, SearchScope::Subtree, &filter, &attributes),
                    )
                    .await?;

                match found.len() {
                    0 => Err(AuthError::UserNotFound),
                    1 => Ok(found.remove(0)),
                    n => Err(AuthError::AmbiguousUser(n)),
                }
            }
        }
    }

    async fn check_password(&self, entry: &DirectoryEntry, password: &str) -> Result<(), AuthError> {
        let accepted = match self.comparison {
            ComparisonPolicy::Bind => {
                self.bounded("bind", self.directory.bind(&entry.dn, password))
                    .await?
            }
            ComparisonPolicy::PasswordCompare { encoding } => {
                self.compare_locally(entry, password, encoding)
            }
        };

        if accepted {
            Ok(())
        } else {
            Err(AuthError::WrongPassword)
        }
    }

    fn compare_locally(&self, entry: &DirectoryEntry, password: &str, encoding: PasswordEncoding) -> bool {
        let stored = entry.values(&self.password_attribute);
        if stored.is_empty() {
            debug!("No readable {} on {}", self.password_attribute, entry.dn);
            return false;
        }

        stored.iter().any(|secret| match encoding.verify(password, secret) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(
                    "Stored {} on {} is not usable as {}: {}",
                    self.password_attribute,
                    entry.dn,
                    encoding.as_str(),
                    e
                );
                false
            }
        })
    }

    async fn groups_for(&self, dn: &str) -> Result<BTreeSet<String>, AuthError> {
        let Some(base) = &self.group_search_base else {
            return Ok(BTreeSet::new());
        };

        let filter = format!("({}={})", self.group_member_attribute, ldap_escape(dn));
        let found = self
            .bounded(
                "group search",
                self.directory.search(
                    base,
                    SearchScope::Subtree,
                    &filter,
                    &[self.group_name_attribute.as_str()],
                ),
            )
            .await?;

        Ok(found
            .iter()
            .filter_map(|group| group.first(&self.group_name_attribute))
            .map(String::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::testing::RecordingAuditSink;
    use crate::audit::AuditOutcome;
    use crate::directory::MemoryDirectory;
    use crate::error::AuthFailureKind;
    use dirgate_core::UserSearchConfig;
    use std::time::Instant;

    const LDIF: &str = include_str!("../testdata/example.ldif");
    const ALICE_DN: &str = "uid=alice,ou=people,dc=example,dc=org";

    fn config() -> DirectoryConfig {
        DirectoryConfig {
            user_dn_patterns: vec!["uid={0},ou=people,dc=example,dc=org".to_string()],
            group_search_base: Some("ou=groups,dc=example,dc=org".to_string()),
            timeout_seconds: 5,
            ..Default::default()
        }
    }

    struct Fixture {
        directory: Arc<MemoryDirectory>,
        audit: Arc<RecordingAuditSink>,
        authenticator: DirectoryAuthenticator,
    }

    fn fixture(config: DirectoryConfig) -> Fixture {
        let directory = Arc::new(MemoryDirectory::from_ldif(LDIF).unwrap());
        let audit = Arc::new(RecordingAuditSink::default());
        let authenticator = DirectoryAuthenticator::new(&config, directory.clone())
            .unwrap()
            .with_audit_sink(audit.clone());
        Fixture {
            directory,
            audit,
            authenticator,
        }
    }

    fn failure_kind(audit: &RecordingAuditSink) -> Option<AuthFailureKind> {
        match audit.last_outcome()? {
            AuditOutcome::Failure { kind, .. } => Some(kind),
            AuditOutcome::Success { .. } => None,
        }
    }

    fn groups(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_correct_password_is_accepted() {
        let f = fixture(config());
        let verdict = f.authenticator.authenticate("alice", "secret12").await;

        assert!(verdict.authenticated);
        assert_eq!(verdict.principal_dn, ALICE_DN);
        assert_eq!(verdict.groups, groups(&["developers", "submanagers"]));
        assert!(matches!(f.audit.last_outcome(), Some(AuditOutcome::Success { .. })));
    }

    #[tokio::test]
    async fn test_wrong_password_is_denied() {
        let f = fixture(config());
        let verdict = f.authenticator.authenticate("alice", "wrong").await;

        assert_eq!(verdict, AuthenticationVerdict::denied());
        assert_eq!(failure_kind(&f.audit), Some(AuthFailureKind::WrongPassword));
    }

    #[tokio::test]
    async fn test_unknown_user_is_denied() {
        let f = fixture(config());
        let verdict = f.authenticator.authenticate("bob", "anything").await;

        assert!(!verdict.authenticated);
        assert!(verdict.principal_dn.is_empty());
        assert!(verdict.groups.is_empty());
        assert_eq!(failure_kind(&f.audit), Some(AuthFailureKind::UserNotFound));
        // the lookup failed, so no bind was attempted
        assert_eq!(f.directory.bind_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_password_never_reaches_directory() {
        let f = fixture(config());
        let verdict = f.authenticator.authenticate("alice", "").await;

        assert!(!verdict.authenticated);
        assert_eq!(f.directory.operation_count(), 0);
        assert_eq!(failure_kind(&f.audit), Some(AuthFailureKind::EmptyPasswordRejected));
    }

    #[tokio::test]
    async fn test_empty_username_never_reaches_directory() {
        let f = fixture(config());
        assert!(!f.authenticator.authenticate("", "secret12").await.authenticated);
        assert_eq!(f.directory.operation_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_password_forwarded_when_allowed() {
        let f = fixture(DirectoryConfig {
            allow_empty_password: true,
            ..config()
        });
        let verdict = f.authenticator.authenticate("alice", "").await;

        // forwarded, and refused by the directory itself
        assert!(!verdict.authenticated);
        assert_eq!(f.directory.bind_count(), 1);
        assert_eq!(failure_kind(&f.audit), Some(AuthFailureKind::WrongPassword));
    }

    #[tokio::test]
    async fn test_repeated_attempts_agree() {
        let f = fixture(config());
        let first = f.authenticator.authenticate("alice", "secret12").await;
        for _ in 0..3 {
            assert_eq!(f.authenticator.authenticate("alice", "secret12").await, first);
        }
        assert!(!f.authenticator.authenticate("alice", "secret13").await.authenticated);
    }

    #[tokio::test]
    async fn test_membership_changes_show_up_on_next_attempt() {
        let f = fixture(config());
        let managers = "cn=managers,ou=groups,dc=example,dc=org";
        let developers = "cn=developers,ou=groups,dc=example,dc=org";

        f.directory.add_value(managers, "uniqueMember", ALICE_DN);
        let verdict = f.authenticator.authenticate("alice", "secret12").await;
        assert_eq!(verdict.groups, groups(&["developers", "managers", "submanagers"]));

        f.directory.remove_value(developers, "uniqueMember", ALICE_DN);
        let verdict = f.authenticator.authenticate("alice", "secret12").await;
        assert_eq!(verdict.groups, groups(&["managers", "submanagers"]));
    }

    #[tokio::test]
    async fn test_groups_outside_search_base_are_ignored() {
        let f = fixture(DirectoryConfig {
            group_search_base: Some("ou=subgroups,ou=groups,dc=example,dc=org".to_string()),
            ..config()
        });
        let verdict = f.authenticator.authenticate("alice", "secret12").await;
        assert_eq!(verdict.groups, groups(&["submanagers"]));
    }

    #[tokio::test]
    async fn test_no_group_search_base() {
        let f = fixture(DirectoryConfig {
            group_search_base: None,
            ..config()
        });
        let verdict = f.authenticator.authenticate("alice", "secret12").await;
        assert!(verdict.authenticated);
        assert!(verdict.groups.is_empty());
    }

    #[tokio::test]
    async fn test_relative_pattern_with_base_dn_from_url() {
        let f = fixture(DirectoryConfig {
            url: "ldap://localhost:8389/dc=example,dc=org".to_string(),
            user_dn_patterns: vec!["uid={0},ou=people".to_string()],
            group_search_base: Some("ou=groups".to_string()),
            ..config()
        });
        let verdict = f.authenticator.authenticate("ben", "benspassword").await;
        assert!(verdict.authenticated);
        assert_eq!(verdict.principal_dn, "uid=ben,ou=people,dc=example,dc=org");
        assert_eq!(verdict.groups, groups(&["developers", "managers"]));
    }

    #[tokio::test]
    async fn test_patterns_are_tried_in_order() {
        let f = fixture(DirectoryConfig {
            user_dn_patterns: vec![
                "uid={0},ou=staff,dc=example,dc=org".to_string(),
                "uid={0},ou=people,dc=example,dc=org".to_string(),
            ],
            ..config()
        });
        let verdict = f.authenticator.authenticate("carol", "carolpw").await;
        assert!(verdict.authenticated);
        assert_eq!(verdict.principal_dn, "uid=carol,ou=people,dc=example,dc=org");
    }

    #[tokio::test]
    async fn test_dn_special_characters_are_escaped() {
        let f = fixture(config());
        let verdict = f
            .authenticator
            .authenticate("alice,ou=people,dc=example,dc=org", "secret12")
            .await;
        assert!(!verdict.authenticated);
        assert_eq!(failure_kind(&f.audit), Some(AuthFailureKind::UserNotFound));
    }

    #[tokio::test]
    async fn test_password_compare_policy() {
        let f = fixture(DirectoryConfig {
            comparison: ComparisonPolicy::PasswordCompare {
                encoding: PasswordEncoding::LdapSha,
            },
            ..config()
        });

        assert!(f.authenticator.authenticate("alice", "secret12").await.authenticated);
        assert!(!f.authenticator.authenticate("alice", "secret13").await.authenticated);
        // the stored secret was compared locally
        assert_eq!(f.directory.bind_count(), 0);
    }

    #[tokio::test]
    async fn test_password_compare_with_bcrypt() {
        let f = fixture(DirectoryConfig {
            comparison: ComparisonPolicy::PasswordCompare {
                encoding: PasswordEncoding::Bcrypt,
            },
            ..config()
        });
        let hash = dirgate_crypto::bcrypt_with_cost("s3cr3t-dave", 4).unwrap();
        f.directory.upsert(
            DirectoryEntry::new("uid=dave,ou=people,dc=example,dc=org")
                .with("uid", "dave")
                .with("userPassword", hash),
        );

        assert!(f.authenticator.authenticate("dave", "s3cr3t-dave").await.authenticated);
        assert!(!f.authenticator.authenticate("dave", "s3cr3t").await.authenticated);
        // alice's {SSHA} value is not a bcrypt hash
        assert!(!f.authenticator.authenticate("alice", "secret12").await.authenticated);
    }

    #[tokio::test]
    async fn test_password_compare_without_stored_secret() {
        let f = fixture(DirectoryConfig {
            comparison: ComparisonPolicy::PasswordCompare {
                encoding: PasswordEncoding::Plaintext,
            },
            ..config()
        });
        f.directory.upsert(DirectoryEntry::new("uid=erin,ou=people,dc=example,dc=org").with("uid", "erin"));

        assert!(!f.authenticator.authenticate("erin", "anything").await.authenticated);
        assert_eq!(failure_kind(&f.audit), Some(AuthFailureKind::WrongPassword));
    }

    #[tokio::test]
    async fn test_principal_omits_stored_secret() {
        let f = fixture(DirectoryConfig {
            comparison: ComparisonPolicy::PasswordCompare {
                encoding: PasswordEncoding::LdapSha,
            },
            ..config()
        });
        let principal = f.authenticator.verify("alice", "secret12").await.unwrap();
        assert_eq!(principal.name(), "alice");
        assert!(principal.attributes.keys().all(|k| !k.eq_ignore_ascii_case("userPassword")));
        assert_eq!(principal.attributes.get("mail"), Some(&vec!["alice@example.org".to_string()]));
    }

    #[tokio::test]
    async fn test_search_resolution() {
        let f = fixture(DirectoryConfig {
            user_dn_patterns: Vec::new(),
            user_search: Some(UserSearchConfig {
                base: "ou=people,dc=example,dc=org".to_string(),
                filter: "(uid={0})".to_string(),
            }),
            ..config()
        });

        let verdict = f.authenticator.authenticate("alice", "secret12").await;
        assert!(verdict.authenticated);
        assert_eq!(verdict.principal_dn, ALICE_DN);

        assert!(!f.authenticator.authenticate("bob", "anything").await.authenticated);
        assert_eq!(failure_kind(&f.audit), Some(AuthFailureKind::UserNotFound));

        assert!(!f.authenticator.authenticate("sam", "sampassword").await.authenticated);
        assert_eq!(failure_kind(&f.audit), Some(AuthFailureKind::AmbiguousUser));
    }

    #[tokio::test]
    async fn test_search_filter_injection_is_escaped() {
        let f = fixture(DirectoryConfig {
            user_dn_patterns: Vec::new(),
            user_search: Some(UserSearchConfig {
                base: "ou=people,dc=example,dc=org".to_string(),
                filter: "(uid={0})".to_string(),
            }),
            ..config()
        });

        let verdict = f.authenticator.authenticate("*", "secret12").await;
        assert!(!verdict.authenticated);
        assert_eq!(failure_kind(&f.audit), Some(AuthFailureKind::UserNotFound));
    }

    #[tokio::test]
    async fn test_directory_outage_is_reported_distinctly() {
        let f = fixture(config());
        f.directory.set_unreachable(true);

        let result = f.authenticator.verify("alice", "secret12").await;
        assert!(matches!(result, Err(AuthError::DirectoryUnreachable(_))));

        let verdict = f.authenticator.authenticate("alice", "secret12").await;
        assert!(!verdict.authenticated);
        assert_eq!(failure_kind(&f.audit), Some(AuthFailureKind::DirectoryUnreachable));
    }

    #[tokio::test]
    async fn test_slow_directory_times_out() {
        let mut cfg = config();
        cfg.timeout_seconds = 1;
        let f = fixture(cfg);
        f.directory.set_latency(Some(Duration::from_secs(30)));

        let started = Instant::now();
        let verdict = f.authenticator.authenticate("alice", "secret12").await;

        assert!(!verdict.authenticated);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(failure_kind(&f.audit), Some(AuthFailureKind::DirectoryUnreachable));
    }

    #[tokio::test]
    async fn test_timeout_bounds_the_whole_attempt() {
        let mut cfg = config();
        cfg.timeout_seconds = 1;
        cfg.user_dn_patterns = vec![
            "uid={0},ou=staff,dc=example,dc=org".to_string(),
            "uid={0},ou=contractors,dc=example,dc=org".to_string(),
            "uid={0},ou=people,dc=example,dc=org".to_string(),
        ];
        let f = fixture(cfg);
        // each lookup fits the bound, the three of them do not
        f.directory.set_latency(Some(Duration::from_millis(700)));

        let started = Instant::now();
        let verdict = f.authenticator.authenticate("bob", "anything").await;

        assert!(!verdict.authenticated);
        assert!(started.elapsed() < Duration::from_millis(1900));
        assert_eq!(failure_kind(&f.audit), Some(AuthFailureKind::DirectoryUnreachable));
    }

    #[tokio::test]
    async fn test_failures_are_not_retried() {
        let f = fixture(config());
        f.authenticator.authenticate("alice", "wrong").await;
        // one lookup, one bind
        assert_eq!(f.directory.search_count(), 1);
        assert_eq!(f.directory.bind_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_attempts() {
        let f = fixture(config());
        let authenticator = Arc::new(f.authenticator);

        let attempts = (0..16).map(|i| {
            let authenticator = authenticator.clone();
            async move {
                let password = if i % 2 == 0 { "secret12" } else { "wrong" };
                (i, authenticator.authenticate("alice", password).await)
            }
        });

        for (i, verdict) in futures::future::join_all(attempts).await {
            assert_eq!(verdict.authenticated, i % 2 == 0);
        }
        assert_eq!(f.audit.events().len(), 16);
    }

    #[test]
    fn test_malformed_pattern_fails_construction() {
        let directory = Arc::new(MemoryDirectory::new(Vec::new()));
        let result = DirectoryAuthenticator::new(
            &DirectoryConfig {
                user_dn_patterns: vec!["uid=alice,ou=people".to_string()],
                ..Default::default()
            },
            directory.clone(),
        );
        assert!(matches!(result, Err(AuthError::MalformedDnPattern(_))));

        let result = DirectoryAuthenticator::new(
            &DirectoryConfig {
                user_dn_patterns: Vec::new(),
                ..Default::default()
            },
            directory,
        );
        assert!(matches!(result, Err(AuthError::MalformedDnPattern(_))));
    }

    #[tokio::test]
    async fn test_authenticate_credential() {
        let f = fixture(config());
        let credential = Credential::new("alice", "secret12");
        assert!(f.authenticator.authenticate_credential(&credential).await.authenticated);
    }
}
