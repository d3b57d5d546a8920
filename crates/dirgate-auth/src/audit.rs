//! Audit channel for authentication attempts
//!
//! Every attempt made through the authenticator is reported here with its
//! specific outcome, so operators can tell brute-force attempts from outages.
//! Passwords are never part of an event.

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{info, warn};

use crate::error::{AuthError, AuthFailureKind};

/// Metric names
pub mod names {
    pub const AUTH_ATTEMPTS_TOTAL: &str = "dirgate_auth_attempts_total";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditOutcome {
    Success { principal_dn: String },
    Failure {
        kind: AuthFailureKind,
        detail: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub username: String,
    pub outcome: AuditOutcome,
}

impl AuditEvent {
    pub fn success(username: &str, principal_dn: &str) -> Self {
        Self {
            at: Utc::now(),
            username: username.to_string(),
            outcome: AuditOutcome::Success {
                principal_dn: principal_dn.to_string(),
            },
        }
    }

    pub fn failure(username: &str, error: &AuthError) -> Self {
        let detail = match error {
            AuthError::DirectoryUnreachable(reason) => Some(reason.clone()),
            AuthError::AmbiguousUser(count) => Some(format!("{} entries matched", count)),
            _ => None,
        };

        Self {
            at: Utc::now(),
            username: username.to_string(),
            outcome: AuditOutcome::Failure {
                kind: error.kind(),
                detail,
            },
        }
    }

    pub fn outcome_label(&self) -> &'static str {
        match &self.outcome {
            AuditOutcome::Success { .. } => "success",
            AuditOutcome::Failure { kind, .. } => kind.as_str(),
        }
    }
}

/// Receiver of audit events
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Emits audit events as `tracing` events on the `dirgate::audit` target and
/// counts them in `dirgate_auth_attempts_total`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        counter!(names::AUTH_ATTEMPTS_TOTAL, "outcome" => event.outcome_label()).increment(1);

        match &event.outcome {
            AuditOutcome::Success { principal_dn } => {
                info!(
                    target: "dirgate::audit",
                    username = %event.username,
                    principal_dn = %principal_dn,
                    outcome = "success",
                    "Authentication succeeded"
                );
            }
            AuditOutcome::Failure {
                kind: AuthFailureKind::DirectoryUnreachable,
                detail,
            } => {
                warn!(
                    target: "dirgate::audit",
                    username = %event.username,
                    outcome = event.outcome_label(),
                    detail = detail.as_deref().unwrap_or(""),
                    "Authentication failed: directory unreachable"
                );
            }
            AuditOutcome::Failure { kind, detail } => {
                info!(
                    target: "dirgate::audit",
                    username = %event.username,
                    outcome = kind.as_str(),
                    detail = detail.as_deref().unwrap_or(""),
                    "Authentication failed"
                );
            }
        }
    }
}
