//! Authentication errors

use thiserror::Error;

/// Why an authentication attempt did not succeed.
///
/// Callers that only need a yes/no answer use
/// [`DirectoryAuthenticator::authenticate`](crate::DirectoryAuthenticator::authenticate),
/// which collapses all of these into a denied verdict.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Directory unreachable: {0}")]
    DirectoryUnreachable(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Username matched {0} directory entries")]
    AmbiguousUser(usize),

    #[error("Invalid credentials")]
    WrongPassword,

    #[error("Empty password rejected")]
    EmptyPasswordRejected,

    #[error("Malformed DN pattern: {0}")]
    MalformedDnPattern(String),
}

/// Field-free classification of [`AuthError`], safe to attach to logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthFailureKind {
    DirectoryUnreachable,
    UserNotFound,
    AmbiguousUser,
    WrongPassword,
    EmptyPasswordRejected,
    MalformedDnPattern,
}

impl AuthFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectoryUnreachable => "directory_unreachable",
            Self::UserNotFound => "user_not_found",
            Self::AmbiguousUser => "ambiguous_user",
            Self::WrongPassword => "wrong_password",
            Self::EmptyPasswordRejected => "empty_password_rejected",
            Self::MalformedDnPattern => "malformed_dn_pattern",
        }
    }
}

impl std::fmt::Display for AuthFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AuthError {
    pub fn kind(&self) -> AuthFailureKind {
        match self {
            AuthError::DirectoryUnreachable(_) => AuthFailureKind::DirectoryUnreachable,
            AuthError::UserNotFound => AuthFailureKind::UserNotFound,
            AuthError::AmbiguousUser(_) => AuthFailureKind::AmbiguousUser,
            AuthError::WrongPassword => AuthFailureKind::WrongPassword,
            AuthError::EmptyPasswordRejected => AuthFailureKind::EmptyPasswordRejected,
            AuthError::MalformedDnPattern(_) => AuthFailureKind::MalformedDnPattern,
        }
    }

    /// Whether the failure says something about the directory rather than the credential
    pub fn is_outage(&self) -> bool {
        matches!(self, AuthError::DirectoryUnreachable(_))
    }
}

impl From<AuthError> for dirgate_core::Error {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MalformedDnPattern(msg) => dirgate_core::Error::MalformedDnPattern(msg),
            other => dirgate_core::Error::InternalError(other.to_string()),
        }
    }
}
