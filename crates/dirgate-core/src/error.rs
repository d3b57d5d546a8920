//! Error types for dirgate

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Startup and configuration errors.
///
/// Failures of individual authentication attempts are not represented here;
/// they live in `dirgate_auth::AuthError`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed DN pattern: {0}")]
    MalformedDnPattern(String),

    #[error("Directory setup failed: {0}")]
    DirectorySetup(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Process exit code used by the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidConfig(_) | Error::MalformedDnPattern(_) => 78,
            Error::DirectorySetup(_) => 69,
            Error::Io(_) => 74,
            Error::InternalError(_) | Error::Other(_) => 70,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_share_exit_code() {
        assert_eq!(Error::InvalidConfig("x".into()).exit_code(), 78);
        assert_eq!(Error::MalformedDnPattern("x".into()).exit_code(), 78);
        assert_eq!(Error::DirectorySetup("x".into()).exit_code(), 69);
    }

    #[test]
    fn test_display() {
        let err = Error::MalformedDnPattern("no placeholder in `ou=people`".into());
        assert_eq!(
            err.to_string(),
            "Malformed DN pattern: no placeholder in `ou=people`"
        );
    }
}
