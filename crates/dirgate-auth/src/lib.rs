//! Directory-backed authentication for Dirgate
//!
//! [`DirectoryAuthenticator`] answers one question: is this username/password
//! pair valid according to the directory, and if so, which groups is the user
//! in.

pub mod audit;
pub mod authenticator;
pub mod directory;
pub mod error;
pub mod types;

pub use audit::{AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
pub use authenticator::DirectoryAuthenticator;
pub use directory::{
    open_directory, Directory, DirectoryEntry, DirectoryError, LdapDirectory, MemoryDirectory,
    SearchScope,
};
pub use error::{AuthError, AuthFailureKind};
pub use types::{AuthenticationVerdict, Credential, Principal};
