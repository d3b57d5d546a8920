//! dirgate core library
//!
//! Configuration, startup errors and DN helpers shared by the dirgate crates.

pub mod config;
pub mod dn;
pub mod error;

pub use config::{ComparisonPolicy, DirectoryConfig, DirgateConfig, UserSearchConfig};
pub use dn::DnPattern;
pub use error::{Error, Result};

/// dirgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
