//! Request middleware

pub mod auth;

pub use auth::{basic_credential, require_authentication};
