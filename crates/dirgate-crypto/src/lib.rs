//! Cryptography utilities for dirgate

pub mod hash;
pub mod password;

pub use hash::*;
pub use password::*;
