//! Secret handling utilities.
//!
//! Re-exports the secrecy types used for credentials such as the
//! database URL.

pub use secrecy::{ExposeSecret, SecretString};
