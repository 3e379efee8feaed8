//! Secret handling utilities.
//!
//! Re-exports secrecy types so callers don't need a direct secrecy
//! dependency to expose the database URL or service tokens.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
