//! Short-lived credential acquisition for the streaming recognizer.
//!
//! The broker exchanges the long-lived API key for a scoped session token.
//! Credentials are owned by the session that requested them and are never
//! persisted or reused past their advertised expiry.

mod broker;

pub use broker::{redact_key, BrokerError, Credential, CredentialBroker, MAX_TOKEN_TTL, MIN_TOKEN_TTL};
