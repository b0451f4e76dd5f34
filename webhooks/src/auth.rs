//! Shared-secret authentication for the management endpoints.
//!
//! Callers put the secret in the JSON body as `secretKey`. It is taken out of
//! the body before anything else sees it, so it is never persisted or logged.

use crate::metrics_defs::AUTH_REJECTED;
use crate::types::{Document, SECRET_FIELD};
use serde_json::Value;
use shared::counter;
use subtle::ConstantTimeEq;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum AuthError {
    #[error("secretKey missing from request body")]
    Missing,

    #[error("secretKey does not match")]
    Mismatch,
}

#[derive(Clone)]
pub struct SharedSecret(String);

impl SharedSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        SharedSecret(secret.into())
    }

    pub fn matches(&self, candidate: &str) -> bool {
        // An unset secret authorizes nobody.
        !self.0.is_empty() && bool::from(candidate.as_bytes().ct_eq(self.0.as_bytes()))
    }

    /// Removes `secretKey` from `body` and checks it.
    pub fn authorize(&self, body: &mut Document) -> Result<(), AuthError> {
        let result = match body.remove(SECRET_FIELD) {
            Some(Value::String(candidate)) if self.matches(&candidate) => Ok(()),
            Some(_) => Err(AuthError::Mismatch),
            None => Err(AuthError::Missing),
        };

        if let Err(e) = &result {
            counter!(AUTH_REJECTED).increment(1);
            tracing::warn!(reason = %e, "Rejected management request");
        }
        result
    }
}
