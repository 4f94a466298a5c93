//! Authenticated caller identity

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The verified caller of a single request
///
/// Built once per request from token claims and never persisted. `user_id`
/// is the owner of every object the caller uploads or lists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable subject identifier (`oid`, falling back to `sub`)
    pub user_id: String,
    /// Sign-in name or email, empty when the token carries neither
    pub email: String,
    /// Human readable name, possibly empty
    pub display_name: String,
    /// Every claim of the token; non-string values in compact JSON
    pub raw_claims: BTreeMap<String, String>,
}

impl Identity {
    /// Identity with only a user id, mostly for tests and tooling
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: String::new(),
            display_name: String::new(),
            raw_claims: BTreeMap::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Look up a raw claim
    pub fn claim(&self, name: &str) -> Option<&str> {
        self.raw_claims.get(name).map(String::as_str)
    }
}
