//! Keys that decide which pooled sessions are interchangeable

use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

/// Opaque key of a pooled session
///
/// Two requests with the same identity may share one live session. Usually
/// derived from the stored credential/state blob the session is created from,
/// so re-exported credentials produce a new identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionIdentity(String);

impl SessionIdentity {
    /// Use an explicit key as identity
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Identity of a credential/state blob: hex xxh3-64 of its bytes
    #[must_use]
    pub fn from_state(state: &[u8]) -> Self {
        Self(format!("{:016x}", xxh3_64(state)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_identity_is_stable_and_content_addressed() {
        let a = SessionIdentity::from_state(br#"{"cookies":[1]}"#);
        let b = SessionIdentity::from_state(br#"{"cookies":[1]}"#);
        let c = SessionIdentity::from_state(br#"{"cookies":[2]}"#);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 16);
    }
}
