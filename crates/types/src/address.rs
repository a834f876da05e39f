//! Node addresses.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, comparable node identity.
///
/// Addresses are short printable strings; ordering is lexicographic and is
/// relied on by the rotating suffrage for deterministic acting-set selection.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        if s.is_empty() {
            return Err(ValidationError::InvalidAddress("empty address".into()));
        }
        if s.chars().any(|c| c.is_whitespace()) {
            return Err(ValidationError::InvalidAddress(format!(
                "address contains whitespace: {s:?}"
            )));
        }
        Ok(Address(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bytes fed into signing payloads.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_whitespace() {
        assert!(Address::new("").is_err());
        assert!(Address::new("a b").is_err());
        assert!(Address::new("n0").is_ok());
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = Address::new("a").unwrap();
        let b = Address::new("b").unwrap();
        assert!(a < b);
    }
}
