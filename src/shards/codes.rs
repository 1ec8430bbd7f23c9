//! Integer reply codes → domain errors.

use std::borrow::Cow;
use std::collections::HashMap;

use crate::error::DomainError;

/// Translates integer script replies into [`DomainError`]s.
///
/// ```
/// use shardvisor::ErrorTable;
///
/// let codes = ErrorTable::new().with(7, "NotFound").with(9, "Conflict");
/// assert!(codes.lookup(7).is("NotFound"));
/// assert!(codes.lookup(42).is("unknown"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct ErrorTable {
    names: HashMap<i64, Cow<'static, str>>,
}

impl ErrorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, code: i64, name: impl Into<Cow<'static, str>>) -> Self {
        self.register(code, name);
        self
    }

    /// Maps `code` to `name`, replacing any previous mapping.
    pub fn register(&mut self, code: i64, name: impl Into<Cow<'static, str>>) {
        self.names.insert(code, name.into());
    }

    /// Domain error for `code`; unmapped codes yield [`DomainError::unknown`].
    pub fn lookup(&self, code: i64) -> DomainError {
        match self.names.get(&code) {
            Some(name) => DomainError::new(code, name.clone()),
            None => DomainError::unknown(code),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_registration_wins() {
        let mut codes = ErrorTable::new().with(1, "Old");
        codes.register(1, String::from("New"));
        assert_eq!(codes.len(), 1);
        assert_eq!(codes.lookup(1), DomainError::new(1, "New"));
    }

    #[test]
    fn unmapped_code_keeps_its_value() {
        let err = ErrorTable::new().lookup(-3);
        assert_eq!(err.code, -3);
        assert_eq!(err.to_string(), "unknown (code -3)");
    }
}
