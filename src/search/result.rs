//! Result values produced by every builtin.

use std::collections::HashSet;

use crate::error::{Result, SearchError};

/// Deduplicated, unordered set of message identifiers.
pub type UidSet = HashSet<String>;

/// The value of an evaluated term.
///
/// In single-message mode builtins answer with `Bool`; in whole-folder mode
/// the same builtins answer with `Uids`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchValue {
    Bool(bool),
    Int(i64),
    String(String),
    /// Unix seconds.
    Time(i64),
    Uids(UidSet),
}

impl SearchValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::String(_) => "string",
            Self::Time(_) => "time",
            Self::Uids(_) => "uid array",
        }
    }

    pub fn empty_uids() -> Self {
        Self::Uids(UidSet::new())
    }

    /// The string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of `Int` and `Time` values.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Int(n) | Self::Time(n) => Some(*n),
            _ => None,
        }
    }

    /// Require a boolean, reporting `function` on mismatch.
    pub fn expect_bool(self, function: &str) -> Result<bool> {
        match self {
            Self::Bool(b) => Ok(b),
            other => Err(SearchError::type_error(
                function,
                format!("expected a bool result, got {}", other.kind()),
            )),
        }
    }

    /// Require a uid array, reporting `function` on mismatch.
    pub fn expect_uids(self, function: &str) -> Result<UidSet> {
        match self {
            Self::Uids(set) => Ok(set),
            other => Err(SearchError::type_error(
                function,
                format!("expected a uid array, got {}", other.kind()),
            )),
        }
    }
}

impl From<bool> for SearchValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<UidSet> for SearchValue {
    fn from(set: UidSet) -> Self {
        Self::Uids(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expect_variants() {
        assert!(SearchValue::Bool(true).expect_bool("and").expect("bool"));
        let err = SearchValue::Int(3).expect_uids("match-threads").unwrap_err();
        assert!(matches!(err, SearchError::Type { .. }));
        assert_eq!(SearchValue::Time(9).as_number(), Some(9));
        assert_eq!(SearchValue::String("x".into()).as_number(), None);
    }
}
