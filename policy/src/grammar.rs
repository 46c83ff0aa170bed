//! Parser for the conjunctive attribute-predicate grammar:
//!
//! ```text
//! policy   := clause ("AND" clause)*
//! clause   := key ":" value
//! key      := [A-Za-z_][A-Za-z0-9_]*
//! value    := any non-empty token, no whitespace, no "AND"
//! ```

use std::fmt;

/// A single `key:value` clause.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Clause {
    pub(crate) key: String,
    pub(crate) value: String,
}

/// A parsed, AND-only predicate.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct Policy {
    clauses: Vec<Clause>,
}

impl Policy {
    /// The sentinel predicate no real user can ever satisfy (spec §4.2,
    /// §4.4 blanket revocation). `__REVOKED__` is disallowed as an
    /// ordinary attribute value, so this clause never matches.
    pub fn revoked_sentinel() -> Self {
        Policy {
            clauses: vec![Clause {
                key: "Role".to_string(),
                value: "__REVOKED__".to_string(),
            }],
        }
    }

    pub(crate) fn clauses(&self) -> &[Clause] {
        &self.clauses
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .clauses
            .iter()
            .map(|c| format!("{}:{}", c.key, c.value))
            .collect();
        write!(f, "{}", rendered.join(" AND "))
    }
}

/// Why a policy string failed to parse. Callers treat any `ParseError` as
/// "predicate not satisfied" (fail-closed, spec §4.2) rather than
/// propagating it as a crash.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("empty policy string")]
    Empty,
    #[error("clause {0:?} is missing a ':' separator")]
    MissingSeparator(String),
    #[error("clause {0:?} has an empty key")]
    EmptyKey(String),
    #[error("clause {0:?} has an empty value")]
    EmptyValue(String),
    #[error("key {0:?} is not [A-Za-z_][A-Za-z0-9_]*")]
    InvalidKey(String),
    #[error("value {0:?} contains whitespace")]
    WhitespaceInValue(String),
    #[error("value {0:?} is the reserved token AND")]
    ReservedValue(String),
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parses a policy string. Splitting is on the literal token `"AND"`
/// between clauses, matching the original's `policy_str.split("AND")`
/// (see `sesphr-backend/policy/parser.py`), with stricter per-clause
/// validation than the original (empty keys/values and embedded
/// whitespace are rejected rather than silently producing a clause that
/// can never match).
pub fn parse(policy: &str) -> Result<Policy, ParseError> {
    let trimmed = policy.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut clauses = Vec::new();
    for raw in trimmed.split("AND") {
        let raw = raw.trim();
        let (key, value) = raw
            .split_once(':')
            .ok_or_else(|| ParseError::MissingSeparator(raw.to_string()))?;
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() {
            return Err(ParseError::EmptyKey(raw.to_string()));
        }
        if value.is_empty() {
            return Err(ParseError::EmptyValue(raw.to_string()));
        }
        if !is_valid_key(key) {
            return Err(ParseError::InvalidKey(key.to_string()));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(ParseError::WhitespaceInValue(value.to_string()));
        }
        if value == "AND" {
            return Err(ParseError::ReservedValue(value.to_string()));
        }
        clauses.push(Clause {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(Policy { clauses })
}


#[cfg(test)]
mod props {
    use super::*;
    use proptest::prelude::*;

    fn arb_key() -> impl Strategy<Value = String> {
        "[A-Za-z_][A-Za-z0-9_]{0,15}"
    }

    fn arb_value() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_]{1,15}".prop_filter("value must not be the reserved AND token", |v| v != "AND")
    }

    fn arb_clause() -> impl Strategy<Value = (String, String)> {
        (arb_key(), arb_value())
    }

    proptest! {
        /// Any conjunction built from well-formed clauses parses back to
        /// exactly that many clauses, round-tripping through `Display`.
        #[test]
        fn well_formed_conjunctions_always_parse(clauses in prop::collection::vec(arb_clause(), 1..6)) {
            let rendered = clauses
                .iter()
                .map(|(k, v)| format!("{k}:{v}"))
                .collect::<Vec<_>>()
                .join(" AND ");
            let parsed = parse(&rendered).unwrap();
            prop_assert_eq!(parsed.clauses().len(), clauses.len());
            prop_assert_eq!(parsed.to_string(), rendered);
        }

        /// Parsing is total: a policy string is always either accepted
        /// or rejected, never a panic, for any input bytes that happen
        /// to form valid UTF-8 (spec §4.2's fail-closed design).
        #[test]
        fn parse_never_panics_on_arbitrary_input(s in ".{0,64}") {
            let _ = parse(&s);
        }
    }
}
