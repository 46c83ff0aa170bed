//! Evaluates a parsed [`Policy`](crate::grammar::Policy) against a
//! read-only attribute view: total, side-effect-free, no implicit I/O.

use crate::grammar::{self, ParseError, Policy};

/// Read-only view over a user's attribute bag. `phr-core`'s
/// `AttributeBag` (explicit attributes plus the derived `Role`) is the
/// only real implementation; tests use plain maps.
pub trait AttributeView {
    /// Looks up a single attribute's value by key.
    fn get(&self, key: &str) -> Option<&str>;
}

impl<S: std::hash::BuildHasher> AttributeView for std::collections::HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<&str> {
        std::collections::HashMap::get(self, key).map(String::as_str)
    }
}

/// Evaluates `policy` against `attributes`. A parse failure is reported
/// to the caller (who, per spec §4.2, must still treat it as "not
/// satisfied" rather than surfacing it as an error) via the `Ok(false)`
/// branch of [`evaluate_str`]; this function only evaluates an
/// already-parsed predicate and can never itself fail.
pub fn evaluate(policy: &Policy, attributes: &dyn AttributeView) -> bool {
    policy
        .clauses()
        .iter()
        .all(|clause| attributes.get(&clause.key) == Some(clause.value.as_str()))
}

/// Parses and evaluates in one step. Fail-closed: any parse error is
/// reported back but always paired with a `false` (not satisfied)
/// verdict, so a caller that ignores the `Result`'s `Err` payload and
/// just checks truthiness never accidentally grants access on a
/// malformed policy.
pub fn evaluate_str(policy: &str, attributes: &dyn AttributeView) -> Result<bool, ParseError> {
    match grammar::parse(policy) {
        Ok(parsed) => Ok(evaluate(&parsed, attributes)),
        Err(err) => Err(err),
    }
}

/// Fail-closed convenience: malformed policies and unsatisfied policies
/// are indistinguishable to the caller, exactly as spec §4.2 and
/// property 6 of spec §8 require.
pub fn is_satisfied(policy: &str, attributes: &dyn AttributeView) -> bool {
    evaluate_str(policy, attributes).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn bag(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn satisfied_when_all_clauses_match() {
        let attrs = bag(&[("Role", "Doctor"), ("Dept", "Cardiology")]);
        assert!(is_satisfied("Role:Doctor AND Dept:Cardiology", &attrs));
    }

    #[test]
    fn unsatisfied_when_any_clause_mismatches() {
        let attrs = bag(&[("Role", "Doctor"), ("Dept", "Oncology")]);
        assert!(!is_satisfied("Role:Doctor AND Dept:Cardiology", &attrs));
    }

    #[test]
    fn missing_key_is_not_satisfied() {
        let attrs = bag(&[("Role", "Doctor")]);
        assert!(!is_satisfied("Role:Doctor AND Dept:Cardiology", &attrs));
    }

    #[test]
    fn malformed_policy_fails_closed() {
        let attrs = bag(&[("Role", "Doctor")]);
        assert!(!is_satisfied("not a policy", &attrs));
        assert!(evaluate_str("not a policy", &attrs).is_err());
    }

    #[test]
    fn revoked_sentinel_never_satisfied_by_real_roles() {
        let sentinel = crate::grammar::Policy::revoked_sentinel();
        for role in ["Owner", "Reader", "Admin"] {
            let attrs = bag(&[("Role", role)]);
            assert!(!evaluate(&sentinel, &attrs));
        }
        // phr-core rejects "__REVOKED__" as an attribute value outright,
        // so no real user's bag can ever reach the branch this would
        // otherwise need to guard against.
    }
}
