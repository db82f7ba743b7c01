//! Read-time redaction of sensitive values in audit snapshots.
//!
//! Raw audit records stay intact in storage for internal compliance use.
//! What leaves the query service is filtered: any snapshot key whose name
//! contains a configured sensitive term (case-insensitive substring match)
//! has its value replaced with a fixed marker.

use serde_json::Value;

/// The value substituted for redacted fields.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Key names that are sensitive by default.
pub const DEFAULT_SENSITIVE_TERMS: [&str; 4] = ["password", "secret", "token", "api_key"];

/// A configured list of sensitive key-name terms.
#[derive(Debug, Clone)]
pub struct RedactionPolicy {
    /// Lowercased substring terms.
    terms: Vec<String>,
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_TERMS.iter().copied())
    }
}

impl RedactionPolicy {
    /// Build a policy from substring terms. Terms are matched
    /// case-insensitively against snapshot key names.
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            terms: terms
                .into_iter()
                .map(|t| t.into().to_lowercase())
                .collect(),
        }
    }

    /// Whether a key name matches any sensitive term.
    #[must_use]
    pub fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.terms.iter().any(|term| key.contains(term.as_str()))
    }

    /// Redact sensitive keys in a snapshot, recursively.
    ///
    /// Matching keys have their entire value replaced with
    /// [`REDACTION_MARKER`], including nested objects; non-matching keys
    /// with object or array values are descended into.
    pub fn redact(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, entry) in map.iter_mut() {
                    if self.is_sensitive(key) {
                        *entry = Value::String(REDACTION_MARKER.to_string());
                    } else {
                        self.redact(entry);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.redact(item);
                }
            }
            _ => {}
        }
    }

    /// Redact an optional snapshot in place; `None` passes through.
    pub fn redact_opt(&self, value: &mut Option<Value>) {
        if let Some(value) = value {
            self.redact(value);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn default_terms_are_masked() {
        let policy = RedactionPolicy::default();
        let mut snapshot = json!({
            "name": "A",
            "password": "hunter2",
            "api_key": "sk-1234",
            "reset_token": "abc",
            "client_secret": "s3cret"
        });
        policy.redact(&mut snapshot);

        assert_eq!(snapshot["name"], "A");
        assert_eq!(snapshot["password"], REDACTION_MARKER);
        assert_eq!(snapshot["api_key"], REDACTION_MARKER);
        assert_eq!(snapshot["reset_token"], REDACTION_MARKER);
        assert_eq!(snapshot["client_secret"], REDACTION_MARKER);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let policy = RedactionPolicy::default();
        let mut snapshot = json!({"Password": "x", "API_KEY": "y"});
        policy.redact(&mut snapshot);
        assert_eq!(snapshot["Password"], REDACTION_MARKER);
        assert_eq!(snapshot["API_KEY"], REDACTION_MARKER);
    }

    #[test]
    fn nested_values_are_redacted() {
        let policy = RedactionPolicy::default();
        let mut snapshot = json!({
            "profile": {"password": "x", "display_name": "Ada"},
            "credentials": [{"token": "t1"}, {"token": "t2"}]
        });
        policy.redact(&mut snapshot);
        assert_eq!(snapshot["profile"]["password"], REDACTION_MARKER);
        assert_eq!(snapshot["profile"]["display_name"], "Ada");
        assert_eq!(snapshot["credentials"][0]["token"], REDACTION_MARKER);
        assert_eq!(snapshot["credentials"][1]["token"], REDACTION_MARKER);
    }

    #[test]
    fn custom_terms_extend_matching() {
        let policy = RedactionPolicy::new(["ssn"]);
        let mut snapshot = json!({"ssn": "000-00-0000", "password": "visible"});
        policy.redact(&mut snapshot);
        assert_eq!(snapshot["ssn"], REDACTION_MARKER);
        assert_eq!(snapshot["password"], "visible");
    }

    proptest! {
        // No snapshot leaves the policy with a raw value under a key
        // containing "password", whatever the surrounding key name is.
        #[test]
        fn password_values_never_survive(value in "[a-zA-Z0-9]{1,16}", prefix in "[a-z]{0,6}") {
            let policy = RedactionPolicy::default();
            let key = format!("{prefix}password");
            let mut snapshot = json!({ key.clone(): value });
            policy.redact(&mut snapshot);
            prop_assert_eq!(&snapshot[&key], REDACTION_MARKER);
        }
    }
}
