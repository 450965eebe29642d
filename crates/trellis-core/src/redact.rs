//! Secret redaction for audit metadata and logs.
//!
//! Values matching well-known secret shapes are rewritten to
//! `[REDACTED-<KIND>]` before anything is persisted or displayed. Keys whose
//! names suggest credentials have their values dropped entirely.

use once_cell::sync::Lazy;
use regex::Regex;

static SECRET_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "ANTHROPIC-KEY",
            Regex::new(r"sk-ant-[A-Za-z0-9\-_]+").unwrap(),
        ),
        ("OPENAI-KEY", Regex::new(r"sk-[A-Za-z0-9]{32,}").unwrap()),
        ("AWS-KEY", Regex::new(r"AKIA[0-9A-Z]{16}").unwrap()),
        (
            "BEARER-TOKEN",
            Regex::new(r"Bearer\s+[A-Za-z0-9\-_.~+/]+=*").unwrap(),
        ),
        (
            "JWT",
            Regex::new(r"eyJ[A-Za-z0-9_-]+\.eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+").unwrap(),
        ),
    ]
});

const SENSITIVE_KEY_TERMS: &[&str] = &["secret", "token", "password", "api_key", "apikey"];

/// Replace any secret-shaped substrings with `[REDACTED-<KIND>]`.
pub fn redact_secrets(text: &str) -> String {
    let mut redacted = text.to_string();
    for (kind, pattern) in SECRET_PATTERNS.iter() {
        redacted = pattern
            .replace_all(&redacted, format!("[REDACTED-{kind}]"))
            .into_owned();
    }
    redacted
}

/// Whether a metadata key name suggests its value is a credential.
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEY_TERMS.iter().any(|term| lower.contains(term))
}

/// Recursively redact a JSON value in place: sensitive keys lose their
/// values, strings are pattern-scrubbed.
pub fn redact_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if is_sensitive_key(key) {
                    *val = serde_json::Value::String("[REDACTED]".to_string());
                } else {
                    redact_value(val);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                redact_value(item);
            }
        }
        serde_json::Value::String(s) => {
            let scrubbed = redact_secrets(s);
            if scrubbed != *s {
                *s = scrubbed;
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_api_key_shapes() {
        let text = "key is sk-ant-abc123-def and sk-0123456789abcdef0123456789abcdef";
        let redacted = redact_secrets(text);
        assert!(redacted.contains("[REDACTED-ANTHROPIC-KEY]"));
        assert!(redacted.contains("[REDACTED-OPENAI-KEY]"));
        assert!(!redacted.contains("sk-ant-abc123"));
    }

    #[test]
    fn redacts_bearer_and_jwt() {
        let redacted = redact_secrets("Authorization: Bearer abc.def.ghi");
        assert!(redacted.contains("[REDACTED-BEARER-TOKEN]"));

        let jwt = "eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiIxIn0.sig-part";
        assert_eq!(redact_secrets(jwt), "[REDACTED-JWT]");
    }

    #[test]
    fn plain_text_is_untouched() {
        let text = "nothing secret here, just notes about tokens of appreciation";
        // "token" only triggers key-based redaction, not value scrubbing
        assert_eq!(redact_secrets(text), text);
    }

    #[test]
    fn sensitive_keys_lose_values() {
        let mut value = json!({
            "api_key": "whatever",
            "nested": { "password": "hunter2", "note": "fine" },
            "list": [{ "auth_token": "abc" }]
        });
        redact_value(&mut value);

        assert_eq!(value["api_key"], "[REDACTED]");
        assert_eq!(value["nested"]["password"], "[REDACTED]");
        assert_eq!(value["nested"]["note"], "fine");
        assert_eq!(value["list"][0]["auth_token"], "[REDACTED]");
    }
}
