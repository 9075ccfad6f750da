//! # Outbound Redaction
//!
//! Every stdout, stderr and error message leaving the engine passes through a
//! [`Redactor`] so users never see infrastructure details of the hosting side:
//! jail roots, storage prefixes, internal addresses, credentials.
//!
//! Rules run in a fixed order:
//!
//! 1. configured infrastructure fragments (literal substrings);
//! 2. credential shapes (`Authorization:`, `Bearer`, `password=...`);
//! 3. email addresses;
//! 4. absolute and `~/` paths;
//! 5. IPv4 addresses;
//! 6. opaque tokens of 32 or more characters.
//!
//! Redaction is applied after errors are classified, never before, so the
//! classification still sees the raw text.

use regex::Regex;
use std::sync::OnceLock;

pub const INTERNAL_PLACEHOLDER: &str = "[internal]";
pub const PATH_PLACEHOLDER: &str = "[path]";
pub const SECRET_PLACEHOLDER: &str = "[REDACTED]";

fn redaction_rules() -> &'static Vec<(Regex, &'static str)> {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            (
                Regex::new(r"(?i)\bAuthorization\b\s*:\s*\S+\s+\S+")
                    .expect("authorization header redaction regex must compile"),
                "Authorization: [REDACTED]",
            ),
            (
                Regex::new(r"(?i)\bBearer\s+[A-Za-z0-9._+/=-]{8,}")
                    .expect("bearer redaction regex must compile"),
                "Bearer [REDACTED]",
            ),
            (
                Regex::new(r"(?i)\b(password|passwd|passphrase|token|secret|api[_-]?key)\b\s*[:=]\s*(\S+)")
                    .expect("key-value secret redaction regex must compile"),
                "$1=[REDACTED]",
            ),
            (
                Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
                    .expect("email redaction regex must compile"),
                "[email]",
            ),
            (
                Regex::new(r#"(^|[\s'"=(:\[,])~?/[^\s'"`,;:)\]]+"#)
                    .expect("path redaction regex must compile"),
                "${1}[path]",
            ),
            (
                Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("ipv4 redaction regex must compile"),
                "[ip]",
            ),
            (
                Regex::new(r"\b[A-Za-z0-9_-]{32,}\b").expect("token redaction regex must compile"),
                SECRET_PLACEHOLDER,
            ),
        ]
    })
}

/// Scrubs outbound text. Cheap to clone; fragments are per deployment.
#[derive(Debug, Clone)]
pub struct Redactor {
    enabled: bool,
    fragments: Vec<String>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(true, Vec::<String>::new())
    }
}

impl Redactor {
    pub fn new<I, S>(enabled: bool, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fragments: Vec<String> = fragments
            .into_iter()
            .map(Into::into)
            .map(|f| f.trim_end_matches('/').to_string())
            .filter(|f| !f.is_empty())
            .collect();
        // Longest first so a nested root is not half-replaced by its parent.
        fragments.sort_by_key(|f| std::cmp::Reverse(f.len()));
        fragments.dedup();
        Self { enabled, fragments }
    }

    pub fn disabled() -> Self {
        Self::new(false, Vec::<String>::new())
    }

    pub fn redact(&self, text: &str) -> String {
        if !self.enabled || text.is_empty() {
            return text.to_string();
        }

        let mut redacted = text.to_string();
        for fragment in &self.fragments {
            if redacted.contains(fragment.as_str()) {
                redacted = redacted.replace(fragment.as_str(), INTERNAL_PLACEHOLDER);
            }
        }
        for (pattern, replacement) in redaction_rules() {
            redacted = pattern.replace_all(&redacted, *replacement).into_owned();
        }
        redacted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_redactor_is_identity() {
        let text = "error at /srv/jail/user_1 from 10.0.0.4";
        assert_eq!(Redactor::disabled().redact(text), text);
    }

    #[test]
    fn infrastructure_fragments_are_replaced_first() {
        let redactor = Redactor::new(true, ["/srv/allocated", "/srv/allocated/user_7/server_3/"]);
        let out = redactor.redact("No space left on device: /srv/allocated/user_7/server_3/data.bin");
        assert!(!out.contains("/srv/allocated"));
        assert!(!out.contains("user_7"));
        assert!(out.contains("No space left on device"));
    }

    #[test]
    fn paths_are_redacted_but_prose_is_kept() {
        let redactor = Redactor::default();
        let out = redactor.redact("cat: /etc/shadow: Permission denied");
        assert_eq!(out, "cat: [path]: Permission denied");

        let home = redactor.redact("ls: cannot access '~/secret/plans': No such file");
        assert_eq!(home, "ls: cannot access '[path]': No such file");

        assert_eq!(redactor.redact("read and/or write"), "read and/or write");
    }

    #[test]
    fn addresses_emails_and_tokens() {
        let redactor = Redactor::default();
        assert_eq!(
            redactor.redact("ssh: connect to host 192.168.1.20 port 22: Connection refused"),
            "ssh: connect to host [ip] port 22: Connection refused"
        );
        assert_eq!(redactor.redact("owner admin@example.com"), "owner [email]");
        assert_eq!(
            redactor.redact("key abcdefghijklmnopqrstuvwxyz0123456789 end"),
            "key [REDACTED] end"
        );
        assert_eq!(redactor.redact("password=hunter2"), "password=[REDACTED]");
    }
}
