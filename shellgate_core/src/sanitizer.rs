//! Pre-dispatch command checks.
//!
//! Two independent rules:
//!
//! - a denylist of environment-breaking phrases, matched case-insensitively as
//!   substrings of the trimmed command on every target;
//! - for jailed targets, privileged programs refused in command position.

use crate::path_resolver::PathPolicy;
use crate::shell_syntax::command_heads;

const DENIED_PHRASES: &[&str] = &["deactivate", "exit venv", "source deactivate"];

const PRIVILEGED_PROGRAMS: &[&str] = &["sudo", "su", "doas", "chown", "fdisk", "mount", "umount"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Blocked { reason: String },
}

#[derive(Debug, Clone)]
pub struct CommandSanitizer {
    denied_phrases: Vec<String>,
}

impl Default for CommandSanitizer {
    fn default() -> Self {
        Self {
            denied_phrases: DENIED_PHRASES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl CommandSanitizer {
    /// Adds extra denylist phrases on top of the built-in ones.
    pub fn with_extra_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.denied_phrases
            .extend(phrases.into_iter().map(|p| p.into().to_lowercase()));
        self
    }

    pub fn check(&self, raw: &str, policy: PathPolicy) -> Verdict {
        let lowered = raw.trim().to_lowercase();

        if let Some(phrase) = self.denied_phrases.iter().find(|p| lowered.contains(p.as_str())) {
            return Verdict::Blocked {
                reason: format!("'{phrase}' would break the managed environment"),
            };
        }

        if policy.is_jailed() {
            for head in command_heads(raw) {
                let program = head.to_lowercase();
                if PRIVILEGED_PROGRAMS.contains(&program.as_str()) || program.starts_with("mkfs") {
                    return Verdict::Blocked {
                        reason: format!("'{head}' is not available on allocated servers"),
                    };
                }
            }
        }

        Verdict::Allowed
    }
}
