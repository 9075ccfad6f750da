//! Requirement names and `requirements.txt`-style manifests.

use crate::error::{EngineError, Result};

const SPECIFIER_CHARS: &[char] = &['=', '<', '>', '!', '~', ';', '[', ' ', '@', '\t'];

/// One requested package: what the user wrote and the name pip reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub spec: String,
    pub name: String,
}

impl Requirement {
    /// Validates a single requirement as typed by a user, e.g. `requests` or
    /// `Django>=4.2`.
    pub fn parse(raw: &str) -> Result<Self> {
        let spec = raw.trim();
        if spec.is_empty() {
            return Err(EngineError::InvalidInput("package name is empty".to_string()));
        }
        if spec.starts_with('-') {
            return Err(EngineError::InvalidInput(format!(
                "'{spec}' looks like an installer option, not a package"
            )));
        }
        if spec.contains("://") || spec.contains('\n') || spec.len() > 200 {
            return Err(EngineError::InvalidInput(format!(
                "'{spec}' is not a plain package requirement"
            )));
        }
        let name = normalize_name(requirement_name(spec));
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(EngineError::InvalidInput(format!(
                "'{spec}' has no valid package name"
            )));
        }
        Ok(Self {
            spec: spec.to_string(),
            name,
        })
    }
}

/// The part of a requirement before any version or marker syntax.
fn requirement_name(spec: &str) -> &str {
    spec.split(SPECIFIER_CHARS).next().unwrap_or("").trim()
}

/// Lowercases and folds runs of `-`, `_` and `.` into a single `-`.
pub fn normalize_name(raw: &str) -> String {
    let mut normalized = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for c in raw.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            pending_dash = !normalized.is_empty();
        } else {
            if pending_dash {
                normalized.push('-');
                pending_dash = false;
            }
            normalized.extend(c.to_lowercase());
        }
    }
    normalized
}

/// Extracts installable requirements from manifest text.
///
/// Skipped: blank lines, comments, option lines (`-r`, `-e`, `--index-url`),
/// URL/VCS references and local paths. Duplicates keep their first
/// occurrence.
pub fn parse_manifest(text: &str) -> Vec<Requirement> {
    let mut requirements: Vec<Requirement> = Vec::new();

    for line in text.lines() {
        let line = match line.find(" #") {
            Some(idx) => &line[..idx],
            None => line,
        }
        .trim();

        if line.is_empty()
            || line.starts_with('#')
            || line.starts_with('-')
            || line.contains("://")
            || line.starts_with("git+")
            || line.starts_with('.')
            || line.starts_with('/')
        {
            continue;
        }

        let Ok(requirement) = Requirement::parse(line.trim_end_matches('\\').trim()) else {
            continue;
        };
        if !requirements.iter().any(|r| r.name == requirement.name) {
            requirements.push(requirement);
        }
    }
    requirements
}
