//! Reads pip's console output back into per-package outcomes.

use super::manifest::normalize_name;
use std::collections::BTreeSet;

/// Markers found in one installer run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallerMarkers {
    /// From `Successfully installed a-1.0 b-2.0`.
    pub installed: BTreeSet<String>,
    /// From `Requirement already satisfied: a in ...`.
    pub already_satisfied: BTreeSet<String>,
    /// Every `ERROR:` line, verbatim.
    pub errors: Vec<String>,
}

impl InstallerMarkers {
    pub fn is_empty(&self) -> bool {
        self.installed.is_empty() && self.already_satisfied.is_empty() && self.errors.is_empty()
    }
}

pub fn scan_installer_output(output: &str) -> InstallerMarkers {
    let mut markers = InstallerMarkers::default();

    for line in output.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("Successfully installed ") {
            for token in rest.split_whitespace() {
                // `name-version`; names may contain dashes, versions do not.
                let name = token.rsplit_once('-').map_or(token, |(name, _)| name);
                markers.installed.insert(normalize_name(name));
            }
        } else if let Some(rest) = line.strip_prefix("Requirement already satisfied: ") {
            let name = rest
                .split(|c: char| c.is_whitespace() || "<>=!~;([".contains(c))
                .next()
                .unwrap_or("");
            if !name.is_empty() {
                markers.already_satisfied.insert(normalize_name(name));
            }
        } else if line.starts_with("ERROR:") {
            markers.errors.push(line.to_string());
        }
    }
    markers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_all_three_markers() {
        let output = "\
Collecting requests
Requirement already satisfied: urllib3<3,>=1.21.1 in ./venv/lib/python3.11/site-packages (from requests) (2.2.1)
Requirement already satisfied: Flask in ./venv/lib/python3.11/site-packages (3.0.0)
Installing collected packages: charset-normalizer, requests
Successfully installed charset-normalizer-3.3.2 requests-2.31.0
ERROR: Could not find a version that satisfies the requirement nosuchpkg
";
        let markers = scan_installer_output(output);
        assert!(markers.installed.contains("requests"));
        assert!(markers.installed.contains("charset-normalizer"));
        assert!(markers.already_satisfied.contains("urllib3"));
        assert!(markers.already_satisfied.contains("flask"));
        assert_eq!(markers.errors.len(), 1);
    }

    #[test]
    fn silence_has_no_markers() {
        assert!(scan_installer_output("Looking in indexes: https://pypi.org/simple\n").is_empty());
    }
}
