//! Parsing of `LC_ALL=C ls -la` output.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
    pub permissions: String,
    pub owner: String,
    pub group: String,
    pub size: u64,
    pub modified: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

/// Drops the `.` and `..` lines from raw listing output.
pub fn filter_dot_entries(stdout: &str) -> String {
    let mut kept: Vec<&str> = stdout
        .lines()
        .filter(|line| !matches!(entry_name(line), Some(".") | Some("..")))
        .collect();
    if stdout.ends_with('\n') && !kept.is_empty() {
        kept.push("");
    }
    kept.join("\n")
}

/// Parses every entry line; `total` lines, `.` and `..` are skipped.
pub fn parse_listing(stdout: &str) -> Vec<DirEntry> {
    stdout.lines().filter_map(parse_line).collect()
}

/// Everything after the eighth field, i.e. the name column.
fn entry_name(line: &str) -> Option<&str> {
    let mut rest = line.trim_start();
    for _ in 0..8 {
        let end = rest.find(char::is_whitespace)?;
        rest = rest[end..].trim_start();
    }
    (!rest.is_empty()).then_some(rest)
}

fn parse_line(line: &str) -> Option<DirEntry> {
    let fields: Vec<&str> = line.split_whitespace().take(8).collect();
    if fields.len() < 8 {
        return None;
    }
    let permissions = fields[0];
    let kind = match permissions.chars().next()? {
        '-' => EntryKind::File,
        'd' => EntryKind::Directory,
        'l' => EntryKind::Symlink,
        'b' | 'c' | 'p' | 's' => EntryKind::Other,
        _ => return None,
    };
    let name_column = entry_name(line)?;
    let (name, link_target) = match (kind, name_column.split_once(" -> ")) {
        (EntryKind::Symlink, Some((name, target))) => (name, Some(target.to_string())),
        _ => (name_column, None),
    };
    if name == "." || name == ".." {
        return None;
    }

    Some(DirEntry {
        name: name.to_string(),
        kind,
        permissions: permissions.to_string(),
        owner: fields[2].to_string(),
        group: fields[3].to_string(),
        size: fields[4].parse().unwrap_or(0),
        modified: fields[5..8].join(" "),
        link_target,
    })
}
