//! Changelog entry parsing and version ordering

use crate::model::ChangeEntry;
use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

fn entry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^-\s+[vV]([^\s(]+)\s*\(([^)]*)\)\s*:\s*(.*)$").expect("static changelog pattern")
    })
}

fn sub_item_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s+[-+]\s+(.*)$").expect("static sub-item pattern"))
}

/// Entries read from a changelog body plus the lines that looked like entries but were not
#[derive(Debug, Default)]
pub(crate) struct ParsedChangelog {
    pub(crate) entries: Vec<ChangeEntry>,
    pub(crate) malformed: Vec<String>,
}

/// Parse `- vN (date): summary` entries with indented `- item` sub-items
pub(crate) fn parse_entries(body: &str) -> ParsedChangelog {
    let mut parsed = ParsedChangelog::default();

    for line in body.lines() {
        let line = line.trim_end();
        if let Some(caps) = entry_pattern().captures(line) {
            parsed.entries.push(ChangeEntry {
                version: caps[1].to_string(),
                date: caps[2].trim().to_string(),
                summary: caps[3].trim().to_string(),
                changes: Vec::new(),
            });
        } else if let Some(caps) = sub_item_pattern().captures(line) {
            if let Some(entry) = parsed.entries.last_mut() {
                entry.changes.push(caps[1].trim().to_string());
            }
        } else if line.starts_with("- ") {
            parsed.malformed.push(line.to_string());
        }
    }

    parsed
}

/// Compare version labels segment by segment, numerically where both segments are numbers
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split(['.', '-']);
    let mut right = b.split(['.', '-']);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(n), Ok(m)) => n.cmp(&m),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ordering() {
        assert_eq!(compare_versions("10", "9"), Ordering::Greater);
        assert_eq!(compare_versions("1.2", "1.10"), Ordering::Less);
        assert_eq!(compare_versions("2.0", "2"), Ordering::Greater);
        assert_eq!(compare_versions("3", "3"), Ordering::Equal);
    }

    #[test]
    fn entries_and_sub_items() {
        let parsed = parse_entries("- v1.1 (2024-05-02): Fixes\n  - typo\n- v1 ( 2024-05-01 ):  First \n");
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[0].version, "1.1");
        assert_eq!(parsed.entries[0].changes, vec!["typo"]);
        assert_eq!(parsed.entries[1].date, "2024-05-01");
        assert_eq!(parsed.entries[1].summary, "First");
        assert!(parsed.malformed.is_empty());
    }

    #[test]
    fn sub_item_before_entry_ignored() {
        let parsed = parse_entries("  - orphan\n- v1 (d): x\n");
        assert_eq!(parsed.entries.len(), 1);
        assert!(parsed.entries[0].changes.is_empty());
    }

    #[test]
    fn prose_is_not_malformed() {
        let parsed = parse_entries("History of the doc.\n- nope\n");
        assert!(parsed.entries.is_empty());
        assert_eq!(parsed.malformed, vec!["- nope"]);
    }
}
