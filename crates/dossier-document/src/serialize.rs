//! Render a [`Document`] back to text
//!
//! Output re-parses to an equivalent tree: same headings, levels, tags,
//! properties and bodies. The changelog is taken from the changelog section
//! bodies, not re-rendered from `change_history`.

use crate::model::{Document, Section};
use std::fmt::Write;

/// Serialize a document to Org-style text
#[must_use]
pub fn serialize(document: &Document) -> String {
    let mut out = String::new();
    for (key, value) in document.metadata() {
        // Writing to a String cannot fail
        let _ = writeln!(out, "#+{key}: {value}");
    }
    for section in document.sections() {
        write_section(&mut out, section);
    }
    out
}

fn write_section(out: &mut String, section: &Section) {
    out.push_str(&"*".repeat(section.level()));
    if !section.heading().is_empty() {
        out.push(' ');
        out.push_str(section.heading());
    }
    if !section.tags().is_empty() {
        out.push_str(" :");
        for tag in section.tags() {
            out.push_str(tag);
            out.push(':');
        }
    }
    out.push('\n');

    if !section.properties().is_empty() {
        out.push_str(":PROPERTIES:\n");
        for (key, value) in section.properties() {
            let _ = writeln!(out, ":{key}: {value}");
        }
        out.push_str(":END:\n");
    }

    if !section.body().is_empty() {
        out.push_str(section.body());
        out.push('\n');
    }

    for child in section.children() {
        write_section(out, child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::DocumentParser;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_full_section() {
        let text = "#+TITLE: T\n* Requirements :core:\n:PROPERTIES:\n:ID: REQ-1\n:END:\nSome body\n** Child\n";
        let doc = DocumentParser::new().parse(text).document.expect("document");
        assert_eq!(serialize(&doc), text);
    }

    #[test]
    fn reparse_preserves_changelog() {
        let text = "* Changelog :changelog:\n- v2 (2024-01-02): b\n  - detail\n- v1 (2024-01-01): a\n";
        let parser = DocumentParser::new();
        let doc = parser.parse(text).document.expect("document");
        let again = parser.parse(&serialize(&doc)).document.expect("document");
        assert_eq!(doc, again);
    }
}
