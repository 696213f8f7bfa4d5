//! `key=value` configuration documents
//!
//! Parses the property files used by Ops Manager (`conf-mms.properties`,
//! `mms.conf`) and the automation agent (`local.config`) into an ordered
//! document that keeps comments, applies edits, and writes the text back.
//!
//! Values are kept verbatim: there is no `${...}` expansion and no escape
//! processing, so a value that is not edited is written back exactly as it
//! was read. Assignments are always written as `key=value`.

use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::error::{ProvisionError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Entry {
    leading: Vec<String>,
    value: String,
    trailing: Vec<String>,
}

/// Parsed property file: ordered keys, values and their comment blocks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDocument {
    entries: IndexMap<String, Entry>,
    footer: Vec<String>,
}

impl ConfigDocument {
    /// Parse property file text
    ///
    /// Comment (`#`, `!`) and blank lines are attached to the key that
    /// follows them; lines after the last key form the footer. The key ends
    /// at the first unescaped `=`, `:` or whitespace; whitespace around the
    /// separator is dropped.
    /// A line ending in an odd number of backslashes continues on the next
    /// line, and the continuation is kept verbatim in the value. A repeated
    /// key updates the value in its original position.
    pub fn parse(text: &str) -> Result<Self> {
        let mut doc = ConfigDocument::default();
        let mut pending: Vec<String> = Vec::new();
        let mut lines = text.lines().enumerate();

        while let Some((index, raw)) = lines.next() {
            let trimmed = raw.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                pending.push(raw.to_string());
                continue;
            }

            let mut logical = trimmed.to_string();
            while ends_with_continuation(&logical) {
                match lines.next() {
                    Some((_, next)) => {
                        logical.push('\n');
                        logical.push_str(next);
                    }
                    None => break,
                }
            }

            let (key, value) = split_assignment(&logical);
            if key.is_empty() {
                return Err(ProvisionError::invalid_params(format!(
                    "line {}: assignment without a key",
                    index + 1
                )));
            }

            match doc.entries.get_mut(key) {
                Some(existing) => existing.value = value.to_string(),
                None => {
                    doc.entries.insert(
                        key.to_string(),
                        Entry {
                            leading: std::mem::take(&mut pending),
                            value: value.to_string(),
                            trailing: Vec::new(),
                        },
                    );
                }
            }
        }

        doc.footer = pending;
        Ok(doc)
    }

    /// Value of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|entry| entry.value.as_str())
    }

    /// Keys in file order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the document has no keys
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Comment lines written before `key`
    pub fn comments(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(|entry| entry.leading.as_slice())
    }

    /// Comment lines written after `key`
    pub fn trailing_comments(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(|entry| entry.trailing.as_slice())
    }

    /// Set a value, in place if the key exists, appended otherwise
    pub fn set(&mut self, key: &str, value: &str) {
        match self.entries.get_mut(key) {
            Some(entry) => entry.value = value.to_string(),
            None => {
                self.entries.insert(
                    key.to_string(),
                    Entry {
                        value: value.to_string(),
                        ..Entry::default()
                    },
                );
            }
        }
    }

    /// Replace the comment block before `key`; no-op for unknown keys
    pub fn set_comments(&mut self, key: &str, comments: &[String]) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.leading = comments.iter().map(|c| comment_line(c)).collect();
        }
    }

    /// Replace the comment block after `key`; no-op for unknown keys
    ///
    /// A file written earlier with the same block reads it back as the
    /// comments of the next key (or the footer); that copy is removed so
    /// the block is never doubled.
    pub fn set_trailing_comments(&mut self, key: &str, comments: &[String]) {
        let Some(index) = self.entries.get_index_of(key) else {
            return;
        };
        let lines: Vec<String> = comments.iter().map(|c| comment_line(c)).collect();

        let following = match self.entries.get_index_mut(index + 1) {
            Some((_, next)) => &mut next.leading,
            None => &mut self.footer,
        };
        if !lines.is_empty() && following.starts_with(&lines) {
            following.drain(..lines.len());
        }

        if let Some((_, entry)) = self.entries.get_index_mut(index) {
            entry.trailing = lines;
        }
    }

    /// Apply a set of edits in order
    pub fn apply(&mut self, edits: &ConfigEdits) {
        for assignment in &edits.assignments {
            self.set(&assignment.key, &assignment.value);
            if let Some(leading) = &assignment.leading {
                self.set_comments(&assignment.key, leading);
            }
            if let Some(trailing) = &assignment.trailing {
                self.set_trailing_comments(&assignment.key, trailing);
            }
        }
    }

    /// Serialize back to text, one `key=value` per assignment
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (key, entry) in &self.entries {
            for line in &entry.leading {
                out.push_str(line);
                out.push('\n');
            }
            out.push_str(key);
            out.push('=');
            out.push_str(&entry.value);
            out.push('\n');
            for line in &entry.trailing {
                out.push_str(line);
                out.push('\n');
            }
        }
        for line in &self.footer {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

impl std::fmt::Display for ConfigDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_text())
    }
}

fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

/// Split at the first unescaped `=`, `:` or whitespace
///
/// Whitespace after the key may itself be followed by one `=` or `:`, so
/// `key value`, `key = value` and `key:value` all assign `value` to `key`.
fn split_assignment(line: &str) -> (&str, &str) {
    const BLANK: [char; 3] = [' ', '\t', '\x0c'];

    let mut escaped = false;
    for (idx, c) in line.char_indices() {
        match c {
            '\\' => escaped = !escaped,
            '=' | ':' if !escaped => {
                return (&line[..idx], line[idx + 1..].trim_start_matches(BLANK));
            }
            ' ' | '\t' | '\x0c' if !escaped => {
                let rest = line[idx..].trim_start_matches(BLANK);
                let value = match rest.strip_prefix(['=', ':']) {
                    Some(after) => after.trim_start_matches(BLANK),
                    None => rest,
                };
                return (&line[..idx], value);
            }
            _ => escaped = false,
        }
    }
    (line, "")
}

/// Render a comment as a file line: empty stays blank, `#`/`!` prefixed
/// text is kept, anything else gets `# `
fn comment_line(comment: &str) -> String {
    if comment.is_empty() || comment.starts_with('#') || comment.starts_with('!') {
        comment.to_string()
    } else {
        format!("# {}", comment)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Assignment {
    key: String,
    value: String,
    leading: Option<Vec<String>>,
    trailing: Option<Vec<String>>,
}

/// Ordered edits to apply to a [`ConfigDocument`]
///
/// Later assignments win, so operator overrides are added last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigEdits {
    assignments: Vec<Assignment>,
}

impl ConfigEdits {
    /// No edits
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.assignments.push(Assignment {
            key: key.into(),
            value: value.into(),
            leading: None,
            trailing: None,
        });
        self
    }

    /// Set `key` to `value` and replace the comment block before it
    pub fn set_commented(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        leading: &[&str],
    ) -> Self {
        self.assignments.push(Assignment {
            key: key.into(),
            value: value.into(),
            leading: Some(leading.iter().map(|c| c.to_string()).collect()),
            trailing: None,
        });
        self
    }

    /// Replace the comment block after the most recently set key
    pub fn followed_by(mut self, trailing: &[&str]) -> Self {
        if let Some(last) = self.assignments.last_mut() {
            last.trailing = Some(trailing.iter().map(|c| c.to_string()).collect());
        }
        self
    }

    /// Append operator overrides; they win over everything set before
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, String>) -> Self {
        for (key, value) in overrides {
            self = self.set(key.as_str(), value.as_str());
        }
        self
    }

    /// Number of assignments
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// Whether there is nothing to apply
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Reject edits that would corrupt the line format
    pub fn validate(&self) -> Result<()> {
        for assignment in &self.assignments {
            let key = &assignment.key;
            if key.is_empty() {
                return Err(ProvisionError::invalid_params("Property key cannot be empty"));
            }
            if key.contains(['=', ':', '\n', '\r']) || key.chars().any(char::is_whitespace) {
                return Err(ProvisionError::invalid_params(format!(
                    "Property key '{}' contains a separator or whitespace",
                    key
                )));
            }
            if assignment.value.contains(['\n', '\r']) {
                return Err(ProvisionError::invalid_params(format!(
                    "Value for '{}' spans several lines",
                    key
                )));
            }
            let comments = assignment
                .leading
                .iter()
                .chain(assignment.trailing.iter())
                .flatten();
            for comment in comments {
                if comment.contains(['\n', '\r']) {
                    return Err(ProvisionError::invalid_params(format!(
                        "Comment for '{}' spans several lines",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}
