//! Ordered `Key=Value` documents used for scheduler job-info and
//! plugin-info files.
//!
//! The scheduler reads these files line by line; order is preserved so
//! the rendered output is stable and readable. The worker agent parses the
//! same format back when it reads its plugin-info context.

use std::fmt;

/// An ordered list of `Key=Value` entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValueFile {
    entries: Vec<(String, String)>,
}

impl KeyValueFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, replacing the value in place if the key already exists.
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        let key = key.into();
        let value = value.to_string();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse a document. Blank lines, `#`/`;` comments, `[section]` headers
    /// and lines without `=` are skipped. Later duplicates win.
    pub fn parse(text: &str) -> Self {
        let mut file = Self::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty()
                || line.starts_with('#')
                || line.starts_with(';')
                || line.starts_with('[')
            {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                if !key.is_empty() {
                    file.set(key, value.trim());
                }
            }
        }
        file
    }
}

impl fmt::Display for KeyValueFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.entries {
            writeln!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// Interpret a scheduler-style boolean (`1/true/yes/on`, case-insensitive).
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
