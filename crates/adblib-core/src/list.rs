//! Lists decoded line by line, keeping per-line decode failures

use std::fmt;

/// A line of a server reply that could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLine {
    /// Zero-based index of the line in the reply
    pub line_index: usize,
    pub message: String,
    pub raw_line: String,
}

impl fmt::Display for ErrorLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: {} ({:?})",
            self.line_index, self.message, self.raw_line
        )
    }
}

/// Decoded entries plus the lines that failed to decode
///
/// A malformed line never invalidates the rest of the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListWithErrors<T> {
    entries: Vec<T>,
    errors: Vec<ErrorLine>,
}

impl<T> Default for ListWithErrors<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<T> ListWithErrors<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<T>) -> Self {
        Self {
            entries,
            errors: Vec::new(),
        }
    }

    pub fn push_entry(&mut self, entry: T) {
        self.entries.push(entry);
    }

    pub fn push_error(&mut self, line_index: usize, message: impl Into<String>, raw_line: &str) {
        self.errors.push(ErrorLine {
            line_index,
            message: message.into(),
            raw_line: raw_line.to_string(),
        });
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    pub fn errors(&self) -> &[ErrorLine] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<T> {
        self.entries
    }
}

impl<'a, T> IntoIterator for &'a ListWithErrors<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Process ids reported by `track-jdwp`
pub type ProcessIdList = ListWithErrors<u32>;
