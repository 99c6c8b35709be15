//! Screen catalog
//!
//! Maps raw host screens onto stable names. Each [`ScreenDefinition`] carries a
//! text signature used to recognise the screen and labels that give its input
//! fields caller-facing identifiers. Row/column positions live here and in the
//! datastream adapter only; everything above works with identifiers.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Text that must appear on a screen, optionally pinned to a 1-based row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMatch {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
}

impl TextMatch {
    pub fn anywhere(text: impl Into<String>) -> Self {
        Self { text: text.into(), row: None }
    }

    pub fn on_row(row: usize, text: impl Into<String>) -> Self {
        Self { text: text.into(), row: Some(row) }
    }

    fn is_found(&self, rows: &[String]) -> bool {
        match self.row {
            Some(row) => row
                .checked_sub(1)
                .and_then(|i| rows.get(i))
                .is_some_and(|line| line.contains(&self.text)),
            None => rows.iter().any(|line| line.contains(&self.text)),
        }
    }
}

/// Caller-facing name for the field whose data starts at (row, col)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLabel {
    pub id: String,
    pub row: usize,
    pub col: usize,
}

impl FieldLabel {
    pub fn new(id: impl Into<String>, row: usize, col: usize) -> Self {
        Self { id: id.into(), row, col }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenDefinition {
    pub id: String,
    pub signature: Vec<TextMatch>,
    #[serde(default)]
    pub fields: Vec<FieldLabel>,
}

impl ScreenDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), signature: Vec::new(), fields: Vec::new() }
    }

    pub fn signature(mut self, text: TextMatch) -> Self {
        self.signature.push(text);
        self
    }

    pub fn label(mut self, id: impl Into<String>, row: usize, col: usize) -> Self {
        self.fields.push(FieldLabel::new(id, row, col));
        self
    }

    /// A definition with an empty signature never matches
    pub fn matches(&self, rows: &[String]) -> bool {
        !self.signature.is_empty() && self.signature.iter().all(|m| m.is_found(rows))
    }

    pub fn label_at(&self, row: usize, col: usize) -> Option<&str> {
        self.fields
            .iter()
            .find(|l| l.row == row && l.col == col)
            .map(|l| l.id.as_str())
    }
}

/// Ordered list of known screens. The first match wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScreenCatalog {
    screens: Vec<ScreenDefinition>,
}

impl ScreenCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, definition: ScreenDefinition) -> Self {
        self.screens.push(definition);
        self
    }

    pub fn push(&mut self, definition: ScreenDefinition) {
        self.screens.push(definition);
    }

    pub fn screens(&self) -> &[ScreenDefinition] {
        &self.screens
    }

    pub fn is_empty(&self) -> bool {
        self.screens.is_empty()
    }

    /// First definition whose signature matches the decoded rows
    pub fn identify(&self, rows: &[String]) -> Option<&ScreenDefinition> {
        self.screens.iter().find(|d| d.matches(rows))
    }

    /// Identifier for an unlabelled field
    pub fn positional_id(row: usize, col: usize) -> String {
        format!("R{row}C{col}")
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::FileError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}
