//! Screen buffer model
//!
//! A [`ScreenState`] is one immutable frame of a character-grid terminal:
//! dimensions, cursor, the labelled fields and the raw wire frame it was
//! decoded from. Every "mutation" returns a new snapshot.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ebcdic::Charset;
use crate::error::{FieldRejection, ScreenError};

/// One addressable region of a screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenField {
    /// Stable identifier callers use instead of row/column
    pub id: String,
    /// 1-based row
    pub row: usize,
    /// 1-based column
    pub col: usize,
    /// Length in characters
    pub length: usize,
    pub value: String,
    /// Host-writable only
    pub protected: bool,
    /// Not echoed (passwords)
    pub hidden: bool,
}

impl ScreenField {
    /// Create an empty, unprotected, visible field
    pub fn new(id: impl Into<String>, row: usize, col: usize, length: usize) -> Self {
        Self {
            id: id.into(),
            row,
            col,
            length,
            value: String::new(),
            protected: false,
            hidden: false,
        }
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    /// Length of the current value in characters
    pub fn value_len(&self) -> usize {
        self.value.chars().count()
    }

    /// Whether the field covers the given 1-based position
    pub fn contains(&self, row: usize, col: usize) -> bool {
        row == self.row && col >= self.col && col < self.col + self.length
    }

    /// Check that `value` could be written into this field
    pub fn check_write(&self, value: &str) -> Result<(), FieldRejection> {
        if self.protected {
            return Err(FieldRejection::ProtectedField { id: self.id.clone() });
        }
        let actual = value.chars().count();
        if actual > self.length {
            return Err(FieldRejection::ValueTooLong {
                id: self.id.clone(),
                actual,
                max: self.length,
            });
        }
        Ok(())
    }
}

/// Immutable snapshot of one rendered screen
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenState {
    rows: usize,
    cols: usize,
    /// 1-based (row, col)
    cursor: (usize, usize),
    fields: Vec<ScreenField>,
    /// Underlying wire frame, kept for diagnostics and pattern matching
    #[serde(skip)]
    raw: Vec<u8>,
    /// Charset the text bytes of `raw` are in
    #[serde(skip)]
    raw_charset: Charset,
    text_rows: Vec<String>,
    screen_id: Option<String>,
    captured_at: DateTime<Utc>,
}

impl ScreenState {
    pub fn builder(rows: usize, cols: usize) -> ScreenStateBuilder {
        ScreenStateBuilder::new(rows, cols)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn cursor(&self) -> (usize, usize) {
        self.cursor
    }

    pub fn fields(&self) -> &[ScreenField] {
        &self.fields
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn screen_id(&self) -> Option<&str> {
        self.screen_id.as_deref()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Look up a field by its stable identifier
    pub fn get_field(&self, id: &str) -> Result<&ScreenField, FieldRejection> {
        self.fields
            .iter()
            .find(|f| f.id == id)
            .ok_or_else(|| FieldRejection::UnknownField { id: id.to_string() })
    }

    /// Field covering a 1-based position, if any
    pub fn field_at(&self, row: usize, col: usize) -> Option<&ScreenField> {
        self.fields.iter().find(|f| f.contains(row, col))
    }

    pub fn unprotected_fields(&self) -> impl Iterator<Item = &ScreenField> {
        self.fields.iter().filter(|f| !f.protected)
    }

    /// All field values keyed by identifier
    pub fn field_values(&self) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .map(|f| (f.id.clone(), f.value.clone()))
            .collect()
    }

    /// Return a new snapshot with one field's value replaced.
    ///
    /// Values are never truncated: an oversized value is a rejection.
    pub fn with_field_value(&self, id: &str, value: &str) -> Result<ScreenState, FieldRejection> {
        let index = self
            .fields
            .iter()
            .position(|f| f.id == id)
            .ok_or_else(|| FieldRejection::UnknownField { id: id.to_string() })?;
        self.fields[index].check_write(value)?;

        let mut next = self.clone();
        next.fields[index].value = value.to_string();
        Ok(next)
    }

    /// Case-sensitive substring match against the decoded text rows, every
    /// unprotected field value and, for ASCII frames, the raw buffer.
    ///
    /// EBCDIC frames are only matched through their decoded text: a raw search
    /// there would compare pattern bytes against a different code page.
    pub fn matches(&self, pattern: &str) -> bool {
        if pattern.is_empty() {
            return true;
        }
        let needle = pattern.as_bytes();
        if self.raw_charset == Charset::Ascii
            && self.raw.windows(needle.len()).any(|w| w == needle)
        {
            return true;
        }
        if self.text_rows.iter().any(|row| row.contains(pattern)) {
            return true;
        }
        self.unprotected_fields().any(|f| f.value.contains(pattern))
    }

    /// Text of a 1-based row
    pub fn row_text(&self, row: usize) -> Option<&str> {
        row.checked_sub(1)
            .and_then(|i| self.text_rows.get(i))
            .map(String::as_str)
    }

    /// Whole screen as newline-separated rows
    pub fn text(&self) -> String {
        self.text_rows.join("\n")
    }
}

/// Builder that validates every [`ScreenState`] invariant on `build`
#[derive(Debug, Clone)]
pub struct ScreenStateBuilder {
    rows: usize,
    cols: usize,
    cursor: (usize, usize),
    fields: Vec<ScreenField>,
    raw: Vec<u8>,
    raw_charset: Charset,
    text_rows: Vec<String>,
    screen_id: Option<String>,
    captured_at: Option<DateTime<Utc>>,
}

impl ScreenStateBuilder {
    fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cursor: (1, 1),
            fields: Vec::new(),
            raw: Vec::new(),
            raw_charset: Charset::Ascii,
            text_rows: Vec::new(),
            screen_id: None,
            captured_at: None,
        }
    }

    pub fn cursor(mut self, row: usize, col: usize) -> Self {
        self.cursor = (row, col);
        self
    }

    pub fn field(mut self, field: ScreenField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = ScreenField>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn raw(mut self, raw: impl Into<Vec<u8>>) -> Self {
        self.raw = raw.into();
        self
    }

    /// Charset of the raw frame's text. Hand-built frames default to ASCII.
    pub fn raw_charset(mut self, charset: Charset) -> Self {
        self.raw_charset = charset;
        self
    }

    pub fn text_rows(mut self, rows: Vec<String>) -> Self {
        self.text_rows = rows;
        self
    }

    pub fn screen_id(mut self, id: impl Into<String>) -> Self {
        self.screen_id = Some(id.into());
        self
    }

    pub fn maybe_screen_id(mut self, id: Option<String>) -> Self {
        self.screen_id = id;
        self
    }

    pub fn captured_at(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = Some(at);
        self
    }

    pub fn build(self) -> Result<ScreenState, ScreenError> {
        let (rows, cols) = (self.rows, self.cols);
        if rows == 0 || cols == 0 {
            return Err(ScreenError::InvalidDimensions { rows, cols });
        }

        let (row, col) = self.cursor;
        if row == 0 || col == 0 || row > rows || col > cols {
            return Err(ScreenError::CursorOutOfBounds { row, col, rows, cols });
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            let fits = field.row >= 1
                && field.row <= rows
                && field.col >= 1
                && field.col + field.length <= cols + 1;
            if !fits {
                return Err(ScreenError::FieldOutOfBounds {
                    id: field.id.clone(),
                    row: field.row,
                    col: field.col,
                    length: field.length,
                });
            }
            if !seen.insert(field.id.as_str()) {
                return Err(ScreenError::DuplicateField { id: field.id.clone() });
            }
            if field.value_len() > field.length {
                return Err(ScreenError::FieldOverflow {
                    id: field.id.clone(),
                    length: field.length,
                });
            }
        }

        Ok(ScreenState {
            rows,
            cols,
            cursor: self.cursor,
            fields: self.fields,
            raw: self.raw,
            raw_charset: self.raw_charset,
            text_rows: self.text_rows,
            screen_id: self.screen_id,
            captured_at: self.captured_at.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login_screen() -> ScreenState {
        ScreenState::builder(24, 80)
            .cursor(6, 53)
            .field(ScreenField::new("title", 1, 30, 20).protected().with_value("Sign On"))
            .field(ScreenField::new("user", 6, 53, 10))
            .field(ScreenField::new("password", 7, 53, 10).hidden())
            .raw(b"Sign On  System . . . PUB400".to_vec())
            .text_rows(vec!["                             Sign On".to_string()])
            .screen_id("Login")
            .build()
            .unwrap()
    }

    #[test]
    fn test_get_field() {
        let screen = login_screen();
        assert_eq!(screen.get_field("user").unwrap().col, 53);
        assert_eq!(
            screen.get_field("missing"),
            Err(FieldRejection::UnknownField { id: "missing".into() })
        );
    }

    #[test]
    fn test_with_field_value_returns_new_snapshot() {
        let screen = login_screen();
        let next = screen.with_field_value("user", "QSECOFR").unwrap();
        assert_eq!(next.get_field("user").unwrap().value, "QSECOFR");
        assert_eq!(screen.get_field("user").unwrap().value, "");
        assert_eq!(next.captured_at(), screen.captured_at());
    }

    #[test]
    fn test_password_too_long_rejected() {
        let screen = login_screen();
        let result = screen.with_field_value("password", "toolongvalue123");
        assert_eq!(
            result,
            Err(FieldRejection::ValueTooLong { id: "password".into(), actual: 15, max: 10 })
        );
    }

    #[test]
    fn test_protected_field_rejected() {
        let screen = login_screen();
        assert_eq!(
            screen.with_field_value("title", "x"),
            Err(FieldRejection::ProtectedField { id: "title".into() })
        );
    }

    #[test]
    fn test_matches_sources() {
        let screen = login_screen();
        assert!(screen.matches("PUB400"));
        assert!(screen.matches("Sign On"));
        assert!(!screen.matches("sign on"));

        let typed = screen.with_field_value("user", "CLAIMS").unwrap();
        assert!(typed.matches("CLAIMS"));
        assert!(!screen.matches("CLAIMS"));
    }

    #[test]
    fn test_ebcdic_raw_frame_not_searched_as_ascii() {
        // " . ." in CP037
        let screen = ScreenState::builder(24, 80)
            .raw(vec![0x40, 0x4B, 0x40, 0x4B])
            .raw_charset(Charset::Ebcdic037)
            .text_rows(vec![" . .".to_string()])
            .build()
            .unwrap();
        assert!(!screen.matches("@"));
        assert!(!screen.matches("K@K"));
        assert!(screen.matches(". ."));
    }

    #[test]
    fn test_protected_values_not_matched() {
        let screen = ScreenState::builder(24, 80)
            .field(ScreenField::new("msg", 24, 1, 20).protected().with_value("HIDDENTOKEN"))
            .build()
            .unwrap();
        assert!(!screen.matches("HIDDENTOKEN"));
    }

    #[test]
    fn test_builder_rejects_invalid_states() {
        assert!(matches!(
            ScreenState::builder(24, 80).cursor(25, 1).build(),
            Err(ScreenError::CursorOutOfBounds { .. })
        ));
        assert!(matches!(
            ScreenState::builder(24, 80)
                .field(ScreenField::new("a", 1, 1, 5))
                .field(ScreenField::new("a", 2, 1, 5))
                .build(),
            Err(ScreenError::DuplicateField { .. })
        ));
        assert!(matches!(
            ScreenState::builder(24, 80)
                .field(ScreenField::new("wide", 1, 75, 10))
                .build(),
            Err(ScreenError::FieldOutOfBounds { .. })
        ));
        assert!(matches!(
            ScreenState::builder(24, 80)
                .field(ScreenField::new("a", 1, 1, 2).with_value("abc"))
                .build(),
            Err(ScreenError::FieldOverflow { .. })
        ));
    }

    #[test]
    fn test_field_at_and_rows() {
        let screen = login_screen();
        assert_eq!(screen.field_at(6, 60).map(|f| f.id.as_str()), Some("user"));
        assert!(screen.field_at(6, 63).is_none());
        assert_eq!(screen.row_text(1).map(str::trim), Some("Sign On"));
        assert!(screen.row_text(0).is_none());
    }
}
