//! Business-level field validation
//!
//! Rules run before a value reaches the encoder, so a bad claim number is
//! reported as `DataValidation` rather than a host error screen.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Constraints for one field identifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldRules {
    pub required: bool,
    pub max_length: Option<usize>,
    pub digits_only: bool,
    pub alphanumeric: bool,
    /// Every character of the value must appear here
    pub allowed_chars: Option<String>,
}

impl FieldRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn max_length(mut self, length: usize) -> Self {
        self.max_length = Some(length);
        self
    }

    pub fn digits_only(mut self) -> Self {
        self.digits_only = true;
        self
    }

    pub fn alphanumeric(mut self) -> Self {
        self.alphanumeric = true;
        self
    }

    pub fn allowed_chars(mut self, chars: impl Into<String>) -> Self {
        self.allowed_chars = Some(chars.into());
        self
    }

    /// Check one value, returning the reason on failure
    pub fn check(&self, value: &str) -> Result<(), String> {
        if self.required && value.trim().is_empty() {
            return Err("value is required".to_string());
        }

        if let Some(max) = self.max_length {
            let len = value.chars().count();
            if len > max {
                return Err(format!("{len} characters exceeds maximum of {max}"));
            }
        }

        if self.digits_only {
            if let Some(ch) = value.chars().find(|c| !c.is_ascii_digit()) {
                return Err(format!("'{ch}' is not a digit"));
            }
        }

        if self.alphanumeric {
            if let Some(ch) = value.chars().find(|c| !c.is_ascii_alphanumeric()) {
                return Err(format!("'{ch}' is not alphanumeric"));
            }
        }

        if let Some(allowed) = &self.allowed_chars {
            if let Some(ch) = value.chars().find(|c| !allowed.contains(*c)) {
                return Err(format!("'{ch}' is not an allowed character"));
            }
        }

        Ok(())
    }
}

/// Rules keyed by field identifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationRules {
    rules: BTreeMap<String, FieldRules>,
}

impl ValidationRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: impl Into<String>, rules: FieldRules) -> Self {
        self.rules.insert(id.into(), rules);
        self
    }

    pub fn get(&self, id: &str) -> Option<&FieldRules> {
        self.rules.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First failing field wins. Fields without rules always pass; a required
    /// field missing from `values` fails.
    pub fn validate(&self, values: &[(&str, &str)]) -> BridgeResult<()> {
        for (id, value) in values {
            if let Some(rules) = self.rules.get(*id) {
                rules.check(value).map_err(|reason| BridgeError::DataValidation {
                    field: (*id).to_string(),
                    reason,
                })?;
            }
        }

        for (id, rules) in &self.rules {
            if rules.required && !values.iter().any(|(v, _)| v == id) {
                return Err(BridgeError::DataValidation {
                    field: id.clone(),
                    reason: "value is required".to_string(),
                });
            }
        }

        Ok(())
    }
}
