// Dynamic field definitions and typed field values

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::workflow::types::{CatalogEntry, User};

/// Domain tag identifying a dynamic field (e.g. `SAMPLE_MEDIA_LINK`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldTag(pub String);

impl FieldTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FieldTag {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl fmt::Display for FieldTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declared input type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[serde(alias = "string")]
    Text,
    Number,
    Date,
    Select,
    Enum,
    File,
    StringArray,
}

impl FieldKind {
    pub fn has_options(self) -> bool {
        matches!(self, FieldKind::Select | FieldKind::Enum)
    }
}

/// Read-only catalog entry describing one dynamic field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub tag: FieldTag,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    /// Inline JSON/CSV option list or a semantic source marker
    #[serde(default)]
    pub enum_value: Option<String>,
    #[serde(default)]
    pub value_type: Option<String>,
    /// Visible but not mandatory
    #[serde(default)]
    pub optional: bool,
}

/// A field value after boundary validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "valueType", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Choice(String),
    Files(Vec<String>),
    StringArray(Vec<String>),
}

impl FieldValue {
    /// Stored (untagged) representation written back into `fieldSubprocess`
    pub fn to_raw(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            FieldValue::Text(s) | FieldValue::Choice(s) => Value::String(s.clone()),
            FieldValue::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                Value::from(*n as i64)
            }
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            FieldValue::Files(items) | FieldValue::StringArray(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
        }
    }
}

/// One choice of a select/enum field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
}

impl SelectOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Where a field's options come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionSource {
    Inline(Vec<SelectOption>),
    Users,
    ProductStatus,
    Materials,
    Categories,
    DefaultStatus,
    Unresolved,
}

/// Loaded directories that semantic option sources resolve against
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionContext {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub statuses: Vec<CatalogEntry>,
    #[serde(default)]
    pub materials: Vec<CatalogEntry>,
    #[serde(default)]
    pub categories: Vec<CatalogEntry>,
}
