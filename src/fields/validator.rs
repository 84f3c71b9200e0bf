// Boundary validation of submitted dynamic field values.
//
// Raw `fieldSubprocess` JSON is only trusted after it passes through here; the
// output is a map of typed `FieldValue`s.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::catalog::FieldCatalog;
use super::types::{FieldDefinition, FieldKind, FieldTag, FieldValue, OptionContext};
use crate::workflow::types::{MediaAsset, Step};

/// Everything the validator may consult besides the submitted values
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub step: &'a Step,
    pub options: &'a OptionContext,
    pub media: &'a [MediaAsset],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Required value absent or blank
    Missing,
    /// Array field without a single non-empty entry
    EmptyArray,
    NotANumber,
    InvalidDate,
    UnknownOption { value: String },
    WrongShape { expected: FieldKind },
    /// Listed in `checkFields` but absent from the catalog
    UndefinedField,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Missing => f.write_str("value is required"),
            FailureReason::EmptyArray => f.write_str("at least one entry is required"),
            FailureReason::NotANumber => f.write_str("value is not a finite number"),
            FailureReason::InvalidDate => f.write_str("value is not a valid date"),
            FailureReason::UnknownOption { value } => {
                write!(f, "'{value}' is not an allowed option")
            }
            FailureReason::WrongShape { expected } => write!(f, "expected a {expected:?} value"),
            FailureReason::UndefinedField => f.write_str("field has no definition"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFailure {
    pub field: FieldTag,
    pub reason: FailureReason,
}

impl fmt::Display for FieldFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Valid(BTreeMap<FieldTag, FieldValue>),
    Invalid(Vec<FieldFailure>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid(_))
    }

    pub fn failures(&self) -> &[FieldFailure] {
        match self {
            ValidationResult::Valid(_) => &[],
            ValidationResult::Invalid(failures) => failures,
        }
    }
}

pub struct StepFieldValidator;

impl StepFieldValidator {
    /// Validate every field visible on the step. Values for fields the step
    /// does not list are ignored. Pure; never mutates the step.
    pub fn validate(
        catalog: &FieldCatalog,
        submitted: &BTreeMap<FieldTag, Value>,
        ctx: &StepContext<'_>,
    ) -> ValidationResult {
        let mut values = BTreeMap::new();
        let mut failures = Vec::new();

        for tag in &ctx.step.check_fields {
            let Some(def) = catalog.definition(tag) else {
                failures.push(FieldFailure {
                    field: tag.clone(),
                    reason: FailureReason::UndefinedField,
                });
                continue;
            };

            match Self::validate_field(def, submitted.get(tag), ctx) {
                Ok(Some(value)) => {
                    values.insert(tag.clone(), value);
                }
                Ok(None) => {}
                Err(reason) => failures.push(FieldFailure {
                    field: tag.clone(),
                    reason,
                }),
            }
        }

        if failures.is_empty() {
            ValidationResult::Valid(values)
        } else {
            ValidationResult::Invalid(failures)
        }
    }

    /// `Ok(None)` means an optional field left empty.
    fn validate_field(
        def: &FieldDefinition,
        raw: Option<&Value>,
        ctx: &StepContext<'_>,
    ) -> Result<Option<FieldValue>, FailureReason> {
        let parsed = match raw.filter(|v| !Self::is_blank(v)) {
            Some(value) => Some(Self::parse(def, value, ctx)?),
            None => None,
        };

        let parsed = match (parsed, def.kind) {
            (None, FieldKind::File) => Self::media_for(def, ctx),
            (other, _) => other,
        };

        match parsed {
            Some(value) => Ok(Some(value)),
            None if def.optional => Ok(None),
            None if def.kind == FieldKind::StringArray && raw.is_some_and(Value::is_array) => {
                Err(FailureReason::EmptyArray)
            }
            None => Err(FailureReason::Missing),
        }
    }

    fn is_blank(value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            Value::Array(items) => items.iter().all(Self::is_blank),
            _ => false,
        }
    }

    fn parse(
        def: &FieldDefinition,
        value: &Value,
        ctx: &StepContext<'_>,
    ) -> Result<FieldValue, FailureReason> {
        let wrong_shape = || FailureReason::WrongShape { expected: def.kind };

        match def.kind {
            FieldKind::Text => match value {
                Value::String(s) => Ok(FieldValue::Text(s.trim().to_string())),
                Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
                Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
                _ => Err(wrong_shape()),
            },
            FieldKind::Number => {
                let number = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                number
                    .filter(|n| n.is_finite())
                    .map(FieldValue::Number)
                    .ok_or(FailureReason::NotANumber)
            }
            FieldKind::Date => match value {
                Value::String(s) => Self::parse_date(s.trim())
                    .map(FieldValue::Date)
                    .ok_or(FailureReason::InvalidDate),
                _ => Err(FailureReason::InvalidDate),
            },
            FieldKind::Select | FieldKind::Enum => {
                let chosen = match value {
                    Value::String(s) => s.trim().to_string(),
                    Value::Number(n) => n.to_string(),
                    _ => return Err(wrong_shape()),
                };
                let options = FieldCatalog::resolve_options(def, ctx.options);
                if options.iter().any(|o| o.value == chosen) {
                    Ok(FieldValue::Choice(chosen))
                } else {
                    Err(FailureReason::UnknownOption { value: chosen })
                }
            }
            FieldKind::File => match value {
                Value::String(s) => Ok(FieldValue::Files(vec![s.trim().to_string()])),
                Value::Array(items) => Self::string_entries(items)
                    .map(FieldValue::Files)
                    .ok_or_else(wrong_shape),
                _ => Err(wrong_shape()),
            },
            FieldKind::StringArray => match value {
                Value::Array(items) => Self::string_entries(items)
                    .map(FieldValue::StringArray)
                    .ok_or_else(wrong_shape),
                _ => Err(wrong_shape()),
            },
        }
    }

    /// Non-empty trimmed string entries; `None` if any entry is not a string.
    fn string_entries(items: &[Value]) -> Option<Vec<String>> {
        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::String(s) if s.trim().is_empty() => {}
                Value::String(s) => entries.push(s.trim().to_string()),
                Value::Null => {}
                _ => return None,
            }
        }
        Some(entries)
    }

    fn parse_date(raw: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
    }

    /// Request media uploaded against this step and field
    fn media_for(def: &FieldDefinition, ctx: &StepContext<'_>) -> Option<FieldValue> {
        let urls: Vec<String> = ctx
            .media
            .iter()
            .filter(|m| m.step_id.as_deref() == Some(ctx.step.id.as_str()))
            .filter(|m| m.field.as_ref() == Some(&def.tag))
            .map(|m| m.url.clone())
            .collect();
        (!urls.is_empty()).then_some(FieldValue::Files(urls))
    }
}
