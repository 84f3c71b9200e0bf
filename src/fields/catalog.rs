// Field definition catalog and option resolution

use serde::Deserialize;
use std::collections::HashSet;

use super::types::{FieldDefinition, FieldTag, OptionContext, OptionSource, SelectOption};
use crate::workflow::types::{CatalogEntry, Step};

/// Options offered for any `*status*` field without an explicit source
pub const DEFAULT_STATUS_OPTIONS: [(&str, &str); 4] = [
    ("Pending", "PENDING"),
    ("In progress", "IN_PROGRESS"),
    ("Completed", "COMPLETED"),
    ("Cancelled", "CANCELLED"),
];

/// Read-only field catalog keyed by tag
#[derive(Debug, Clone, Default)]
pub struct FieldCatalog {
    definitions: Vec<FieldDefinition>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOption {
    Full {
        #[serde(default)]
        label: Option<String>,
        value: serde_json::Value,
    },
    Plain(String),
}

impl RawOption {
    fn into_option(self) -> SelectOption {
        match self {
            RawOption::Full { label, value } => {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                SelectOption {
                    label: label.unwrap_or_else(|| value.clone()),
                    value,
                }
            }
            RawOption::Plain(s) => SelectOption::new(s.clone(), s),
        }
    }
}

impl FieldCatalog {
    /// Later duplicates of a tag are ignored.
    pub fn new(definitions: Vec<FieldDefinition>) -> Self {
        let mut seen = HashSet::new();
        let definitions = definitions
            .into_iter()
            .filter(|d| seen.insert(d.tag.clone()))
            .collect();
        Self { definitions }
    }

    pub fn definitions(&self) -> &[FieldDefinition] {
        &self.definitions
    }

    pub fn definition(&self, tag: &FieldTag) -> Option<&FieldDefinition> {
        self.definitions.iter().find(|d| &d.tag == tag)
    }

    /// A field is shown only if the step lists it in `checkFields`.
    pub fn should_show(field: &FieldDefinition, step: &Step) -> bool {
        step.check_fields.contains(&field.tag)
    }

    /// Definitions visible on `step`, in catalog order
    pub fn visible_for<'a>(
        &'a self,
        step: &'a Step,
    ) -> impl Iterator<Item = &'a FieldDefinition> {
        self.definitions
            .iter()
            .filter(move |d| Self::should_show(d, step))
    }

    /// Decide where a field's options come from.
    ///
    /// Precedence: inline JSON array, CSV literal list, semantic marker
    /// (`users`, `productStatus`, `materials`, `categories`), the default
    /// status set for status-like tags, and finally nothing.
    pub fn option_source(field: &FieldDefinition) -> OptionSource {
        if let Some(raw) = field.enum_value.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            if let Ok(options) = serde_json::from_str::<Vec<RawOption>>(raw) {
                return OptionSource::Inline(
                    options.into_iter().map(RawOption::into_option).collect(),
                );
            }

            if let Some(source) = Self::semantic_source(raw) {
                return source;
            }

            let literals = Self::split_csv(raw);
            if !literals.is_empty() {
                return OptionSource::Inline(literals);
            }
        }

        if field.tag.as_str().to_lowercase().contains("status") {
            return OptionSource::DefaultStatus;
        }

        OptionSource::Unresolved
    }

    /// Ordered `{label, value}` options for a select/enum field. Never fails;
    /// unparseable sources resolve to an empty list.
    pub fn resolve_options(field: &FieldDefinition, context: &OptionContext) -> Vec<SelectOption> {
        match Self::option_source(field) {
            OptionSource::Inline(options) => options,
            OptionSource::Users => context
                .users
                .iter()
                .map(|u| SelectOption::new(u.full_name.clone(), u.id.clone()))
                .collect(),
            OptionSource::ProductStatus => Self::entries(&context.statuses),
            OptionSource::Materials => Self::entries(&context.materials),
            OptionSource::Categories => Self::entries(&context.categories),
            OptionSource::DefaultStatus => DEFAULT_STATUS_OPTIONS
                .iter()
                .map(|(label, value)| SelectOption::new(*label, *value))
                .collect(),
            OptionSource::Unresolved => Vec::new(),
        }
    }

    fn semantic_source(marker: &str) -> Option<OptionSource> {
        match marker.to_lowercase().as_str() {
            "users" => Some(OptionSource::Users),
            "productstatus" => Some(OptionSource::ProductStatus),
            "materials" => Some(OptionSource::Materials),
            "categories" => Some(OptionSource::Categories),
            _ => None,
        }
    }

    // Input opening like a JSON document that failed to parse is not a literal list.
    fn split_csv(raw: &str) -> Vec<SelectOption> {
        if raw.starts_with(['[', '{']) {
            return Vec::new();
        }
        raw.split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| SelectOption::new(token, token))
            .collect()
    }

    fn entries(entries: &[CatalogEntry]) -> Vec<SelectOption> {
        entries
            .iter()
            .map(|e| SelectOption::new(e.name.clone(), e.id.clone()))
            .collect()
    }
}
