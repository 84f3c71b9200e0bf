use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use super::{print_json, CommandContext};
use prodflow::{FieldTag, StepAction};

/// start / hold / continue / complete / cancel / skip
pub struct LifecycleCommand {
    pub request: String,
    pub step: String,
    pub action: StepAction,
    pub submitted: BTreeMap<FieldTag, Value>,
}

impl LifecycleCommand {
    pub fn new(request: String, step: String, action: StepAction) -> Self {
        Self {
            request,
            step,
            action,
            submitted: BTreeMap::new(),
        }
    }

    pub fn with_fields(mut self, submitted: BTreeMap<FieldTag, Value>) -> Self {
        self.submitted = submitted;
        self
    }

    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let actor = ctx.actor.clone();
        ctx.with_engine(true, |engine| async move {
            let outcome = engine
                .transition(&self.request, &self.step, &actor, self.action, self.submitted)
                .await?;
            print_json(&outcome)
        })
        .await
    }
}

/// Collect submitted field values: the optional JSON file first, then each
/// `TAG=VALUE` pair. A VALUE that is not valid JSON is taken as a string.
pub fn parse_fields(pairs: &[String], file: Option<&Path>) -> Result<BTreeMap<FieldTag, Value>> {
    let mut fields = BTreeMap::new();

    if let Some(path) = file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fields file {}", path.display()))?;
        let object: BTreeMap<String, Value> = serde_json::from_str(&content)
            .with_context(|| format!("{} must contain a JSON object", path.display()))?;
        fields.extend(object.into_iter().map(|(tag, value)| (FieldTag::new(tag), value)));
    }

    for pair in pairs {
        let (tag, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected TAG=VALUE, got '{pair}'"))?;
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(anyhow!("Field tag is empty in '{pair}'"));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        fields.insert(FieldTag::new(tag), value);
    }

    Ok(fields)
}
