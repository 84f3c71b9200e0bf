use anyhow::Result;
use serde::Serialize;

use super::{print_json, CommandContext};
use prodflow::fields::SelectOption;
use prodflow::FieldTag;

/// Read-only queries; the workspace is never rewritten
pub enum InspectCommand {
    Status { request: String },
    Show { request: String, step: String },
    HoldInfo { request: String, step: String },
    Actions { request: String, step: String },
    Options { request: String, step: String },
}

#[derive(Serialize)]
struct FieldOptions {
    tag: FieldTag,
    label: String,
    options: Vec<SelectOption>,
}

impl InspectCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let actor = ctx.actor.clone();
        ctx.with_engine(false, |engine| async move {
            match self {
                InspectCommand::Status { request } => {
                    print_json(&engine.request_overview(&request).await?)
                }
                InspectCommand::Show { request, step } => {
                    print_json(&engine.describe(&request, &step, &actor).await?)
                }
                InspectCommand::HoldInfo { request, step } => {
                    print_json(&engine.hold_info(&request, &step).await?)
                }
                InspectCommand::Actions { request, step } => {
                    print_json(&engine.legal_actions(&request, &step, &actor).await?)
                }
                InspectCommand::Options { request, step } => {
                    let view = engine.describe(&request, &step, &actor).await?;
                    let options: Vec<FieldOptions> = view
                        .fields
                        .into_iter()
                        .filter(|field| field.definition.kind.has_options())
                        .map(|field| FieldOptions {
                            tag: field.definition.tag,
                            label: field.definition.label,
                            options: field.options,
                        })
                        .collect();
                    print_json(&options)
                }
            }
        })
        .await
    }
}
