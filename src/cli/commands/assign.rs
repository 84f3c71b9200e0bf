use anyhow::Result;

use super::{print_json, CommandContext};
use prodflow::AssignmentMode;

pub struct AssignCommand {
    pub request: String,
    pub step: String,
    /// Manual target; random draw among eligible users when absent
    pub user: Option<String>,
}

impl AssignCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let actor = ctx.actor.clone();
        let mode = match self.user {
            Some(user_id) => AssignmentMode::Manual { user_id },
            None => AssignmentMode::Automatic,
        };
        ctx.with_engine(true, |engine| async move {
            let outcome = engine
                .assign(&self.request, &self.step, &actor, mode)
                .await?;
            print_json(&outcome)
        })
        .await
    }
}
