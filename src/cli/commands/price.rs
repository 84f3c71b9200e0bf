use anyhow::Result;

use super::{print_json, CommandContext};

pub struct SetPriceCommand {
    pub request: String,
    pub step: String,
    pub amount: i64,
}

impl SetPriceCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let actor = ctx.actor.clone();
        ctx.with_engine(true, |engine| async move {
            let outcome = engine
                .set_price(&self.request, &self.step, &actor, self.amount)
                .await?;
            print_json(&outcome)
        })
        .await
    }
}
