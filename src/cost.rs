// Price entry for cost-bearing steps

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::workflow::types::{Step, StepId, StepPatch, StepStatus, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CostError {
    #[error("only the assignee ({assignee:?}) may set the price, not {actor}")]
    UnauthorizedCostEntry {
        actor: UserId,
        assignee: Option<UserId>,
    },
    #[error("price must be a non-negative integer amount, got {amount}")]
    InvalidAmount { amount: i64 },
    #[error("step {step_id} does not carry a cost")]
    NotCostBearing { step_id: StepId },
    #[error("price cannot change once the step is {status}")]
    StepClosed { status: StepStatus },
}

pub struct CostLedger;

impl CostLedger {
    /// Build the patch recording `amount` (smallest currency unit) as the
    /// step's price. Reading the price needs no ledger call.
    pub fn set_price(
        step: &Step,
        acting_user_id: &str,
        amount: i64,
    ) -> Result<StepPatch, CostError> {
        if !step.is_step_with_cost {
            return Err(CostError::NotCostBearing {
                step_id: step.id.clone(),
            });
        }
        if step.is_terminal() {
            return Err(CostError::StepClosed {
                status: step.status,
            });
        }
        if !step.is_assigned_to(acting_user_id) {
            return Err(CostError::UnauthorizedCostEntry {
                actor: acting_user_id.to_string(),
                assignee: step.user_id.clone(),
            });
        }
        let amount = u64::try_from(amount).map_err(|_| CostError::InvalidAmount { amount })?;

        info!(step.id = %step.id, user.id = %acting_user_id, amount, "Step price recorded");
        Ok(StepPatch {
            price: Some(amount),
            price_set_by: Some(acting_user_id.to_string()),
            ..Default::default()
        })
    }
}
