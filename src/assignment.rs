// Step ownership resolution
//
// Automatic mode draws uniformly from the eligible pool; every draw is
// independent, so a reassign may land on the same user again. Manual mode is
// an admin override that only checks department membership.

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::workflow::types::{DepartmentId, Step, StepId, User, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum AssignmentError {
    #[error("no eligible users are configured for step {step_id}")]
    NoEligibleUsersConfigured { step_id: StepId },
    #[error("none of the {configured} users configured for step {step_id} are in the directory")]
    NoMatchingUsersFound { step_id: StepId, configured: usize },
    #[error("user {user_id} is not in the directory")]
    UnknownUser { user_id: UserId },
    #[error("user {user_id} does not belong to department {department_id}")]
    NotInDepartment {
        user_id: UserId,
        department_id: DepartmentId,
    },
}

/// How the assignee should be chosen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AssignmentMode {
    Automatic,
    Manual { user_id: UserId },
}

pub struct StepAssignment {
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for StepAssignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepAssignment").finish_non_exhaustive()
    }
}

impl Default for StepAssignment {
    fn default() -> Self {
        Self::new()
    }
}

impl StepAssignment {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Reproducible draws, for tests and replays
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Allowed users that are present in the directory, in allowed-list order
    pub fn eligible_pool<'a>(
        step: &Step,
        directory: &'a [User],
    ) -> Result<Vec<&'a User>, AssignmentError> {
        if step.allowed_user_ids.is_empty() {
            return Err(AssignmentError::NoEligibleUsersConfigured {
                step_id: step.id.clone(),
            });
        }

        let mut seen = HashSet::new();
        let pool: Vec<&User> = step
            .allowed_user_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| directory.iter().find(|u| &u.id == id))
            .collect();

        if pool.is_empty() {
            return Err(AssignmentError::NoMatchingUsersFound {
                step_id: step.id.clone(),
                configured: step.allowed_user_ids.len(),
            });
        }
        Ok(pool)
    }

    /// Uniform random pick from the eligible pool
    pub fn assign(&self, step: &Step, directory: &[User]) -> Result<User, AssignmentError> {
        let pool = Self::eligible_pool(step, directory)?;
        let picked = {
            // A poisoned lock only means another draw panicked; the RNG state is still usable.
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            pool.choose(&mut *rng).copied()
        };
        let user = picked.cloned().ok_or_else(|| AssignmentError::NoMatchingUsersFound {
            step_id: step.id.clone(),
            configured: step.allowed_user_ids.len(),
        })?;

        debug!(step.id = %step.id, pool_size = pool.len(), "Drew assignee from eligible pool");
        info!(step.id = %step.id, user.id = %user.id, "Step assigned automatically");
        Ok(user)
    }

    /// Admin override: commit an explicit user after checking department membership
    pub fn assign_manual(
        step: &Step,
        user_id: &str,
        directory: &[User],
    ) -> Result<User, AssignmentError> {
        let user = directory
            .iter()
            .find(|u| u.id == user_id)
            .ok_or_else(|| AssignmentError::UnknownUser {
                user_id: user_id.to_string(),
            })?;

        if user.department_id != step.department_id {
            return Err(AssignmentError::NotInDepartment {
                user_id: user.id.clone(),
                department_id: step.department_id.clone(),
            });
        }

        info!(step.id = %step.id, user.id = %user.id, "Step assigned manually");
        Ok(user.clone())
    }

    pub fn resolve(
        &self,
        step: &Step,
        mode: &AssignmentMode,
        directory: &[User],
    ) -> Result<User, AssignmentError> {
        match mode {
            AssignmentMode::Automatic => self.assign(step, directory),
            AssignmentMode::Manual { user_id } => Self::assign_manual(step, user_id, directory),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::fixtures::{step, user};
    use crate::workflow::types::StepStatus;

    fn step_allowing(ids: &[&str]) -> Step {
        let mut s = step("s1", 1, StepStatus::NotStarted);
        s.allowed_user_ids = ids.iter().map(|id| id.to_string()).collect();
        s
    }

    #[test]
    fn test_single_candidate_is_picked_deterministically() {
        let assignment = StepAssignment::new();
        let s = step_allowing(&["u1", "u2"]);
        let directory = vec![user("u2", "rnd"), user("u9", "rnd")];
        for _ in 0..10 {
            assert_eq!(assignment.assign(&s, &directory).unwrap().id, "u2");
        }
    }

    #[test]
    fn test_empty_allowed_list() {
        let assignment = StepAssignment::with_seed(7);
        let s = step_allowing(&[]);
        assert_eq!(
            assignment.assign(&s, &[user("u1", "rnd")]),
            Err(AssignmentError::NoEligibleUsersConfigured { step_id: "s1".into() })
        );
    }

    #[test]
    fn test_no_matching_users() {
        let assignment = StepAssignment::with_seed(7);
        let s = step_allowing(&["u1", "u2"]);
        assert_eq!(
            assignment.assign(&s, &[user("u3", "rnd")]),
            Err(AssignmentError::NoMatchingUsersFound {
                step_id: "s1".into(),
                configured: 2,
            })
        );
    }

    #[test]
    fn test_draws_cover_the_pool() {
        let assignment = StepAssignment::with_seed(42);
        let s = step_allowing(&["u1", "u2", "u3"]);
        let directory = vec![user("u1", "rnd"), user("u2", "rnd"), user("u3", "rnd")];
        let drawn: HashSet<String> = (0..200)
            .map(|_| assignment.assign(&s, &directory).unwrap().id)
            .collect();
        assert_eq!(drawn.len(), 3);
    }

    #[test]
    fn test_seeded_draws_are_reproducible() {
        let s = step_allowing(&["u1", "u2", "u3", "u4"]);
        let directory: Vec<User> = ["u1", "u2", "u3", "u4"]
            .iter()
            .map(|id| user(id, "rnd"))
            .collect();
        let a = StepAssignment::with_seed(99);
        let b = StepAssignment::with_seed(99);
        let first: Vec<String> = (0..20).map(|_| a.assign(&s, &directory).unwrap().id).collect();
        let second: Vec<String> = (0..20).map(|_| b.assign(&s, &directory).unwrap().id).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_manual_assignment_checks_department() {
        let s = step_allowing(&[]);
        let directory = vec![user("u1", "rnd"), user("u2", "finance")];

        assert_eq!(StepAssignment::assign_manual(&s, "u1", &directory).unwrap().id, "u1");
        assert_eq!(
            StepAssignment::assign_manual(&s, "u2", &directory),
            Err(AssignmentError::NotInDepartment {
                user_id: "u2".into(),
                department_id: "rnd".into(),
            })
        );
        assert_eq!(
            StepAssignment::assign_manual(&s, "ghost", &directory),
            Err(AssignmentError::UnknownUser { user_id: "ghost".into() })
        );
    }
}
