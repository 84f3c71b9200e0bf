// Hold/continue cycle accounting.
//
// A step may be paused and resumed at most MAX_HOLDS times. Everything here is
// a pure function of the six hold/continue timestamps on the step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::workflow::types::Step;

pub const MAX_HOLDS: u8 = 3;

/// One of the three hold/continue slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HoldSlot {
    One,
    Two,
    Three,
}

impl HoldSlot {
    pub const ALL: [HoldSlot; 3] = [HoldSlot::One, HoldSlot::Two, HoldSlot::Three];

    /// 1-based position
    pub fn number(self) -> u8 {
        match self {
            HoldSlot::One => 1,
            HoldSlot::Two => 2,
            HoldSlot::Three => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(HoldSlot::One),
            2 => Some(HoldSlot::Two),
            3 => Some(HoldSlot::Three),
            _ => None,
        }
    }
}

/// The single legal next hold-cycle action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NextAction {
    Hold(HoldSlot),
    Continue(HoldSlot),
    None,
}

impl fmt::Display for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NextAction::Hold(slot) => write!(f, "hold{}", slot.number()),
            NextAction::Continue(slot) => write!(f, "continue{}", slot.number()),
            NextAction::None => f.write_str("none"),
        }
    }
}

/// Inconsistencies in a step's stored hold history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldAnomaly {
    /// A later hold is set while an earlier one is not
    HoldGap { missing: HoldSlot, later: HoldSlot },
    /// A continue date without its hold date
    ContinueWithoutHold { slot: HoldSlot },
    /// A hold was started before the previous one was continued
    HoldWithoutContinue { slot: HoldSlot },
    /// Timestamps of this slot precede the event they must follow
    OutOfOrder { slot: HoldSlot },
}

/// Derived hold-cycle state of a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldInfo {
    pub hold_count: u8,
    pub continue_count: u8,
    pub max_holds: u8,
    pub next_action: NextAction,
    /// Empty for every history produced through the state machine
    pub anomalies: Vec<HoldAnomaly>,
}

impl HoldInfo {
    pub fn is_consistent(&self) -> bool {
        self.anomalies.is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        self.next_action == NextAction::None
    }
}

type HoldPairs = [(Option<DateTime<Utc>>, Option<DateTime<Utc>>); 3];

pub struct HoldCycleTracker;

impl HoldCycleTracker {
    pub fn compute_hold_info(step: &Step) -> HoldInfo {
        Self::compute(&step.hold_pairs())
    }

    /// Counts only cover the contiguous prefix of the chain; anything after a
    /// gap is reported as an anomaly rather than counted.
    pub fn compute(pairs: &HoldPairs) -> HoldInfo {
        let hold_count = pairs.iter().take_while(|(hold, _)| hold.is_some()).count() as u8;
        let continue_count = pairs
            .iter()
            .take(hold_count as usize)
            .take_while(|(_, cont)| cont.is_some())
            .count() as u8;

        let next_action = if hold_count > continue_count {
            HoldSlot::from_number(continue_count + 1)
                .map(NextAction::Continue)
                .unwrap_or(NextAction::None)
        } else if hold_count < MAX_HOLDS {
            HoldSlot::from_number(hold_count + 1)
                .map(NextAction::Hold)
                .unwrap_or(NextAction::None)
        } else {
            NextAction::None
        };

        HoldInfo {
            hold_count,
            continue_count,
            max_holds: MAX_HOLDS,
            next_action,
            anomalies: Self::detect_anomalies(pairs),
        }
    }

    fn detect_anomalies(pairs: &HoldPairs) -> Vec<HoldAnomaly> {
        let mut anomalies = Vec::new();

        for (i, slot) in HoldSlot::ALL.iter().copied().enumerate() {
            let (hold, cont) = pairs[i];

            if hold.is_none() {
                if let Some(j) = (i + 1..3).find(|&j| pairs[j].0.is_some()) {
                    anomalies.push(HoldAnomaly::HoldGap {
                        missing: slot,
                        later: HoldSlot::ALL[j],
                    });
                }
                if cont.is_some() {
                    anomalies.push(HoldAnomaly::ContinueWithoutHold { slot });
                }
                continue;
            }

            if let (Some(h), Some(c)) = (hold, cont) {
                if c < h {
                    anomalies.push(HoldAnomaly::OutOfOrder { slot });
                }
            }

            if i > 0 {
                let (prev_hold, prev_cont) = pairs[i - 1];
                match (prev_hold, prev_cont, hold) {
                    (Some(_), None, Some(_)) => {
                        anomalies.push(HoldAnomaly::HoldWithoutContinue { slot });
                    }
                    (Some(_), Some(pc), Some(h)) if h < pc => {
                        anomalies.push(HoldAnomaly::OutOfOrder { slot });
                    }
                    _ => {}
                }
            }
        }

        anomalies
    }
}
