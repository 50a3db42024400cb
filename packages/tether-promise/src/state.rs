use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a promise.
///
/// States only move forward: `Unscheduled -> Pending -> Fulfilled | Rejected`,
/// or straight from `Unscheduled` to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromiseState {
    Unscheduled,
    Pending,
    Fulfilled,
    Rejected,
}

impl PromiseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PromiseState::Fulfilled | PromiseState::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PromiseState::Unscheduled => "unscheduled",
            PromiseState::Pending => "pending",
            PromiseState::Fulfilled => "fulfilled",
            PromiseState::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PromiseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
