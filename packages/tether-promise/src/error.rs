use crate::state::PromiseState;
use thiserror::Error;

/// Misuse of the promise API.
///
/// These are never turned into rejections. A failing scheduler or executor
/// rejects its promise instead of producing one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromiseError {
    #[error("cannot change promise state from {from} to {to}: {from} is final")]
    AlreadySettled {
        from: PromiseState,
        to: PromiseState,
    },

    #[error("cannot change promise state from pending to unscheduled: scheduling is not reversible")]
    Unschedule,

    #[error("a value or reason was supplied for a transition to {0}")]
    PayloadForNonTerminal(PromiseState),

    #[error("the supplied payload does not match a transition to {0}")]
    PayloadMismatch(PromiseState),

    #[error("registering an executor on an already fulfilled promise means it will never run")]
    ExecutorOnFulfilled,
}
