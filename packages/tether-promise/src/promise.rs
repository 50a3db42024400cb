use crate::error::PromiseError;
use crate::queue::Notification;
use crate::runtime::Runtime;
use crate::state::PromiseState;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Callback run once when a promise reaches the state it was attached for.
/// It receives the parents' values in parent order.
pub type Handler<T> = Box<dyn FnOnce(&[Option<T>])>;

/// Callback run once when a promise first becomes pending.
pub type Scheduler<T, E> = Box<dyn FnOnce(&Promise<T, E>, &[Option<T>]) -> Result<(), E>>;

/// Callback computing a promise's value locally once it is pending.
pub type Executor<T, E> = Box<dyn FnOnce(&[Option<T>]) -> Result<T, E>>;

type Links<T, E> = SmallVec<[Promise<T, E>; 2]>;
type Dependents<T, E> = SmallVec<[Weak<Inner<T, E>>; 2]>;
type Values<T> = SmallVec<[Option<T>; 2]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PromiseId(u64);

impl PromiseId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "promise#{}", self.0)
    }
}

/// Value carried by a terminal transition.
pub(crate) enum Payload<T, E> {
    Value(T),
    Reason(Option<E>),
}

pub(crate) enum Initial<T, E> {
    Deferred,
    Pending,
    Fulfilled(T),
    Rejected(Option<E>),
}

/// A value that becomes available later, possibly after other promises.
///
/// Nothing runs in the background. Every transition happens inside the call
/// that caused it: construction, [`fulfill`](Self::fulfill),
/// [`reject`](Self::reject), [`to_execute`](Self::to_execute) or a parent
/// settling.
///
/// A child can be settled before all of its parents are. Handlers on such a
/// child see `None` for the parents that have not fulfilled.
///
/// When a promise settles, all of its own handlers run first, in registration
/// order. Only then are its dependents told, in the order they were created.
///
/// A child holds its parents strongly, a parent holds its dependents weakly.
/// Dropping every handle to an unsettled child frees it along with its
/// handlers, and its parents simply skip it when they settle.
pub struct Promise<T, E> {
    inner: Rc<Inner<T, E>>,
}

struct Inner<T, E> {
    id: PromiseId,
    runtime: Runtime<T, E>,
    parents: Links<T, E>,
    slot: RefCell<Slot<T, E>>,
}

struct Slot<T, E> {
    state: PromiseState,
    waiting_on: Links<T, E>,
    dependents: Dependents<T, E>,
    scheduler: Option<Scheduler<T, E>>,
    executor: Option<Executor<T, E>>,
    // Set once an executor body has started; later ones never run.
    executed: bool,
    returned_value: Option<T>,
    reason: Option<E>,
    on_fulfilled: Vec<Handler<T>>,
    on_rejected: Vec<Handler<T>>,
    on_scheduled: Vec<Handler<T>>,
}

impl<T, E> Slot<T, E> {
    fn new(state: PromiseState) -> Self {
        Self {
            state,
            waiting_on: SmallVec::new(),
            dependents: SmallVec::new(),
            scheduler: None,
            executor: None,
            executed: false,
            returned_value: None,
            reason: None,
            on_fulfilled: Vec::new(),
            on_rejected: Vec::new(),
            on_scheduled: Vec::new(),
        }
    }
}

/// Everything a terminal transition takes out of the slot. Dropped or
/// invoked only after the slot borrow is released.
struct Drained<T, E> {
    run: Vec<Handler<T>>,
    discarded: Vec<Handler<T>>,
    dependents: Dependents<T, E>,
    waiting_on: Links<T, E>,
    scheduler: Option<Scheduler<T, E>>,
    executor: Option<Executor<T, E>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Promise");
        s.field("id", &self.inner.id);
        match self.inner.slot.try_borrow() {
            Ok(slot) => s.field("state", &slot.state),
            Err(_) => s.field("state", &"<borrowed>"),
        };
        s.field(
            "parents",
            &self.inner.parents.iter().map(|p| p.inner.id).collect::<Vec<_>>(),
        )
        .finish()
    }
}

// Parents and unresolved waits are unlinked with a work-list so that dropping
// the tail of a long chain does not recurse once per link.
impl<T, E> Drop for Inner<T, E> {
    fn drop(&mut self) {
        let mut links: Vec<Promise<T, E>> = self.parents.drain(..).collect();
        links.extend(self.slot.get_mut().waiting_on.drain(..));

        while let Some(link) = links.pop() {
            if let Some(mut inner) = Rc::into_inner(link.inner) {
                links.extend(inner.parents.drain(..));
                links.extend(inner.slot.get_mut().waiting_on.drain(..));
            }
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    pub(crate) fn create(
        runtime: &Runtime<T, E>,
        parents: Links<T, E>,
        initial: Initial<T, E>,
        scheduler: Option<Scheduler<T, E>>,
    ) -> Self {
        let id = runtime.next_id();
        runtime.record(|p| p.created += 1);

        let waiting_on: Links<T, E> = parents.iter().filter(|p| !p.is_complete()).cloned().collect();
        let mut schedule_now = false;

        let slot = match initial {
            Initial::Fulfilled(value) => {
                runtime.record(|p| p.fulfilled += 1);
                let mut slot = Slot::new(PromiseState::Fulfilled);
                slot.returned_value = Some(value);
                slot
            }
            Initial::Rejected(reason) => {
                runtime.record(|p| p.rejected += 1);
                let mut slot = Slot::new(PromiseState::Rejected);
                slot.reason = reason;
                slot
            }
            Initial::Pending => {
                runtime.record(|p| p.scheduled += 1);
                Slot::new(PromiseState::Pending)
            }
            Initial::Deferred if waiting_on.is_empty() => {
                schedule_now = true;
                let mut slot = Slot::new(PromiseState::Pending);
                slot.scheduler = scheduler;
                slot
            }
            Initial::Deferred => {
                let mut slot = Slot::new(PromiseState::Unscheduled);
                slot.scheduler = scheduler;
                slot.waiting_on = waiting_on.clone();
                slot
            }
        };
        let state = slot.state;

        let promise = Promise {
            inner: Rc::new(Inner {
                id,
                runtime: runtime.clone(),
                parents,
                slot: RefCell::new(slot),
            }),
        };

        tracing::trace!(promise = %id, state = %state, parents = promise.inner.parents.len(), "promise created");

        if state == PromiseState::Unscheduled {
            for parent in &waiting_on {
                let mut slot = parent.inner.slot.borrow_mut();
                slot.dependents.retain(|child| child.strong_count() > 0);
                slot.dependents.push(Rc::downgrade(&promise.inner));
            }
        } else if schedule_now {
            runtime.record(|p| p.scheduled += 1);
            promise.enter_pending();
        }

        promise
    }

    pub fn id(&self) -> PromiseId {
        self.inner.id
    }

    pub fn state(&self) -> PromiseState {
        self.inner.slot.borrow().state
    }

    pub fn is_complete(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == PromiseState::Pending
    }

    pub fn is_unscheduled(&self) -> bool {
        self.state() == PromiseState::Unscheduled
    }

    /// The fulfillment value, `None` until the promise is fulfilled.
    pub fn returned_value(&self) -> Option<T> {
        self.inner.slot.borrow().returned_value.clone()
    }

    /// The rejection reason, `None` until the promise is rejected with one.
    pub fn reason(&self) -> Option<E> {
        self.inner.slot.borrow().reason.clone()
    }

    pub fn parents(&self) -> Vec<Promise<T, E>> {
        self.inner.parents.to_vec()
    }

    pub fn runtime(&self) -> &Runtime<T, E> {
        &self.inner.runtime
    }

    /// Whether both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Promise<T, E>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Fulfill with `value`. A no-op if already fulfilled.
    ///
    /// This promise's handlers always run before this returns. Called from
    /// inside another promise's callback, it returns before the dependents
    /// advance; the outermost call that started the cascade finishes them.
    pub fn fulfill(&self, value: T) -> Result<(), PromiseError> {
        self.set_state(PromiseState::Fulfilled, Some(Payload::Value(value)))
    }

    /// Reject, optionally with a reason. A no-op if already rejected.
    ///
    /// Dependents advance on the same terms as for [`fulfill`](Self::fulfill).
    pub fn reject(&self, reason: impl Into<Option<E>>) -> Result<(), PromiseError> {
        self.set_state(PromiseState::Rejected, Some(Payload::Reason(reason.into())))
    }

    /// A new promise depending only on this one. `f` runs when it is scheduled;
    /// `Ok` fulfills it and `Err` rejects it.
    pub fn then<F>(&self, f: F) -> Promise<T, E>
    where
        F: FnOnce(&[Option<T>]) -> Result<T, E> + 'static,
    {
        self.inner
            .runtime
            .promise()
            .parent(self.clone())
            .on_schedule(move |child, values| {
                let value = f(values)?;
                if let Err(err) = child.fulfill(value) {
                    tracing::debug!(promise = %child.id(), error = %err, "then result discarded");
                }
                Ok(())
            })
            .build()
    }

    /// Register a callback that computes this promise's value once it is pending.
    ///
    /// On a pending promise the executor runs before this returns; on an
    /// unscheduled one it replaces any earlier executor and waits. A rejected
    /// promise ignores it. A fulfilled promise can never run it, which is a
    /// usage error.
    ///
    /// At most one executor body runs per promise. Registering another while
    /// the first is still running is ignored.
    pub fn to_execute<F>(&self, executor: F) -> Result<&Self, PromiseError>
    where
        F: FnOnce(&[Option<T>]) -> Result<T, E> + 'static,
    {
        match self.state() {
            PromiseState::Fulfilled => return Err(PromiseError::ExecutorOnFulfilled),
            PromiseState::Rejected => {}
            PromiseState::Unscheduled => {
                let _previous = self.store_executor(Box::new(executor));
            }
            PromiseState::Pending if self.inner.slot.borrow().executed => {
                tracing::debug!(promise = %self.inner.id, "executor ignored, one already ran");
            }
            PromiseState::Pending => {
                let _previous = self.store_executor(Box::new(executor));
                self.run_executor();
            }
        }
        Ok(self)
    }

    pub fn on_fulfilled<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&[Option<T>]) + 'static,
    {
        match self.state() {
            PromiseState::Fulfilled => handler(&self.parent_values()),
            PromiseState::Pending | PromiseState::Unscheduled => {
                self.inner.slot.borrow_mut().on_fulfilled.push(Box::new(handler));
            }
            PromiseState::Rejected => {}
        }
        self
    }

    pub fn on_rejected<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&[Option<T>]) + 'static,
    {
        match self.state() {
            PromiseState::Rejected => handler(&self.parent_values()),
            PromiseState::Pending | PromiseState::Unscheduled => {
                self.inner.slot.borrow_mut().on_rejected.push(Box::new(handler));
            }
            PromiseState::Fulfilled => {}
        }
        self
    }

    /// Runs when the promise is scheduled. A fulfilled promise counts as
    /// scheduled even if it never was pending; a rejected one never does.
    pub fn on_scheduled<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&[Option<T>]) + 'static,
    {
        match self.state() {
            PromiseState::Fulfilled | PromiseState::Pending => handler(&self.parent_values()),
            PromiseState::Unscheduled => {
                self.inner.slot.borrow_mut().on_scheduled.push(Box::new(handler));
            }
            PromiseState::Rejected => {}
        }
        self
    }

    // Transition grid, "from" on the left, "to" on top:
    //
    //    U P F R
    // U  - 1 . .
    // P  X - . .
    // F  X X - X
    // R  X X X -
    //
    // -  no-op
    // X  usage error
    // .  commit and run handlers
    // 1  commit, run the scheduler and handlers, then any executor
    pub(crate) fn set_state(
        &self,
        target: PromiseState,
        payload: Option<Payload<T, E>>,
    ) -> Result<(), PromiseError> {
        match (&payload, target) {
            (Some(_), PromiseState::Unscheduled | PromiseState::Pending) => {
                return Err(PromiseError::PayloadForNonTerminal(target));
            }
            (Some(Payload::Reason(_)), PromiseState::Fulfilled)
            | (Some(Payload::Value(_)), PromiseState::Rejected) => {
                return Err(PromiseError::PayloadMismatch(target));
            }
            _ => {}
        }

        let current = self.state();
        if current == target {
            return Ok(());
        }
        if current.is_terminal() {
            return Err(PromiseError::AlreadySettled {
                from: current,
                to: target,
            });
        }

        tracing::trace!(promise = %self.inner.id, from = %current, to = %target, "promise state change");

        match target {
            // Only reachable from pending.
            PromiseState::Unscheduled => Err(PromiseError::Unschedule),
            PromiseState::Pending => {
                self.inner.slot.borrow_mut().state = PromiseState::Pending;
                self.inner.runtime.record(|p| p.scheduled += 1);
                self.enter_pending();

                // The scheduler may already have settled us.
                if self.is_pending() {
                    self.run_executor();
                }
                Ok(())
            }
            PromiseState::Fulfilled => {
                let value = match payload {
                    Some(Payload::Value(value)) => Some(value),
                    _ => None,
                };
                self.settle_fulfilled(value);
                Ok(())
            }
            PromiseState::Rejected => {
                let reason = match payload {
                    Some(Payload::Reason(reason)) => reason,
                    _ => None,
                };
                self.settle_rejected(reason);
                Ok(())
            }
        }
    }

    /// Run the scheduler, then the scheduled handlers. The state must already be pending.
    fn enter_pending(&self) {
        let scheduler = self.inner.slot.borrow_mut().scheduler.take();
        if let Some(scheduler) = scheduler {
            self.inner.runtime.record(|p| p.scheduler_runs += 1);
            let values = self.parent_values();
            if let Err(err) = scheduler(self, &values) {
                if self.inner.runtime.debug() {
                    tracing::warn!(promise = %self.inner.id, error = ?err, "error while running scheduler");
                }
                self.reject_with(err, "scheduler");
            }
        }

        let handlers = std::mem::take(&mut self.inner.slot.borrow_mut().on_scheduled);
        if !handlers.is_empty() {
            let values = self.parent_values();
            for handler in handlers {
                handler(&values);
            }
        }
    }

    fn store_executor(&self, executor: Executor<T, E>) -> Option<Executor<T, E>> {
        self.inner.slot.borrow_mut().executor.replace(executor)
    }

    fn run_executor(&self) {
        let executor = {
            let mut slot = self.inner.slot.borrow_mut();
            let Some(executor) = slot.executor.take() else {
                return;
            };
            slot.executed = true;
            executor
        };

        self.inner.runtime.record(|p| p.executor_runs += 1);
        let values = self.parent_values();
        match executor(&values) {
            Ok(value) => {
                if let Err(err) = self.fulfill(value) {
                    tracing::debug!(promise = %self.inner.id, error = %err, "executor result discarded");
                }
            }
            Err(err) => {
                if self.inner.runtime.debug() {
                    tracing::warn!(promise = %self.inner.id, error = ?err, "error running executor");
                }
                self.reject_with(err, "executor");
            }
        }
    }

    fn reject_with(&self, reason: E, source: &'static str) {
        if let Err(err) = self.reject(reason) {
            tracing::debug!(promise = %self.inner.id, source, error = %err, "failure discarded, promise already settled");
        }
    }

    fn settle_fulfilled(&self, value: Option<T>) {
        let drained = {
            let mut slot = self.inner.slot.borrow_mut();
            slot.state = PromiseState::Fulfilled;
            slot.returned_value = value;

            // Fulfilling counts as having been scheduled.
            let mut run = std::mem::take(&mut slot.on_scheduled);
            run.append(&mut slot.on_fulfilled);
            Drained {
                run,
                discarded: std::mem::take(&mut slot.on_rejected),
                dependents: std::mem::take(&mut slot.dependents),
                waiting_on: std::mem::take(&mut slot.waiting_on),
                scheduler: slot.scheduler.take(),
                executor: slot.executor.take(),
            }
        };
        self.inner.runtime.record(|p| p.fulfilled += 1);

        for child in self.finish(drained) {
            self.inner.runtime.notify(Notification::ParentFulfilled {
                child,
                parent: self.clone(),
            });
        }
        self.inner.runtime.flush();
    }

    fn settle_rejected(&self, reason: Option<E>) {
        let drained = {
            let mut slot = self.inner.slot.borrow_mut();
            slot.state = PromiseState::Rejected;
            slot.reason = reason;

            let mut discarded = std::mem::take(&mut slot.on_fulfilled);
            discarded.append(&mut slot.on_scheduled);
            Drained {
                run: std::mem::take(&mut slot.on_rejected),
                discarded,
                dependents: std::mem::take(&mut slot.dependents),
                waiting_on: std::mem::take(&mut slot.waiting_on),
                scheduler: slot.scheduler.take(),
                executor: slot.executor.take(),
            }
        };
        self.inner.runtime.record(|p| p.rejected += 1);

        for child in self.finish(drained) {
            self.inner
                .runtime
                .notify(Notification::ParentRejected { child });
        }
        self.inner.runtime.flush();
    }

    /// Drop what a terminal transition discarded, run its handlers in order and
    /// return the dependents that are still alive.
    fn finish(&self, drained: Drained<T, E>) -> Links<T, E> {
        let Drained {
            run,
            discarded,
            dependents,
            waiting_on,
            scheduler,
            executor,
        } = drained;
        drop((discarded, waiting_on, scheduler, executor));

        if !run.is_empty() {
            let values = self.parent_values();
            for handler in run {
                handler(&values);
            }
        }
        dependents
            .iter()
            .filter_map(Weak::upgrade)
            .map(|inner| Promise { inner })
            .collect()
    }

    pub(crate) fn parent_fulfilled(&self, parent: &Promise<T, E>) {
        let (ready, _removed) = {
            let mut slot = self.inner.slot.borrow_mut();
            let (removed, kept): (Links<T, E>, Links<T, E>) = std::mem::take(&mut slot.waiting_on)
                .into_iter()
                .partition(|p| p.ptr_eq(parent));
            slot.waiting_on = kept;
            (slot.waiting_on.is_empty() && !slot.state.is_terminal(), removed)
        };

        if ready {
            if let Err(err) = self.set_state(PromiseState::Pending, None) {
                tracing::debug!(promise = %self.inner.id, error = %err, "parent fulfillment ignored");
            }
        }
    }

    pub(crate) fn parent_rejected(&self) {
        let (settle, _waiting) = {
            let mut slot = self.inner.slot.borrow_mut();
            (
                !slot.state.is_terminal(),
                std::mem::take(&mut slot.waiting_on),
            )
        };

        if settle {
            if let Err(err) = self.set_state(PromiseState::Rejected, None) {
                tracing::debug!(promise = %self.inner.id, error = %err, "parent rejection ignored");
            }
        }
    }

    fn parent_values(&self) -> Values<T> {
        self.inner
            .parents
            .iter()
            .map(|p| p.returned_value())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    type P = Promise<i32, String>;

    fn runtime() -> Runtime<i32, String> {
        Runtime::default()
    }

    #[test]
    fn test_payload_only_for_terminal_targets() {
        let rt = runtime();
        let p: P = rt.pending();

        assert_eq!(
            p.set_state(PromiseState::Pending, Some(Payload::Value(1))),
            Err(PromiseError::PayloadForNonTerminal(PromiseState::Pending))
        );
        assert_eq!(
            p.set_state(PromiseState::Unscheduled, Some(Payload::Reason(None))),
            Err(PromiseError::PayloadForNonTerminal(PromiseState::Unscheduled))
        );
        assert_eq!(
            p.set_state(PromiseState::Fulfilled, Some(Payload::Reason(None))),
            Err(PromiseError::PayloadMismatch(PromiseState::Fulfilled))
        );
        assert_eq!(
            p.set_state(PromiseState::Rejected, Some(Payload::Value(3))),
            Err(PromiseError::PayloadMismatch(PromiseState::Rejected))
        );
        assert_eq!(p.state(), PromiseState::Pending);
    }

    #[test]
    fn test_pending_cannot_be_unscheduled() {
        let rt = runtime();
        let p: P = rt.pending();

        assert_eq!(
            p.set_state(PromiseState::Unscheduled, None),
            Err(PromiseError::Unschedule)
        );
        assert_eq!(p.state(), PromiseState::Pending);
    }

    #[test]
    fn test_same_state_is_noop() {
        let rt = runtime();
        let parent: P = rt.pending();
        let child = rt.deferred(&[parent.clone()]);
        let scheduled = Rc::new(Cell::new(0));

        child.on_scheduled({
            let scheduled = scheduled.clone();
            move |_| scheduled.set(scheduled.get() + 1)
        });

        assert_eq!(child.set_state(PromiseState::Unscheduled, None), Ok(()));
        assert_eq!(scheduled.get(), 0);

        assert_eq!(child.set_state(PromiseState::Pending, None), Ok(()));
        assert_eq!(child.set_state(PromiseState::Pending, None), Ok(()));
        assert_eq!(scheduled.get(), 1);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let rt = runtime();
        let fulfilled: P = rt.fulfilled(1);
        let rejected: P = rt.rejected("no".to_string());

        for target in [PromiseState::Unscheduled, PromiseState::Pending] {
            assert_eq!(
                fulfilled.set_state(target, None),
                Err(PromiseError::AlreadySettled {
                    from: PromiseState::Fulfilled,
                    to: target,
                })
            );
            assert_eq!(
                rejected.set_state(target, None),
                Err(PromiseError::AlreadySettled {
                    from: PromiseState::Rejected,
                    to: target,
                })
            );
        }
        assert_eq!(fulfilled.state(), PromiseState::Fulfilled);
        assert_eq!(rejected.state(), PromiseState::Rejected);
    }

    #[test]
    fn test_unscheduled_to_pending_runs_stored_executor() {
        let rt = runtime();
        let parent: P = rt.pending();
        let child = rt.deferred(&[parent.clone()]);

        child.to_execute(|_| Ok(9)).unwrap();
        assert!(child.is_unscheduled());

        child.set_state(PromiseState::Pending, None).unwrap();
        assert_eq!(child.state(), PromiseState::Fulfilled);
        assert_eq!(child.returned_value(), Some(9));
    }
}
