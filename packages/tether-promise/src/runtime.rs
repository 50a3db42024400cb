use crate::builder::PromiseBuilder;
use crate::config::RuntimeConfig;
use crate::promise::{Promise, PromiseId};
use crate::queue::{Notification, NotificationQueue};

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Counters for everything a runtime has done so far.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profiling {
    pub created: u64,
    pub scheduled: u64,
    pub fulfilled: u64,
    pub rejected: u64,
    pub scheduler_runs: u64,
    pub executor_runs: u64,
    pub notifications: u64,
}

pub(crate) struct Shared<T, E> {
    debug: Cell<bool>,
    next_id: Cell<u64>,
    draining: Cell<bool>,
    queue: NotificationQueue<T, E>,
    profiling: Cell<Profiling>,
}

/// The context a family of promises lives in.
///
/// A runtime owns the configuration, the work-list parents use to notify
/// their dependents and the profiling counters. It is cheap to clone; clones
/// share the same state. Promises from different runtimes may not be mixed
/// as parents of one another.
pub struct Runtime<T, E> {
    shared: Rc<Shared<T, E>>,
}

impl<T, E> Clone for Runtime<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Runtime<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("debug", &self.shared.debug.get())
            .field("queued", &self.shared.queue.len())
            .field("profiling", &self.shared.profiling.get())
            .finish()
    }
}

impl<T, E> Default for Runtime<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl<T, E> Runtime<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    pub fn new(config: RuntimeConfig) -> Self {
        tracing::debug!(debug = config.debug, "promise runtime created");
        Self {
            shared: Rc::new(Shared {
                debug: Cell::new(config.debug),
                next_id: Cell::new(0),
                draining: Cell::new(false),
                queue: NotificationQueue::new(),
                profiling: Cell::new(Profiling::default()),
            }),
        }
    }

    pub fn config(&self) -> RuntimeConfig {
        RuntimeConfig {
            debug: self.debug(),
        }
    }

    pub fn debug(&self) -> bool {
        self.shared.debug.get()
    }

    pub fn set_debug(&self, debug: bool) {
        self.shared.debug.set(debug);
    }

    pub fn profiling(&self) -> Profiling {
        self.shared.profiling.get()
    }

    /// True when no parent notification is waiting to be delivered.
    pub fn is_idle(&self) -> bool {
        self.shared.queue.is_empty()
    }

    /// Start building a promise owned by this runtime.
    pub fn promise(&self) -> PromiseBuilder<T, E> {
        PromiseBuilder::new(self)
    }

    /// A promise that schedules itself once every parent has completed.
    pub fn deferred(&self, parents: &[Promise<T, E>]) -> Promise<T, E> {
        self.promise().parents(parents.iter().cloned()).build()
    }

    /// Like [`deferred`](Self::deferred), running `scheduler` when the promise becomes pending.
    pub fn scheduled<F>(&self, parents: &[Promise<T, E>], scheduler: F) -> Promise<T, E>
    where
        F: FnOnce(&Promise<T, E>, &[Option<T>]) -> Result<(), E> + 'static,
    {
        self.promise()
            .parents(parents.iter().cloned())
            .on_schedule(scheduler)
            .build()
    }

    /// A promise that is already pending and waits for an explicit completion.
    pub fn pending(&self) -> Promise<T, E> {
        self.promise().pending().build()
    }

    pub fn fulfilled(&self, value: T) -> Promise<T, E> {
        self.promise().fulfilled(value)
    }

    pub fn rejected(&self, reason: impl Into<Option<E>>) -> Promise<T, E> {
        self.promise().rejected(reason)
    }

    pub(crate) fn next_id(&self) -> PromiseId {
        let id = self.shared.next_id.get();
        self.shared.next_id.set(id + 1);
        PromiseId::new(id)
    }

    pub(crate) fn record(&self, f: impl FnOnce(&mut Profiling)) {
        let mut profiling = self.shared.profiling.get();
        f(&mut profiling);
        self.shared.profiling.set(profiling);
    }

    pub(crate) fn notify(&self, notification: Notification<T, E>) {
        self.shared.queue.push(notification);
    }

    /// Deliver queued notifications until the work-list is empty.
    ///
    /// Only the outermost caller drains. A transition triggered while a drain
    /// is already running just leaves its notifications queued for that loop.
    pub(crate) fn flush(&self) {
        if self.shared.draining.replace(true) {
            return;
        }
        let _guard = DrainGuard(&self.shared.draining);

        tracing::trace!(queued = self.shared.queue.len(), "draining promise notifications");

        while let Some(notification) = self.shared.queue.pop() {
            self.record(|p| p.notifications += 1);
            match notification {
                Notification::ParentFulfilled { child, parent } => child.parent_fulfilled(&parent),
                Notification::ParentRejected { child } => child.parent_rejected(),
            }
        }
    }
}

struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}
