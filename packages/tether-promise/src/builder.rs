use crate::promise::{Initial, Promise, Scheduler};
use crate::runtime::Runtime;

use smallvec::SmallVec;
use std::fmt;

/// Collects the construction options for a [`Promise`].
///
/// ```
/// use tether_promise::Runtime;
///
/// let rt: Runtime<i32, String> = Runtime::default();
/// let a = rt.pending();
/// let b = rt.pending();
/// let sum = rt
///     .promise()
///     .parents([a.clone(), b.clone()])
///     .on_schedule(|this, values| {
///         let total = values.iter().flatten().sum();
///         this.fulfill(total).map_err(|e| e.to_string())
///     })
///     .build();
///
/// a.fulfill(1).unwrap();
/// b.fulfill(2).unwrap();
/// assert_eq!(sum.returned_value(), Some(3));
/// ```
#[must_use = "a builder does nothing until `build`, `fulfilled` or `rejected` is called"]
pub struct PromiseBuilder<T, E> {
    runtime: Runtime<T, E>,
    parents: SmallVec<[Promise<T, E>; 2]>,
    pending: bool,
    scheduler: Option<Scheduler<T, E>>,
}

impl<T, E> PromiseBuilder<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    pub(crate) fn new(runtime: &Runtime<T, E>) -> Self {
        Self {
            runtime: runtime.clone(),
            parents: SmallVec::new(),
            pending: false,
            scheduler: None,
        }
    }

    pub fn parent(mut self, parent: Promise<T, E>) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn parents<I>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = Promise<T, E>>,
    {
        self.parents.extend(parents);
        self
    }

    /// Start out pending, ignoring parents and any scheduler.
    pub fn pending(mut self) -> Self {
        self.pending = true;
        self
    }

    pub fn on_schedule<F>(mut self, scheduler: F) -> Self
    where
        F: FnOnce(&Promise<T, E>, &[Option<T>]) -> Result<(), E> + 'static,
    {
        self.scheduler = Some(Box::new(scheduler));
        self
    }

    pub fn build(self) -> Promise<T, E> {
        let initial = if self.pending {
            Initial::Pending
        } else {
            Initial::Deferred
        };
        Promise::create(&self.runtime, self.parents, initial, self.scheduler)
    }

    /// Build the promise already fulfilled. Parents are recorded but not waited on.
    pub fn fulfilled(self, value: T) -> Promise<T, E> {
        Promise::create(
            &self.runtime,
            self.parents,
            Initial::Fulfilled(value),
            None,
        )
    }

    /// Build the promise already rejected. Parents are recorded but not waited on.
    pub fn rejected(self, reason: impl Into<Option<E>>) -> Promise<T, E> {
        Promise::create(
            &self.runtime,
            self.parents,
            Initial::Rejected(reason.into()),
            None,
        )
    }
}
