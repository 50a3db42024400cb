use crate::promise::Promise;
use std::cell::RefCell;
use std::collections::VecDeque;

/// A settled parent telling one of its dependents about it.
pub(crate) enum Notification<T, E> {
    ParentFulfilled {
        child: Promise<T, E>,
        parent: Promise<T, E>,
    },
    ParentRejected {
        child: Promise<T, E>,
    },
}

/// FIFO work-list of parent notifications.
///
/// Settling a promise pushes one entry per dependent instead of calling into
/// the dependent directly, so a long chain is walked by a loop rather than by
/// recursion.
pub(crate) struct NotificationQueue<T, E> {
    queue: RefCell<VecDeque<Notification<T, E>>>,
}

impl<T, E> NotificationQueue<T, E> {
    pub fn new() -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
        }
    }

    pub fn push(&self, notification: Notification<T, E>) {
        self.queue.borrow_mut().push_back(notification);
    }

    pub fn pop(&self) -> Option<Notification<T, E>> {
        self.queue.borrow_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}
