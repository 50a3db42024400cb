use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tether_promise::{PromiseError, PromiseState, Runtime};

type Rt = Runtime<i32, String>;

#[test]
fn test_fulfilled_factory() {
    let rt = Rt::default();
    let p = rt.fulfilled(7);

    assert_eq!(p.state(), PromiseState::Fulfilled);
    assert!(p.is_complete());
    assert_eq!(p.returned_value(), Some(7));
    assert_eq!(p.reason(), None);
    assert!(p.parents().is_empty());
}

#[test]
fn test_fulfilled_factory_never_runs_scheduler() {
    let rt = Rt::default();
    let ran = Rc::new(Cell::new(false));

    let p = rt
        .promise()
        .on_schedule({
            let ran = ran.clone();
            move |_, _| {
                ran.set(true);
                Ok(())
            }
        })
        .fulfilled(3);

    assert_eq!(p.returned_value(), Some(3));
    assert!(!ran.get());
}

#[test]
fn test_rejected_factory() {
    let rt = Rt::default();
    let p = rt.rejected("boom".to_string());

    assert_eq!(p.state(), PromiseState::Rejected);
    assert_eq!(p.reason(), Some("boom".to_string()));
    assert_eq!(p.returned_value(), None);
}

#[test]
fn test_terminal_factories_record_parents_without_waiting() {
    let rt = Rt::default();
    let parent = rt.pending();

    let p = rt.promise().parent(parent.clone()).fulfilled(1);
    assert_eq!(p.state(), PromiseState::Fulfilled);
    assert_eq!(p.parents().len(), 1);
    assert!(p.parents()[0].ptr_eq(&parent));

    // Rejecting the parent afterwards leaves the child alone.
    parent.reject("late".to_string()).unwrap();
    assert_eq!(p.state(), PromiseState::Fulfilled);
    assert_eq!(p.returned_value(), Some(1));
}

#[test]
fn test_no_parents_schedules_during_construction() {
    let rt = Rt::default();
    let log = Rc::new(RefCell::new(Vec::new()));

    let p = rt
        .promise()
        .on_schedule({
            let log = log.clone();
            move |_, values| {
                assert!(values.is_empty());
                log.borrow_mut().push("scheduler");
                Ok(())
            }
        })
        .build();

    log.borrow_mut().push("constructed");

    assert_eq!(p.state(), PromiseState::Pending);
    assert_eq!(*log.borrow(), vec!["scheduler", "constructed"]);
}

#[test]
fn test_explicit_pending_ignores_parents_and_scheduler() {
    let rt = Rt::default();
    let parent = rt.pending();
    let ran = Rc::new(Cell::new(false));

    let p = rt
        .promise()
        .parent(parent.clone())
        .pending()
        .on_schedule({
            let ran = ran.clone();
            move |_, _| {
                ran.set(true);
                Ok(())
            }
        })
        .build();

    assert_eq!(p.state(), PromiseState::Pending);

    parent.fulfill(1).unwrap();
    assert_eq!(p.state(), PromiseState::Pending);
    assert!(!ran.get());

    p.fulfill(2).unwrap();
    assert_eq!(p.returned_value(), Some(2));
}

#[test]
fn test_unfinished_parent_leaves_child_unscheduled() {
    let rt = Rt::default();
    let parent = rt.pending();
    let child = rt.deferred(&[parent.clone()]);

    assert_eq!(child.state(), PromiseState::Unscheduled);
    assert!(child.is_unscheduled());
    assert_eq!(child.returned_value(), None);
    assert_eq!(child.reason(), None);
}

#[test]
fn test_completed_parents_do_not_block() {
    let rt = Rt::default();
    let done = rt.fulfilled(1);
    let child = rt.deferred(&[done]);

    assert_eq!(child.state(), PromiseState::Pending);
}

#[test]
fn test_fulfill_twice_is_noop() {
    let rt = Rt::default();
    let p = rt.pending();
    let calls = Rc::new(Cell::new(0));

    p.on_fulfilled({
        let calls = calls.clone();
        move |_| calls.set(calls.get() + 1)
    });

    p.fulfill(1).unwrap();
    p.fulfill(2).unwrap();

    assert_eq!(p.returned_value(), Some(1));
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_reject_after_fulfill_is_usage_error() {
    let rt = Rt::default();
    let p = rt.pending();
    p.fulfill(1).unwrap();

    let err = p.reject("nope".to_string()).unwrap_err();
    assert_eq!(
        err,
        PromiseError::AlreadySettled {
            from: PromiseState::Fulfilled,
            to: PromiseState::Rejected,
        }
    );
    assert_eq!(p.state(), PromiseState::Fulfilled);
    assert_eq!(p.reason(), None);
}

#[test]
fn test_fulfill_after_reject_is_usage_error() {
    let rt = Rt::default();
    let p = rt.pending();
    p.reject(None).unwrap();

    assert!(matches!(
        p.fulfill(1),
        Err(PromiseError::AlreadySettled {
            from: PromiseState::Rejected,
            to: PromiseState::Fulfilled,
        })
    ));
    assert_eq!(p.state(), PromiseState::Rejected);
    assert_eq!(p.returned_value(), None);
    assert_eq!(p.reason(), None);
}

#[test]
fn test_unscheduled_can_settle_directly() {
    let rt = Rt::default();
    let parent = rt.pending();
    let child = rt.deferred(&[parent.clone()]);

    child.fulfill(5).unwrap();
    assert_eq!(child.state(), PromiseState::Fulfilled);

    // A parent finishing later is ignored.
    parent.fulfill(1).unwrap();
    assert_eq!(child.returned_value(), Some(5));
}

#[test]
fn test_usage_error_messages() {
    let err = PromiseError::AlreadySettled {
        from: PromiseState::Fulfilled,
        to: PromiseState::Pending,
    };
    assert_eq!(
        err.to_string(),
        "cannot change promise state from fulfilled to pending: fulfilled is final"
    );
    assert!(
        PromiseError::ExecutorOnFulfilled
            .to_string()
            .contains("never run")
    );
}
