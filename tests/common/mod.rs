use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use polars::prelude::*;
use tablature::{engine_with_frame, Exec, Session, SessionConfig};

pub fn people_frame() -> DataFrame {
    df!(
        "a" => (0..100i64).collect::<Vec<i64>>(),
        "b" => (0..100).map(|i| format!("text_{}", i)).collect::<Vec<String>>(),
        "c" => (0..100i64).map(|i| i % 3).collect::<Vec<i64>>(),
        "d" => (0..100)
            .map(|i| if i % 10 == 0 { None } else { Some(i as f64 / 2.0) })
            .collect::<Vec<Option<f64>>>()
    )
    .unwrap()
}

pub fn session_over(frame: DataFrame) -> Session {
    session_with(frame, SessionConfig::default())
}

pub fn session_with(frame: DataFrame, config: SessionConfig) -> Session {
    let exec = Exec::spawn(Box::new(engine_with_frame(frame)));
    Session::open(exec, "data", config)
}

pub fn load_fully(mut session: Session) -> Session {
    let (done, completion) = slot();
    session.load_full(completion);
    drive_until(&mut session, &done);
    done.borrow_mut()
        .take()
        .unwrap()
        .expect("full load succeeded");
    session
}

pub fn loaded_session() -> Session {
    load_fully(session_over(people_frame()))
}

pub type Slot<T> = Rc<RefCell<Option<T>>>;

pub fn slot<T: 'static>() -> (Slot<T>, impl FnOnce(T)) {
    let slot: Slot<T> = Rc::new(RefCell::new(None));
    let writer = Rc::clone(&slot);
    (slot, move |value: T| {
        *writer.borrow_mut() = Some(value);
    })
}

/// Apply background completions until the captured one fires.
pub fn drive_until<T>(session: &mut Session, slot: &Slot<T>) {
    while slot.borrow().is_none() {
        assert!(
            session.wait_for_completion(Duration::from_secs(10)),
            "timed out waiting for a background completion"
        );
    }
}
