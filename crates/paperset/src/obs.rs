//! Batch event sink boundary.
//!
//! Engine logic MUST NOT depend on any concrete telemetry backend.
//! All instrumentation flows through `BatchEvent` and `BatchEventSink`;
//! the embedder installs a sink, tests capture events with `with_sink`.

use crate::store::ItemKind;
use std::cell::RefCell;
use std::rc::Rc;

thread_local! {
    static SINK: RefCell<Option<Rc<dyn BatchEventSink>>> = const { RefCell::new(None) };
}

///
/// BatchEvent
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BatchEvent {
    KindLoaded {
        kind: ItemKind,
        items: usize,
    },
    RowApplied {
        kind: ItemKind,
        staged: bool,
    },
    ExecuteStart {
        changes: usize,
        locks: usize,
    },
    ExecuteFinish {
        committed: bool,
    },
}

///
/// BatchEventSink
///

pub trait BatchEventSink {
    fn on_event(&self, event: BatchEvent);
}

/// Install a sink for the duration of `f` on this thread.
pub fn with_sink<R>(sink: Rc<dyn BatchEventSink>, f: impl FnOnce() -> R) -> R {
    SINK.with(|cell| *cell.borrow_mut() = Some(sink));
    let out = f();
    SINK.with(|cell| *cell.borrow_mut() = None);
    out
}

/// Emit an event to the installed sink, if any.
pub(crate) fn emit(event: BatchEvent) {
    SINK.with(|cell| {
        if let Some(sink) = cell.borrow().as_ref() {
            sink.on_event(event);
        }
    });
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    struct Capture(RefCell<Vec<BatchEvent>>);

    impl BatchEventSink for Capture {
        fn on_event(&self, event: BatchEvent) {
            self.0.borrow_mut().push(event);
        }
    }

    #[test]
    fn events_reach_the_installed_sink_only() {
        emit(BatchEvent::ExecuteFinish { committed: false });

        let capture = Rc::new(Capture(RefCell::new(Vec::new())));
        let inner = Rc::clone(&capture);
        with_sink(inner, || {
            emit(BatchEvent::ExecuteFinish { committed: true });
        });
        emit(BatchEvent::ExecuteFinish { committed: false });

        assert_eq!(
            capture.0.borrow().as_slice(),
            &[BatchEvent::ExecuteFinish { committed: true }]
        );
    }
}
