//! Fixed-channel observer interfaces for the recorder and replayer.
//!
//! Callers register trait objects; emission happens synchronously on the
//! dispatching task, in capture order. Batch channels are used instead of
//! the per-event ones when the recorder runs with `stream: false`.

use std::sync::{Arc, Mutex};

use relive_types::{Action, CapturedError, Recording};

/// Recorder event channels: `action`, `console-error`, `stop`, `close`.
#[allow(unused_variables)]
pub trait RecorderHandler: Send + Sync {
    /// One captured action (stream mode).
    fn on_action(&self, action: &Action) {}
    /// The full action array, delivered once on finalize (batch mode).
    fn on_action_batch(&self, actions: &[Action]) {}
    /// One captured error (stream mode).
    fn on_console_error(&self, error: &CapturedError) {}
    /// The full error array, delivered once on finalize (batch mode).
    fn on_console_error_batch(&self, errors: &[CapturedError]) {}
    /// Recording finished (explicit stop or browser disconnect).
    fn on_stop(&self, recording: &Recording) {}
    /// The browser is gone and the machine is back in `Idle`.
    fn on_close(&self) {}
}

/// Replayer event channels: `action`, `console-error`, `finish`, `close`.
#[allow(unused_variables)]
pub trait ReplayerHandler: Send + Sync {
    /// About to dispatch action `index`.
    fn on_action(&self, index: usize, action: &Action) {}
    /// A console/page/network error surfaced during the session.
    fn on_console_error(&self, error: &CapturedError) {}
    /// Replay ran to completion.
    fn on_finish(&self, console_errors: &[CapturedError]) {}
    /// The browser is gone and the machine is back in `Idle`.
    fn on_close(&self) {}
}

/// Registered handlers for one machine.
///
/// Dispatch clones the registry under the lock and invokes outside it, so a
/// handler may re-register or call back into the machine without deadlock.
pub(crate) struct HandlerSet<H: ?Sized> {
    inner: Mutex<Vec<Arc<H>>>,
}

impl<H: ?Sized> HandlerSet<H> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, handler: Arc<H>) {
        self.inner
            .lock()
            .expect("handler registry poisoned")
            .push(handler);
    }

    pub fn for_each(&self, mut dispatch: impl FnMut(&H)) {
        let handlers: Vec<Arc<H>> = self
            .inner
            .lock()
            .expect("handler registry poisoned")
            .clone();
        for handler in handlers {
            dispatch(&handler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        actions: AtomicUsize,
        stops: AtomicUsize,
    }

    impl RecorderHandler for Counter {
        fn on_action(&self, _action: &Action) {
            self.actions.fetch_add(1, Ordering::SeqCst);
        }
        fn on_stop(&self, _recording: &Recording) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn handlers_receive_dispatched_events() {
        let set: HandlerSet<dyn RecorderHandler> = HandlerSet::new();
        let counter = Arc::new(Counter {
            actions: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        set.add(counter.clone());
        set.add(counter.clone());

        let action = Action::initial_resize(800, 600, 1);
        set.for_each(|h| h.on_action(&action));

        assert_eq!(counter.actions.load(Ordering::SeqCst), 2);
        assert_eq!(counter.stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn default_methods_are_no_ops() {
        struct Silent;
        impl RecorderHandler for Silent {}
        let set: HandlerSet<dyn RecorderHandler> = HandlerSet::new();
        set.add(Arc::new(Silent));
        let action = Action::initial_resize(800, 600, 1);
        set.for_each(|h| h.on_action(&action));
    }

    #[test]
    fn handler_may_reenter_registry_during_dispatch() {
        struct Reentrant {
            set: Arc<HandlerSet<dyn RecorderHandler>>,
        }
        impl RecorderHandler for Reentrant {
            fn on_close(&self) {
                // Must not deadlock.
                self.set.add(Arc::new(Silent));
            }
        }
        struct Silent;
        impl RecorderHandler for Silent {}

        let set: Arc<HandlerSet<dyn RecorderHandler>> = Arc::new(HandlerSet::new());
        set.add(Arc::new(Reentrant { set: set.clone() }));
        set.for_each(|h| h.on_close());
    }
}
