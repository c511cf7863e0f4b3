//! Burst Coalescing
//!
//! A single logical update often produces several change notifications on
//! the same call stack (a leaf event plus its piped ancestors, or several
//! fields written back to back). The [`Debouncer`] turns any such burst
//! into one deferred callback: every [`Debouncer::touch`] pushes the
//! deadline out by the full window (last-write-wins), and the timer thread
//! fires once when a window finally elapses untouched.
//!
//! This is the only asynchronous element in the engine. The thread parks
//! on a condvar, wakes for touches, and exits when the owning value is
//! dropped.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

struct State {
    deadline: Option<Instant>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    signal: Condvar,
}

pub(crate) struct Debouncer {
    shared: Arc<Shared>,
    window: Duration,
}

impl Debouncer {
    /// Spawn the timer thread. `on_fire` runs on that thread, once per
    /// burst.
    pub(crate) fn new<F>(window: Duration, on_fire: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                deadline: None,
                shutdown: false,
            }),
            signal: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("arbor-debounce".into())
            .spawn(move || loop {
                let mut state = thread_shared.state.lock().expect("debounce lock poisoned");
                loop {
                    if state.shutdown {
                        return;
                    }
                    match state.deadline {
                        None => {
                            state = thread_shared
                                .signal
                                .wait(state)
                                .expect("debounce lock poisoned");
                        }
                        Some(deadline) => {
                            let now = Instant::now();
                            if now >= deadline {
                                state.deadline = None;
                                break;
                            }
                            let (guard, _) = thread_shared
                                .signal
                                .wait_timeout(state, deadline - now)
                                .expect("debounce lock poisoned");
                            state = guard;
                        }
                    }
                }
                drop(state);
                on_fire();
            })
            .expect("failed to spawn debounce timer thread");

        Self { shared, window }
    }

    /// Note one change. Resets the deadline to a full window from now.
    pub(crate) fn touch(&self) {
        let mut state = self.shared.state.lock().expect("debounce lock poisoned");
        state.deadline = Some(Instant::now() + self.window);
        self.shared.signal.notify_one();
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().expect("debounce lock poisoned");
        state.shutdown = true;
        // The thread exits on its own; joining here could deadlock when a
        // fire callback is what dropped the owner.
        self.shared.signal.notify_one();
    }
}
