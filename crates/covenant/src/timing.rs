//! Timer-backed operations: `delay` and `timeout`.
//!
//! The only host resources the runtime ever holds are timer handles.
//! `delay` owns its handle from upstream fulfillment until the timer
//! fires; `timeout` owns its handle from construction until either the
//! timer fires or the upstream settles, whichever comes first. Both
//! paths release the handle unconditionally.

use std::cell::Cell;
use std::rc::Rc;

use crate::environment::TimerHandle;
use crate::handler::{self, Consumer, Handler};
use crate::promise::Promise;
use crate::value::{PromiseError, SettleFn, Value};

impl Promise {
    /// After upstream fulfillment, hold the value for `ms` milliseconds
    /// before resolving. Rejections propagate immediately — no timer is
    /// created for them. Progress is forwarded.
    pub fn delay(&self, ms: u64) -> Promise {
        let derived = Promise::pending(self.environment());
        let env = self.environment();
        let resolve: SettleFn = {
            let derived = derived.clone();
            Rc::new(move |value: Value| {
                let target = derived.clone();
                env.set_timer(
                    Box::new(move || handler::resolve_value(&target, value)),
                    ms,
                );
            })
        };
        handler::register(
            self,
            Consumer {
                resolve,
                reject: derived.rejecter_fn(),
                notify: derived.notifier_fn(),
                on_fulfilled: None,
                on_rejected: None,
                on_progress: None,
            },
        );
        derived
    }

    /// Race the upstream against a timer armed now. If the timer fires
    /// first, reject with a timeout error naming the bound; if the
    /// upstream settles first (either way), cancel the timer and adopt
    /// the outcome.
    pub fn timeout(&self, ms: u64) -> Promise {
        let derived = Promise::pending(self.environment());
        let env = self.environment();
        let armed: Rc<Cell<Option<TimerHandle>>> = Rc::new(Cell::new(None));
        let handle = {
            let target = derived.clone();
            let armed = armed.clone();
            env.set_timer(
                Box::new(move || {
                    armed.set(None);
                    handler::settle(
                        &target,
                        Handler::Rejected(Value::Error(PromiseError::Timeout { ms })),
                    );
                }),
                ms,
            )
        };
        armed.set(Some(handle));
        let resolve: SettleFn = {
            let derived = derived.clone();
            let armed = armed.clone();
            let env = env.clone();
            Rc::new(move |value| {
                if let Some(h) = armed.take() {
                    env.cancel_timer(h);
                }
                handler::resolve_value(&derived, value);
            })
        };
        let reject: SettleFn = {
            let derived = derived.clone();
            let env = env.clone();
            Rc::new(move |reason| {
                if let Some(h) = armed.take() {
                    env.cancel_timer(h);
                }
                handler::settle(&derived, Handler::Rejected(reason));
            })
        };
        handler::register(
            self,
            Consumer {
                resolve,
                reject,
                notify: derived.notifier_fn(),
                on_fulfilled: None,
                on_rejected: None,
                on_progress: None,
            },
        );
        derived
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
