//! The promise value type and its operation surface.
//!
//! A [`Promise`] is a thin wrapper over one handler slot plus the host
//! environment it schedules against. All semantics live in the handler
//! state machine; everything here is expressed through `then` and the
//! settlement sinks.
//!
//! [`Deferred`] is the constructor protocol: it exposes the resolve /
//! reject / notify capabilities for one promise. After the first
//! settlement, further resolve/reject calls are no-ops and notify is
//! dropped.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::environment::Environment;
use crate::handler::{self, Consumer, Handler, Inspection};
use crate::runtime::{cast_value, PromiseRuntime};
use crate::value::{PromiseError, SettleFn, TransformFn, Value};

pub(crate) struct PromiseCell {
    pub(crate) slot: RefCell<Handler>,
    pub(crate) env: Rc<dyn Environment>,
}

/// A deterministic, monadic deferred value.
#[derive(Clone)]
pub struct Promise {
    pub(crate) cell: Rc<PromiseCell>,
}

impl Promise {
    pub(crate) fn pending(env: Rc<dyn Environment>) -> Self {
        Self::with_handler(env, Handler::Pending(Default::default()))
    }

    pub(crate) fn with_handler(env: Rc<dyn Environment>, handler: Handler) -> Self {
        Self {
            cell: Rc::new(PromiseCell {
                slot: RefCell::new(handler),
                env,
            }),
        }
    }

    /// Nominal identity: two promises are the same iff they share a slot.
    pub fn is_same(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    pub(crate) fn environment(&self) -> Rc<dyn Environment> {
        self.cell.env.clone()
    }

    pub(crate) fn resolver_fn(&self) -> SettleFn {
        let p = self.clone();
        Rc::new(move |v| handler::resolve_value(&p, v))
    }

    pub(crate) fn rejecter_fn(&self) -> SettleFn {
        let p = self.clone();
        Rc::new(move |r| handler::settle(&p, Handler::Rejected(r)))
    }

    pub(crate) fn notifier_fn(&self) -> SettleFn {
        let p = self.clone();
        Rc::new(move |u| handler::notify_progress(&p, u))
    }

    // -----------------------------------------------------------------
    // Core surface
    // -----------------------------------------------------------------

    /// Register transformers for fulfillment, rejection, and progress.
    ///
    /// Any transformer may be omitted; omitted transformers pass the
    /// value, reason, or update through unchanged. The returned promise
    /// settles with the transformer's result; an `Err` rejects it.
    /// Callbacks never run on the registration turn.
    ///
    /// The progress argument is legacy surface, kept for compatibility
    /// with progress-aware consumers.
    pub fn then(
        &self,
        on_fulfilled: Option<TransformFn>,
        on_rejected: Option<TransformFn>,
        on_progress: Option<TransformFn>,
    ) -> Promise {
        let derived = Promise::pending(self.cell.env.clone());
        handler::register(
            self,
            Consumer {
                resolve: derived.resolver_fn(),
                reject: derived.rejecter_fn(),
                notify: derived.notifier_fn(),
                on_fulfilled,
                on_rejected,
                on_progress,
            },
        );
        derived
    }

    /// Snapshot the current state without waiting.
    pub fn inspect(&self) -> Inspection {
        handler::inspect(self)
    }

    /// Fatal commit: consume this promise, routing any unhandled
    /// rejection to the environment's fatal channel. The reason is
    /// raised twice — once synchronously, once re-scheduled — so the
    /// host sees it even if one raise is swallowed. Returns nothing.
    pub fn done(&self, on_result: Option<TransformFn>, on_error: Option<TransformFn>) {
        let tail = self.then(on_result, on_error, None);
        let env = self.cell.env.clone();
        let ignore: SettleFn = Rc::new(|_| {});
        let raise: SettleFn = Rc::new(move |reason: Value| {
            let env_again = env.clone();
            let deferred_reason = reason.clone();
            env.enqueue(Box::new(move || env_again.raise_fatal(deferred_reason)));
            env.raise_fatal(reason);
        });
        handler::register(
            &tail,
            Consumer {
                resolve: ignore.clone(),
                reject: raise,
                notify: ignore,
                on_fulfilled: None,
                on_rejected: None,
                on_progress: None,
            },
        );
    }

    // -----------------------------------------------------------------
    // Derived surface
    // -----------------------------------------------------------------

    /// Handle rejections only.
    pub fn catch(&self, f: impl Fn(Value) -> Result<Value, Value> + 'static) -> Promise {
        self.then(None, Some(Rc::new(f)), None)
    }

    /// Run a side effect on both branches, then restore the original
    /// outcome. The side effect's return value is discarded unless it
    /// throws or yields a rejection, which wins.
    pub fn finally(&self, f: impl Fn() -> Result<Value, Value> + 'static) -> Promise {
        let f = Rc::new(f);
        let env = self.cell.env.clone();
        let on_fulfilled = {
            let f = f.clone();
            let env = env.clone();
            move |v: Value| -> Result<Value, Value> {
                let side = f()?;
                Ok(Value::Promise(cast_value(&env, side).then_resolve(v)))
            }
        };
        let on_rejected = move |r: Value| -> Result<Value, Value> {
            let side = f()?;
            Ok(Value::Promise(cast_value(&env, side).then(
                Some(Rc::new(move |_| Err(r.clone()))),
                None,
                None,
            )))
        };
        self.then(Some(Rc::new(on_fulfilled)), Some(Rc::new(on_rejected)), None)
    }

    /// Replace a rejection with `fallback`.
    pub fn or_else(&self, fallback: Value) -> Promise {
        self.catch(move |_| Ok(fallback.clone()))
    }

    /// Replace a fulfillment value with `replacement`.
    pub fn then_resolve(&self, replacement: Value) -> Promise {
        self.then(Some(Rc::new(move |_| Ok(replacement.clone()))), None, None)
    }

    /// Replace a fulfillment with a rejection carrying `reason`.
    pub fn then_reject(&self, reason: Value) -> Promise {
        self.then(Some(Rc::new(move |_| Err(reason.clone()))), None, None)
    }

    /// Run a side effect on fulfillment, then restore the original value.
    /// A throwing side effect (or one yielding a rejection) propagates.
    pub fn tap(&self, f: impl Fn(Value) -> Result<Value, Value> + 'static) -> Promise {
        self.then(Some(Rc::new(f)), None, None)
            .then_resolve(Value::Promise(self.clone()))
    }

    /// Apply `f` to the elements of a fulfilled list, resolving each
    /// element first. A non-list fulfillment rejects.
    pub fn spread(&self, f: impl Fn(Vec<Value>) -> Result<Value, Value> + 'static) -> Promise {
        let env = self.cell.env.clone();
        let f = Rc::new(f);
        self.then(
            Some(Rc::new(move |v: Value| match v {
                Value::List(items) => {
                    let runtime = PromiseRuntime::new(env.clone());
                    let f = f.clone();
                    Ok(Value::Promise(runtime.all(items).then(
                        Some(Rc::new(move |joined: Value| f(joined.into_list()))),
                        None,
                        None,
                    )))
                }
                other => Err(Value::Error(PromiseError::NotAList {
                    type_name: other.type_name().to_string(),
                })),
            })),
            None,
            None,
        )
    }

    /// Observe progress updates only. Legacy surface.
    pub fn progress(&self, f: impl Fn(Value) -> Result<Value, Value> + 'static) -> Promise {
        self.then(None, None, Some(Rc::new(f)))
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.cell.slot.try_borrow() {
            Ok(slot) => match &*slot {
                Handler::Pending(_) => "pending",
                Handler::Fulfilled(_) => "fulfilled",
                Handler::Rejected(_) => "rejected",
                Handler::Following(_) => "following",
                Handler::Progress(_) => "progress",
                Handler::Empty => "empty",
            },
            Err(_) => "busy",
        };
        write!(f, "Promise({state})")
    }
}

// ---------------------------------------------------------------------------
// Deferred — the constructor protocol
// ---------------------------------------------------------------------------

/// The resolve / reject / notify capabilities for one promise.
#[derive(Clone)]
pub struct Deferred {
    promise: Promise,
}

impl Deferred {
    pub(crate) fn new(promise: Promise) -> Self {
        Self { promise }
    }

    pub fn promise(&self) -> Promise {
        self.promise.clone()
    }

    /// Resolve with an arbitrary value: promises are followed, thenables
    /// adopted, plain values fulfill. Resolving a promise with itself
    /// rejects with a type error. No-op after the first settlement.
    pub fn resolve(&self, value: Value) {
        handler::resolve_value(&self.promise, value);
    }

    /// Reject with `reason`, carried verbatim. No-op after settlement.
    pub fn reject(&self, reason: Value) {
        handler::settle(&self.promise, Handler::Rejected(reason));
    }

    /// Emit a progress update. Dropped after settlement. Legacy surface.
    pub fn notify(&self, update: Value) {
        handler::notify_progress(&self.promise, update);
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Deferred").field(&self.promise).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::environment::DeterministicScheduler;
    use crate::value::transform;

    fn setup() -> (Rc<DeterministicScheduler>, PromiseRuntime) {
        let sched = Rc::new(DeterministicScheduler::new());
        let runtime = PromiseRuntime::new(sched.clone());
        (sched, runtime)
    }

    fn fulfilled_value(p: &Promise) -> Option<Value> {
        p.inspect().value().cloned()
    }

    fn rejection_reason(p: &Promise) -> Option<Value> {
        p.inspect().reason().cloned()
    }

    // ----- Asynchrony -----

    #[test]
    fn callbacks_never_run_on_the_registration_turn() {
        let (sched, rt) = setup();
        let ran = Rc::new(Cell::new(false));
        let p = rt.of(Value::Int(1));
        {
            let ran = ran.clone();
            p.then(
                Some(transform(move |v| {
                    ran.set(true);
                    Ok(v)
                })),
                None,
                None,
            );
        }
        assert!(!ran.get());
        sched.run();
        assert!(ran.get());
    }

    #[test]
    fn registration_after_settlement_still_crosses_a_turn() {
        let (sched, rt) = setup();
        let d = rt.defer();
        d.resolve(Value::Int(1));
        sched.run();
        let ran = Rc::new(Cell::new(false));
        {
            let ran = ran.clone();
            d.promise().then(
                Some(transform(move |v| {
                    ran.set(true);
                    Ok(v)
                })),
                None,
                None,
            );
        }
        assert!(!ran.get());
        sched.run();
        assert!(ran.get());
    }

    // ----- Pass-through and transformation -----

    #[test]
    fn absent_transformers_pass_both_channels_through() {
        let (sched, rt) = setup();
        let fulfilled = rt.of(Value::Int(5)).then(None, None, None);
        let rejected = rt.reject(Value::Str("e".into())).then(None, None, None);
        sched.run();
        assert_eq!(fulfilled_value(&fulfilled), Some(Value::Int(5)));
        assert_eq!(rejection_reason(&rejected), Some(Value::Str("e".into())));
    }

    #[test]
    fn thrown_transformer_rejects_the_derived_promise() {
        let (sched, rt) = setup();
        let p = rt
            .of(Value::Int(1))
            .then(Some(transform(|_| Err(Value::Str("thrown".into())))), None, None);
        sched.run();
        assert_eq!(rejection_reason(&p), Some(Value::Str("thrown".into())));
    }

    #[test]
    fn transformer_returning_a_promise_is_assimilated() {
        let (sched, rt) = setup();
        let inner = rt.of(Value::Int(10));
        let p = rt.of(Value::Int(0)).then(
            Some(transform(move |_| Ok(Value::Promise(inner.clone())))),
            None,
            None,
        );
        sched.run();
        assert_eq!(fulfilled_value(&p), Some(Value::Int(10)));
    }

    // ----- Constructor protocol -----

    #[test]
    fn resolver_runs_synchronously() {
        let (_sched, rt) = setup();
        let ran = Rc::new(Cell::new(false));
        {
            let ran = ran.clone();
            rt.promise(move |_| {
                ran.set(true);
                Ok(())
            });
        }
        assert!(ran.get());
    }

    #[test]
    fn resolver_error_rejects() {
        let (sched, rt) = setup();
        let p = rt.promise(|_| Err(Value::Str("bad resolver".into())));
        sched.run();
        assert_eq!(
            rejection_reason(&p),
            Some(Value::Str("bad resolver".into()))
        );
    }

    #[test]
    fn inspect_transitions_pending_to_fulfilled() {
        let (sched, rt) = setup();
        let d = rt.defer();
        assert_eq!(d.promise().inspect().state(), "pending");
        d.resolve(Value::Int(1));
        sched.run();
        assert_eq!(d.promise().inspect().state(), "fulfilled");
    }

    // ----- catch / or_else -----

    #[test]
    fn catch_recovers_from_rejection() {
        let (sched, rt) = setup();
        let p = rt
            .reject(Value::Str("oops".into()))
            .catch(|_| Ok(Value::Int(42)));
        sched.run();
        assert_eq!(fulfilled_value(&p), Some(Value::Int(42)));
    }

    #[test]
    fn catch_leaves_fulfillment_untouched() {
        let (sched, rt) = setup();
        let p = rt.of(Value::Int(3)).catch(|_| Ok(Value::Int(0)));
        sched.run();
        assert_eq!(fulfilled_value(&p), Some(Value::Int(3)));
    }

    #[test]
    fn or_else_substitutes_a_fallback() {
        let (sched, rt) = setup();
        let p = rt.reject(Value::Int(-1)).or_else(Value::Int(7));
        sched.run();
        assert_eq!(fulfilled_value(&p), Some(Value::Int(7)));
    }

    // ----- finally -----

    #[test]
    fn finally_runs_on_both_branches_and_preserves_outcomes() {
        let (sched, rt) = setup();
        let runs = Rc::new(Cell::new(0));
        let on_f = {
            let runs = runs.clone();
            rt.of(Value::Int(1)).finally(move || {
                runs.set(runs.get() + 1);
                Ok(Value::Undefined)
            })
        };
        let on_r = {
            let runs = runs.clone();
            rt.reject(Value::Str("e".into())).finally(move || {
                runs.set(runs.get() + 1);
                Ok(Value::Undefined)
            })
        };
        sched.run();
        assert_eq!(runs.get(), 2);
        assert_eq!(fulfilled_value(&on_f), Some(Value::Int(1)));
        assert_eq!(rejection_reason(&on_r), Some(Value::Str("e".into())));
    }

    #[test]
    fn finally_discards_its_return_value() {
        let (sched, rt) = setup();
        let p = rt.of(Value::Int(1)).finally(|| Ok(Value::Int(99)));
        sched.run();
        assert_eq!(fulfilled_value(&p), Some(Value::Int(1)));
    }

    #[test]
    fn throwing_finally_wins() {
        let (sched, rt) = setup();
        let p = rt
            .of(Value::Int(1))
            .finally(|| Err(Value::Str("cleanup failed".into())));
        sched.run();
        assert_eq!(
            rejection_reason(&p),
            Some(Value::Str("cleanup failed".into()))
        );
    }

    #[test]
    fn finally_waits_for_a_promise_side_effect() {
        let (sched, rt) = setup();
        let gate = rt.defer();
        let p = {
            let gate_p = gate.promise();
            rt.of(Value::Int(8))
                .finally(move || Ok(Value::Promise(gate_p.clone())))
        };
        sched.run();
        assert_eq!(p.inspect().state(), "pending");
        gate.resolve(Value::Undefined);
        sched.run();
        assert_eq!(fulfilled_value(&p), Some(Value::Int(8)));
    }

    // ----- then_resolve / then_reject -----

    #[test]
    fn then_resolve_replaces_the_value() {
        let (sched, rt) = setup();
        let p = rt.of(Value::Int(1)).then_resolve(Value::Str("new".into()));
        sched.run();
        assert_eq!(fulfilled_value(&p), Some(Value::Str("new".into())));
    }

    #[test]
    fn then_resolve_does_not_mask_rejection() {
        let (sched, rt) = setup();
        let p = rt
            .reject(Value::Str("e".into()))
            .then_resolve(Value::Int(1));
        sched.run();
        assert_eq!(rejection_reason(&p), Some(Value::Str("e".into())));
    }

    #[test]
    fn then_reject_converts_fulfillment() {
        let (sched, rt) = setup();
        let p = rt.of(Value::Int(1)).then_reject(Value::Str("nope".into()));
        sched.run();
        assert_eq!(rejection_reason(&p), Some(Value::Str("nope".into())));
    }

    // ----- tap -----

    #[test]
    fn tap_observes_and_restores_the_value() {
        let (sched, rt) = setup();
        let seen = Rc::new(RefCell::new(None));
        let p = {
            let seen = seen.clone();
            rt.of(Value::Int(6)).tap(move |v| {
                *seen.borrow_mut() = Some(v.clone());
                Ok(Value::Int(0))
            })
        };
        sched.run();
        assert_eq!(*seen.borrow(), Some(Value::Int(6)));
        assert_eq!(fulfilled_value(&p), Some(Value::Int(6)));
    }

    #[test]
    fn throwing_tap_propagates() {
        let (sched, rt) = setup();
        let p = rt
            .of(Value::Int(6))
            .tap(|_| Err(Value::Str("tap failed".into())));
        sched.run();
        assert_eq!(rejection_reason(&p), Some(Value::Str("tap failed".into())));
    }

    // ----- spread -----

    #[test]
    fn spread_applies_to_resolved_elements() {
        let (sched, rt) = setup();
        let items = Value::List(vec![
            Value::Int(2),
            Value::Promise(rt.of(Value::Int(3))),
        ]);
        let p = rt.of(items).spread(|args| {
            let mut sum = 0;
            for arg in &args {
                if let Value::Int(n) = arg {
                    sum += n;
                }
            }
            Ok(Value::Int(sum))
        });
        sched.run();
        assert_eq!(fulfilled_value(&p), Some(Value::Int(5)));
    }

    #[test]
    fn spread_rejects_on_non_list() {
        let (sched, rt) = setup();
        let p = rt.of(Value::Int(1)).spread(|_| Ok(Value::Undefined));
        sched.run();
        assert_eq!(
            rejection_reason(&p),
            Some(Value::Error(PromiseError::NotAList {
                type_name: "number".into()
            }))
        );
    }

    // ----- progress -----

    #[test]
    fn progress_transformer_rewrites_updates_downstream() {
        let (sched, rt) = setup();
        let d = rt.defer();
        let doubled = d
            .promise()
            .progress(|u| match u {
                Value::Int(n) => Ok(Value::Int(n * 2)),
                other => Ok(other),
            });
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = seen.clone();
            doubled.progress(move |u| {
                seen.borrow_mut().push(u.clone());
                Ok(u)
            });
        }
        d.notify(Value::Int(3));
        sched.run();
        assert_eq!(*seen.borrow(), vec![Value::Int(6)]);
    }

    #[test]
    fn progress_handler_error_becomes_the_update() {
        let (sched, rt) = setup();
        let d = rt.defer();
        let stage = d
            .promise()
            .progress(|_| Err(Value::Str("progress oops".into())));
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = seen.clone();
            stage.progress(move |u| {
                seen.borrow_mut().push(u.clone());
                Ok(u)
            });
        }
        d.notify(Value::Int(1));
        sched.run();
        assert_eq!(*seen.borrow(), vec![Value::Str("progress oops".into())]);
    }

    // ----- done -----

    #[test]
    fn done_raises_unhandled_rejection_twice() {
        let (sched, rt) = setup();
        rt.reject(Value::Str("fatal".into())).done(None, None);
        sched.run();
        assert_eq!(
            sched.fatal_reasons(),
            vec![Value::Str("fatal".into()), Value::Str("fatal".into())]
        );
    }

    #[test]
    fn done_with_error_handler_commits_quietly() {
        let (sched, rt) = setup();
        rt.reject(Value::Str("handled".into()))
            .done(None, Some(transform(|_| Ok(Value::Undefined))));
        sched.run();
        assert!(sched.fatal_reasons().is_empty());
    }

    #[test]
    fn done_raises_when_its_own_handler_throws() {
        let (sched, rt) = setup();
        rt.of(Value::Int(1)).done(
            Some(transform(|_| Err(Value::Str("late".into())))),
            None,
        );
        sched.run();
        assert_eq!(
            sched.fatal_reasons(),
            vec![Value::Str("late".into()), Value::Str("late".into())]
        );
    }

    // ----- identity -----

    #[test]
    fn is_same_tracks_slot_identity() {
        let (_sched, rt) = setup();
        let p = rt.of(Value::Int(1));
        let q = p.clone();
        assert!(p.is_same(&q));
        assert!(!p.is_same(&rt.of(Value::Int(1))));
    }
}
