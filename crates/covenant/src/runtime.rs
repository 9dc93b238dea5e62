//! The runtime factory: promise construction bound to one host environment.
//!
//! [`PromiseRuntime`] is the entry point an embedder builds from its
//! [`Environment`]; every promise it creates carries that environment and
//! schedules all delivery through it.

use std::rc::Rc;

use crate::environment::Environment;
use crate::handler::{self, Handler};
use crate::promise::{Deferred, Promise};
use crate::value::Value;

/// Cast without a runtime in hand: trusted promises pass through
/// untouched, anything else becomes a fresh following promise.
pub(crate) fn cast_value(env: &Rc<dyn Environment>, x: Value) -> Promise {
    match x {
        Value::Promise(p) => p,
        other => Promise::with_handler(env.clone(), handler::get_handler(env, other)),
    }
}

/// Factory for promises bound to one host environment.
#[derive(Clone)]
pub struct PromiseRuntime {
    env: Rc<dyn Environment>,
}

impl PromiseRuntime {
    pub fn new(env: Rc<dyn Environment>) -> Self {
        Self { env }
    }

    pub fn environment(&self) -> Rc<dyn Environment> {
        self.env.clone()
    }

    /// A pending promise plus its settlement capabilities.
    pub fn defer(&self) -> Deferred {
        Deferred::new(Promise::pending(self.env.clone()))
    }

    /// Constructor protocol: `resolver` runs synchronously with the
    /// deferred capabilities; an `Err` rejects the new promise.
    pub fn promise<F>(&self, resolver: F) -> Promise
    where
        F: FnOnce(&Deferred) -> Result<(), Value>,
    {
        let deferred = self.defer();
        if let Err(caught) = resolver(&deferred) {
            deferred.reject(caught);
        }
        deferred.promise()
    }

    /// A promise already fulfilled with `value`. No assimilation: a
    /// promise or thenable value stays a value.
    pub fn of(&self, value: Value) -> Promise {
        Promise::with_handler(self.env.clone(), Handler::Fulfilled(value))
    }

    /// A promise already rejected with `reason`, carried verbatim.
    pub fn reject(&self, reason: Value) -> Promise {
        Promise::with_handler(self.env.clone(), Handler::Rejected(reason))
    }

    /// A fresh trusted promise following `x`: promises are followed,
    /// thenables adopted, plain values fulfill.
    pub fn resolve(&self, x: Value) -> Promise {
        Promise::with_handler(self.env.clone(), handler::get_handler(&self.env, x))
    }

    /// Identity on trusted promises; otherwise [`PromiseRuntime::resolve`].
    pub fn cast(&self, x: Value) -> Promise {
        cast_value(&self.env, x)
    }

    /// A promise that is observably pending forever.
    pub fn empty(&self) -> Promise {
        Promise::with_handler(self.env.clone(), Handler::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::DeterministicScheduler;
    use crate::handler::Inspection;

    fn setup() -> (Rc<DeterministicScheduler>, PromiseRuntime) {
        let sched = Rc::new(DeterministicScheduler::new());
        let runtime = PromiseRuntime::new(sched.clone());
        (sched, runtime)
    }

    // ----- of / reject -----

    #[test]
    fn of_fulfills_without_assimilation() {
        let (_sched, rt) = setup();
        let inner = rt.of(Value::Int(1));
        let outer = rt.of(Value::Promise(inner.clone()));
        // the fulfillment value is the promise itself, not its outcome
        assert_eq!(
            outer.inspect(),
            Inspection::Fulfilled(Value::Promise(inner))
        );
    }

    #[test]
    fn reject_carries_the_reason_verbatim() {
        let (_sched, rt) = setup();
        let p = rt.reject(Value::List(vec![Value::Int(1)]));
        assert_eq!(
            p.inspect(),
            Inspection::Rejected(Value::List(vec![Value::Int(1)]))
        );
    }

    // ----- resolve / cast -----

    #[test]
    fn resolve_follows_a_promise() {
        let (sched, rt) = setup();
        let d = rt.defer();
        let p = rt.resolve(Value::Promise(d.promise()));
        assert!(!p.is_same(&d.promise()));
        d.resolve(Value::Int(2));
        sched.run();
        assert_eq!(p.inspect(), Inspection::Fulfilled(Value::Int(2)));
    }

    #[test]
    fn cast_is_identity_on_trusted_promises() {
        let (_sched, rt) = setup();
        let p = rt.of(Value::Int(1));
        assert!(rt.cast(Value::Promise(p.clone())).is_same(&p));
    }

    #[test]
    fn cast_lifts_plain_values() {
        let (_sched, rt) = setup();
        let p = rt.cast(Value::Int(3));
        assert_eq!(p.inspect(), Inspection::Fulfilled(Value::Int(3)));
    }

    // ----- empty -----

    #[test]
    fn empty_is_forever_pending() {
        let (sched, rt) = setup();
        let p = rt.empty();
        sched.run();
        assert_eq!(p.inspect(), Inspection::Pending);
    }

    // ----- constructor protocol -----

    #[test]
    fn promise_resolver_settles_through_capabilities() {
        let (sched, rt) = setup();
        let p = rt.promise(|d| {
            d.resolve(Value::Int(4));
            Ok(())
        });
        sched.run();
        assert_eq!(p.inspect(), Inspection::Fulfilled(Value::Int(4)));
    }
}
