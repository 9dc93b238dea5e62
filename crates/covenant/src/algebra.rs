//! Monadic and applicative operations over promises.
//!
//! All of these are thin derivations over `then` and the static
//! combinators; none touch the handler machinery directly.

use std::rc::Rc;

use crate::promise::Promise;
use crate::runtime::PromiseRuntime;
use crate::value::{FoldFn, PromiseError, Value};

impl Promise {
    /// Transform the fulfillment value. Rejections pass through.
    pub fn map(&self, f: impl Fn(Value) -> Result<Value, Value> + 'static) -> Promise {
        self.then(Some(Rc::new(f)), None, None)
    }

    /// Transform the fulfillment value into another promise and adopt
    /// its outcome.
    pub fn flat_map(&self, f: impl Fn(Value) -> Result<Promise, Value> + 'static) -> Promise {
        self.then(
            Some(Rc::new(move |v| f(v).map(Value::Promise))),
            None,
            None,
        )
    }

    /// Apply a promised function to a promised argument.
    pub fn ap(&self, argument: &Promise) -> Promise {
        let argument = argument.clone();
        self.flat_map(move |f| match f {
            Value::Function(native) => Ok(argument.map(move |v| native(vec![v]))),
            other => Err(Value::Error(PromiseError::NotCallable {
                type_name: other.type_name().to_string(),
            })),
        })
    }

    /// First fulfillment of `self` and `other`.
    pub fn concat(&self, other: &Promise) -> Promise {
        let runtime = PromiseRuntime::new(self.environment());
        runtime.any([Value::Promise(self.clone()), Value::Promise(other.clone())])
    }

    /// Keep the fulfillment value only if the predicate's verdict is
    /// truthy; otherwise reject.
    pub fn filter(&self, predicate: impl Fn(Value) -> Result<Value, Value> + 'static) -> Promise {
        self.map(move |v| {
            let verdict = predicate(v.clone())?;
            if verdict.is_truthy() {
                Ok(v)
            } else {
                Err(Value::Error(PromiseError::PredicateMismatch))
            }
        })
    }

    /// Fold over the singleton this promise represents. Without an
    /// initial value the singleton collapses: the result simply follows
    /// `self` and `f` is never invoked. With an initial value this is
    /// `map(|x| f(initial, x))`.
    pub fn reduce(&self, f: FoldFn, initial: Option<Value>) -> Promise {
        match initial {
            None => PromiseRuntime::new(self.environment()).resolve(Value::Promise(self.clone())),
            Some(init) => self.map(move |x| f(init.clone(), x)),
        }
    }

    /// Right fold of a singleton; identical to [`Promise::reduce`].
    pub fn reduce_right(&self, f: FoldFn, initial: Option<Value>) -> Promise {
        self.reduce(f, initial)
    }

    /// `fold(f, arg)` applies `f(arg, x)` to the fulfillment value.
    pub fn fold(&self, f: FoldFn, argument: Value) -> Promise {
        self.map(move |x| f(argument.clone(), x))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
