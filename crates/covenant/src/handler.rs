//! The handler state machine underlying every promise.
//!
//! A promise is a single mutable slot holding one [`Handler`]. Six tagged
//! variants cover the full lifecycle:
//! - `Pending` — queue of deferred consumers, transitions exactly once.
//! - `Fulfilled` / `Rejected` — terminal; the slot never changes again.
//! - `Following` — delegates to a target promise; chains are collapsed
//!   (and path-compressed) by [`traverse`].
//! - `Progress` — transient carrier for progress fan-out; never stored
//!   in a slot.
//! - `Empty` — observably pending forever; consumers are dropped.
//!
//! Delivery discipline: a consumer is never run on its registration turn.
//! Terminal delivery is always scheduled through the host `enqueue`;
//! progress fan-out likewise crosses one enqueue boundary per hop.

use std::fmt;
use std::rc::Rc;

use crate::environment::Environment;
use crate::promise::Promise;
use crate::value::{PromiseError, SettleFn, TransformFn, Value};

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

/// A state snapshot of a promise, as returned by `inspect`.
///
/// The state strings are part of the external contract: exactly
/// `"pending"`, `"fulfilled"`, `"rejected"`.
#[derive(Debug, Clone, PartialEq)]
pub enum Inspection {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

impl Inspection {
    pub fn state(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fulfilled(_) => "fulfilled",
            Self::Rejected(_) => "rejected",
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// The fulfillment value, if fulfilled.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Fulfilled(v) => Some(v),
            _ => None,
        }
    }

    /// The rejection reason, if rejected.
    pub fn reason(&self) -> Option<&Value> {
        match self {
            Self::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

impl fmt::Display for Inspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("{state:'pending'}"),
            Self::Fulfilled(v) => write!(f, "{{state:'fulfilled', value:{v}}}"),
            Self::Rejected(r) => write!(f, "{{state:'rejected', reason:{r}}}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Handler variants
// ---------------------------------------------------------------------------

pub(crate) enum Handler {
    Pending(PendingState),
    Fulfilled(Value),
    Rejected(Value),
    Following(Promise),
    Progress(Value),
    Empty,
}

#[derive(Default)]
pub(crate) struct PendingState {
    consumers: Vec<Consumer>,
}

/// A deferred registration record: the derived promise's settlement sinks
/// plus the optional transformers from `then`.
///
/// Cloneable because progress fan-out re-delivers to consumers that stay
/// queued for their terminal delivery.
#[derive(Clone)]
pub(crate) struct Consumer {
    pub(crate) resolve: SettleFn,
    pub(crate) reject: SettleFn,
    pub(crate) notify: SettleFn,
    pub(crate) on_fulfilled: Option<TransformFn>,
    pub(crate) on_rejected: Option<TransformFn>,
    pub(crate) on_progress: Option<TransformFn>,
}

impl Consumer {
    /// Dispatch against a settled or progress handler state.
    ///
    /// Absent transformers pass the value to `resolve` and the reason to
    /// `reject` unchanged. A transformer returning `Err` routes to
    /// `reject`; a progress transformer's `Err` is fed back into `notify`
    /// as the new update.
    fn deliver(&self, handler: &Handler) {
        match handler {
            Handler::Fulfilled(value) => match &self.on_fulfilled {
                Some(f) => match f(value.clone()) {
                    Ok(produced) => (self.resolve)(produced),
                    Err(thrown) => (self.reject)(thrown),
                },
                None => (self.resolve)(value.clone()),
            },
            Handler::Rejected(reason) => match &self.on_rejected {
                Some(f) => match f(reason.clone()) {
                    Ok(produced) => (self.resolve)(produced),
                    Err(thrown) => (self.reject)(thrown),
                },
                None => (self.reject)(reason.clone()),
            },
            Handler::Progress(update) => {
                let propagated = match &self.on_progress {
                    Some(f) => match f(update.clone()) {
                        Ok(produced) => produced,
                        Err(thrown) => thrown,
                    },
                    None => update.clone(),
                };
                (self.notify)(propagated);
            }
            Handler::Pending(_) | Handler::Following(_) | Handler::Empty => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Traverse — Following-chain collapse with path compression
// ---------------------------------------------------------------------------

/// Walk the Following chain from `promise` to the first non-Following
/// handler, repointing intermediate links at the root on the way back.
pub(crate) fn traverse(promise: &Promise) -> Promise {
    let mut root = promise.clone();
    loop {
        let next = match &*root.cell.slot.borrow() {
            Handler::Following(target) => target.clone(),
            _ => break,
        };
        root = next;
    }
    let mut cursor = promise.clone();
    while !Rc::ptr_eq(&cursor.cell, &root.cell) {
        let next = {
            let mut slot = cursor.cell.slot.borrow_mut();
            match &mut *slot {
                Handler::Following(target) => {
                    let next = target.clone();
                    *target = root.clone();
                    next
                }
                _ => break,
            }
        };
        cursor = next;
    }
    root
}

// ---------------------------------------------------------------------------
// Registration (the `when` capability)
// ---------------------------------------------------------------------------

fn schedule_delivery(env: &Rc<dyn Environment>, consumer: Consumer, handler: Handler) {
    env.enqueue(Box::new(move || consumer.deliver(&handler)));
}

/// Register a consumer on a promise: queue on Pending, schedule a
/// turn-crossing delivery on terminal handlers, drop on Empty.
pub(crate) fn register(promise: &Promise, consumer: Consumer) {
    let root = traverse(promise);
    let settled = {
        let mut slot = root.cell.slot.borrow_mut();
        match &mut *slot {
            Handler::Pending(state) => {
                state.consumers.push(consumer);
                return;
            }
            Handler::Fulfilled(value) => Handler::Fulfilled(value.clone()),
            Handler::Rejected(reason) => Handler::Rejected(reason.clone()),
            // traverse never leaves a Following root; Progress never
            // occupies a slot. Empty drops the consumer.
            Handler::Following(_) | Handler::Progress(_) | Handler::Empty => return,
        }
    };
    schedule_delivery(&root.cell.env, consumer, settled);
}

// ---------------------------------------------------------------------------
// Settlement (the `join` transition)
// ---------------------------------------------------------------------------

/// Overwrite a Pending slot with `handler` and re-dispatch the drained
/// consumers against the new state. No-op on anything but Pending, which
/// makes repeat settlements harmless.
pub(crate) fn settle(promise: &Promise, handler: Handler) {
    let drained = {
        let mut slot = promise.cell.slot.borrow_mut();
        match &mut *slot {
            Handler::Pending(state) => {
                let consumers = std::mem::take(&mut state.consumers);
                *slot = handler;
                Some(consumers)
            }
            _ => None,
        }
    };
    if let Some(consumers) = drained {
        for consumer in consumers {
            register(promise, consumer);
        }
    }
}

// ---------------------------------------------------------------------------
// Progress fan-out (the `notify` capability)
// ---------------------------------------------------------------------------

/// Fan a progress update out to the consumers queued right now. The
/// snapshot is delivered through one enqueue hop; updates emitted after
/// settlement find a non-Pending slot and are dropped.
pub(crate) fn notify_progress(promise: &Promise, update: Value) {
    let snapshot = {
        let slot = promise.cell.slot.borrow();
        match &*slot {
            Handler::Pending(state) => state.consumers.clone(),
            _ => return,
        }
    };
    if snapshot.is_empty() {
        return;
    }
    promise.cell.env.enqueue(Box::new(move || {
        for consumer in &snapshot {
            consumer.deliver(&Handler::Progress(update.clone()));
        }
    }));
}

// ---------------------------------------------------------------------------
// Resolution & assimilation
// ---------------------------------------------------------------------------

/// Resolve `promise` with an arbitrary value: self-resolution rejects
/// with a type error, everything else is classified by [`get_handler`].
pub(crate) fn resolve_value(promise: &Promise, x: Value) {
    if let Value::Promise(other) = &x {
        if Rc::ptr_eq(&promise.cell, &other.cell) {
            settle(
                promise,
                Handler::Rejected(Value::Error(PromiseError::SelfResolution)),
            );
            return;
        }
    }
    let handler = get_handler(&promise.cell.env, x);
    settle(promise, handler);
}

/// Classify an arbitrary value into the handler that represents it:
/// trusted promises are followed, thenables are probed and adopted
/// asynchronously, everything else fulfills.
pub(crate) fn get_handler(env: &Rc<dyn Environment>, x: Value) -> Handler {
    match x {
        Value::Promise(target) => Handler::Following(target),
        Value::Thenable(thenable) => match thenable.lookup_then() {
            Err(caught) => Handler::Rejected(caught),
            Ok(false) => Handler::Fulfilled(Value::Thenable(thenable)),
            Ok(true) => Handler::Following(adopt_thenable(env, thenable)),
        },
        plain => Handler::Fulfilled(plain),
    }
}

/// Adopt a foreign thenable through a fresh promise. The call to its
/// `then` is deferred via `enqueue`, so misbehavior (synchronous sinks,
/// double settlement, thrown `then`) cannot reach the adopter's
/// consumers on the current turn, and repeat settlements hit an
/// already-joined slot.
fn adopt_thenable(env: &Rc<dyn Environment>, thenable: Rc<dyn crate::value::Thenable>) -> Promise {
    let adopting = Promise::pending(env.clone());
    let target = adopting.clone();
    env.enqueue(Box::new(move || {
        let resolve: SettleFn = {
            let p = target.clone();
            Rc::new(move |v| resolve_value(&p, v))
        };
        let reject: SettleFn = {
            let p = target.clone();
            Rc::new(move |r| settle(&p, Handler::Rejected(r)))
        };
        let notify: SettleFn = {
            let p = target.clone();
            Rc::new(move |u| notify_progress(&p, u))
        };
        if let Err(caught) = thenable.call_then(resolve, reject, notify) {
            settle(&target, Handler::Rejected(caught));
        }
    }));
    adopting
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

/// Snapshot the observable state, collapsing Following chains first.
pub(crate) fn inspect(promise: &Promise) -> Inspection {
    let root = traverse(promise);
    let slot = root.cell.slot.borrow();
    match &*slot {
        Handler::Fulfilled(value) => Inspection::Fulfilled(value.clone()),
        Handler::Rejected(reason) => Inspection::Rejected(reason.clone()),
        _ => Inspection::Pending,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
