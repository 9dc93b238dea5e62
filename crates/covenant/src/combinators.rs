//! Static array combinators over iterables of promise-or-value.
//!
//! Every input element is `cast` first. Aggregate state lives in small
//! tracker structs so the counting rules are testable in isolation:
//! - [`AllTracker`] — positional collection, fail-fast on rejection.
//! - [`AnyTracker`] — first fulfillment wins, reasons in rejection order.
//! - [`SomeTracker`] — first `n` fulfillments, rejects when success
//!   becomes impossible.
//! - [`SettleTracker`] — inspection snapshots in input order, never
//!   rejects.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::handler::Inspection;
use crate::promise::Promise;
use crate::runtime::PromiseRuntime;
use crate::value::{transform, Value};

// ---------------------------------------------------------------------------
// AllTracker
// ---------------------------------------------------------------------------

/// State for `all`: positional values, fail-fast short circuit.
#[derive(Debug, Clone)]
pub struct AllTracker {
    values: BTreeMap<u32, Value>,
    total: u32,
    fulfilled_count: u32,
    settled: bool,
}

impl AllTracker {
    pub fn new(total: u32) -> Self {
        Self {
            values: BTreeMap::new(),
            total,
            fulfilled_count: 0,
            settled: false,
        }
    }

    /// Record that the input at `index` fulfilled. Returns `true` when
    /// every input has now fulfilled.
    pub fn record_fulfillment(&mut self, index: u32, value: Value) -> bool {
        if self.settled {
            return false;
        }
        self.values.insert(index, value);
        self.fulfilled_count += 1;
        if self.fulfilled_count == self.total {
            self.settled = true;
            return true;
        }
        false
    }

    /// Short-circuit on the first rejection.
    pub fn mark_settled(&mut self) {
        self.settled = true;
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Values in input order.
    pub fn collect_values(&self) -> Vec<Value> {
        (0..self.total)
            .map(|i| self.values.get(&i).cloned().unwrap_or(Value::Undefined))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// AnyTracker
// ---------------------------------------------------------------------------

/// State for `any`: first fulfillment wins; reasons accumulate in
/// rejection order.
#[derive(Debug, Clone)]
pub struct AnyTracker {
    reasons: Vec<Value>,
    total: u32,
    settled: bool,
}

impl AnyTracker {
    pub fn new(total: u32) -> Self {
        Self {
            reasons: Vec::new(),
            total,
            settled: false,
        }
    }

    /// Returns `true` if this fulfillment decides the aggregate.
    pub fn record_fulfillment(&mut self) -> bool {
        if self.settled {
            return false;
        }
        self.settled = true;
        true
    }

    /// Returns `true` once every input has rejected.
    pub fn record_rejection(&mut self, reason: Value) -> bool {
        if self.settled {
            return false;
        }
        self.reasons.push(reason);
        if self.reasons.len() as u32 == self.total {
            self.settled = true;
            return true;
        }
        false
    }

    /// Reasons in rejection order.
    pub fn collect_reasons(&self) -> Vec<Value> {
        self.reasons.clone()
    }
}

// ---------------------------------------------------------------------------
// SomeTracker
// ---------------------------------------------------------------------------

/// State for `some`: collect the first `needed` fulfillments; reject as
/// soon as too many inputs have rejected for the quota to be met.
#[derive(Debug, Clone)]
pub struct SomeTracker {
    needed: u32,
    total: u32,
    values: Vec<Value>,
    reasons: Vec<Value>,
    settled: bool,
}

impl SomeTracker {
    /// `needed` is clamped to `total` up front.
    pub fn new(total: u32, needed: u32) -> Self {
        Self {
            needed: needed.min(total),
            total,
            values: Vec::new(),
            reasons: Vec::new(),
            settled: false,
        }
    }

    /// Returns `true` when the quota is met.
    pub fn record_fulfillment(&mut self, value: Value) -> bool {
        if self.settled {
            return false;
        }
        self.values.push(value);
        if self.values.len() as u32 == self.needed {
            self.settled = true;
            return true;
        }
        false
    }

    /// Returns `true` when success has become impossible.
    pub fn record_rejection(&mut self, reason: Value) -> bool {
        if self.settled {
            return false;
        }
        self.reasons.push(reason);
        if self.reasons.len() as u32 > self.total - self.needed {
            self.settled = true;
            return true;
        }
        false
    }

    /// Values in fulfillment order.
    pub fn collect_values(&self) -> Vec<Value> {
        self.values.clone()
    }

    /// Reasons in rejection order.
    pub fn collect_reasons(&self) -> Vec<Value> {
        self.reasons.clone()
    }
}

// ---------------------------------------------------------------------------
// SettleTracker
// ---------------------------------------------------------------------------

/// State for `settle`: inspection snapshots by input position.
#[derive(Debug, Clone)]
pub struct SettleTracker {
    outcomes: BTreeMap<u32, Inspection>,
    total: u32,
    settled_count: u32,
}

impl SettleTracker {
    pub fn new(total: u32) -> Self {
        Self {
            outcomes: BTreeMap::new(),
            total,
            settled_count: 0,
        }
    }

    /// Returns `true` once every input has settled.
    pub fn record(&mut self, index: u32, outcome: Inspection) -> bool {
        self.outcomes.insert(index, outcome);
        self.settled_count += 1;
        self.settled_count == self.total
    }

    /// Snapshots in input order.
    pub fn collect_snapshots(&self) -> Vec<Value> {
        (0..self.total)
            .map(|i| {
                Value::Snapshot(Box::new(
                    self.outcomes.get(&i).cloned().unwrap_or(Inspection::Pending),
                ))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Combinators
// ---------------------------------------------------------------------------

impl PromiseRuntime {
    /// Fulfill with every input's value in input order; the first
    /// rejection rejects the aggregate with that reason. Empty input
    /// fulfills with `[]`.
    pub fn all(&self, inputs: impl IntoIterator<Item = Value>) -> Promise {
        let items: Vec<Value> = inputs.into_iter().collect();
        if items.is_empty() {
            return self.of(Value::List(Vec::new()));
        }
        let deferred = self.defer();
        let tracker = Rc::new(RefCell::new(AllTracker::new(items.len() as u32)));
        for (index, item) in items.into_iter().enumerate() {
            let on_fulfilled = {
                let tracker = tracker.clone();
                let deferred = deferred.clone();
                transform(move |value| {
                    let complete = tracker
                        .borrow_mut()
                        .record_fulfillment(index as u32, value);
                    if complete {
                        deferred.resolve(Value::List(tracker.borrow().collect_values()));
                    }
                    Ok(Value::Undefined)
                })
            };
            let on_rejected = {
                let tracker = tracker.clone();
                let deferred = deferred.clone();
                transform(move |reason| {
                    tracker.borrow_mut().mark_settled();
                    deferred.reject(reason);
                    Ok(Value::Undefined)
                })
            };
            self.cast(item).then(Some(on_fulfilled), Some(on_rejected), None);
        }
        deferred.promise()
    }

    /// Fulfill with the first fulfillment value; if every input rejects,
    /// reject with the reasons in rejection order. Empty input fulfills
    /// with `undefined`.
    pub fn any(&self, inputs: impl IntoIterator<Item = Value>) -> Promise {
        let items: Vec<Value> = inputs.into_iter().collect();
        if items.is_empty() {
            return self.of(Value::Undefined);
        }
        let deferred = self.defer();
        let tracker = Rc::new(RefCell::new(AnyTracker::new(items.len() as u32)));
        for item in items {
            let on_fulfilled = {
                let tracker = tracker.clone();
                let deferred = deferred.clone();
                transform(move |value| {
                    if tracker.borrow_mut().record_fulfillment() {
                        deferred.resolve(value);
                    }
                    Ok(Value::Undefined)
                })
            };
            let on_rejected = {
                let tracker = tracker.clone();
                let deferred = deferred.clone();
                transform(move |reason| {
                    if tracker.borrow_mut().record_rejection(reason) {
                        deferred.reject(Value::List(tracker.borrow().collect_reasons()));
                    }
                    Ok(Value::Undefined)
                })
            };
            self.cast(item).then(Some(on_fulfilled), Some(on_rejected), None);
        }
        deferred.promise()
    }

    /// Fulfill with the first `n` fulfillment values in fulfillment
    /// order; reject with the collected reasons once fewer than `n`
    /// inputs can still succeed. `n` is clamped to the input count.
    pub fn some(&self, inputs: impl IntoIterator<Item = Value>, n: usize) -> Promise {
        let items: Vec<Value> = inputs.into_iter().collect();
        let needed = n.min(items.len());
        if needed == 0 {
            return self.of(Value::List(Vec::new()));
        }
        let deferred = self.defer();
        let tracker = Rc::new(RefCell::new(SomeTracker::new(
            items.len() as u32,
            needed as u32,
        )));
        for item in items {
            let on_fulfilled = {
                let tracker = tracker.clone();
                let deferred = deferred.clone();
                transform(move |value| {
                    if tracker.borrow_mut().record_fulfillment(value) {
                        deferred.resolve(Value::List(tracker.borrow().collect_values()));
                    }
                    Ok(Value::Undefined)
                })
            };
            let on_rejected = {
                let tracker = tracker.clone();
                let deferred = deferred.clone();
                transform(move |reason| {
                    if tracker.borrow_mut().record_rejection(reason) {
                        deferred.reject(Value::List(tracker.borrow().collect_reasons()));
                    }
                    Ok(Value::Undefined)
                })
            };
            self.cast(item).then(Some(on_fulfilled), Some(on_rejected), None);
        }
        deferred.promise()
    }

    /// Adopt the first settlement, either way. Empty input yields a
    /// forever-pending promise.
    pub fn race(&self, inputs: impl IntoIterator<Item = Value>) -> Promise {
        let items: Vec<Value> = inputs.into_iter().collect();
        if items.is_empty() {
            return self.empty();
        }
        let deferred = self.defer();
        for item in items {
            let on_fulfilled = {
                let deferred = deferred.clone();
                transform(move |value| {
                    deferred.resolve(value);
                    Ok(Value::Undefined)
                })
            };
            let on_rejected = {
                let deferred = deferred.clone();
                transform(move |reason| {
                    deferred.reject(reason);
                    Ok(Value::Undefined)
                })
            };
            self.cast(item).then(Some(on_fulfilled), Some(on_rejected), None);
        }
        deferred.promise()
    }

    /// Fulfill with every input's inspection snapshot in input order.
    /// Never rejects. Empty input fulfills with `[]`.
    pub fn settle(&self, inputs: impl IntoIterator<Item = Value>) -> Promise {
        let items: Vec<Value> = inputs.into_iter().collect();
        if items.is_empty() {
            return self.of(Value::List(Vec::new()));
        }
        let deferred = self.defer();
        let tracker = Rc::new(RefCell::new(SettleTracker::new(items.len() as u32)));
        for (index, item) in items.into_iter().enumerate() {
            let on_fulfilled = {
                let tracker = tracker.clone();
                let deferred = deferred.clone();
                transform(move |value| {
                    let complete = tracker
                        .borrow_mut()
                        .record(index as u32, Inspection::Fulfilled(value));
                    if complete {
                        deferred.resolve(Value::List(tracker.borrow().collect_snapshots()));
                    }
                    Ok(Value::Undefined)
                })
            };
            let on_rejected = {
                let tracker = tracker.clone();
                let deferred = deferred.clone();
                transform(move |reason| {
                    let complete = tracker
                        .borrow_mut()
                        .record(index as u32, Inspection::Rejected(reason));
                    if complete {
                        deferred.resolve(Value::List(tracker.borrow().collect_snapshots()));
                    }
                    Ok(Value::Undefined)
                })
            };
            self.cast(item).then(Some(on_fulfilled), Some(on_rejected), None);
        }
        deferred.promise()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
