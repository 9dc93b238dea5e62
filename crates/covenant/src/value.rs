//! Dynamic value model carried by promises.
//!
//! Promises in this runtime transport a single tagged value type:
//! - **Data**: `Undefined`, `Null`, `Bool`, `Int`, `Str`, `List`.
//! - **Reasons**: `Error` wraps the built-in [`PromiseError`] reasons
//!   (timeouts, type errors); arbitrary values are equally valid reasons.
//! - **Opaque**: `Function` (for `ap`/`spread`), `Promise` (the nominal
//!   trust marker used by the resolution algorithm), `Thenable` (foreign,
//!   untrusted), and `Snapshot` (inspection results, so `settle` can
//!   fulfill with an array of them).
//!
//! User callbacks signal a thrown exception by returning `Err(Value)`;
//! the runtime never catches panics.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handler::Inspection;
use crate::promise::Promise;

/// A settlement sink (`resolve`, `reject`, or `notify` capability).
pub type SettleFn = Rc<dyn Fn(Value)>;

/// A user transformer registered via `then`: `Ok` is the produced value,
/// `Err` is a thrown exception.
pub type TransformFn = Rc<dyn Fn(Value) -> Result<Value, Value>>;

/// A two-argument folding function for `reduce`/`fold`.
pub type FoldFn = Rc<dyn Fn(Value, Value) -> Result<Value, Value>>;

/// A callable value, invoked with positional arguments.
pub type NativeFn = Rc<dyn Fn(Vec<Value>) -> Result<Value, Value>>;

/// Wrap a closure as a [`TransformFn`].
pub fn transform(f: impl Fn(Value) -> Result<Value, Value> + 'static) -> TransformFn {
    Rc::new(f)
}

// ---------------------------------------------------------------------------
// Thenable — foreign, untrusted
// ---------------------------------------------------------------------------

/// A foreign object exposing a `then` capability.
///
/// `lookup_then` mirrors the guarded property read of the resolution
/// algorithm: `Err` corresponds to a throwing accessor, `Ok(false)` to a
/// non-callable `then` (the value is then treated as plain data).
///
/// `call_then` is the untrusted call. Implementations may misbehave
/// arbitrarily: invoke both sinks, invoke them synchronously, invoke them
/// repeatedly, or return `Err` (a thrown `then`). The adopting promise
/// neutralizes all of these.
pub trait Thenable {
    /// Guarded read of the `then` capability.
    fn lookup_then(&self) -> Result<bool, Value> {
        Ok(true)
    }

    /// Invoke `then` with settlement sinks for the adopting promise.
    fn call_then(
        &self,
        resolve: SettleFn,
        reject: SettleFn,
        notify: SettleFn,
    ) -> Result<(), Value>;
}

// ---------------------------------------------------------------------------
// PromiseError — built-in rejection reasons
// ---------------------------------------------------------------------------

/// Built-in rejection reasons produced by the runtime itself.
///
/// Reasons are carried verbatim; these are merely the errors the runtime
/// manufactures on its own (user code rejects with arbitrary values).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PromiseError {
    /// A promise was resolved with itself.
    #[error("TypeError: promise cannot be resolved with itself")]
    SelfResolution,
    /// A `timeout` race elapsed before the upstream settled.
    #[error("operation timed out after {ms}ms")]
    Timeout {
        /// The millisecond bound that elapsed.
        ms: u64,
    },
    /// A `filter` predicate returned a falsy verdict.
    #[error("TypeError: value did not satisfy the filter predicate")]
    PredicateMismatch,
    /// `unfold` received something other than an `[item, next_seed]` pair.
    #[error("TypeError: unspool must produce an [item, next_seed] pair")]
    MalformedUnspool,
    /// `ap` was applied to a fulfillment that is not callable.
    #[error("TypeError: {type_name} is not callable")]
    NotCallable {
        /// Type tag of the offending value.
        type_name: String,
    },
    /// `spread` was applied to a fulfillment that is not a list.
    #[error("TypeError: {type_name} is not a list")]
    NotAList {
        /// Type tag of the offending value.
        type_name: String,
    },
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// The value algebra transported by promises.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Error(PromiseError),
    Snapshot(Box<Inspection>),
    Function(NativeFn),
    Promise(Promise),
    Thenable(Rc<dyn Thenable>),
}

impl Value {
    /// JS-like truthiness, used by stop predicates and `filter`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "number",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Error(_) => "error",
            Self::Snapshot(_) => "snapshot",
            Self::Function(_) => "function",
            Self::Promise(_) => "promise",
            Self::Thenable(_) => "thenable",
        }
    }

    /// A list yields its elements; anything else becomes a singleton.
    pub fn into_list(self) -> Vec<Value> {
        match self {
            Self::List(items) => items,
            other => vec![other],
        }
    }
}

fn thin_ptr<T: ?Sized>(rc: &Rc<T>) -> *const () {
    Rc::as_ptr(rc) as *const ()
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => a == b,
            (Self::Snapshot(a), Self::Snapshot(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => thin_ptr(a) == thin_ptr(b),
            (Self::Promise(a), Self::Promise(b)) => a.is_same(b),
            (Self::Thenable(a), Self::Thenable(b)) => thin_ptr(a) == thin_ptr(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(n) => write!(f, "Int({n})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
            Self::Error(e) => f.debug_tuple("Error").field(e).finish(),
            Self::Snapshot(i) => f.debug_tuple("Snapshot").field(i).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
            Self::Promise(_) => f.write_str("Promise(..)"),
            Self::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Error(e) => write!(f, "{e}"),
            Self::Snapshot(i) => write!(f, "{i}"),
            Self::Function(_) => f.write_str("[function]"),
            Self::Promise(_) => f.write_str("[object Promise]"),
            Self::Thenable(_) => f.write_str("[object Thenable]"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
