#![forbid(unsafe_code)]

//! Deterministic, monadic promise runtime with a pluggable host scheduler.
//!
//! Key design properties:
//! - **Handler state machine**: six tagged variants (pending, fulfilled,
//!   rejected, following, progress, empty); a promise's fate is sealed
//!   exactly once.
//! - **Turn discipline**: callbacks never run on their registration turn;
//!   all delivery crosses the host's `enqueue`.
//! - **Safe assimilation**: foreign thenables are adopted asynchronously
//!   and misbehavior (double settlement, synchronous sinks, thrown `then`)
//!   is neutralized.
//! - **Closed algebra**: every combinator — `all`/`any`/`some`/`race`/
//!   `settle`, `unfold`/`iterate`, the monadic operations, `delay`/`timeout`
//!   — is derived from `then` and the settlement sinks.
//! - **Determinism**: the reference scheduler drives a virtual clock and
//!   records a witness log; identical runs produce identical logs.

pub mod algebra;
pub mod anamorphism;
pub mod combinators;
pub mod environment;
mod handler;
pub mod promise;
pub mod runtime;
pub mod timing;
pub mod value;

pub use combinators::{AllTracker, AnyTracker, SettleTracker, SomeTracker};
pub use environment::{
    DeterministicScheduler, Environment, Task, TimerHandle, VirtualClock, WitnessEvent,
};
pub use handler::Inspection;
pub use promise::{Deferred, Promise};
pub use runtime::PromiseRuntime;
pub use value::{
    transform, FoldFn, NativeFn, PromiseError, SettleFn, Thenable, TransformFn, Value,
};
