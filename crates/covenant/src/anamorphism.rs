//! Value-generating recursion schemes: `unfold` and `iterate`.
//!
//! Both recurse exclusively through `then`, so every step crosses an
//! enqueue boundary and the call stack stays flat no matter how many
//! iterations run. The recursive step is never invoked synchronously.

use std::rc::Rc;

use crate::promise::Promise;
use crate::runtime::PromiseRuntime;
use crate::value::{PromiseError, TransformFn, Value};

impl PromiseRuntime {
    /// Anamorphic loop. While `stop(seed)` (possibly a promise) is falsy:
    /// `unspool(seed)` must yield an `[item, next_seed]` pair, `handler(item)`
    /// is awaited, and the loop continues with `next_seed`. A truthy stop
    /// fulfills with the seed. Errors propagate.
    pub fn unfold(
        &self,
        unspool: TransformFn,
        stop: TransformFn,
        handler: TransformFn,
        seed: Value,
    ) -> Promise {
        unfold_step(self.clone(), unspool, stop, handler, seed)
    }

    /// Like [`PromiseRuntime::unfold`], but the next seed is simply
    /// `f(x)` and the emitted item is that next value.
    pub fn iterate(
        &self,
        f: TransformFn,
        stop: TransformFn,
        handler: TransformFn,
        seed: Value,
    ) -> Promise {
        iterate_step(self.clone(), f, stop, handler, seed)
    }
}

fn split_pair(value: Value) -> Result<(Value, Value), Value> {
    match value {
        Value::List(items) => match <[Value; 2]>::try_from(items) {
            Ok([item, next_seed]) => Ok((item, next_seed)),
            Err(_) => Err(Value::Error(PromiseError::MalformedUnspool)),
        },
        _ => Err(Value::Error(PromiseError::MalformedUnspool)),
    }
}

fn unfold_step(
    rt: PromiseRuntime,
    unspool: TransformFn,
    stop: TransformFn,
    handler: TransformFn,
    seed: Value,
) -> Promise {
    let halt = match stop(seed.clone()) {
        Ok(v) => v,
        Err(e) => return rt.reject(e),
    };
    let rt_outer = rt.clone();
    let on_halt = move |halted: Value| -> Result<Value, Value> {
        if halted.is_truthy() {
            return Ok(seed.clone());
        }
        let pair = unspool(seed.clone())?;
        let rt_inner = rt_outer.clone();
        let unspool_next = unspool.clone();
        let stop_next = stop.clone();
        let handler_next = handler.clone();
        let on_pair = move |pair_value: Value| -> Result<Value, Value> {
            let (item, next_seed) = split_pair(pair_value)?;
            let awaited = handler_next(item)?;
            let rt_rec = rt_inner.clone();
            let unspool_rec = unspool_next.clone();
            let stop_rec = stop_next.clone();
            let handler_rec = handler_next.clone();
            let continue_from = move |_: Value| -> Result<Value, Value> {
                Ok(Value::Promise(unfold_step(
                    rt_rec.clone(),
                    unspool_rec.clone(),
                    stop_rec.clone(),
                    handler_rec.clone(),
                    next_seed.clone(),
                )))
            };
            Ok(Value::Promise(rt_inner.cast(awaited).then(
                Some(Rc::new(continue_from)),
                None,
                None,
            )))
        };
        Ok(Value::Promise(rt_outer.cast(pair).then(
            Some(Rc::new(on_pair)),
            None,
            None,
        )))
    };
    rt.cast(halt).then(Some(Rc::new(on_halt)), None, None)
}

fn iterate_step(
    rt: PromiseRuntime,
    f: TransformFn,
    stop: TransformFn,
    handler: TransformFn,
    x: Value,
) -> Promise {
    let halt = match stop(x.clone()) {
        Ok(v) => v,
        Err(e) => return rt.reject(e),
    };
    let rt_outer = rt.clone();
    let on_halt = move |halted: Value| -> Result<Value, Value> {
        if halted.is_truthy() {
            return Ok(x.clone());
        }
        let next = f(x.clone())?;
        let rt_inner = rt_outer.clone();
        let f_next = f.clone();
        let stop_next = stop.clone();
        let handler_next = handler.clone();
        let on_next = move |next_value: Value| -> Result<Value, Value> {
            let awaited = handler_next(next_value.clone())?;
            let rt_rec = rt_inner.clone();
            let f_rec = f_next.clone();
            let stop_rec = stop_next.clone();
            let handler_rec = handler_next.clone();
            let continue_from = move |_: Value| -> Result<Value, Value> {
                Ok(Value::Promise(iterate_step(
                    rt_rec.clone(),
                    f_rec.clone(),
                    stop_rec.clone(),
                    handler_rec.clone(),
                    next_value.clone(),
                )))
            };
            Ok(Value::Promise(rt_inner.cast(awaited).then(
                Some(Rc::new(continue_from)),
                None,
                None,
            )))
        };
        Ok(Value::Promise(rt_outer.cast(next).then(
            Some(Rc::new(on_next)),
            None,
            None,
        )))
    };
    rt.cast(halt).then(Some(Rc::new(on_halt)), None, None)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::environment::DeterministicScheduler;
    use crate::value::transform;

    fn setup() -> (Rc<DeterministicScheduler>, PromiseRuntime) {
        let sched = Rc::new(DeterministicScheduler::new());
        let runtime = PromiseRuntime::new(sched.clone());
        (sched, runtime)
    }

    fn int(n: i64) -> Value {
        Value::Int(n)
    }

    fn as_int(v: &Value) -> i64 {
        match v {
            Value::Int(n) => *n,
            other => panic!("expected an Int, got {other:?}"),
        }
    }

    fn noop() -> TransformFn {
        transform(|_| Ok(Value::Undefined))
    }

    // ----- iterate -----

    #[test]
    fn iterate_counts_up_to_the_stop_bound() {
        let (sched, rt) = setup();
        let p = rt.iterate(
            transform(|x| Ok(int(as_int(&x) + 1))),
            transform(|x| Ok(Value::Bool(as_int(&x) >= 3))),
            noop(),
            int(0),
        );
        sched.run();
        assert_eq!(p.inspect().value().cloned(), Some(int(3)));
    }

    #[test]
    fn iterate_emits_each_next_value() {
        let (sched, rt) = setup();
        let emitted = Rc::new(RefCell::new(Vec::new()));
        let handler = {
            let emitted = emitted.clone();
            transform(move |item| {
                emitted.borrow_mut().push(item.clone());
                Ok(Value::Undefined)
            })
        };
        rt.iterate(
            transform(|x| Ok(int(as_int(&x) + 1))),
            transform(|x| Ok(Value::Bool(as_int(&x) >= 3))),
            handler,
            int(0),
        );
        sched.run();
        assert_eq!(*emitted.borrow(), vec![int(1), int(2), int(3)]);
    }

    #[test]
    fn iterate_accepts_a_promise_producing_step() {
        let (sched, rt) = setup();
        let step = {
            let rt = rt.clone();
            transform(move |x| Ok(Value::Promise(rt.of(int(as_int(&x) + 1)))))
        };
        let p = rt.iterate(
            step,
            transform(|x| Ok(Value::Bool(as_int(&x) >= 2))),
            noop(),
            int(0),
        );
        sched.run();
        assert_eq!(p.inspect().value().cloned(), Some(int(2)));
    }

    #[test]
    fn iterate_stays_flat_over_many_steps() {
        let (sched, rt) = setup();
        let p = rt.iterate(
            transform(|x| Ok(int(as_int(&x) + 1))),
            transform(|x| Ok(Value::Bool(as_int(&x) >= 50))),
            noop(),
            int(0),
        );
        sched.run();
        assert_eq!(p.inspect().value().cloned(), Some(int(50)));
    }

    #[test]
    fn iterate_propagates_step_errors() {
        let (sched, rt) = setup();
        let p = rt.iterate(
            transform(|_| Err(Value::Str("step broke".into()))),
            transform(|_| Ok(Value::Bool(false))),
            noop(),
            int(0),
        );
        sched.run();
        assert_eq!(
            p.inspect().reason().cloned(),
            Some(Value::Str("step broke".into()))
        );
    }

    // ----- unfold -----

    #[test]
    fn unfold_counts_down_emitting_items() {
        let (sched, rt) = setup();
        let emitted = Rc::new(RefCell::new(Vec::new()));
        let handler = {
            let emitted = emitted.clone();
            transform(move |item| {
                emitted.borrow_mut().push(item.clone());
                Ok(Value::Undefined)
            })
        };
        let p = rt.unfold(
            transform(|seed| {
                let n = as_int(&seed);
                Ok(Value::List(vec![int(n), int(n - 1)]))
            }),
            transform(|seed| Ok(Value::Bool(as_int(&seed) <= 0))),
            handler,
            int(3),
        );
        sched.run();
        assert_eq!(*emitted.borrow(), vec![int(3), int(2), int(1)]);
        assert_eq!(p.inspect().value().cloned(), Some(int(0)));
    }

    #[test]
    fn unfold_with_truthy_stop_never_unspools() {
        let (sched, rt) = setup();
        let p = rt.unfold(
            transform(|_| panic!("unspool must not run")),
            transform(|_| Ok(Value::Bool(true))),
            noop(),
            int(7),
        );
        sched.run();
        assert_eq!(p.inspect().value().cloned(), Some(int(7)));
    }

    #[test]
    fn unfold_accepts_a_promise_valued_stop() {
        let (sched, rt) = setup();
        let stop = {
            let rt = rt.clone();
            transform(move |seed| {
                Ok(Value::Promise(
                    rt.of(Value::Bool(as_int(&seed) <= 0)),
                ))
            })
        };
        let p = rt.unfold(
            transform(|seed| {
                let n = as_int(&seed);
                Ok(Value::List(vec![int(n), int(n - 1)]))
            }),
            stop,
            noop(),
            int(2),
        );
        sched.run();
        assert_eq!(p.inspect().value().cloned(), Some(int(0)));
    }

    #[test]
    fn unfold_rejects_on_a_malformed_pair() {
        let (sched, rt) = setup();
        let p = rt.unfold(
            transform(|_| Ok(int(1))),
            transform(|_| Ok(Value::Bool(false))),
            noop(),
            int(0),
        );
        sched.run();
        assert_eq!(
            p.inspect().reason().cloned(),
            Some(Value::Error(PromiseError::MalformedUnspool))
        );
    }

    #[test]
    fn unfold_propagates_handler_errors() {
        let (sched, rt) = setup();
        let p = rt.unfold(
            transform(|seed| Ok(Value::List(vec![seed.clone(), seed]))),
            transform(|_| Ok(Value::Bool(false))),
            transform(|_| Err(Value::Str("handler broke".into()))),
            int(0),
        );
        sched.run();
        assert_eq!(
            p.inspect().reason().cloned(),
            Some(Value::Str("handler broke".into()))
        );
    }

    #[test]
    fn unfold_propagates_stop_errors() {
        let (sched, rt) = setup();
        let p = rt.unfold(
            transform(|seed| Ok(Value::List(vec![seed.clone(), seed]))),
            transform(|_| Err(Value::Str("stop broke".into()))),
            noop(),
            int(0),
        );
        sched.run();
        assert_eq!(
            p.inspect().reason().cloned(),
            Some(Value::Str("stop broke".into()))
        );
    }
}
