//! Green-thread scheduler for `parallel`/`concurrent` (§4.6).
//!
//! Grounded on `seq-runtime::scheduler`'s atomic strand counters and
//! `may::coroutine`-based spawn, with one load-bearing deviation: Limit's
//! `Value` is `Rc`-based (single-threaded refcounting, per `limit-core`'s
//! value model), not `Arc`-based like the teacher's. Rather than recounting
//! the whole value model, May's worker pool is pinned to a single OS thread
//! (`may::config().set_workers(1)`), so a `Value` never actually crosses a
//! thread boundary; `SendProof` documents and relies on that invariant to
//! satisfy `may::coroutine::spawn`'s `Send` bound, the same way the
//! teacher's own `strand_spawn` converts a `!Send` raw pointer to a `usize`
//! under a caller-guarantees-thread-safety comment. `parallel` therefore
//! gives concurrent (cooperatively interleaved), not multi-core, execution;
//! `cores:` caps how many task coroutines run in flight rather than how
//! many OS threads are used.

use crate::error::RuntimeError;
use crate::vm::Vm;
use limit_compiler::bytecode::Chunk;
use limit_core::source::SourceLocation;
use limit_core::value::{ErrorValue, TaskHandle, Value};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Once;

pub static ACTIVE_TASKS: AtomicUsize = AtomicUsize::new(0);
pub static TOTAL_SPAWNED: AtomicU64 = AtomicU64::new(0);
pub static TOTAL_COMPLETED: AtomicU64 = AtomicU64::new(0);
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);
static SCHEDULER_INIT: Once = Once::new();

/// Idempotent; pins May to a single worker thread and installs the
/// diagnostics signal handler. Called automatically by `spawn_task`.
pub fn init() {
    SCHEDULER_INIT.call_once(|| {
        may::config().set_workers(1);
        crate::diagnostics::install_signal_handler();
    });
}

/// A witness that `T` is only ever touched from the single May worker
/// thread `init` pins the scheduler to. See module docs: this is the only
/// place that invariant is relied on.
struct SendProof<T>(T);
unsafe impl<T> Send for SendProof<T> {}

/// Spawns `function_index` (a zero-argument task thunk, see
/// `limit-compiler::compiler::compile_task_thunk`) as a joinable task.
pub fn spawn_task(chunk: Rc<Chunk>, function_index: usize) -> TaskHandle {
    init();
    let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = may::sync::mpmc::channel();
    let proof = SendProof((chunk, tx));
    ACTIVE_TASKS.fetch_add(1, Ordering::Relaxed);
    TOTAL_SPAWNED.fetch_add(1, Ordering::Relaxed);
    may::coroutine::spawn(move || {
        let SendProof((chunk, tx)) = proof;
        let mut vm = Vm::new(chunk);
        let outcome = vm.call_function(function_index, Vec::new());
        let result = to_task_result(outcome);
        let _ = tx.send(result);
        ACTIVE_TASKS.fetch_sub(1, Ordering::Relaxed);
        TOTAL_COMPLETED.fetch_add(1, Ordering::Relaxed);
    });
    TaskHandle { id, result_rx: rx }
}

/// Runs `function_index`'s body inline, on the calling coroutine, as
/// `concurrent` blocks do -- they cooperate with other strands via
/// channel operations but never run on a separate task handle.
pub fn run_concurrent(chunk: Rc<Chunk>, function_index: usize) -> Result<Value, ErrorValue> {
    init();
    let mut vm = Vm::new(chunk);
    to_task_result(vm.call_function(function_index, Vec::new()))
}

pub fn join(handle: &TaskHandle) -> Result<Value, ErrorValue> {
    handle.result_rx.recv().unwrap_or_else(|_| {
        Err(ErrorValue::new(
            "Cancelled",
            "task result channel closed before completion",
            SourceLocation::synthetic(),
        ))
    })
}

fn to_task_result(outcome: Result<Value, RuntimeError>) -> Result<Value, ErrorValue> {
    match outcome {
        Ok(value) => Ok(value),
        Err(RuntimeError::Unhandled(e)) => Err(e),
        Err(other) => Err(ErrorValue::new("RuntimeError", other.to_string(), SourceLocation::synthetic())),
    }
}
