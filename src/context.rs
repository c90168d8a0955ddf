//! A switch that turns schema validation off for reads, scoped to the current
//! thread or task.
//!
//! ```
//! use jsl_field::context::{is_validation_disabled, DisableValidation};
//!
//! assert!(!is_validation_disabled());
//! {
//!     let _guard = DisableValidation::enter();
//!     assert!(is_validation_disabled());
//! }
//! assert!(!is_validation_disabled());
//! ```
//!
//! Each thread starts with validation enabled. Inside a task wrapped with
//! [`propagate`](fn.propagate.html) (or started with [`spawn`](fn.spawn.html))
//! the switch lives in the task instead, initialized from whatever the parent
//! saw when the task was created. A child changing the switch never affects
//! its parent or its siblings. Any other tokio task sees validation enabled;
//! use [`DisableValidation::scope`](struct.DisableValidation.html#method.scope)
//! or [`DisableValidation::run`](struct.DisableValidation.html#method.run)
//! there.

use std::cell::Cell;
use std::future::Future;
use std::marker::PhantomData;

// Both cells count the guards currently disabling validation, so guards may be
// dropped in any order.
tokio::task_local! {
    static TASK_DISABLED: Cell<usize>;
}

thread_local! {
    static THREAD_DISABLED: Cell<usize> = Cell::new(0);
}

/// Is validation currently turned off for the calling thread or task?
///
/// A tokio task that was not started through [`propagate`](fn.propagate.html),
/// [`spawn`](fn.spawn.html) or [`DisableValidation::scope`](struct.DisableValidation.html#method.scope)
/// shares its worker thread with other tasks, so it never reads the thread's
/// switch and always sees validation enabled.
pub fn is_validation_disabled() -> bool {
    match TASK_DISABLED.try_with(Cell::get) {
        Ok(depth) => depth > 0,
        Err(_) if in_unscoped_task() => false,
        Err(_) => THREAD_DISABLED.with(Cell::get) > 0,
    }
}

fn in_unscoped_task() -> bool {
    tokio::task::try_id().is_some()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Task,
    Thread,
    // A tokio task without a scope of its own; the guard changes nothing.
    Detached,
}

fn target() -> Target {
    if TASK_DISABLED.try_with(|_| ()).is_ok() {
        Target::Task
    } else if in_unscoped_task() {
        Target::Detached
    } else {
        Target::Thread
    }
}

// Adjust the depth of `target`, returning the new depth.
fn adjust(target: Target, delta: fn(usize) -> usize) -> usize {
    let update = |cell: &Cell<usize>| {
        let depth = delta(cell.get());
        cell.set(depth);
        depth
    };
    match target {
        // The task scope may already be gone if the guard outlived it.
        Target::Task => TASK_DISABLED.try_with(update).unwrap_or(0),
        Target::Thread => THREAD_DISABLED.with(update),
        Target::Detached => 0,
    }
}

/// Turns validation off while in scope.
///
/// Reads through [`SchemaField::to_python`](../fields/struct.SchemaField.html#method.to_python)
/// return raw data instead of validated instances while the switch is on.
/// Writes are still validated.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisableValidation;

impl DisableValidation {
    /// Turn validation off until the returned guard is dropped. Guards nest,
    /// and validation comes back once every guard is gone.
    ///
    /// Inside a tokio task that has no scope of its own the guard has no
    /// effect: the switch would otherwise leak into every task sharing the
    /// worker thread. Use [`scope`](#method.scope) or [`run`](#method.run)
    /// there instead.
    pub fn enter() -> DisableValidationGuard {
        DisableValidationGuard::new(target())
    }

    /// Run `f` with validation turned off. Works in threads and tasks alike.
    pub fn run<R>(f: impl FnOnce() -> R) -> R {
        let depth = TASK_DISABLED.try_with(Cell::get).unwrap_or(0);
        TASK_DISABLED.sync_scope(Cell::new(depth + 1), f)
    }

    /// Run a future with validation turned off.
    ///
    /// Unlike holding a guard, this keeps the switch attached to the future
    /// across `.await` points, whichever thread polls it.
    pub fn scope<F: Future>(fut: F) -> impl Future<Output = F::Output> {
        TASK_DISABLED.scope(Cell::new(1), fut)
    }
}

/// Re-enables validation when dropped, unless another guard is still alive.
///
/// The guard is bound to the thread (or task) that created it, so it is not
/// `Send`.
#[must_use = "validation is re-enabled as soon as the guard is dropped"]
#[derive(Debug)]
pub struct DisableValidationGuard {
    target: Target,
    _not_send: PhantomData<*const ()>,
}

impl DisableValidationGuard {
    fn new(target: Target) -> Self {
        if target == Target::Detached {
            tracing::warn!(
                "DisableValidation::enter() in a tokio task without its own scope has no effect; \
                 use DisableValidation::scope or DisableValidation::run"
            );
        }
        let depth = adjust(target, |depth| depth + 1);
        tracing::trace!(scope = ?target, depth, "validation switch entered");
        Self {
            target,
            _not_send: PhantomData,
        }
    }
}

impl Drop for DisableValidationGuard {
    fn drop(&mut self) {
        let depth = adjust(self.target, |depth| depth.saturating_sub(1));
        tracing::trace!(scope = ?self.target, depth, "validation switch exited");
    }
}

fn depth_for(disabled: bool) -> usize {
    if disabled {
        1
    } else {
        0
    }
}

/// Attach the caller's current switch state to `fut`.
///
/// The future gets its own copy: changes made while it runs stay inside it.
pub fn propagate<F: Future>(fut: F) -> impl Future<Output = F::Output> {
    TASK_DISABLED.scope(Cell::new(depth_for(is_validation_disabled())), fut)
}

/// Spawn a task on the current runtime that inherits the caller's switch
/// state.
pub fn spawn<F>(fut: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(propagate(fut))
}

/// Wrap a closure bound for another thread so it runs with the caller's
/// current switch state.
pub fn propagate_fn<F, R>(f: F) -> impl FnOnce() -> R + Send
where
    F: FnOnce() -> R + Send,
{
    let depth = depth_for(is_validation_disabled());
    move || TASK_DISABLED.sync_scope(Cell::new(depth), f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;
    use std::thread;

    #[test]
    fn guards_nest() {
        assert!(!is_validation_disabled());
        {
            let _outer = DisableValidation::enter();
            assert!(is_validation_disabled());
            {
                let _inner = DisableValidation::enter();
                assert!(is_validation_disabled());
            }
            assert!(is_validation_disabled());
        }
        assert!(!is_validation_disabled());
    }

    #[test]
    fn guards_dropped_out_of_order() {
        let outer = DisableValidation::enter();
        let inner = DisableValidation::enter();

        drop(outer);
        assert!(is_validation_disabled());
        drop(inner);
        assert!(!is_validation_disabled());
    }

    #[test]
    fn run_nests_inside_guards() {
        let guard = DisableValidation::enter();
        DisableValidation::run(|| {
            let inner = DisableValidation::enter();
            drop(inner);
            assert!(is_validation_disabled());
        });
        assert!(is_validation_disabled());
        drop(guard);
        assert!(!is_validation_disabled());
    }

    #[test]
    fn restored_after_panic() {
        let result = panic::catch_unwind(|| {
            DisableValidation::run(|| {
                assert!(is_validation_disabled());
                panic!("boom");
            })
        });
        assert!(result.is_err());
        assert!(!is_validation_disabled());
    }

    #[test]
    fn threads_are_isolated() {
        let _guard = DisableValidation::enter();

        let fresh = thread::spawn(is_validation_disabled).join().unwrap();
        assert!(!fresh);

        let inherited = thread::spawn(propagate_fn(is_validation_disabled))
            .join()
            .unwrap();
        assert!(inherited);

        let child = thread::spawn(|| {
            let _guard = DisableValidation::enter();
            is_validation_disabled()
        });
        assert!(child.join().unwrap());
        assert!(is_validation_disabled());
    }
}
