use jsl_field::context::{self, is_validation_disabled, DisableValidation};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn nested_guards_restore_in_order() {
    assert!(!is_validation_disabled());

    let outer = DisableValidation::enter();
    let inner = DisableValidation::enter();
    drop(inner);
    assert!(is_validation_disabled());
    drop(outer);

    assert!(!is_validation_disabled());
}

#[test]
fn early_return_restores() {
    fn fails() -> Result<(), String> {
        let _guard = DisableValidation::enter();
        Err::<(), _>("stop".to_owned())?;
        Ok(())
    }

    assert!(fails().is_err());
    assert!(!is_validation_disabled());
}

#[test]
fn concurrent_threads_do_not_see_each_other() {
    let barrier = Arc::new(Barrier::new(2));

    let disabler = {
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let _guard = DisableValidation::enter();
            barrier.wait();
            barrier.wait();
            is_validation_disabled()
        })
    };
    let observer = {
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            let seen = is_validation_disabled();
            barrier.wait();
            seen
        })
    };

    assert!(disabler.join().unwrap());
    assert!(!observer.join().unwrap());
}

#[tokio::test]
async fn scope_covers_awaits() {
    DisableValidation::scope(async {
        assert!(is_validation_disabled());
        tokio::task::yield_now().await;
        assert!(is_validation_disabled());
    })
    .await;

    assert!(!is_validation_disabled());
}

#[tokio::test]
async fn spawned_tasks_inherit_a_copy() {
    let inherited = DisableValidation::scope(async {
        let child = context::spawn(async { is_validation_disabled() });
        child.await.unwrap()
    })
    .await;
    assert!(inherited);

    // Without propagation a task starts with validation enabled.
    let plain = DisableValidation::scope(async { tokio::spawn(async { is_validation_disabled() }).await.unwrap() }).await;
    assert!(!plain);
}

#[tokio::test]
async fn children_do_not_leak_into_parent() {
    context::propagate(async {
        let child = context::spawn(async {
            let _guard = DisableValidation::enter();
            is_validation_disabled()
        });
        assert!(child.await.unwrap());
        assert!(!is_validation_disabled());

        {
            let _guard = DisableValidation::enter();
            assert!(is_validation_disabled());
        }
        assert!(!is_validation_disabled());
    })
    .await;
}

#[tokio::test]
async fn sibling_tasks_are_isolated() {
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let disabler = context::spawn(DisableValidation::scope(async move {
        let _ = rx.await;
        is_validation_disabled()
    }));
    let observer = context::spawn(async {
        tokio::task::yield_now().await;
        is_validation_disabled()
    });

    assert!(!observer.await.unwrap());
    tx.send(()).unwrap();
    assert!(disabler.await.unwrap());
}

fn current_thread() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

#[test]
fn guard_in_root_future_does_not_reach_sibling_tasks() {
    let runtime = current_thread();

    let seen = runtime.block_on(async {
        let observer = tokio::spawn(async {
            tokio::task::yield_now().await;
            is_validation_disabled()
        });
        let _guard = DisableValidation::enter();
        assert!(is_validation_disabled());
        observer.await.unwrap()
    });

    assert!(!seen);
    assert!(!is_validation_disabled());
}

#[test]
fn guards_in_unscoped_local_tasks_have_no_effect() {
    let runtime = current_thread();
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, async {
        let disabler = tokio::task::spawn_local(async {
            let _guard = DisableValidation::enter();
            tokio::task::yield_now().await;
            is_validation_disabled()
        });
        let observer = tokio::task::spawn_local(async { is_validation_disabled() });
        assert!(!disabler.await.unwrap());
        assert!(!observer.await.unwrap());

        // Synchronous runs and scopes still work there.
        let ran = tokio::task::spawn_local(async { DisableValidation::run(is_validation_disabled) });
        assert!(ran.await.unwrap());
        let scoped = tokio::task::spawn_local(DisableValidation::scope(async {
            tokio::task::yield_now().await;
            is_validation_disabled()
        }));
        assert!(scoped.await.unwrap());
    });
}

#[test]
fn out_of_order_drops_reenable_validation() {
    let outer = DisableValidation::enter();
    let inner = DisableValidation::enter();
    drop(outer);
    assert!(is_validation_disabled());
    drop(inner);
    assert!(!is_validation_disabled());
}
