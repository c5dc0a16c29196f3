mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{attrs, extender};
use modvisor::{
    CapabilityRegistry, EventKind, ExtenderConfig, ExtenderError, Filter, MemoryRegistry,
    ModuleId, ModuleRef, ModuleSpec, ModuleState,
};

type Log = Arc<Mutex<Vec<&'static str>>>;

/// Module that exports `(kind=<exports>)` with `ranking`, uses every capability of
/// kind `uses` found at init, and records its teardown in `log`.
fn module(id: u64, name: &'static str, exports: &'static str, ranking: i32, uses: Option<&'static str>, log: &Log) -> ModuleSpec {
    let log = Arc::clone(log);
    ModuleSpec::builder(ModuleRef::new(id, name))
        .on_init(move |ctx| async move {
            ctx.register([("kind".to_string(), exports.to_string())].into(), ranking);
            if let Some(kind) = uses {
                for cap in ctx.registry().query(&Filter::equals("kind", kind)) {
                    ctx.acquire(cap.id);
                }
            }
            Ok(())
        })
        .on_teardown(move |_ctx| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(name);
                Ok(())
            }
        })
        .build()
}

#[tokio::test]
async fn shutdown_closes_consumers_before_providers() {
    let reg = MemoryRegistry::shared();
    let ext = extender(&reg, ExtenderConfig::default());
    let log: Log = Arc::default();
    let mut rx = ext.subscribe();

    // store <- cache <- web
    let store = ext.submit(module(1, "store", "Store", 1, None, &log)).unwrap();
    store.wait_until(|s| s == ModuleState::Started).await;
    let cache = ext.submit(module(2, "cache", "Cache", 10, Some("Store"), &log)).unwrap();
    cache.wait_until(|s| s == ModuleState::Started).await;
    let web = ext.submit(module(3, "web", "Web", 0, Some("Cache"), &log)).unwrap();
    web.wait_until(|s| s == ModuleState::Started).await;

    let order = ext.compute_shutdown_order(&[ModuleId(1), ModuleId(2), ModuleId(3)]);
    assert_eq!(order, vec![ModuleId(3), ModuleId(2), ModuleId(1)]);

    ext.shutdown().await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["web", "cache", "store"]);
    for h in [&store, &cache, &web] {
        assert_eq!(h.state(), ModuleState::Stopped);
    }
    assert!(reg.is_empty());

    let mut kinds = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        kinds.push(ev.kind);
    }
    assert!(kinds.contains(&EventKind::ShutdownRequested));
    assert_eq!(kinds.last(), Some(&EventKind::AllClosedWithinGrace));
}

#[tokio::test]
async fn cyclic_usage_order_is_independent_of_input_order() {
    let reg = MemoryRegistry::shared();
    let ext = extender(&reg, ExtenderConfig::default());
    let log: Log = Arc::default();

    let a = ext.submit(module(1, "a", "A", 1, None, &log)).unwrap();
    let b = ext.submit(module(2, "b", "B", 2, None, &log)).unwrap();
    let c = ext.submit(module(3, "c", "C", 3, None, &log)).unwrap();
    for h in [&a, &b, &c] {
        h.wait_until(|s| s == ModuleState::Started).await;
    }
    // a uses b, b uses c, c uses a.
    let cap = |kind: &str| reg.query(&Filter::equals("kind", kind))[0].id;
    assert!(reg.acquire(cap("B"), ModuleId(1)));
    assert!(reg.acquire(cap("C"), ModuleId(2)));
    assert!(reg.acquire(cap("A"), ModuleId(3)));

    let inputs = [
        [1, 2, 3],
        [1, 3, 2],
        [2, 1, 3],
        [2, 3, 1],
        [3, 1, 2],
        [3, 2, 1],
    ];
    let orders: Vec<Vec<ModuleId>> = inputs
        .iter()
        .map(|ids| ext.compute_shutdown_order(&ids.map(ModuleId)))
        .collect();
    for order in &orders {
        assert_eq!(order, &orders[0]);
    }
    assert_eq!(orders[0], vec![ModuleId(3), ModuleId(1), ModuleId(2)]);

    ext.shutdown().await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["c", "a", "b"]);
}

#[tokio::test]
async fn shutdown_interrupts_waiting_and_initializing_modules() {
    let reg = MemoryRegistry::shared();
    let ext = extender(&reg, ExtenderConfig::default());

    let waiting = ext.submit(common::needs(1, "waiting", "Logger")).unwrap();
    let initializing = ext
        .submit(
            ModuleSpec::builder(ModuleRef::new(2, "initializing"))
                .on_init(|ctx| async move {
                    ctx.register([("kind".to_string(), "Early".to_string())].into(), 0);
                    ctx.token().cancelled().await;
                    Err(modvisor::ModuleError::Canceled)
                })
                .build(),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(reg.len(), 1);

    ext.shutdown().await.unwrap();
    assert_eq!(waiting.state(), ModuleState::Interrupted);
    assert_eq!(initializing.state(), ModuleState::Interrupted);
    assert_eq!(initializing.failure().unwrap().as_label(), "bootstrap_race_aborted");
    assert!(reg.is_empty());
    assert_eq!(reg.subscription_count(), 0);
    assert!(ext.is_shutting_down());
}

#[tokio::test(start_paused = true)]
async fn grace_overrun_lists_stuck_modules() {
    let reg = MemoryRegistry::shared();
    let ext = extender(
        &reg,
        ExtenderConfig {
            grace: Duration::from_secs(1),
            ..ExtenderConfig::default()
        },
    );
    let mut rx = ext.subscribe();
    let quick = ext
        .submit(ModuleSpec::builder(ModuleRef::new(1, "quick")).build())
        .unwrap();
    let slow = ext
        .submit(
            ModuleSpec::builder(ModuleRef::new(2, "slow"))
                .on_teardown(|_ctx| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                })
                .build(),
        )
        .unwrap();
    quick.wait_until(|s| s == ModuleState::Started).await;
    slow.wait_until(|s| s == ModuleState::Started).await;

    let err = ext.shutdown().await.unwrap_err();
    assert_eq!(err.as_label(), "extender_grace_exceeded");
    let ExtenderError::GraceExceeded { stuck, .. } = err else {
        unreachable!()
    };
    assert_eq!(stuck, vec!["slow".to_string()]);
    assert_eq!(quick.state(), ModuleState::Stopped);

    let mut last = None;
    while let Ok(ev) = rx.try_recv() {
        last = Some(ev);
    }
    let last = last.unwrap();
    assert_eq!(last.kind, EventKind::GraceExceeded);
    assert_eq!(last.reason.as_deref(), Some("slow"));

    // The overrun does not abandon the teardown; closing again waits for it.
    assert_eq!(ext.tracked().ids(), vec![ModuleId(2)]);
    assert!(ext.close(ModuleId(2)).await);
    assert_eq!(slow.state(), ModuleState::Stopped);
    assert!(ext.tracked().is_empty());
}

#[tokio::test(start_paused = true)]
async fn second_shutdown_finishes_what_the_first_overran() {
    let reg = MemoryRegistry::shared();
    let ext = extender(
        &reg,
        ExtenderConfig {
            grace: Duration::from_millis(100),
            ..ExtenderConfig::default()
        },
    );
    let slow = ext
        .submit(
            ModuleSpec::builder(ModuleRef::new(1, "slow"))
                .on_teardown(|_ctx| async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(())
                })
                .build(),
        )
        .unwrap();
    slow.wait_until(|s| s == ModuleState::Started).await;

    assert!(ext.shutdown().await.is_err());
    assert_eq!(slow.state(), ModuleState::Started);

    tokio::time::sleep(Duration::from_secs(2)).await;
    ext.shutdown().await.unwrap();
    assert_eq!(slow.state(), ModuleState::Stopped);
    assert!(ext.tracked().is_empty());
}

#[tokio::test]
async fn stale_ids_still_yield_a_permutation() {
    let reg = MemoryRegistry::shared();
    let ext = extender(&reg, ExtenderConfig::default());
    reg.register(ModuleId(9), attrs(&[("kind", "Orphan")]), 100);
    let order = ext.compute_shutdown_order(&[ModuleId(9), ModuleId(4), ModuleId(4)]);
    assert_eq!(order, vec![ModuleId(4), ModuleId(9)]);
}
