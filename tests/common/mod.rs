#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use modvisor::{
    Attributes, DependencyDescriptor, Event, EventKind, ExtenderBuilder, ExtenderConfig,
    ExtenderController, MemoryRegistry, ModuleRef, ModuleSpec,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test-friendly fmt subscriber once per test binary (`RUST_LOG` aware).
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .with_test_writer()
            .try_init();
    });
}

pub fn attrs(pairs: &[(&str, &str)]) -> Attributes {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn extender(registry: &Arc<MemoryRegistry>, cfg: ExtenderConfig) -> Arc<ExtenderController> {
    init_tracing();
    ExtenderBuilder::new(cfg).with_registry(registry.clone()).build()
}

/// Module `name` that needs one `(kind=<kind>)` capability.
pub fn needs(id: u64, name: &str, kind: &str) -> ModuleSpec {
    ModuleSpec::builder(ModuleRef::new(id, name))
        .dependency(DependencyDescriptor::mandatory(kind.to_lowercase(), &format!("(kind={kind})")).unwrap())
        .build()
}

/// Collects events for module `id` until one of kind `until` arrives.
pub async fn events_for(rx: &mut broadcast::Receiver<Event>, id: u64, until: EventKind) -> Vec<Event> {
    let mut out = Vec::new();
    let collect = async {
        loop {
            match rx.recv().await {
                Ok(ev) if ev.is_for(id) => {
                    let done = ev.kind == until;
                    out.push(ev);
                    if done {
                        return;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), collect)
        .await
        .expect("event did not arrive in time");
    out
}
