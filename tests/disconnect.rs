//! Disconnect teardown: every in-flight task owned by a departing peer is
//! force-closed, and reconnects displace stale records.

mod common;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use common::{connect, dispatcher, recv};
use crosswire::{
    ConnectionRegistry,
    Envelope,
    Generator,
    Module,
    ModuleRegistry,
    Outcome,
    WireError,
};
use serde_json::{Value, json};

/// Generator that records whether `close` ran, so teardown is observable.
struct CloseProbe(Arc<AtomicBool>);

#[async_trait]
impl Generator for CloseProbe {
    async fn resume(&mut self, _input: Value) -> Result<Option<Value>, WireError> {
        Ok(Some(json!("tick")))
    }

    async fn close(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Module whose `watch` method hands out probe generators sharing `flags`.
fn watcher(flags: Arc<std::sync::Mutex<Vec<Arc<AtomicBool>>>>) -> Module {
    Module::builder("watch")
        .method("start", move |_args| {
            let flags = Arc::clone(&flags);
            async move {
                let flag = Arc::new(AtomicBool::new(false));
                flags.lock().expect("flags").push(Arc::clone(&flag));
                Ok(Outcome::Stream(Box::new(CloseProbe(flag))))
            }
        })
        .expect("start")
        .build()
}

#[tokio::test]
async fn disconnect_force_closes_every_open_task() {
    let flags = Arc::new(std::sync::Mutex::new(Vec::new()));
    let modules = Arc::new(ModuleRegistry::default());
    modules.register(watcher(Arc::clone(&flags))).await.expect("register");
    let registry = ConnectionRegistry::new("srv-1");
    let (connection, mut queues) = connect(&registry, "alice").await;
    let dispatcher = dispatcher(&modules, None);

    for task_id in 1..=3 {
        dispatcher.dispatch(&connection, &format!(r#"[1,{task_id},"watch","start",[]]"#));
        assert_eq!(recv(&mut queues).await, Envelope::StreamStart { task_id });
    }
    assert_eq!(connection.tasks().len(), 3);

    registry.on_disconnect(connection.id()).await;

    assert!(connection.tasks().is_empty());
    let flags = flags.lock().expect("flags");
    assert_eq!(flags.len(), 3);
    assert!(flags.iter().all(|f| f.load(Ordering::SeqCst)));
}

#[tokio::test]
async fn reconnect_under_the_same_id_closes_the_displaced_tasks() {
    let flags = Arc::new(std::sync::Mutex::new(Vec::new()));
    let modules = Arc::new(ModuleRegistry::default());
    modules.register(watcher(Arc::clone(&flags))).await.expect("register");
    let registry = ConnectionRegistry::new("srv-1");
    let (first, mut first_q) = connect(&registry, "alice").await;
    let dispatcher = dispatcher(&modules, None);

    dispatcher.dispatch(&first, r#"[1,1,"watch","start",[]]"#);
    assert_eq!(recv(&mut first_q).await, Envelope::StreamStart { task_id: 1 });

    let (second, _second_q) = connect(&registry, "alice").await;

    assert_eq!(registry.len(), 1);
    assert!(first.tasks().is_empty());
    assert!(second.tasks().is_empty());
    assert!(flags.lock().expect("flags")[0].load(Ordering::SeqCst));
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let modules = Arc::new(ModuleRegistry::default());
    modules
        .register(watcher(Arc::new(std::sync::Mutex::new(Vec::new()))))
        .await
        .expect("register");
    let registry = ConnectionRegistry::new("srv-1");
    let (connection, _queues) = connect(&registry, "alice").await;

    registry.on_disconnect(connection.id()).await;
    registry.on_disconnect(connection.id()).await;
    assert!(registry.is_empty());
}
