#![cfg(feature = "metrics")]
//! Prometheus exporter rendering of the runtime's metrics.
//!
//! Installing a recorder is process-global, so this lives in its own test
//! binary with a single test.

mod common;

use std::sync::Arc;

use common::{connect, dispatcher, recv};
use crosswire::{ConnectionRegistry, Module, ModuleRegistry, Outcome};
use serde_json::{Value, json};

#[tokio::test]
async fn rendered_output_names_the_runtime_metrics() {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("recorder install");

    let modules = Arc::new(ModuleRegistry::default());
    let module = Module::builder("m")
        .method("noop", |_args: Vec<Value>| async {
            Ok(Outcome::Value(json!(null)))
        })
        .expect("noop")
        .build();
    modules.register(module).await.expect("register");
    let registry = ConnectionRegistry::new("srv-1");
    let (connection, mut queues) = connect(&registry, "alice").await;
    let dispatcher = dispatcher(&modules, None);

    dispatcher.dispatch(&connection, r#"[1,1,"m","noop",[]]"#);
    recv(&mut queues).await;
    dispatcher.dispatch(&connection, "not json");
    registry.on_disconnect(connection.id()).await;

    handle.run_upkeep();
    let output = handle.render();
    assert!(output.contains(crosswire::metrics::CONNECTIONS_ACTIVE));
    assert!(output.contains(crosswire::metrics::FRAMES_PROCESSED));
    assert!(output.contains(crosswire::metrics::ERRORS_TOTAL));
}
