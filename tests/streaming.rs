//! Streaming call lifecycle: stream start, continuations, termination, and
//! error injection.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{connect, dispatcher, recv};
use crosswire::{
    ConnectionRegistry,
    Envelope,
    Generator,
    Module,
    ModuleRegistry,
    Outcome,
    StreamGenerator,
    WireError,
};
use serde_json::{Value, json};

fn counters() -> Module {
    Module::builder("feed")
        .method("count", |args: Vec<Value>| async move {
            let n = args.first().and_then(Value::as_u64).unwrap_or(0);
            let stream = async_stream::stream! {
                for i in 0..n {
                    yield Ok(json!(i));
                }
            };
            Ok(Outcome::Stream(Box::new(StreamGenerator::new(stream))))
        })
        .expect("count")
        .method("echo_inputs", |_args| async {
            Ok(Outcome::Stream(Box::new(EchoInputs)))
        })
        .expect("echo_inputs")
        .build()
}

/// Generator that yields back whatever input resumed it, and reports any
/// injected error as a final value instead of propagating it.
struct EchoInputs;

#[async_trait]
impl Generator for EchoInputs {
    async fn resume(&mut self, input: Value) -> Result<Option<Value>, WireError> {
        Ok(Some(input))
    }

    async fn throw(&mut self, error: WireError) -> Result<Option<Value>, WireError> {
        Ok(Some(json!({ "handled": error.name })))
    }
}

#[tokio::test]
async fn streaming_invoke_echoes_invoke_then_yields_to_done() {
    let modules = Arc::new(ModuleRegistry::default());
    modules.register(counters()).await.expect("register");
    let registry = ConnectionRegistry::new("srv-1");
    let (connection, mut queues) = connect(&registry, "alice").await;
    let dispatcher = dispatcher(&modules, None);

    dispatcher.dispatch(&connection, r#"[1,1,"feed","count",[2]]"#);
    assert_eq!(recv(&mut queues).await, Envelope::StreamStart { task_id: 1 });
    assert!(connection.tasks().contains(1));

    dispatcher.dispatch(&connection, "[2,1,null]");
    assert_eq!(
        recv(&mut queues).await,
        Envelope::Yield {
            task_id: 1,
            data: json!({ "done": false, "value": 0 })
        }
    );
    dispatcher.dispatch(&connection, "[2,1,null]");
    assert_eq!(
        recv(&mut queues).await,
        Envelope::Yield {
            task_id: 1,
            data: json!({ "done": false, "value": 1 })
        }
    );

    // Exhaustion settles as {done:true} and removes the task.
    dispatcher.dispatch(&connection, "[2,1,null]");
    assert_eq!(
        recv(&mut queues).await,
        Envelope::Return {
            task_id: 1,
            data: json!({ "done": true })
        }
    );
    assert!(connection.tasks().is_empty());
}

#[tokio::test]
async fn client_return_closes_the_stream_early() {
    let modules = Arc::new(ModuleRegistry::default());
    modules.register(counters()).await.expect("register");
    let registry = ConnectionRegistry::new("srv-1");
    let (connection, mut queues) = connect(&registry, "alice").await;
    let dispatcher = dispatcher(&modules, None);

    dispatcher.dispatch(&connection, r#"[1,8,"feed","count",[100]]"#);
    assert_eq!(recv(&mut queues).await, Envelope::StreamStart { task_id: 8 });

    dispatcher.dispatch(&connection, "[3,8,null]");
    assert_eq!(
        recv(&mut queues).await,
        Envelope::Return {
            task_id: 8,
            data: json!({ "done": true })
        }
    );
    assert!(connection.tasks().is_empty());
}

#[tokio::test]
async fn yield_inputs_reach_the_generator() {
    let modules = Arc::new(ModuleRegistry::default());
    modules.register(counters()).await.expect("register");
    let registry = ConnectionRegistry::new("srv-1");
    let (connection, mut queues) = connect(&registry, "alice").await;
    let dispatcher = dispatcher(&modules, None);

    dispatcher.dispatch(&connection, r#"[1,2,"feed","echo_inputs",[]]"#);
    assert_eq!(recv(&mut queues).await, Envelope::StreamStart { task_id: 2 });

    dispatcher.dispatch(&connection, r#"[2,2,"marco"]"#);
    assert_eq!(
        recv(&mut queues).await,
        Envelope::Yield {
            task_id: 2,
            data: json!({ "done": false, "value": "marco" })
        }
    );
}

#[tokio::test]
async fn thrown_payload_is_reconstructed_into_a_typed_error() {
    let modules = Arc::new(ModuleRegistry::default());
    modules.register(counters()).await.expect("register");
    let registry = ConnectionRegistry::new("srv-1");
    let (connection, mut queues) = connect(&registry, "alice").await;
    let dispatcher = dispatcher(&modules, None);

    dispatcher.dispatch(&connection, r#"[1,3,"feed","echo_inputs",[]]"#);
    assert_eq!(recv(&mut queues).await, Envelope::StreamStart { task_id: 3 });

    // The generator sees a typed error, not a raw map: it handles it and
    // yields a value naming the reconstructed error.
    dispatcher.dispatch(
        &connection,
        r#"[4,3,{"name":"ValueError","message":"bad input"}]"#,
    );
    assert_eq!(
        recv(&mut queues).await,
        Envelope::Yield {
            task_id: 3,
            data: json!({ "done": false, "value": { "handled": "ValueError" } })
        }
    );
}

#[tokio::test]
async fn throw_that_propagates_terminates_the_task() {
    let modules = Arc::new(ModuleRegistry::default());
    modules.register(counters()).await.expect("register");
    let registry = ConnectionRegistry::new("srv-1");
    let (connection, mut queues) = connect(&registry, "alice").await;
    let dispatcher = dispatcher(&modules, None);

    dispatcher.dispatch(&connection, r#"[1,4,"feed","count",[10]]"#);
    assert_eq!(recv(&mut queues).await, Envelope::StreamStart { task_id: 4 });

    // StreamGenerator does not handle injected errors; they propagate.
    dispatcher.dispatch(&connection, r#"[4,4,{"name":"Abort","message":"stop"}]"#);
    assert_eq!(
        recv(&mut queues).await,
        Envelope::Throw {
            task_id: 4,
            data: json!({ "name": "Abort", "message": "stop" })
        }
    );
    assert!(connection.tasks().is_empty());
}

#[tokio::test]
async fn continuation_for_an_unknown_task_throws_a_reference_error() {
    let modules = Arc::new(ModuleRegistry::default());
    let registry = ConnectionRegistry::new("srv-1");
    let (connection, mut queues) = connect(&registry, "alice").await;
    let dispatcher = dispatcher(&modules, None);

    dispatcher.dispatch(&connection, "[2,77,null]");

    let Envelope::Throw { task_id, data } = recv(&mut queues).await else {
        panic!("expected a throw");
    };
    assert_eq!(task_id, 77);
    assert_eq!(data["name"], json!("ReferenceError"));
}

#[tokio::test]
async fn task_ids_are_scoped_per_connection() {
    let modules = Arc::new(ModuleRegistry::default());
    modules.register(counters()).await.expect("register");
    let registry = ConnectionRegistry::new("srv-1");
    let (alice, mut alice_q) = connect(&registry, "alice").await;
    let (bob, mut bob_q) = connect(&registry, "bob").await;
    let dispatcher = dispatcher(&modules, None);

    // Both peers reuse task id 1 without conflict.
    dispatcher.dispatch(&alice, r#"[1,1,"feed","count",[1]]"#);
    dispatcher.dispatch(&bob, r#"[1,1,"feed","count",[5]]"#);
    assert_eq!(recv(&mut alice_q).await, Envelope::StreamStart { task_id: 1 });
    assert_eq!(recv(&mut bob_q).await, Envelope::StreamStart { task_id: 1 });

    // Exhaust alice's single-item stream; bob's stays registered.
    dispatcher.dispatch(&alice, "[2,1,null]");
    assert_eq!(
        recv(&mut alice_q).await,
        Envelope::Yield {
            task_id: 1,
            data: json!({ "done": false, "value": 0 })
        }
    );
    dispatcher.dispatch(&alice, "[2,1,null]");
    assert_eq!(
        recv(&mut alice_q).await,
        Envelope::Return {
            task_id: 1,
            data: json!({ "done": true })
        }
    );
    assert!(alice.tasks().is_empty());
    assert!(bob.tasks().contains(1));
}
