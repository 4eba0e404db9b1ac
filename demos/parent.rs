//! Parent demo - spawns the child demo and talks to it
//!
//! First build the child: cargo build --example child
//! Then run: cargo run --example parent [path-to-child]

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wtfork::{call, default_pretty_handler, ForkBuilder, LogLevel, MethodRegistry, RemoteError, StructuredLogger};

const DEFAULT_CHILD: &str = "target/debug/examples/child";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let child_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CHILD.to_string());

    let methods = MethodRegistry::builder()
        .sync_method("hello", |args| {
            println!("Im a parent method called 'hello' and I just ran: {}", args.first().unwrap_or(&Value::Null));
            Ok(json!({"some": "data"}))
        })
        .sync_method("goodbye", |args| {
            println!("Im a parent method called 'goodbye' and I just ran: {:?}", args);
            Err(RemoteError::msg("Please don't leave me!"))
        })
        .sync_method("_somePrivateMethod", |args| {
            println!("You can't see me child process.");
            Ok(args.into_iter().next().unwrap_or(Value::Null))
        })
        .build();

    let logger = StructuredLogger::new(Some(Arc::new(default_pretty_handler)), LogLevel::Info);
    let mut handle = ForkBuilder::new(child_path)
        .methods(methods)
        .logger(logger)
        .ready_timeout(Duration::from_secs(10))
        .spawn()
        .await?;

    let child = handle.child.clone();
    handle
        .child
        .on("helloBackAtYou", move |data| {
            println!("I am the parent and I received data for a child event 'helloBackAtYou': {}", data);
            let child = child.clone();
            tokio::spawn(async move {
                let result: wtfork::Result<Value> = call!(child.methods(), simples("meerkat")).await;
                match result {
                    Ok(result) => {
                        println!("The child method 'simples' resolved back to the parent with: {}", result);
                        // The child exits instead of replying
                        let quit = child.methods().stub("quit");
                        tokio::spawn(async move { quit.call_raw(vec![json!(0)]).await });
                    }
                    Err(e) => eprintln!("The child method 'simples' errored back to the parent: {}", e),
                }
            });
        })
        .await;

    handle.wait_ready().await?;
    handle.child.send("hello", &json!({"bar": "foo"})).await?;

    let status = handle.wait().await?;
    println!("Child exited with {}", status);

    let snapshot = handle.child.metrics().snapshot().await;
    println!("Calls made: {}, served: {}", snapshot.calls_total, snapshot.calls_served);
    Ok(())
}
