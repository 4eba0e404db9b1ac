//! Child demo - spawned by the parent demo
//!
//! Not meant to be run directly: it reads its identity and port from the
//! environment the parent sets up.

use serde_json::{json, Value};
use wtfork::{is_child, ArgsExtractor, ChildConfig, MethodRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if !is_child() {
        eprintln!("Run the parent demo instead: cargo run --example parent");
        std::process::exit(1);
    }

    let methods = MethodRegistry::builder()
        .sync_method("simples", |args| {
            let some_val: Value = ArgsExtractor::new(args).get(0)?;
            println!("Im a child method called 'simples' and I just ran: {}", some_val);
            Ok(some_val)
        })
        .sync_method("quit", |args| {
            let code: i32 = ArgsExtractor::new(args).get_opt(0)?.unwrap_or(0);
            println!("Child process will now exit as instructed by parent...");
            std::process::exit(code);
        })
        .build();

    let parent = ChildConfig::from_env()?.connect(methods).await?;

    let replier = parent.clone();
    parent
        .on("hello", move |data| {
            println!("I am the child and I received data for parent event 'hello': {}", data);
            let replier = replier.clone();
            tokio::spawn(async move {
                if let Err(e) = replier.send("helloBackAtYou", &json!({"foo": "bar"})).await {
                    eprintln!("Failed to answer hello: {}", e);
                }
            });
        })
        .await;

    match parent.methods().call_raw("hello", vec![json!("test string")]).await {
        Ok(result) => println!("The parent method 'hello' resolved back to the child with: {}", result),
        Err(e) => eprintln!("The parent method 'hello' errored back to the child: {}", e),
    }

    match parent.methods().call_raw("goodbye", vec![json!("test string"), json!("wtfork")]).await {
        Ok(result) => println!("The parent method 'goodbye' resolved back to the child with: {}", result),
        Err(e) => eprintln!("The parent method 'goodbye' errored back to the child: {}", e),
    }

    // Serve calls until the parent tells us to quit
    std::future::pending::<()>().await;
    Ok(())
}
