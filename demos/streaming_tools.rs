//! Streaming chat call that lets the model invoke the built-in `bash` tool.
//!
//! Run with `OPENROUTER_API_KEY=sk-... cargo run --example streaming_tools`.

use chatgate::client::ChatOptions;
use chatgate::orchestrator::StreamCallbacks;
use chatgate::{ChatGateClient, Config};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let api_key = std::env::var("OPENROUTER_API_KEY").expect("OPENROUTER_API_KEY must be set");
    let config = Config::new(api_key, "openai/gpt-4o-mini");

    let client = ChatGateClient::new(config).await?;

    let mut options = ChatOptions::new("demo-user");
    options.prompt = Some("List the files in the current directory.".to_string());
    options.tools = client.tool_registry().get_tools_for_llm();

    let callbacks = StreamCallbacks {
        on_content: Some(Box::new(|chunk| print!("{chunk}"))),
        on_tool_call_executing: Some(Box::new(|name, args| {
            println!("\n[calling {name} with {args}]");
        })),
        on_tool_call_result: Some(Box::new(|name, result, success| {
            println!("[{name} {}]: {result}", if success { "ok" } else { "failed" });
        })),
    };

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let result = client.chat_stream(options, callbacks, cancel_rx).await?;

    println!("\n--- done ---");
    println!("finish reason: {:?}", result.finish_reason);
    println!("tool calls: {}", result.tool_calls_count);

    client.close().await?;
    Ok(())
}
