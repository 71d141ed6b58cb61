//! Minimal non-streaming chat call against the gateway.
//!
//! Run with `OPENROUTER_API_KEY=sk-... cargo run --example basic_chat`.

use chatgate::client::ChatOptions;
use chatgate::{ChatGateClient, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let api_key = std::env::var("OPENROUTER_API_KEY").expect("OPENROUTER_API_KEY must be set");
    let config = Config::new(api_key, "openai/gpt-4o-mini");

    let client = ChatGateClient::new(config).await?;

    let mut options = ChatOptions::new("demo-user");
    options.system_prompt = Some("You are a terse assistant.".to_string());
    options.prompt = Some("What's the tallest mountain on Earth?".to_string());

    let result = client.chat(options).await?;
    println!("model: {}", result.model);
    println!("content: {:?}", result.content);
    println!("usage: {:?}", result.usage);
    if let Some(cost) = result.cost {
        println!("cost: ${cost:.8}");
    }

    client.close().await?;
    Ok(())
}
