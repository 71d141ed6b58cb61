pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod llm;
pub mod logger;
pub mod messages;
pub mod orchestrator;
pub mod pricing;
pub mod security;
pub mod tools;
pub mod transport;

pub use client::ChatGateClient;
pub use config::Config;
pub use error::{GateError, GateErrorKind, GateResult};
pub use logger::log;
pub use orchestrator::ChatCompletionResult;
