//! HTTP transport adapter for the remote chat-completions gateway
//! (spec.md §6). Generalizes the teacher's single-provider OpenAI client to
//! one configurable gateway base URL, covering `/chat/completions`
//! (streaming and non-streaming), `/credits`, and `/models`.

use crate::error::{GateError, GateErrorKind, GateResult};
use crate::llm::{FinishReason, Message, Role, Tool, ToolCall, TokenUsage};
use crate::pricing::{CreditBalance, ModelPrice, PriceSource};
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    tool_type: String,
    function: WireFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Clone)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize, Clone)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

fn to_wire_message(message: &Message) -> WireMessage {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    WireMessage {
        role,
        content: message.content.clone(),
        name: message.name.clone(),
        tool_call_id: message.tool_call_id.clone(),
        tool_calls: message.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .map(|c| WireToolCall {
                    id: c.id.clone(),
                    tool_type: "function".to_string(),
                    function: WireFunctionCall {
                        name: c.name.clone(),
                        arguments: c.arguments.to_string(),
                    },
                })
                .collect()
        }),
    }
}

fn to_wire_tools(tools: &[Tool]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|t| WireTool {
            tool_type: "function",
            function: WireFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        })
        .collect()
}

/// Everything one chat-completion call can set (spec.md §6).
#[derive(Debug, Clone, Default)]
pub struct CompletionParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub stop: Option<Vec<String>>,
    pub seed: Option<i64>,
    pub logit_bias: Option<std::collections::HashMap<String, f32>>,
    pub response_format_json: bool,
    pub tool_choice: Option<serde_json::Value>,
    pub parallel_tool_calls: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logit_bias: Option<std::collections::HashMap<String, f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct NonStreamResponse {
    id: String,
    model: String,
    choices: Vec<NonStreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct NonStreamChoice {
    message: NonStreamMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NonStreamMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    cached_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunkWire {
    #[serde(default)]
    choices: Vec<StreamChoiceWire>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoiceWire {
    #[serde(default)]
    index: u32,
    delta: StreamDeltaWire,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDeltaWire {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDeltaWire>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCallDeltaWire {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDeltaWire>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDeltaWire {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// A single parsed round's result: the assistant message, accumulated
/// usage, and how generation finished.
#[derive(Debug, Clone)]
pub struct CompletionRound {
    pub request_id: String,
    pub model_used: String,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Option<TokenUsage>,
}

/// One streamed delta surfaced to the orchestrator's state machine.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Content(String),
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments_delta: Option<String>,
    },
    RoundDone {
        finish_reason: FinishReason,
        usage: Option<TokenUsage>,
    },
}

/// Thin HTTP client over one OpenAI-compatible gateway base URL.
#[derive(Clone)]
pub struct GatewayTransport {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    referer: Option<String>,
    title: Option<String>,
}

impl GatewayTransport {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> GateResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(GateError::from)?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
            referer: None,
            title: None,
        })
    }

    pub fn with_attribution(mut self, referer: Option<String>, title: Option<String>) -> Self {
        self.referer = referer;
        self.title = title;
        self
    }

    fn request_builder(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{path}", self.base_url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key));
        if let Some(referer) = &self.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.title {
            builder = builder.header("X-Title", title);
        }
        builder
    }

    fn build_request<'a>(
        &self,
        model: &'a str,
        messages: &[Message],
        tools: Option<&[Tool]>,
        params: &CompletionParams,
        stream: bool,
    ) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model,
            messages: messages.iter().map(to_wire_message).collect(),
            tools: tools.map(to_wire_tools),
            tool_choice: params.tool_choice.clone(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
            stop: params.stop.clone(),
            seed: params.seed,
            logit_bias: params.logit_bias.clone(),
            response_format: if params.response_format_json {
                Some(serde_json::json!({"type": "json_object"}))
            } else {
                None
            },
            parallel_tool_calls: params.parallel_tool_calls,
            stream,
            stream_options: if stream {
                Some(StreamOptions { include_usage: true })
            } else {
                None
            },
        }
    }

    /// POST `/chat/completions` with `stream: false`.
    pub async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        tools: Option<&[Tool]>,
        params: &CompletionParams,
    ) -> GateResult<CompletionRound> {
        let request = self.build_request(model, messages, tools, params, false);
        let response = self
            .request_builder(reqwest::Method::POST, "/chat/completions")
            .json(&request)
            .send()
            .await?;

        let response = map_http_status(response).await?;
        let body: NonStreamResponse = response.json().await?;

        if let Some(error) = body.error {
            return Err(GateError::new(GateErrorKind::ApiError, error.message).with_details(
                serde_json::json!({"code": error.code}),
            ));
        }

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GateError::new(GateErrorKind::ApiError, "gateway returned no choices"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| {
                let arguments = serde_json::from_str(&c.function.arguments)
                    .unwrap_or(serde_json::Value::Object(Default::default()));
                ToolCall {
                    id: c.id,
                    name: c.function.name,
                    arguments,
                }
            })
            .collect();

        Ok(CompletionRound {
            request_id: body.id,
            model_used: body.model,
            content: choice.message.content,
            tool_calls,
            finish_reason: FinishReason::from_wire(choice.finish_reason.as_deref()),
            usage: body.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                cached_tokens: u.cached_tokens.unwrap_or(0),
            }),
        })
    }

    /// POST `/chat/completions` with `stream: true`. Returns a stream of
    /// parsed [`StreamEvent`]s; the caller drives the state machine.
    pub async fn stream_complete(
        &self,
        model: &str,
        messages: &[Message],
        tools: Option<&[Tool]>,
        params: &CompletionParams,
    ) -> GateResult<Pin<Box<dyn Stream<Item = GateResult<StreamEvent>> + Send>>> {
        let request = self.build_request(model, messages, tools, params, true);
        let response = self
            .request_builder(reqwest::Method::POST, "/chat/completions")
            .json(&request)
            .send()
            .await?;
        let response = map_http_status(response).await?;

        let byte_stream = response.bytes_stream();
        let event_stream = byte_stream.eventsource();

        let output = async_stream::stream! {
            futures::pin_mut!(event_stream);
            while let Some(event_result) = event_stream.next().await {
                let event = match event_result {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(GateError::new(GateErrorKind::NetworkError, format!("SSE stream error: {e}")));
                        break;
                    }
                };
                if event.data == "[DONE]" {
                    break;
                }
                let chunk: StreamChunkWire = match serde_json::from_str(&event.data) {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(GateError::new(GateErrorKind::ApiError, format!("failed to parse SSE chunk: {e}")));
                        break;
                    }
                };

                if chunk.choices.is_empty() {
                    if let Some(usage) = chunk.usage {
                        yield Ok(StreamEvent::RoundDone {
                            finish_reason: FinishReason::Stop,
                            usage: Some(TokenUsage {
                                input_tokens: usage.prompt_tokens,
                                output_tokens: usage.completion_tokens,
                                cached_tokens: usage.cached_tokens.unwrap_or(0),
                            }),
                        });
                    }
                    continue;
                }

                for choice in chunk.choices {
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            yield Ok(StreamEvent::Content(content));
                        }
                    }
                    if let Some(tool_calls) = choice.delta.tool_calls {
                        for delta in tool_calls {
                            yield Ok(StreamEvent::ToolCallDelta {
                                index: delta.index,
                                id: delta.id,
                                name: delta.function.as_ref().and_then(|f| f.name.clone()),
                                arguments_delta: delta.function.and_then(|f| f.arguments),
                            });
                        }
                    }
                    if let Some(finish_reason) = choice.finish_reason {
                        yield Ok(StreamEvent::RoundDone {
                            finish_reason: FinishReason::from_wire(Some(&finish_reason)),
                            usage: None,
                        });
                    }
                }
            }
        };

        Ok(Box::pin(output))
    }
}

async fn map_http_status(response: reqwest::Response) -> GateResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let kind = if status.as_u16() == 401 || status.as_u16() == 403 {
        GateErrorKind::AuthenticationError
    } else if status.as_u16() == 429 {
        GateErrorKind::RateLimitError
    } else if status.is_server_error() {
        GateErrorKind::NetworkError
    } else {
        GateErrorKind::ApiError
    };
    Err(GateError::new(kind, format!("gateway returned HTTP {status}: {text}")).with_status(status.as_u16()))
}

#[derive(Debug, Deserialize)]
struct ModelsListResponse {
    data: Vec<ModelListEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelListEntry {
    id: String,
    #[serde(default)]
    pricing: Option<ModelPricingEntry>,
    #[serde(default)]
    context_length: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ModelPricingEntry {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    completion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreditsResponseWire {
    limit: f64,
    usage: f64,
}

#[async_trait::async_trait]
impl PriceSource for GatewayTransport {
    async fn fetch_model_prices(&self) -> GateResult<Vec<ModelPrice>> {
        let response = self.request_builder(reqwest::Method::GET, "/models").send().await?;
        let response = map_http_status(response).await?;
        let body: ModelsListResponse = response.json().await?;
        Ok(body
            .data
            .into_iter()
            .filter_map(|entry| {
                let pricing = entry.pricing?;
                let prompt = pricing.prompt?.parse::<f64>().ok()? * 1_000_000.0;
                let completion = pricing.completion?.parse::<f64>().ok()? * 1_000_000.0;
                Some(ModelPrice {
                    model_id: entry.id,
                    prompt_cost_per_million_tokens: prompt,
                    completion_cost_per_million_tokens: completion,
                    context_length: entry.context_length,
                })
            })
            .collect())
    }

    async fn fetch_credit_balance(&self) -> GateResult<CreditBalance> {
        let response = self.request_builder(reqwest::Method::GET, "/credits").send().await?;
        let response = map_http_status(response).await?;
        let body: CreditsResponseWire = response.json().await?;
        Ok(CreditBalance {
            limit: body.limit,
            usage: body.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_message_preserves_null_content() {
        let message = Message {
            role: Role::Assistant,
            content: None,
            name: None,
            tool_call_id: None,
            tool_calls: Some(vec![ToolCall {
                id: "1".into(),
                name: "bash".into(),
                arguments: serde_json::json!({}),
            }]),
        };
        let wire = to_wire_message(&message);
        assert!(wire.content.is_none());
        assert!(wire.tool_calls.is_some());
    }

    #[test]
    fn build_request_sets_stream_options_only_when_streaming() {
        let transport = GatewayTransport::new("key", "https://gw.example", Duration::from_secs(5)).unwrap();
        let params = CompletionParams::default();
        let request = transport.build_request("model", &[], None, &params, true);
        assert!(request.stream_options.is_some());
        let request = transport.build_request("model", &[], None, &params, false);
        assert!(request.stream_options.is_none());
    }
}
