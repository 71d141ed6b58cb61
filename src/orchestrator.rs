//! The tool-calling loop and streaming state machine (C13).
//!
//! Generalizes the teacher's `chat_loop` (see `llm/openai.rs`) from one
//! provider's request/response shapes to the gateway-agnostic
//! [`crate::transport::GatewayTransport`], adding model fallback, the
//! security gate, loop detection, and cost computation around every round.

use crate::config::ResponseFormat;
use crate::error::{GateError, GateErrorKind, GateResult};
use crate::events::EventBus;
use crate::llm::{
    FinishReason, LoopAction, LoopDetector, Message, Role, Tool, ToolCall, ToolCallAssembler, TokenUsage,
    ToolRegistry,
};
use crate::pricing::PriceCatalog;
use crate::security::SecurityGate;
use crate::transport::{CompletionParams, CompletionRound, GatewayTransport, StreamEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Inputs to one `chat`/`chat_stream` call.
pub struct ChatRequestOptions {
    /// Overrides the client's configured default model for this call.
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub params: CompletionParams,
    pub auth_token: Option<String>,
}

/// The consolidated result returned at the end of a chat call, streaming or
/// not (spec.md §4.11.1 step 5).
#[derive(Debug, Clone)]
pub struct ChatCompletionResult {
    pub content: Option<String>,
    pub usage: TokenUsage,
    pub model: String,
    pub tool_calls_count: u32,
    pub finish_reason: FinishReason,
    pub duration_ms: u64,
    pub id: String,
    pub cost: Option<f64>,
}

/// Streaming callbacks (`onContent`, `onToolCallExecuting`, `onToolCallResult`).
/// `onComplete`/`onError` are represented by `chat_stream`'s return value.
pub struct StreamCallbacks {
    pub on_content: Option<Box<dyn FnMut(&str) + Send>>,
    pub on_tool_call_executing: Option<Box<dyn FnMut(&str, &serde_json::Value) + Send>>,
    pub on_tool_call_result: Option<Box<dyn FnMut(&str, &str, bool) + Send>>,
}

impl Default for StreamCallbacks {
    fn default() -> Self {
        Self {
            on_content: None,
            on_tool_call_executing: None,
            on_tool_call_result: None,
        }
    }
}

pub struct Orchestrator {
    transport: Arc<GatewayTransport>,
    registry: Arc<ToolRegistry>,
    security: Arc<SecurityGate>,
    pricing: Option<Arc<PriceCatalog>>,
    events: EventBus,
    default_model: String,
    model_fallbacks: Vec<String>,
    max_tool_calls: u32,
    parallel_tool_calls: bool,
    response_format: ResponseFormat,
    strict_json_parsing: bool,
    tool_timeout: Duration,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<GatewayTransport>,
        registry: Arc<ToolRegistry>,
        security: Arc<SecurityGate>,
        pricing: Option<Arc<PriceCatalog>>,
        events: EventBus,
        default_model: String,
        model_fallbacks: Vec<String>,
        max_tool_calls: u32,
        parallel_tool_calls: bool,
        response_format: ResponseFormat,
        strict_json_parsing: bool,
    ) -> Self {
        Self {
            transport,
            registry,
            security,
            pricing,
            events,
            default_model,
            model_fallbacks,
            max_tool_calls,
            parallel_tool_calls,
            response_format,
            strict_json_parsing,
            tool_timeout: Duration::from_secs(30),
        }
    }

    fn model_sequence(&self, requested: Option<&str>) -> Vec<String> {
        let primary = requested.map(str::to_string).unwrap_or_else(|| self.default_model.clone());
        let mut models = vec![primary];
        models.extend(self.model_fallbacks.clone());
        models
    }

    fn is_retryable(err: &GateError) -> bool {
        matches!(
            err.kind,
            GateErrorKind::NetworkError | GateErrorKind::Timeout
        ) || (err.kind == GateErrorKind::ApiError && err.status_code.map(|s| s >= 500).unwrap_or(false))
    }

    /// Non-streaming tool-calling loop (spec.md §4.11.1).
    pub async fn chat(&self, options: ChatRequestOptions) -> GateResult<ChatCompletionResult> {
        let started = Instant::now();
        let models = self.model_sequence(options.model.as_deref());
        let mut messages = options.messages;
        let tools = options.tools;

        let mut usage = TokenUsage::default();
        let mut tool_calls_count = 0u32;
        let mut rounds_left = self.max_tool_calls;
        let mut any_tool_executed = false;
        let mut loop_detector = LoopDetector::new();

        loop {
            let round = self
                .send_with_fallback(&models, &messages, &tools, &options.params, any_tool_executed)
                .await?;

            usage.add(&round.usage.clone().unwrap_or_default());

            if round.finish_reason == FinishReason::ToolCalls && !round.tool_calls.is_empty() && rounds_left > 0 {
                messages.push(Message {
                    role: Role::Assistant,
                    content: round.content.clone(),
                    name: None,
                    tool_call_id: None,
                    tool_calls: Some(round.tool_calls.clone()),
                });

                let results = self
                    .execute_tool_calls(&round.tool_calls, &tools, options.auth_token.as_deref(), &mut loop_detector, None)
                    .await?;
                for (call, outcome) in round.tool_calls.iter().zip(results.iter()) {
                    messages.push(Message::tool_result(call.id.clone(), outcome.content.clone()));
                }
                tool_calls_count += round.tool_calls.len() as u32;
                any_tool_executed = true;
                rounds_left -= 1;
                continue;
            }

            if round.finish_reason == FinishReason::ToolCalls
                && !round.tool_calls.is_empty()
                && rounds_left == 0
                && self.max_tool_calls > 0
            {
                return Err(GateError::new(
                    GateErrorKind::ToolError,
                    format!("maximum tool call rounds ({}) exceeded", self.max_tool_calls),
                )
                .with_details(serde_json::json!({
                    "limit": self.max_tool_calls,
                    "lastContent": round.content,
                })));
            }

            let content = self.finalize_content(round.content)?;
            let model_used = round.model_used.clone();
            let cost = self
                .pricing
                .as_ref()
                .and_then(|p| p.compute_cost(&model_used, &usage));

            return Ok(ChatCompletionResult {
                content,
                usage,
                model: model_used,
                tool_calls_count,
                finish_reason: round.finish_reason,
                duration_ms: started.elapsed().as_millis() as u64,
                id: round.request_id,
                cost,
            });
        }
    }

    /// Applies `responseFormat`/`strictJsonParsing` to the terminal content.
    fn finalize_content(&self, content: Option<String>) -> GateResult<Option<String>> {
        if !matches!(self.response_format, ResponseFormat::Json) {
            return Ok(content);
        }
        let Some(text) = content else { return Ok(None) };
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(_) => Ok(Some(text)),
            Err(err) if self.strict_json_parsing => Err(GateError::new(
                GateErrorKind::ValidationError,
                format!("model output was not valid JSON: {err}"),
            )),
            Err(_) => Ok(None),
        }
    }

    async fn send_with_fallback(
        &self,
        models: &[String],
        messages: &[Message],
        tools: &[Tool],
        params: &CompletionParams,
        any_tool_executed: bool,
    ) -> GateResult<CompletionRound> {
        let mut last_err = None;
        for (i, model) in models.iter().enumerate() {
            let tools_opt = if tools.is_empty() { None } else { Some(tools) };
            match self.transport.complete(model, messages, tools_opt, params).await {
                Ok(round) => return Ok(round),
                Err(err) => {
                    let can_retry = !any_tool_executed && Self::is_retryable(&err) && i + 1 < models.len();
                    if !can_retry {
                        return Err(err);
                    }
                    crate::log(&format!("model '{model}' failed with a retryable error, falling back: {err}"));
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| GateError::new(GateErrorKind::InternalError, "no model attempted")))
    }

    /// Resolves, validates, security-checks, and runs one round's tool calls,
    /// optionally concurrently (spec.md §4.11.1 step 4b, §5).
    async fn execute_tool_calls(
        &self,
        calls: &[ToolCall],
        tools: &[Tool],
        auth_token: Option<&str>,
        loop_detector: &mut LoopDetector,
        mut on_executing: Option<&mut (dyn FnMut(&str, &serde_json::Value) + Send)>,
    ) -> GateResult<Vec<crate::llm::ToolResult>> {
        let sequential_only = calls.iter().any(|call| {
            tools
                .iter()
                .find(|t| t.name == call.name)
                .and_then(|t| t.security.as_ref())
                .map(|s| s.sequential_only)
                .unwrap_or(false)
        });

        for call in calls {
            if let Some(detection) = loop_detector.check(call) {
                if detection.action == LoopAction::Terminate {
                    return Err(GateError::new(
                        GateErrorKind::ToolError,
                        detection.suggestion.clone(),
                    ));
                }
                if let Some(message) = &detection.warning_message {
                    crate::log(message);
                }
            }
            if let Some(cb) = on_executing.as_deref_mut() {
                cb(&call.name, &call.arguments);
            }
        }

        if self.parallel_tool_calls && !sequential_only && calls.len() > 1 {
            let futures = calls.iter().map(|call| self.run_one_tool_call(call, tools, auth_token));
            let outcomes = futures::future::join_all(futures).await;
            outcomes.into_iter().collect::<GateResult<Vec<_>>>()
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.run_one_tool_call(call, tools, auth_token).await?);
            }
            Ok(results)
        }
    }

    /// Resolves a tool, runs the security gate (whose failures abort the
    /// whole call, spec.md §7), then the executor under a bounded timeout
    /// (schema/parse failures and executor errors become the tool's result).
    async fn run_one_tool_call(
        &self,
        call: &ToolCall,
        tools: &[Tool],
        auth_token: Option<&str>,
    ) -> GateResult<crate::llm::ToolResult> {
        let tool = tools
            .iter()
            .find(|t| t.name == call.name)
            .cloned()
            .unwrap_or_else(|| Tool::new(call.name.clone(), "", "", serde_json::json!({})));

        self.security.check(auth_token, &tool, call).await?;

        if let Err(err) = self.registry.validate_arguments(call) {
            return Ok(crate::llm::ToolResult {
                tool_call_id: call.id.clone(),
                content: err.message,
                is_error: true,
            });
        }

        let outcome = tokio::time::timeout(self.tool_timeout, self.registry.execute(call)).await;
        let result = match outcome {
            Ok(Some(result)) => result,
            Ok(None) => crate::llm::ToolResult {
                tool_call_id: call.id.clone(),
                content: format!("unknown tool '{}'", call.name),
                is_error: true,
            },
            Err(_) => crate::llm::ToolResult {
                tool_call_id: call.id.clone(),
                content: format!("tool '{}' timed out after {:?}", call.name, self.tool_timeout),
                is_error: true,
            },
        };

        self.events.emit(
            "tool:result",
            serde_json::json!({"tool": call.name, "success": !result.is_error}),
        );
        Ok(result)
    }

    /// Streaming tool-calling loop (spec.md §4.11.2).
    pub async fn chat_stream(
        &self,
        options: ChatRequestOptions,
        mut callbacks: StreamCallbacks,
        mut cancel: watch::Receiver<bool>,
    ) -> GateResult<ChatCompletionResult> {
        let started = Instant::now();
        let models = self.model_sequence(options.model.as_deref());
        let model = models.first().cloned().unwrap_or_else(|| self.default_model.clone());
        let mut messages = options.messages;
        let tools = options.tools;

        let mut usage = TokenUsage::default();
        let mut tool_calls_count = 0u32;
        let mut rounds_left = self.max_tool_calls;
        let mut loop_detector = LoopDetector::new();
        let mut final_content: Option<String> = None;
        let mut final_finish = FinishReason::Stop;
        let mut request_id = String::new();

        'rounds: loop {
            if *cancel.borrow() {
                return Err(GateError::canceled());
            }

            let tools_opt = if tools.is_empty() { None } else { Some(tools.as_slice()) };
            let mut stream = self
                .transport
                .stream_complete(&model, &messages, tools_opt, &options.params)
                .await?;

            let mut assembler = ToolCallAssembler::default();
            let mut index_to_id: std::collections::HashMap<u32, String> = std::collections::HashMap::new();
            let mut content_buf = String::new();
            let mut round_finish: Option<FinishReason> = None;
            let mut round_usage: Option<TokenUsage> = None;

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            return Err(GateError::canceled());
                        }
                        continue;
                    }
                    item = futures::StreamExt::next(&mut stream) => item,
                };
                let Some(event) = next else { break };
                match event? {
                    StreamEvent::Content(text) => {
                        content_buf.push_str(&text);
                        if let Some(cb) = callbacks.on_content.as_deref_mut() {
                            cb(&text);
                        }
                    }
                    StreamEvent::ToolCallDelta { index, id, name, arguments_delta } => {
                        if let Some(id) = id {
                            index_to_id.insert(index, id);
                        }
                        if let Some(resolved_id) = index_to_id.get(&index).cloned() {
                            assembler.process_delta(resolved_id, name, arguments_delta);
                        }
                    }
                    StreamEvent::RoundDone { finish_reason, usage: u } => {
                        round_finish = Some(finish_reason);
                        if u.is_some() {
                            round_usage = u;
                        }
                    }
                }
            }

            let finish_reason = round_finish.unwrap_or(FinishReason::Stop);
            if let Some(u) = &round_usage {
                usage.add(u);
            }
            request_id = format!("stream-{}", started.elapsed().as_nanos());

            let tool_calls = if finish_reason == FinishReason::ToolCalls {
                assembler.into_tool_calls().unwrap_or_else(|err| {
                    crate::log(&format!("failed to assemble streamed tool calls: {err}"));
                    Vec::new()
                })
            } else {
                Vec::new()
            };

            if finish_reason == FinishReason::ToolCalls && !tool_calls.is_empty() && rounds_left == 0 && self.max_tool_calls > 0 {
                return Err(GateError::new(
                    GateErrorKind::ToolError,
                    format!("maximum tool call rounds ({}) exceeded", self.max_tool_calls),
                )
                .with_details(serde_json::json!({
                    "limit": self.max_tool_calls,
                    "lastContent": content_buf,
                })));
            }

            if finish_reason == FinishReason::ToolCalls && !tool_calls.is_empty() && rounds_left > 0 {
                messages.push(Message {
                    role: Role::Assistant,
                    content: if content_buf.is_empty() { None } else { Some(content_buf.clone()) },
                    name: None,
                    tool_call_id: None,
                    tool_calls: Some(tool_calls.clone()),
                });

                let results = self
                    .execute_tool_calls(
                        &tool_calls,
                        &tools,
                        options.auth_token.as_deref(),
                        &mut loop_detector,
                        callbacks.on_tool_call_executing.as_deref_mut(),
                    )
                    .await?;
                for (call, outcome) in tool_calls.iter().zip(results.iter()) {
                    if let Some(cb) = callbacks.on_tool_call_result.as_deref_mut() {
                        cb(&call.name, &outcome.content, !outcome.is_error);
                    }
                    messages.push(Message::tool_result(call.id.clone(), outcome.content.clone()));
                }
                tool_calls_count += tool_calls.len() as u32;
                rounds_left -= 1;
                continue 'rounds;
            }

            final_content = self.finalize_content(if content_buf.is_empty() { None } else { Some(content_buf) })?;
            final_finish = finish_reason;
            break;
        }

        let cost = self.pricing.as_ref().and_then(|p| p.compute_cost(&model, &usage));

        Ok(ChatCompletionResult {
            content: final_content,
            usage,
            model,
            tool_calls_count,
            finish_reason: final_finish,
            duration_ms: started.elapsed().as_millis() as u64,
            id: request_id,
            cost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_retryable_flags_network_and_5xx() {
        let network = GateError::new(GateErrorKind::NetworkError, "down");
        assert!(Orchestrator::is_retryable(&network));

        let server_error = GateError::new(GateErrorKind::ApiError, "oops").with_status(503);
        assert!(Orchestrator::is_retryable(&server_error));

        let client_error = GateError::new(GateErrorKind::ApiError, "bad request").with_status(400);
        assert!(!Orchestrator::is_retryable(&client_error));

        let validation = GateError::new(GateErrorKind::ValidationError, "nope");
        assert!(!Orchestrator::is_retryable(&validation));
    }
}
