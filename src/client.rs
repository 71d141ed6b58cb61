//! Client façade: owns the lifecycle of every collaborator and exposes the
//! public `chat`/`chatStream` surface plus plugin/middleware hooks (C14).

use crate::config::Config;
use crate::error::{GateError, GateResult};
use crate::events::{EventBus, Handler};
use crate::history::{ApiCallMetadata, HistoryEntry, HistoryKey, HistoryManager};
use crate::llm::{Message, Tool, ToolRegistry};
use crate::messages::{prepare_messages, PrepareMessagesInput};
use crate::orchestrator::{ChatCompletionResult, ChatRequestOptions, Orchestrator, StreamCallbacks};
use crate::pricing::{CreditBalance, ModelPrice, PriceCatalog};
use crate::security::{AuthManager, SecurityGate, UserAuthInfo};
use crate::transport::{CompletionParams, GatewayTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// Caller-facing inputs to one `chat`/`chat_stream` call. History is looked
/// up and appended by the client; the orchestrator only sees plain messages.
pub struct ChatOptions {
    pub user_id: String,
    pub group_id: Option<String>,
    pub system_prompt: Option<String>,
    pub prompt: Option<String>,
    pub custom_messages: Option<Vec<Message>>,
    pub tools: Vec<Tool>,
    pub params: CompletionParams,
    pub auth_token: Option<String>,
    pub model: Option<String>,
    /// Append the user prompt and the final assistant message to history.
    pub persist_history: bool,
}

impl ChatOptions {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            group_id: None,
            system_prompt: None,
            prompt: None,
            custom_messages: None,
            tools: Vec::new(),
            params: CompletionParams::default(),
            auth_token: None,
            model: None,
            persist_history: true,
        }
    }

    fn history_key(&self) -> HistoryKey {
        match &self.group_id {
            Some(group) => HistoryKey::with_group(self.user_id.clone(), group.clone()),
            None => HistoryKey::new(self.user_id.clone()),
        }
    }
}

/// A caller-supplied extension point: may subscribe to events, or otherwise
/// observe the client once it is fully constructed.
pub trait Plugin: Send + Sync {
    fn init(&self, client: &ChatGateClient);
}

/// Runs ahead of every chat call, allowed to mutate the request in place.
pub type RequestMiddleware = Box<dyn Fn(&mut ChatOptions) + Send + Sync>;
/// Runs after every chat call (including failures), allowed to inspect or
/// replace the result.
pub type ResponseMiddleware = Box<dyn Fn(&mut GateResult<ChatCompletionResult>) + Send + Sync>;

#[derive(Default)]
struct Middlewares {
    before: Vec<RequestMiddleware>,
    after: Vec<ResponseMiddleware>,
}

/// Owns C1-C13 and presents the single entry point applications use.
pub struct ChatGateClient {
    events: EventBus,
    history: Arc<Mutex<HistoryManager>>,
    pricing: Option<Arc<PriceCatalog>>,
    security: Arc<SecurityGate>,
    registry: Arc<ToolRegistry>,
    orchestrator: Arc<Orchestrator>,
    middlewares: std::sync::Mutex<Middlewares>,
}

impl ChatGateClient {
    pub async fn new(config: Config) -> GateResult<Self> {
        let events = EventBus::new();
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;

        let transport = Arc::new(
            GatewayTransport::new(config.api_key.clone(), config.api_endpoint.clone(), config.timeout)?
                .with_attribution(config.referer.clone(), config.title.clone()),
        );

        let storage = config.history_adapter.build(http);
        let history = Arc::new(Mutex::new(HistoryManager::new(
            storage,
            config.history_ttl,
            config.history_cleanup_interval,
        )));

        let security = Arc::new(SecurityGate::new(config.security.clone(), events.clone())?);
        let registry = Arc::new(ToolRegistry::new().register_all_builtin());

        let pricing = if config.enable_cost_tracking {
            let catalog = PriceCatalog::new(transport.clone(), config.initial_model_prices.clone(), config.price_refresh_interval);
            if config.initial_model_prices.is_empty() {
                if let Err(err) = catalog.prime().await {
                    crate::log(&format!("initial price catalog load failed: {err}"));
                }
            }
            Some(Arc::new(catalog))
        } else {
            None
        };

        let orchestrator = Arc::new(Orchestrator::new(
            transport,
            registry.clone(),
            security.clone(),
            pricing.clone(),
            events.clone(),
            config.model,
            config.model_fallbacks,
            config.max_tool_calls,
            config.parallel_tool_calls,
            config.response_format,
            config.strict_json_parsing,
        ));

        Ok(Self {
            events,
            history,
            pricing,
            security,
            registry,
            orchestrator,
            middlewares: std::sync::Mutex::new(Middlewares::default()),
        })
    }

    pub fn tool_registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn auth_manager(&self) -> Option<&AuthManager> {
        self.security.auth_manager()
    }

    pub fn use_plugin(&self, plugin: &dyn Plugin) {
        plugin.init(self);
    }

    pub fn use_request_middleware<F>(&self, middleware: F)
    where
        F: Fn(&mut ChatOptions) + Send + Sync + 'static,
    {
        self.middlewares
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .before
            .push(Box::new(middleware));
    }

    pub fn use_response_middleware<F>(&self, middleware: F)
    where
        F: Fn(&mut GateResult<ChatCompletionResult>) + Send + Sync + 'static,
    {
        self.middlewares
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .after
            .push(Box::new(middleware));
    }

    fn run_before_middlewares(&self, options: &mut ChatOptions) {
        let guard = self.middlewares.lock().unwrap_or_else(|e| e.into_inner());
        for mw in &guard.before {
            mw(options);
        }
    }

    fn run_after_middlewares(&self, result: &mut GateResult<ChatCompletionResult>) {
        let guard = self.middlewares.lock().unwrap_or_else(|e| e.into_inner());
        for mw in &guard.after {
            mw(result);
        }
    }

    async fn build_request(&self, options: &ChatOptions) -> GateResult<(HistoryKey, Vec<Message>)> {
        let key = options.history_key();
        let history_entries = self.history.lock().await.get_entries(&key).await?;
        let messages = prepare_messages(PrepareMessagesInput {
            custom_messages: options.custom_messages.clone(),
            system_prompt: options.system_prompt.as_deref(),
            prompt: options.prompt.as_deref(),
            history: history_entries,
        })?;
        Ok((key, messages))
    }

    async fn persist(&self, key: &HistoryKey, options: &ChatOptions, result: &ChatCompletionResult) -> GateResult<()> {
        if !options.persist_history {
            return Ok(());
        }
        let mut entries = Vec::new();
        if let Some(prompt) = &options.prompt {
            entries.push(HistoryEntry::new(Message::user(prompt.clone())));
        }
        let metadata = ApiCallMetadata {
            model_used: result.model.clone(),
            usage: result.usage.clone(),
            cost: result.cost,
            finish_reason: result.finish_reason.clone(),
            timestamp: chrono::Utc::now(),
            request_id: result.id.clone(),
        };
        entries.push(HistoryEntry::with_metadata(
            Message {
                role: crate::llm::Role::Assistant,
                content: result.content.clone(),
                name: None,
                tool_call_id: None,
                tool_calls: None,
            },
            metadata,
        ));
        self.history.lock().await.add_entries(key, entries).await
    }

    pub async fn chat(&self, mut options: ChatOptions) -> GateResult<ChatCompletionResult> {
        self.run_before_middlewares(&mut options);

        let mut result = self.chat_inner(&options).await;
        self.run_after_middlewares(&mut result);

        self.events.emit(
            "chat:complete",
            serde_json::json!({"ok": result.is_ok(), "userId": options.user_id}),
        );
        if let Err(err) = &result {
            self.events.emit("error", serde_json::json!({"message": err.message, "code": err.code()}));
        }
        result
    }

    async fn chat_inner(&self, options: &ChatOptions) -> GateResult<ChatCompletionResult> {
        let (key, messages) = self.build_request(options).await?;
        let tools = if options.tools.is_empty() {
            self.registry.get_tools_for_llm()
        } else {
            options.tools.clone()
        };

        let result = self
            .orchestrator
            .chat(ChatRequestOptions {
                model: options.model.clone(),
                messages,
                tools,
                params: options.params.clone(),
                auth_token: options.auth_token.clone(),
            })
            .await?;

        self.persist(&key, options, &result).await?;
        Ok(result)
    }

    /// Returns a cancellation handle alongside the running call; send `true`
    /// on the sender half to cancel.
    pub async fn chat_stream(
        &self,
        mut options: ChatOptions,
        callbacks: StreamCallbacks,
        cancel: watch::Receiver<bool>,
    ) -> GateResult<ChatCompletionResult> {
        self.run_before_middlewares(&mut options);

        let mut result = self.chat_stream_inner(&options, callbacks, cancel).await;
        self.run_after_middlewares(&mut result);

        self.events.emit(
            "chat:complete",
            serde_json::json!({"ok": result.is_ok(), "userId": options.user_id}),
        );
        if let Err(err) = &result {
            self.events.emit("error", serde_json::json!({"message": err.message, "code": err.code()}));
        }
        result
    }

    async fn chat_stream_inner(
        &self,
        options: &ChatOptions,
        callbacks: StreamCallbacks,
        cancel: watch::Receiver<bool>,
    ) -> GateResult<ChatCompletionResult> {
        let (key, messages) = self.build_request(options).await?;
        let tools = if options.tools.is_empty() {
            self.registry.get_tools_for_llm()
        } else {
            options.tools.clone()
        };

        let result = self
            .orchestrator
            .chat_stream(
                ChatRequestOptions {
                    model: options.model.clone(),
                    messages,
                    tools,
                    params: options.params.clone(),
                    auth_token: options.auth_token.clone(),
                },
                callbacks,
                cancel,
            )
            .await?;

        self.persist(&key, options, &result).await?;
        Ok(result)
    }

    pub fn create_access_token(&self, user: &UserAuthInfo, expires_in: Duration) -> GateResult<String> {
        let auth = self.security.auth_manager().ok_or_else(|| {
            GateError::config("create_access_token requires an auth manager to be configured")
        })?;
        auth.issue_token(user, chrono::Duration::from_std(expires_in).unwrap_or(chrono::Duration::zero()))
    }

    pub async fn get_credit_balance(&self) -> GateResult<CreditBalance> {
        let pricing = self
            .pricing
            .as_ref()
            .ok_or_else(|| GateError::config("cost tracking is not enabled"))?;
        pricing.get_credit_balance().await
    }

    pub fn get_model_prices(&self) -> Vec<ModelPrice> {
        self.pricing.as_ref().map(|p| p.snapshot()).unwrap_or_default()
    }

    pub async fn refresh_model_prices(&self) -> GateResult<()> {
        let pricing = self
            .pricing
            .as_ref()
            .ok_or_else(|| GateError::config("cost tracking is not enabled"))?;
        pricing.prime().await
    }

    pub fn on<F>(&self, topic: &str, handler: F) -> Handler
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.events.on(topic, handler)
    }

    pub fn off(&self, topic: &str, handler: &Handler) {
        self.events.off(topic, handler);
    }

    pub async fn close(&self) -> GateResult<()> {
        self.history.lock().await.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chat_without_prompt_or_history_is_a_config_error() {
        let client = ChatGateClient::new(Config::new("key", "gpt-4o-mini")).await.unwrap();
        let options = ChatOptions::new("user-1");
        let result = client.chat(options).await;
        assert!(result.is_err());
    }

    #[test]
    fn history_key_respects_group_id() {
        let mut options = ChatOptions::new("u1");
        options.group_id = Some("g1".to_string());
        assert_eq!(options.history_key().as_string(), "u1:g1");
    }
}
