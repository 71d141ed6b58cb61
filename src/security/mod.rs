//! Security gate: composes auth, access control, rate limiting, and argument
//! sanitization into one entry point the orchestrator calls before every
//! tool invocation (C9).

pub mod access;
pub mod auth;
pub mod rate_limit;
pub mod sanitizer;

pub use access::{AccessBlock, AccessControl, AccessPolicy, DefaultPolicy, RoleBlock};
pub use auth::{AuthConfig, AuthKind, AuthManager, UserAuthInfo};
pub use rate_limit::{RateLimit, RateLimiter};
pub use sanitizer::{ArgSanitizer, SanitizerConfig};

use crate::error::GateResult;
use crate::events::EventBus;
use crate::llm::{Tool, ToolCall};
use std::sync::Arc;

/// Security surface of the client config (spec.md §6 `security`).
#[derive(Clone, Default)]
pub struct SecurityConfig {
    pub require_authentication: bool,
    pub allow_unauthenticated_access: bool,
    pub auth: Option<AuthConfig>,
    pub access_policy: AccessPolicy,
    pub sanitizer: SanitizerConfig,
    pub default_rate_limit: Option<RateLimit>,
}

pub struct SecurityGate {
    config: SecurityConfig,
    auth: Option<AuthManager>,
    access: AccessControl,
    rate_limiter: Arc<RateLimiter>,
    sanitizer: ArgSanitizer,
}

impl SecurityGate {
    pub fn new(config: SecurityConfig, events: EventBus) -> GateResult<Self> {
        let auth = config
            .auth
            .clone()
            .map(|auth_config| AuthManager::new(auth_config, events.clone()))
            .transpose()?;
        let access = AccessControl::new(config.access_policy.clone(), events.clone());
        let sanitizer = ArgSanitizer::new(config.sanitizer.clone(), events.clone());
        Ok(Self {
            config,
            auth,
            access,
            rate_limiter: RateLimiter::new(),
            sanitizer,
        })
    }

    pub fn auth_manager(&self) -> Option<&AuthManager> {
        self.auth.as_ref()
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        self.rate_limiter.clone()
    }

    /// Runs the full C5-C8 pipeline ahead of one tool execution.
    pub async fn check(&self, token: Option<&str>, tool: &Tool, call: &ToolCall) -> GateResult<Option<UserAuthInfo>> {
        let user = self.enforce_authentication(token).await?;

        self.access.check(user.as_ref(), tool)?;

        if let Some(user) = &user {
            self.check_rate_limit_result(user, tool)?;
        }

        let metadata_patterns = tool
            .security
            .as_ref()
            .and_then(|s| s.sanitizer_patterns.as_deref())
            .unwrap_or(&[]);
        self.sanitizer.check(&tool.name, &call.arguments, metadata_patterns)?;

        Ok(user)
    }

    async fn enforce_authentication(&self, token: Option<&str>) -> GateResult<Option<UserAuthInfo>> {
        if !self.config.require_authentication {
            return match &self.auth {
                Some(auth) => auth.authenticate(token).await,
                None => Ok(None),
            };
        }

        match &self.auth {
            Some(auth) => {
                let user = auth.authenticate(token).await?;
                match user {
                    Some(user) => Ok(Some(user)),
                    None if self.config.allow_unauthenticated_access => Ok(None),
                    None => Err(crate::error::GateError::new(
                        crate::error::GateErrorKind::AuthenticationError,
                        "Authentication required",
                    )),
                }
            }
            None => Err(crate::error::GateError::new(
                crate::error::GateErrorKind::ConfigError,
                "require_authentication is set but no auth manager is configured",
            )),
        }
    }

    /// Finds the applicable rate limit and checks it, only called when the
    /// user is authenticated per spec.md §4.8 step 3. Priority order:
    /// role+tool, role+wildcard, toolAccess+tool, toolAccess+wildcard, tool
    /// metadata, then the configured default.
    pub fn check_rate_limit_result(&self, user: &UserAuthInfo, tool: &Tool) -> GateResult<()> {
        let Some((limit, source)) = self.resolve_rate_limit(user, tool) else {
            return Ok(());
        };
        let check = self.rate_limiter.check(&user.user_id, &tool.name, source, limit);
        if check.allowed {
            Ok(())
        } else {
            let time_left_ms = check.time_left.map(|d| d.as_millis() as u64).unwrap_or(0);
            Err(crate::error::GateError::rate_limited(limit.limit, limit.window_ms, time_left_ms))
        }
    }

    fn resolve_rate_limit(&self, user: &UserAuthInfo, tool: &Tool) -> Option<(RateLimit, &'static str)> {
        let roles: Vec<&str> = user
            .role
            .iter()
            .map(|s| s.as_str())
            .chain(user.roles.iter().map(|s| s.as_str()))
            .collect();

        for role in &roles {
            if let Some(limit) = self
                .config
                .access_policy
                .roles
                .get(*role)
                .and_then(|block| block.tool_rate_limits.get(&tool.name))
            {
                return Some((*limit, "role+tool"));
            }
        }
        for role in &roles {
            if let Some(limit) = self
                .config
                .access_policy
                .roles
                .get(*role)
                .and_then(|block| block.rate_limit)
            {
                return Some((limit, "role+wildcard"));
            }
        }
        if let Some(limit) = self
            .config
            .access_policy
            .per_tool
            .get(&tool.name)
            .and_then(|block| block.rate_limit)
        {
            return Some((limit, "toolAccess+tool"));
        }
        if let Some(limit) = self
            .config
            .access_policy
            .wildcard
            .as_ref()
            .and_then(|block| block.rate_limit)
        {
            return Some((limit, "toolAccess+wildcard"));
        }
        if let Some(limit) = tool.security.as_ref().and_then(|s| s.rate_limit) {
            return Some((limit, "tool"));
        }
        self.config.default_rate_limit.map(|limit| (limit, "default"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> Tool {
        Tool::new(name, "brief", "full", serde_json::json!({}))
    }

    #[tokio::test]
    async fn unauthenticated_call_denied_when_required() {
        let config = SecurityConfig {
            require_authentication: true,
            auth: Some(AuthConfig::jwt("a-real-secret-value")),
            access_policy: AccessPolicy {
                default_policy: DefaultPolicy::AllowAll,
                ..Default::default()
            },
            ..Default::default()
        };
        let gate = SecurityGate::new(config, EventBus::new()).unwrap();
        let call = ToolCall {
            id: "1".into(),
            name: "bash".into(),
            arguments: serde_json::json!({"command": "echo hi"}),
        };
        let result = gate.check(None, &tool("bash"), &call).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn dangerous_args_rejected_by_sanitizer() {
        let config = SecurityConfig {
            access_policy: AccessPolicy {
                default_policy: DefaultPolicy::AllowAll,
                ..Default::default()
            },
            ..Default::default()
        };
        let gate = SecurityGate::new(config, EventBus::new()).unwrap();
        let call = ToolCall {
            id: "1".into(),
            name: "bash".into(),
            arguments: serde_json::json!({"command": "rm -rf /"}),
        };
        let result = gate.check(None, &tool("bash"), &call).await;
        assert!(result.is_err());
    }
}
