//! Access control: role/scope/key rule evaluation with a default policy (C6).

use crate::error::{GateError, GateErrorKind, GateResult};
use crate::events::EventBus;
use crate::llm::{Tool, ToolSecurity};
use crate::security::auth::UserAuthInfo;
use crate::security::rate_limit::RateLimit;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct AccessBlock {
    pub allow: Option<bool>,
    pub allowed_roles: HashSet<String>,
    pub allowed_scopes: HashSet<String>,
    pub allowed_api_keys: HashSet<String>,
    pub rate_limit: Option<RateLimit>,
}

impl AccessBlock {
    fn matches(&self, user: &UserAuthInfo) -> bool {
        if self.allow == Some(true) {
            return true;
        }
        if let Some(role) = &user.role {
            if self.allowed_roles.contains(role) {
                return true;
            }
        }
        if user.roles.iter().any(|r| self.allowed_roles.contains(r)) {
            return true;
        }
        if user.scopes.iter().any(|s| self.allowed_scopes.contains(s)) {
            return true;
        }
        if let Some(key) = &user.api_key {
            if self.allowed_api_keys.contains(key) {
                return true;
            }
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultPolicy {
    #[default]
    DenyAll,
    AllowAll,
}

#[derive(Debug, Clone, Default)]
pub struct RoleBlock {
    pub allowed_tools: HashSet<String>,
    /// Per-(role, tool) rate limit override — highest priority in the chain.
    pub tool_rate_limits: HashMap<String, RateLimit>,
    /// Rate limit applied to any tool this role may call, absent a
    /// tool-specific override above.
    pub rate_limit: Option<RateLimit>,
}

#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    pub default_policy: DefaultPolicy,
    pub per_tool: HashMap<String, AccessBlock>,
    pub wildcard: Option<AccessBlock>,
    pub roles: HashMap<String, RoleBlock>,
}

pub struct AccessControl {
    policy: AccessPolicy,
    events: EventBus,
}

impl AccessControl {
    pub fn new(policy: AccessPolicy, events: EventBus) -> Self {
        Self { policy, events }
    }

    /// Evaluates `(user, tool)` per spec.md §4.5's three-step order.
    pub fn check(&self, user: Option<&UserAuthInfo>, tool: &Tool) -> GateResult<()> {
        if let Some(security) = tool.security.as_ref() {
            if let Err(reason) = self.check_required(security, user) {
                return self.deny(tool, &reason);
            }
        }

        let tool_allows = user
            .map(|u| {
                self.policy
                    .per_tool
                    .get(&tool.name)
                    .map(|block| block.matches(u))
                    .unwrap_or(false)
            })
            .unwrap_or(false);
        let wildcard_allows = user
            .map(|u| self.policy.wildcard.as_ref().map(|b| b.matches(u)).unwrap_or(false))
            .unwrap_or(false);
        let role_allows = user
            .map(|u| self.role_block_allows(u, &tool.name))
            .unwrap_or(false);

        let tool_block = self.policy.per_tool.get(&tool.name);
        let explicit_deny = matches!(tool_block.and_then(|b| b.allow), Some(false));

        let allowed = match self.policy.default_policy {
            DefaultPolicy::DenyAll => tool_allows || wildcard_allows || role_allows,
            DefaultPolicy::AllowAll => !explicit_deny,
        };

        if !allowed {
            return self.deny(tool, "denied by access policy");
        }

        self.events.emit(
            "access:granted",
            serde_json::json!({"tool": tool.name, "userId": user.map(|u| u.user_id.clone())}),
        );
        Ok(())
    }

    fn role_block_allows(&self, user: &UserAuthInfo, tool_name: &str) -> bool {
        let roles: Vec<&str> = user
            .role
            .iter()
            .map(|s| s.as_str())
            .chain(user.roles.iter().map(|s| s.as_str()))
            .collect();
        roles.iter().any(|role| {
            self.policy
                .roles
                .get(*role)
                .map(|block| block.allowed_tools.contains(tool_name))
                .unwrap_or(false)
        })
    }

    fn check_required(&self, security: &ToolSecurity, user: Option<&UserAuthInfo>) -> Result<(), String> {
        if security.required_role.is_none() && security.required_scopes.is_none() {
            return Ok(());
        }
        let user = user.ok_or_else(|| "authentication required for this tool".to_string())?;
        if let Some(required_role) = &security.required_role {
            let has_role = user.role.as_deref() == Some(required_role.as_str())
                || user.roles.iter().any(|r| r == required_role);
            if !has_role {
                return Err(format!("missing required role '{required_role}'"));
            }
        }
        if let Some(required_scopes) = &security.required_scopes {
            let missing: Vec<&str> = required_scopes
                .iter()
                .filter(|s| !user.scopes.iter().any(|owned| owned == *s))
                .map(|s| s.as_str())
                .collect();
            if !missing.is_empty() {
                return Err(format!("missing required scopes: {}", missing.join(", ")));
            }
        }
        Ok(())
    }

    fn deny(&self, tool: &Tool, reason: &str) -> GateResult<()> {
        self.events.emit(
            "access:denied",
            serde_json::json!({"tool": tool.name, "reason": reason}),
        );
        Err(GateError::new(GateErrorKind::AccessDenied, reason.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> Tool {
        Tool::new(name, "brief", "full", serde_json::json!({}))
    }

    #[test]
    fn deny_all_default_rejects_unlisted_tool() {
        let ac = AccessControl::new(AccessPolicy::default(), EventBus::new());
        let user = UserAuthInfo::new("u1");
        assert!(ac.check(Some(&user), &tool("anything")).is_err());
    }

    #[test]
    fn allow_all_default_allows_unlisted_tool() {
        let policy = AccessPolicy {
            default_policy: DefaultPolicy::AllowAll,
            ..Default::default()
        };
        let ac = AccessControl::new(policy, EventBus::new());
        let user = UserAuthInfo::new("u1");
        assert!(ac.check(Some(&user), &tool("anything")).is_ok());
    }

    #[test]
    fn allow_all_default_still_honors_explicit_tool_deny() {
        let mut per_tool = HashMap::new();
        per_tool.insert(
            "danger".to_string(),
            AccessBlock {
                allow: Some(false),
                ..Default::default()
            },
        );
        let policy = AccessPolicy {
            default_policy: DefaultPolicy::AllowAll,
            per_tool,
            ..Default::default()
        };
        let ac = AccessControl::new(policy, EventBus::new());
        let user = UserAuthInfo::new("u1");
        assert!(ac.check(Some(&user), &tool("danger")).is_err());
    }

    #[test]
    fn unauthenticated_user_fails_required_role_check() {
        let mut t = tool("secure");
        t.security = Some(ToolSecurity {
            required_role: Some("admin".to_string()),
            ..Default::default()
        });
        let ac = AccessControl::new(AccessPolicy::default(), EventBus::new());
        assert!(ac.check(None, &t).is_err());
    }

    #[test]
    fn role_block_allows_tool() {
        let mut roles = HashMap::new();
        let mut role_block = RoleBlock::default();
        role_block.allowed_tools.insert("bash".to_string());
        roles.insert("admin".to_string(), role_block);
        let policy = AccessPolicy {
            roles,
            ..Default::default()
        };
        let ac = AccessControl::new(policy, EventBus::new());
        let mut user = UserAuthInfo::new("u1");
        user.role = Some("admin".to_string());
        assert!(ac.check(Some(&user), &tool("bash")).is_ok());
    }
}
