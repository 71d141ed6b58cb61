//! Auth manager: token verification, issuance, and a validation cache (C5).

use crate::error::{GateError, GateErrorKind, GateResult};
use crate::events::EventBus;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

const PLACEHOLDER_SECRETS: &[&str] = &["secret", "changeme", "your-secret-key", ""];

/// Authenticated caller identity, as resolved by an [`AuthManager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAuthInfo {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl UserAuthInfo {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: None,
            roles: Vec::new(),
            scopes: Vec::new(),
            api_key: None,
            expires_at: None,
            metadata: HashMap::new(),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| exp <= chrono::Utc::now())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    Jwt,
    ApiKey,
    Custom,
}

pub type CustomAuthenticator = Arc<dyn Fn(&str) -> Option<UserAuthInfo> + Send + Sync>;

#[derive(Clone)]
pub struct AuthConfig {
    pub kind: AuthKind,
    pub secret: Option<String>,
    pub custom_authenticator: Option<CustomAuthenticator>,
}

impl AuthConfig {
    pub fn jwt(secret: impl Into<String>) -> Self {
        Self {
            kind: AuthKind::Jwt,
            secret: Some(secret.into()),
            custom_authenticator: None,
        }
    }

    pub fn custom(authenticator: CustomAuthenticator) -> Self {
        Self {
            kind: AuthKind::Custom,
            secret: None,
            custom_authenticator: Some(authenticator),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    scopes: Vec<String>,
    iat: i64,
    exp: i64,
}

/// Verifies/issues tokens and caches successful validations until expiry.
pub struct AuthManager {
    config: RwLock<AuthConfig>,
    cache: RwLock<HashMap<String, UserAuthInfo>>,
    events: EventBus,
}

impl AuthManager {
    pub fn new(config: AuthConfig, events: EventBus) -> GateResult<Self> {
        if config.kind == AuthKind::Jwt {
            Self::validate_secret(config.secret.as_deref())?;
        }
        Ok(Self {
            config: RwLock::new(config),
            cache: RwLock::new(HashMap::new()),
            events,
        })
    }

    fn validate_secret(secret: Option<&str>) -> GateResult<()> {
        match secret {
            None => Err(GateError::new(GateErrorKind::ConfigError, "JWT auth requires a secret")),
            Some(s) if PLACEHOLDER_SECRETS.contains(&s) => Err(GateError::new(
                GateErrorKind::ConfigError,
                "refusing to use a known placeholder JWT secret",
            )),
            Some(_) => Ok(()),
        }
    }

    /// Returns `None` (not an error) when `token` is absent, per spec.
    pub async fn authenticate(&self, token: Option<&str>) -> GateResult<Option<UserAuthInfo>> {
        let token = match token {
            Some(t) => t,
            None => return Ok(None),
        };

        {
            let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
            if let Some(user) = cache.get(token) {
                if !user.is_expired() {
                    return Ok(Some(user.clone()));
                }
                cache.remove(token);
            }
        }

        let config = self.config.read().unwrap_or_else(|e| e.into_inner()).clone();
        let result = match config.kind {
            AuthKind::Jwt => self.verify_jwt(token, config.secret.as_deref()),
            AuthKind::Custom => config
                .custom_authenticator
                .as_ref()
                .and_then(|auth| auth(token))
                .ok_or_else(|| GateError::new(GateErrorKind::AuthenticationError, "custom authenticator rejected token")),
            AuthKind::ApiKey => Err(GateError::new(
                GateErrorKind::ConfigError,
                "api-key auth type is reserved and not yet implemented",
            )),
        };

        match result {
            Ok(user) => {
                self.cache
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(token.to_string(), user.clone());
                self.events.emit(
                    "user:authenticated",
                    serde_json::json!({"userId": user.user_id}),
                );
                Ok(Some(user))
            }
            Err(err) => {
                self.events.emit(
                    "auth:failed",
                    serde_json::json!({"reason": err.message}),
                );
                Err(err)
            }
        }
    }

    fn verify_jwt(&self, token: &str, secret: Option<&str>) -> GateResult<UserAuthInfo> {
        let secret = secret.ok_or_else(|| GateError::new(GateErrorKind::ConfigError, "JWT auth requires a secret"))?;
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
            .map_err(|e| GateError::new(GateErrorKind::JwtValidationError, e.to_string()))?;
        let claims = data.claims;
        Ok(UserAuthInfo {
            user_id: claims.user_id,
            role: claims.role,
            roles: claims.roles,
            scopes: claims.scopes,
            api_key: None,
            expires_at: chrono::DateTime::from_timestamp(claims.exp, 0),
            metadata: HashMap::new(),
        })
    }

    /// Only valid for `AuthKind::Jwt` with a non-placeholder secret.
    pub fn issue_token(&self, user: &UserAuthInfo, expires_in: chrono::Duration) -> GateResult<String> {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner());
        if config.kind != AuthKind::Jwt {
            return Err(GateError::new(GateErrorKind::ConfigError, "issue_token requires AuthKind::Jwt"));
        }
        let secret = config.secret.as_deref();
        Self::validate_secret(secret)?;
        let secret = secret.expect("validated above");

        let now = chrono::Utc::now();
        let claims = Claims {
            user_id: user.user_id.clone(),
            role: user.role.clone(),
            roles: user.roles.clone(),
            scopes: user.scopes.clone(),
            iat: now.timestamp(),
            exp: (now + expires_in).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
            .map_err(|e| GateError::new(GateErrorKind::JwtSignError, e.to_string()))
    }

    pub async fn validate(&self, token: &str) -> ValidationOutcome {
        match self.authenticate(Some(token)).await {
            Ok(Some(user)) => ValidationOutcome {
                valid: true,
                user: Some(user),
                error: None,
            },
            Ok(None) => ValidationOutcome {
                valid: false,
                user: None,
                error: Some("no token supplied".to_string()),
            },
            Err(err) => ValidationOutcome {
                valid: false,
                user: None,
                error: Some(err.message),
            },
        }
    }

    pub fn clear_cache(&self) {
        self.cache.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn update_secret(&self, new_secret: impl Into<String>) {
        let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
        config.secret = Some(new_secret.into());
        drop(config);
        self.clear_cache();
    }
}

pub struct ValidationOutcome {
    pub valid: bool,
    pub user: Option<UserAuthInfo>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_placeholder_secret_at_construction() {
        let result = AuthManager::new(AuthConfig::jwt("secret"), EventBus::new());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn issue_then_validate_round_trips() {
        let auth = AuthManager::new(AuthConfig::jwt("a-real-secret-value"), EventBus::new()).unwrap();
        let mut user = UserAuthInfo::new("test-user-123");
        user.role = Some("admin".to_string());
        let token = auth.issue_token(&user, chrono::Duration::hours(1)).unwrap();

        let outcome = auth.validate(&token).await;
        assert!(outcome.valid);
        assert_eq!(outcome.user.unwrap().user_id, "test-user-123");
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let auth = AuthManager::new(AuthConfig::jwt("a-real-secret-value"), EventBus::new()).unwrap();
        let user = UserAuthInfo::new("test-user-123");
        let token = auth.issue_token(&user, chrono::Duration::seconds(-10)).unwrap();
        let outcome = auth.validate(&token).await;
        assert!(!outcome.valid);
    }

    #[tokio::test]
    async fn missing_token_returns_none_not_error() {
        let auth = AuthManager::new(AuthConfig::jwt("a-real-secret-value"), EventBus::new()).unwrap();
        assert!(auth.authenticate(None).await.unwrap().is_none());
    }
}
