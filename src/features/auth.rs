// auth.rs - Development-mode authentication stub
// Accepts any non-empty credentials outside production and hands out opaque
// session tokens held in a TTL cache. Production deployments get
// NOT_IMPLEMENTED until a real identity provider is wired in.

use std::time::Duration;

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::config::Environment;
use crate::core::error::ApiError;

const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user: AuthUser,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

pub struct AuthSessions {
    environment: Environment,
    sessions: Cache<String, AuthUser>,
}

impl std::fmt::Debug for AuthSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSessions")
            .field("environment", &self.environment)
            .field("active_sessions", &self.sessions.entry_count())
            .finish()
    }
}

impl AuthSessions {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            sessions: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(SESSION_TTL)
                .build(),
        }
    }

    fn ensure_dev_mode(&self) -> Result<(), ApiError> {
        if self.environment.is_production() {
            return Err(ApiError::NotImplemented(
                "Authentication is not implemented for production deployments".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn login(&self, request: LoginRequest) -> Result<LoginResponse, ApiError> {
        let email = request.email.as_deref().map(str::trim).unwrap_or_default();
        let password = request.password.as_deref().unwrap_or_default();
        if email.is_empty() || password.is_empty() {
            return Err(ApiError::MissingCredentials);
        }
        self.ensure_dev_mode()?;

        let user = AuthUser {
            id: format!("dev-{}", Uuid::new_v5(&Uuid::NAMESPACE_OID, email.as_bytes())),
            email: email.to_string(),
            name: email.split('@').next().unwrap_or(email).to_string(),
            role: "admin".to_string(),
        };
        let token = format!("dev.{}", Uuid::new_v4().simple());
        self.sessions.insert(token.clone(), user.clone()).await;
        tracing::info!(email = %user.email, "issued development session");

        Ok(LoginResponse {
            token,
            user,
            expires_in: SESSION_TTL.as_secs(),
        })
    }

    /// Resolves a bearer token issued by [`login`](Self::login).
    pub async fn authenticate(&self, bearer: Option<&str>) -> Result<AuthUser, ApiError> {
        self.ensure_dev_mode()?;
        let token = bearer
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;
        self.sessions
            .get(token)
            .await
            .ok_or_else(|| ApiError::Unauthorized("Invalid or expired token".to_string()))
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let value = header?.trim();
    let (scheme, token) = value.split_once(' ')?;
    (scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty()).then(|| token.trim())
}
