use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::cache::TtlCache;
use crate::core::error::ApiError;
use crate::core::state::AppState;

/// Who is calling and which business (tenant) they act for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub user_id: String,
    pub business_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("No business registered for user {0}")]
    NoBusiness(String),
    #[error("Auth network error: {0}")]
    Network(String),
    #[error("Auth parse error: {0}")]
    Parse(String),
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Credentials, AuthError>;
}

/// Supabase-style auth: the token identifies a user, the `businesses` table
/// maps the user to the business they own.
pub struct HttpAuthBackend {
    http_client: Client,
    base_url: String,
    anon_key: String,
}

#[derive(Debug, Deserialize)]
struct AuthUserResponse {
    id: String,
    email: Option<String>,
    #[serde(default)]
    user_metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BusinessRow {
    id: String,
}

impl HttpAuthBackend {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        }
    }

    async fn fetch_user(&self, token: &str) -> Result<AuthUserResponse, AuthError> {
        let response = self
            .http_client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AuthError::InvalidToken);
        }
        if !response.status().is_success() {
            return Err(AuthError::Network(format!(
                "user lookup returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::Parse(e.to_string()))
    }

    async fn fetch_business(&self, token: &str, user_id: &str) -> Result<String, AuthError> {
        let owner = format!("eq.{user_id}");
        let response = self
            .http_client
            .get(format!("{}/rest/v1/businesses", self.base_url))
            .query(&[("select", "id"), ("user_id", owner.as_str())])
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::Network(format!(
                "business lookup returned {}",
                response.status()
            )));
        }

        let rows: Vec<BusinessRow> = response
            .json()
            .await
            .map_err(|e| AuthError::Parse(e.to_string()))?;

        rows.into_iter()
            .next()
            .map(|row| row.id)
            .ok_or_else(|| AuthError::NoBusiness(user_id.to_string()))
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn resolve(&self, token: &str) -> Result<Credentials, AuthError> {
        let user = self.fetch_user(token).await?;
        let business_id = self.fetch_business(token, &user.id).await?;

        let display_name = user
            .user_metadata
            .get("full_name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or(user.email)
            .unwrap_or_else(|| user.id.clone());

        Ok(Credentials {
            user_id: user.id,
            business_id,
            display_name,
        })
    }
}

/// Fixed token table for local runs and tests.
#[derive(Default)]
pub struct StaticAuthBackend {
    tokens: HashMap<String, Credentials>,
}

impl StaticAuthBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: &str, credentials: Credentials) -> Self {
        self.tokens.insert(token.to_string(), credentials);
        self
    }
}

#[async_trait]
impl AuthBackend for StaticAuthBackend {
    async fn resolve(&self, token: &str) -> Result<Credentials, AuthError> {
        self.tokens.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}

/// Avoids one auth round-trip per request. Concurrent misses for the same
/// token each hit the backend; the results are identical so the last insert
/// wins harmlessly.
pub struct CredentialCache {
    backend: Arc<dyn AuthBackend>,
    cache: TtlCache<String, Credentials>,
}

impl CredentialCache {
    pub fn new(backend: Arc<dyn AuthBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            cache: TtlCache::new(ttl),
        }
    }

    pub async fn resolve(&self, token: &str) -> Result<Credentials, AuthError> {
        if let Some(credentials) = self.cache.get(&token.to_string()).await {
            return Ok(credentials);
        }

        debug!("Credential cache miss, resolving token");
        let credentials = self.backend.resolve(token).await?;
        self.cache.insert(token.to_string(), credentials.clone()).await;
        Ok(credentials)
    }

    pub async fn forget(&self, token: &str) {
        self.cache.invalidate(&token.to_string()).await;
    }
}

/// Extractor for the authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthContext(pub Credentials);

impl AuthContext {
    pub fn business_id(&self) -> &str {
        &self.0.business_id
    }

    pub fn actor_name(&self) -> &str {
        &self.0.display_name
    }
}

pub fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AuthError::MissingToken)?;
        let credentials = state.credentials.resolve(token).await.map_err(|e| {
            warn!("Failed to resolve credentials: {e}");
            e
        })?;
        Ok(Self(credentials))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AuthBackend for CountingBackend {
        async fn resolve(&self, token: &str) -> Result<Credentials, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Credentials {
                user_id: format!("user-{token}"),
                business_id: "biz-1".to_string(),
                display_name: "Ana".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_credential_cache_hits_backend_once() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
        });
        let cache = CredentialCache::new(backend.clone(), Duration::from_secs(60));

        let first = cache.resolve("abc").await.unwrap();
        let second = cache.resolve("abc").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        cache.forget("abc").await;
        cache.resolve("abc").await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_static_backend_rejects_unknown_token() {
        let backend = StaticAuthBackend::new();
        assert!(matches!(
            backend.resolve("nope").await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_http_backend_resolves_user_and_business() {
        let mut server = mockito::Server::new_async().await;
        let user = server
            .mock("GET", "/auth/v1/user")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(
                r#"{"id":"u1","email":"ana@example.com","user_metadata":{"full_name":"Ana Lima"}}"#,
            )
            .create_async()
            .await;
        let business = server
            .mock("GET", "/rest/v1/businesses")
            .match_query(mockito::Matcher::UrlEncoded(
                "user_id".into(),
                "eq.u1".into(),
            ))
            .with_status(200)
            .with_body(r#"[{"id":"biz-9"}]"#)
            .create_async()
            .await;

        let backend = HttpAuthBackend::new(&server.url(), "anon");
        let credentials = backend.resolve("tok").await.unwrap();

        assert_eq!(credentials.user_id, "u1");
        assert_eq!(credentials.business_id, "biz-9");
        assert_eq!(credentials.display_name, "Ana Lima");
        user.assert_async().await;
        business.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_backend_maps_401_to_invalid_token() {
        let mut server = mockito::Server::new_async().await;
        let _user = server
            .mock("GET", "/auth/v1/user")
            .with_status(401)
            .create_async()
            .await;

        let backend = HttpAuthBackend::new(&server.url(), "anon");
        assert!(matches!(
            backend.resolve("bad").await,
            Err(AuthError::InvalidToken)
        ));
    }
}
