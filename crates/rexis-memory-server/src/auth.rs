//! Bearer token authentication
//!
//! Tokens are JWTs signed with an asymmetric key published in a JWKS document.
//! The document is cached for an hour and fetched again early when a token
//! names a `kid` the cache does not know (key rotation).

use crate::settings::Settings;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long a fetched JWKS document is trusted
pub const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Minimum time between JWKS fetches triggered by an unknown `kid`
pub const JWKS_MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(30);

/// Authentication failures; all map to 401
#[derive(Debug, Error)]
pub enum AuthError {
    /// No `Authorization` header
    #[error("missing bearer token")]
    MissingToken,

    /// Header is not `Bearer <token>`
    #[error("malformed Authorization header")]
    MalformedHeader,

    /// Token header has no `kid`
    #[error("token has no key id")]
    MissingKeyId,

    /// Symmetric algorithms cannot be verified against a JWKS
    #[error("unsupported token algorithm {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    /// `kid` not in the JWKS, even after a refetch
    #[error("unknown signing key '{0}'")]
    UnknownKey(String),

    /// Fetching the JWKS failed
    #[error("failed to fetch signing keys: {0}")]
    Jwks(#[from] reqwest::Error),

    /// Signature, claims or structure are invalid
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

/// Claims every accepted token carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject
    pub sub: String,

    /// Expiry (unix seconds)
    pub exp: u64,

    /// Issued at (unix seconds)
    pub iat: u64,

    /// Space-separated scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Validates bearer tokens against a remote JWKS
pub struct JwtAuthenticator {
    jwks_url: String,
    issuer: Option<String>,
    audience: Option<String>,
    client: reqwest::Client,
    cache: RwLock<Option<CachedJwks>>,
    cache_ttl: Duration,
    min_refetch_interval: Duration,
}

impl JwtAuthenticator {
    /// Create an authenticator for a JWKS URL
    pub fn new(jwks_url: impl Into<String>) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            issuer: None,
            audience: None,
            client: reqwest::Client::new(),
            cache: RwLock::new(None),
            cache_ttl: JWKS_CACHE_TTL,
            min_refetch_interval: JWKS_MIN_REFETCH_INTERVAL,
        }
    }

    /// Override the minimum interval between unknown-`kid` refetches
    pub fn with_min_refetch_interval(mut self, interval: Duration) -> Self {
        self.min_refetch_interval = interval;
        self
    }

    /// Require this issuer
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Require this audience
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Build from server settings
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let jwks_url = settings
            .jwks_url()
            .ok_or_else(|| anyhow::anyhow!("no JWKS URL configured"))?;

        let mut authenticator = Self::new(jwks_url);
        if let Some(issuer) = &settings.oauth2_issuer_url {
            authenticator = authenticator.with_issuer(issuer.clone());
        }
        if let Some(audience) = &settings.oauth2_audience {
            authenticator = authenticator.with_audience(audience.clone());
        }
        Ok(authenticator)
    }

    /// Verify a token and return its claims
    pub async fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        let header = decode_header(token)?;
        if matches!(header.alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(AuthError::UnsupportedAlgorithm(header.alg));
        }
        let kid = header.kid.ok_or(AuthError::MissingKeyId)?;

        let jwk = self.find_key(&kid).await?;
        let key = DecodingKey::from_jwk(&jwk)?;

        let mut validation = Validation::new(header.alg);
        validation.set_required_spec_claims(&["exp", "sub"]);
        match &self.issuer {
            Some(issuer) => validation.set_issuer(&[issuer]),
            None => validation.iss = None,
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = decode::<Claims>(token, &key, &validation)?;
        Ok(data.claims)
    }

    async fn find_key(&self, kid: &str) -> Result<Jwk, AuthError> {
        {
            let cache = self.cache.read();
            if let Some(cached) = cache.as_ref() {
                let age = cached.fetched_at.elapsed();
                if age < self.cache_ttl {
                    if let Some(jwk) = cached.keys.find(kid) {
                        return Ok(jwk.clone());
                    }
                    if age < self.min_refetch_interval {
                        tracing::debug!(kid, "unknown key id, JWKS fetched too recently to refresh");
                        return Err(AuthError::UnknownKey(kid.to_string()));
                    }
                    tracing::debug!(kid, "unknown key id, refreshing JWKS");
                }
            }
        }

        let keys = self.fetch_jwks().await?;
        let jwk = keys.find(kid).cloned();
        *self.cache.write() = Some(CachedJwks {
            keys,
            fetched_at: Instant::now(),
        });

        jwk.ok_or_else(|| AuthError::UnknownKey(kid.to_string()))
    }

    async fn fetch_jwks(&self) -> Result<JwkSet, AuthError> {
        let keys = self
            .client
            .get(&self.jwks_url)
            .send()
            .await?
            .error_for_status()?
            .json::<JwkSet>()
            .await?;

        tracing::debug!(url = %self.jwks_url, keys = keys.keys.len(), "fetched JWKS");
        Ok(keys)
    }
}

/// Axum middleware rejecting requests without a valid bearer token
///
/// Accepted claims are stored in the request extensions.
pub async fn require_bearer(
    State(authenticator): State<Arc<JwtAuthenticator>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(&request) {
        Ok(token) => token.to_string(),
        Err(e) => return unauthorized(e),
    };

    match authenticator.validate(&token).await {
        Ok(claims) => {
            tracing::debug!(sub = %claims.sub, "authenticated request");
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => unauthorized(e),
    }
}

fn bearer_token(request: &Request) -> Result<&str, AuthError> {
    let value = request
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?;
    let value = value.to_str().map_err(|_| AuthError::MalformedHeader)?;

    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MalformedHeader)
}

fn unauthorized(error: AuthError) -> Response {
    tracing::debug!(error = %error, "rejected request");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        Json(serde_json::json!({"error": "unauthorized", "detail": error.to_string()})),
    )
        .into_response()
}
