//! Firebase ID token authentication.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use amp_firestore::UserIdentity;

use crate::error::ApiError;
use crate::state::AppState;

const GOOGLE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

const FIREBASE_ISSUER_PREFIX: &str = "https://securetoken.google.com/";

const JWKS_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Firebase project used as issuer suffix and audience.
    pub project_id: String,
    pub jwks_url: String,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, std::env::VarError> {
        let project_id = std::env::var("AUTH_PROJECT_ID")
            .or_else(|_| std::env::var("GCP_PROJECT_ID"))?;
        Ok(Self {
            project_id,
            jwks_url: GOOGLE_JWKS_URL.to_string(),
        })
    }
}

/// Claims carried by a Firebase ID token.
#[derive(Debug, Clone, Deserialize)]
pub struct FirebaseClaims {
    pub sub: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Verifies bearer tokens and returns the caller's identity.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserIdentity, ApiError>;
}

/// Caller identity, resolved from the `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserIdentity);

impl AuthUser {
    pub fn uid(&self) -> &str {
        &self.0.uid
    }

    pub fn identity(&self) -> &UserIdentity {
        &self.0
    }
}

impl From<FirebaseClaims> for UserIdentity {
    fn from(claims: FirebaseClaims) -> Self {
        Self {
            uid: claims.sub,
            name: claims.name,
            email: claims.email,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    n: String,
    e: String,
}

#[derive(Default)]
struct SigningKeys {
    by_kid: HashMap<String, DecodingKey>,
    fetched_at: Option<Instant>,
}

impl SigningKeys {
    fn is_stale(&self) -> bool {
        self.fetched_at
            .map_or(true, |at| at.elapsed() > JWKS_CACHE_TTL)
    }
}

/// Google signing keys, refetched hourly or when a token names an unseen key.
pub struct JwksCache {
    http: Client,
    signing: RwLock<SigningKeys>,
    config: AuthConfig,
}

impl JwksCache {
    /// Keys are fetched lazily on the first verification.
    pub fn new(config: AuthConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            http,
            signing: RwLock::new(SigningKeys::default()),
            config,
        })
    }

    async fn fetch_signing_keys(
        &self,
    ) -> Result<SigningKeys, Box<dyn std::error::Error + Send + Sync>> {
        let set: JwkSet = self
            .http
            .get(&self.config.jwks_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let by_kid = set
            .keys
            .into_iter()
            .map(|jwk| Ok((jwk.kid, DecodingKey::from_rsa_components(&jwk.n, &jwk.e)?)))
            .collect::<Result<HashMap<_, _>, jsonwebtoken::errors::Error>>()?;

        Ok(SigningKeys {
            by_kid,
            fetched_at: Some(Instant::now()),
        })
    }

    async fn signing_key(&self, kid: &str) -> Option<DecodingKey> {
        {
            let signing = self.signing.read().await;
            if !signing.is_stale() {
                if let Some(key) = signing.by_kid.get(kid) {
                    return Some(key.clone());
                }
            }
        }

        match self.fetch_signing_keys().await {
            Ok(fresh) => {
                debug!(count = fresh.by_kid.len(), "Fetched token signing keys");
                *self.signing.write().await = fresh;
            }
            Err(e) => warn!("Could not fetch token signing keys: {}", e),
        }

        self.signing.read().await.by_kid.get(kid).cloned()
    }

    /// Check signature, issuer, audience and expiry of an ID token.
    pub async fn verify_token(&self, token: &str) -> Result<FirebaseClaims, ApiError> {
        let kid = decode_header(token)
            .map_err(|e| ApiError::unauthorized(format!("Malformed token: {}", e)))?
            .kid
            .ok_or_else(|| ApiError::unauthorized("Token has no key id"))?;

        let key = self
            .signing_key(&kid)
            .await
            .ok_or_else(|| ApiError::unauthorized("Token signed with an unknown key"))?;

        let mut rules = Validation::new(Algorithm::RS256);
        rules.set_issuer(&[format!("{FIREBASE_ISSUER_PREFIX}{}", self.config.project_id)]);
        rules.set_audience(&[&self.config.project_id]);

        let claims = decode::<FirebaseClaims>(token, &key, &rules)
            .map_err(|e| ApiError::unauthorized(format!("Token rejected: {}", e)))?
            .claims;

        if claims.sub.trim().is_empty() {
            return Err(ApiError::unauthorized("Token has no subject"));
        }

        Ok(claims)
    }
}

#[async_trait]
impl TokenVerifier for JwksCache {
    async fn verify(&self, token: &str) -> Result<UserIdentity, ApiError> {
        self.verify_token(token).await.map(UserIdentity::from)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::unauthorized("Missing or invalid Authorization header"))?;

        state.verifier.verify(bearer.token()).await.map(AuthUser)
    }
}

/// Reject callers that are not configured as admins.
pub fn require_admin(state: &AppState, user: &AuthUser) -> Result<(), ApiError> {
    if state.config.is_admin(user.uid()) {
        Ok(())
    } else {
        Err(ApiError::forbidden("Admin access required"))
    }
}
