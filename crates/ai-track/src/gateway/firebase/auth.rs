use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use super::ServiceAccountKey;
use crate::gateway::{GatewayError, Identity};

const TOKEN_SCOPES: &str =
    "https://www.googleapis.com/auth/cloud-platform https://www.googleapis.com/auth/identitytoolkit";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN: Duration = Duration::from_secs(60);
const JWKS_MAX_AGE: Duration = Duration::from_secs(3600);
const JWKS_MIN_REFRESH: Duration = Duration::from_secs(60);
const MAX_UID_LEN: usize = 128;

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// OAuth2 access tokens for the service account (JWT bearer grant).
pub(crate) struct AccessTokenProvider {
    client_email: String,
    token_uri: String,
    key_id: Option<String>,
    signing_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl AccessTokenProvider {
    pub(crate) fn new(key: &ServiceAccountKey) -> Result<Self, GatewayError> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|err| GatewayError::Credentials(format!("private_key: {err}")))?;

        Ok(Self {
            client_email: key.client_email.clone(),
            token_uri: key.token_uri.clone(),
            key_id: key.private_key_id.clone(),
            signing_key,
            cached: Mutex::new(None),
        })
    }

    pub(crate) async fn access_token(
        &self,
        http: &reqwest::Client,
    ) -> Result<String, GatewayError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let assertion = self.signed_assertion()?;
        let response = http
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Credentials(format!(
                "token exchange returned {status}: {message}"
            )));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(REFRESH_MARGIN);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });

        Ok(token.access_token)
    }

    fn signed_assertion(&self) -> Result<String, GatewayError> {
        let iat = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: TOKEN_SCOPES,
            aud: &self.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key_id.clone();

        jsonwebtoken::encode(&header, &claims, &self.signing_key)
            .map_err(|err| GatewayError::Credentials(format!("unable to sign assertion: {err}")))
    }
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
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

struct CachedKeys {
    fetched_at: Instant,
    keys: HashMap<String, DecodingKey>,
}

/// Verifies Firebase ID tokens against the securetoken JWKS.
///
/// Keys are cached for an hour. A token naming an unknown `kid` (Google
/// rotates signing keys) refetches early, at most once per minute.
pub(crate) struct IdTokenVerifier {
    project_id: String,
    jwks_url: String,
    keys: RwLock<Option<CachedKeys>>,
}

impl IdTokenVerifier {
    pub(crate) fn new(project_id: impl Into<String>, jwks_url: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            jwks_url: jwks_url.into(),
            keys: RwLock::new(None),
        }
    }

    pub(crate) fn issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.project_id)
    }

    pub(crate) async fn verify(
        &self,
        http: &reqwest::Client,
        token: &str,
    ) -> Result<Identity, GatewayError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|err| GatewayError::InvalidToken(err.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(GatewayError::InvalidToken(format!(
                "unexpected signing algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| GatewayError::InvalidToken("token has no key id".to_string()))?;

        let key = self.decoding_key(http, &kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.project_id.as_str()]);
        validation.set_issuer(&[self.issuer()]);
        validation.set_required_spec_claims(&["exp", "iat", "aud", "iss", "sub"]);

        let data = jsonwebtoken::decode::<IdTokenClaims>(token, &key, &validation)
            .map_err(|err| GatewayError::InvalidToken(err.to_string()))?;

        let IdTokenClaims { sub } = data.claims;
        if sub.is_empty() || sub.len() > MAX_UID_LEN {
            return Err(GatewayError::InvalidToken(
                "subject must be a non-empty uid of at most 128 characters".to_string(),
            ));
        }

        Ok(Identity { uid: sub })
    }

    async fn decoding_key(
        &self,
        http: &reqwest::Client,
        kid: &str,
    ) -> Result<DecodingKey, GatewayError> {
        self.key_for(kid, || self.fetch_keys(http)).await
    }

    /// Resolve `kid`, fetching the key set through `fetch` only when the cache
    /// cannot answer. Concurrent callers share a single fetch.
    async fn key_for<F, Fut>(&self, kid: &str, fetch: F) -> Result<DecodingKey, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedKeys, GatewayError>>,
    {
        if let Some(found) = cached_key(self.keys.read().await.as_ref(), kid) {
            return found;
        }

        let mut cached = self.keys.write().await;
        // Another caller may have refreshed the set while this one waited.
        if let Some(found) = cached_key(cached.as_ref(), kid) {
            return found;
        }

        let fresh = fetch().await?;
        let key = fresh.keys.get(kid).cloned();
        *cached = Some(fresh);

        key.ok_or_else(|| unknown_key(kid))
    }

    async fn fetch_keys(&self, http: &reqwest::Client) -> Result<CachedKeys, GatewayError> {
        let response = http.get(&self.jwks_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Backend {
                status: status.as_u16(),
                message: "unable to fetch token signing keys".to_string(),
            });
        }

        let set: JwkSet = response.json().await?;
        let mut keys = HashMap::with_capacity(set.keys.len());
        for jwk in set.keys {
            let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
                .map_err(|err| GatewayError::Decode(format!("jwk '{}': {err}", jwk.kid)))?;
            keys.insert(jwk.kid, key);
        }

        Ok(CachedKeys {
            fetched_at: Instant::now(),
            keys,
        })
    }
}

fn unknown_key(kid: &str) -> GatewayError {
    GatewayError::InvalidToken(format!("unknown signing key '{kid}'"))
}

/// `None` means the key set must be (re)fetched.
///
/// An unknown `kid` only triggers a refetch once the cached set is older than
/// `JWKS_MIN_REFRESH`; before that the token is rejected outright.
fn cached_key(
    cached: Option<&CachedKeys>,
    kid: &str,
) -> Option<Result<DecodingKey, GatewayError>> {
    let keys = cached?;
    let age = keys.fetched_at.elapsed();
    if age >= JWKS_MAX_AGE {
        return None;
    }

    match keys.keys.get(kid) {
        Some(key) => Some(Ok(key.clone())),
        None if age < JWKS_MIN_REFRESH => Some(Err(unknown_key(kid))),
        None => None,
    }
}
