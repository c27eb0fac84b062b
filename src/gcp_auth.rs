//! OAuth2 bearer tokens from a service-account key.
//!
//! Implements the JWT-bearer grant: sign an RS256 assertion with the key's
//! private key, exchange it at the key's `token_uri`, cache the access
//! token until shortly before expiry. The in-memory [`ServiceAccountKey`]
//! is all that is needed; no credential file is read here.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::credentials::ServiceAccountKey;

const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery.readonly";
const TOKEN_LIFETIME_SECS: u64 = 3600;
/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN_SECS: u64 = 60;

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

struct CachedToken {
    access_token: String,
    expires_at: std::time::Instant,
}

pub struct TokenProvider {
    key: ServiceAccountKey,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(key: ServiceAccountKey, timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            key,
            http,
            cached: Mutex::new(None),
        })
    }

    /// A valid bearer token, fetched or served from cache.
    pub async fn bearer_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > std::time::Instant::now() {
                return Ok(token.access_token.clone());
            }
        }

        let (access_token, expires_in) = self.exchange().await?;
        let margin = Duration::from_secs(EXPIRY_MARGIN_SECS.min(expires_in / 2));
        *cached = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: std::time::Instant::now() + Duration::from_secs(expires_in) - margin,
        });
        Ok(access_token)
    }

    async fn exchange(&self) -> Result<(String, u64)> {
        let assertion = self.signed_assertion()?;
        debug!(token_uri = %self.key.token_uri, "exchanging service-account assertion");

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .context("token exchange request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("token exchange failed with {status}: {body}"));
        }

        let json: serde_json::Value = response.json().await?;
        let access_token = json
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("token response missing access_token"))?
            .to_string();
        let expires_in = json
            .get("expires_in")
            .and_then(|v| v.as_u64())
            .unwrap_or(TOKEN_LIFETIME_SECS);
        Ok((access_token, expires_in))
    }

    fn signed_assertion(&self) -> Result<String> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .context("system clock before epoch")?
            .as_secs();

        let claims = Claims {
            iss: &self.key.client_email,
            scope: BIGQUERY_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };

        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        let encoding_key = jsonwebtoken::EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .context("service-account private key is not a valid RSA PEM")?;
        jsonwebtoken::encode(&header, &claims, &encoding_key).context("failed to sign assertion")
    }
}
