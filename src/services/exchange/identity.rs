//! Confidential-client wiring against the identity provider.
//!
//! Responsibility:
//! - Resolve the token endpoint from the OIDC discovery document, once, at
//!   startup. An unreachable or malformed metadata document is fatal.
//! - Issue the raw OBO request (`grant_type=jwt-bearer`,
//!   `requested_token_use=on_behalf_of`) and classify the outcome.
//!
//! There is exactly one `IdentityClient` per process, built in `app.rs` and
//! shared read-only across request handlers. Rebuilding it per request would
//! re-fetch metadata and discard reqwest's connection pool.

use serde::Deserialize;

use crate::services::exchange::{ExchangeError, UserAssertion};

const GRANT_TYPE_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

#[derive(Debug, Deserialize)]
struct OidcMetadata {
    token_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
}

/// A token fresh from the provider; expiry capping happens in the exchanger.
#[derive(Debug)]
pub struct ProviderToken {
    pub access_token: String,
    pub expires_in_seconds: u64,
}

pub struct IdentityClient {
    http: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    client_secret: String,
}

impl IdentityClient {
    /// Resolve the token endpoint from the provider's discovery document.
    pub async fn discover(
        http: reqwest::Client,
        metadata_address: &str,
        client_id: String,
        client_secret: String,
    ) -> Result<Self, ExchangeError> {
        let metadata: OidcMetadata = http
            .get(metadata_address)
            .send()
            .await
            .map_err(|e| ExchangeError::Provider(format!("metadata fetch failed: {e}")))?
            .error_for_status()
            .map_err(|e| ExchangeError::Provider(format!("metadata fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| ExchangeError::Provider(format!("metadata document invalid: {e}")))?;

        tracing::info!(token_endpoint = %metadata.token_endpoint, "resolved identity provider metadata");

        Ok(Self::with_token_endpoint(
            http,
            metadata.token_endpoint,
            client_id,
            client_secret,
        ))
    }

    /// Build a client against a known token endpoint (tests, or deployments
    /// that pin the endpoint and skip discovery).
    pub fn with_token_endpoint(
        http: reqwest::Client,
        token_endpoint: String,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            http,
            token_endpoint,
            client_id,
            client_secret,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// One OBO round-trip. No retries here: the caller owns retry policy.
    pub async fn exchange_on_behalf_of(
        &self,
        assertion: &UserAssertion,
        scopes: &[String],
    ) -> Result<ProviderToken, ExchangeError> {
        let scope = scopes.join(" ");
        let params = [
            ("grant_type", GRANT_TYPE_JWT_BEARER),
            ("requested_token_use", "on_behalf_of"),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("assertion", assertion.as_str()),
            ("scope", &scope),
        ];

        let resp = self
            .http
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| ExchangeError::Provider(e.to_string()))?;

        let status = resp.status();

        if status.is_success() {
            let token: TokenResponse = resp
                .json()
                .await
                .map_err(|e| ExchangeError::Provider(format!("token response invalid: {e}")))?;

            return Ok(ProviderToken {
                access_token: token.access_token,
                expires_in_seconds: token.expires_in,
            });
        }

        // 4xx with an OAuth error body is a rejection of this assertion;
        // anything else is a provider-side failure.
        if status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(&body) {
                return Err(ExchangeError::Rejected {
                    code: err.error,
                    description: err.error_description,
                });
            }
            return Err(ExchangeError::Rejected {
                code: status.as_u16().to_string(),
                description: body,
            });
        }

        Err(ExchangeError::Provider(format!(
            "token endpoint returned {status}"
        )))
    }
}
