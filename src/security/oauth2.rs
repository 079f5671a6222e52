use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::PublishError;
use crate::security::credentials::CredentialSpec;
use crate::security::token_cache::{FetchedToken, TokenCache, TokenExchange};
use crate::transport::HttpRequest;

/// Token endpoint response for the client-credentials grant.
#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Performs the OAuth2 client-credentials exchange over HTTP. Plugged into
/// the [`TokenCache`] as its [`TokenExchange`] implementation.
#[derive(Debug, Clone)]
pub struct TokenEndpointClient {
    http: Client,
}

impl TokenEndpointClient {
    pub fn new() -> Result<Self, PublishError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| PublishError::InternalError(format!("building token http client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl TokenExchange for TokenEndpointClient {
    async fn exchange(&self, spec: &CredentialSpec) -> Result<FetchedToken, PublishError> {
        let CredentialSpec::Oauth2 {
            client_id,
            client_secret,
            token_endpoint,
            scope,
        } = spec
        else {
            return Err(PublishError::InvalidRequest(
                "token exchange requires oauth2 credentials".into(),
            ));
        };

        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
        ];
        if let Some(scope) = scope {
            form.push(("scope", scope.as_str()));
        }

        debug!(token_endpoint = %token_endpoint, client_id = %client_id, "exchanging client credentials");

        let response = self
            .http
            .post(token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| PublishError::TokenInvalid {
                reason: format!("token endpoint unreachable: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::TokenInvalid {
                reason: format!("token endpoint returned {status}: {body}"),
            });
        }

        let parsed: TokenEndpointResponse =
            response.json().await.map_err(|e| PublishError::TokenInvalid {
                reason: format!("malformed token endpoint response: {e}"),
            })?;

        Ok(FetchedToken {
            access_token: parsed.access_token,
            expires_in: parsed.expires_in.map(std::time::Duration::from_secs),
        })
    }
}

/// Decorates requests with `Authorization: Bearer <token>`, refreshing the
/// token through the cache as needed. The fetch for one credential never
/// blocks requests using other credentials.
pub struct OAuth2Authenticator {
    tokens: Arc<TokenCache>,
}

impl OAuth2Authenticator {
    pub fn new(tokens: Arc<TokenCache>) -> Self {
        Self { tokens }
    }

    pub async fn authenticate(
        &self,
        mut request: HttpRequest,
        spec: &CredentialSpec,
    ) -> Result<HttpRequest, PublishError> {
        let token = self.tokens.get(spec).await?;
        let value = format!("Bearer {}", token.value);
        let value = reqwest::header::HeaderValue::from_str(&value)
            .map_err(|e| PublishError::TokenInvalid {
                reason: format!("token is not a valid header value: {e}"),
            })?;
        request.headers.insert(AUTHORIZATION, value);
        Ok(request)
    }
}
