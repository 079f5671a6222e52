use std::sync::Arc;

use chrono::Utc;
use tracing::trace;

use crate::error::PublishError;
use crate::security::credentials::CredentialSpec;
use crate::security::oauth2::OAuth2Authenticator;
use crate::security::token_cache::TokenCache;
use crate::security::{aws_sigv4, azure_monitor, azure_sasl};
use crate::transport::HttpRequest;

/// Attaches authentication to outbound requests according to the
/// connection's [`CredentialSpec`]. One closed match, no strategy lookup:
/// a connection either has no credentials (passthrough), a cached bearer
/// token, or a per-request HMAC signature.
pub struct RequestAuthenticator {
    credentials: Option<CredentialSpec>,
    oauth2: OAuth2Authenticator,
    tokens: Arc<TokenCache>,
}

impl RequestAuthenticator {
    pub fn new(credentials: Option<CredentialSpec>, tokens: Arc<TokenCache>) -> Self {
        Self {
            credentials,
            oauth2: OAuth2Authenticator::new(tokens.clone()),
            tokens,
        }
    }

    pub fn credentials(&self) -> Option<&CredentialSpec> {
        self.credentials.as_ref()
    }

    /// Decorate `request` for dispatch. Signatures are computed over the
    /// final request, so any path/query rewriting must happen before this.
    pub async fn authenticate(&self, request: HttpRequest) -> Result<HttpRequest, PublishError> {
        let Some(spec) = &self.credentials else {
            return Ok(request);
        };

        trace!(uri = %request.uri, "authenticating outbound request");
        match spec {
            CredentialSpec::Oauth2 { .. } => self.oauth2.authenticate(request, spec).await,
            CredentialSpec::AwsSigv4 {
                access_key,
                secret_key,
                region,
                service,
                double_encode,
                canonical_header_names,
            } => {
                let mut request = request;
                let params = aws_sigv4::SigV4Params {
                    access_key,
                    secret_key,
                    region,
                    service,
                    double_encode: *double_encode,
                    extra_headers: canonical_header_names,
                };
                aws_sigv4::sign(&mut request, &params, Utc::now())?;
                Ok(request)
            }
            CredentialSpec::AzureMonitor {
                workspace_id,
                shared_key_base64,
            } => {
                let mut request = request;
                azure_monitor::sign(&mut request, workspace_id, shared_key_base64, Utc::now())?;
                Ok(request)
            }
            CredentialSpec::AzureSasl {
                shared_key_name,
                shared_key_base64,
                endpoint,
                ttl_secs,
            } => {
                let mut request = request;
                azure_sasl::sign(
                    &mut request,
                    shared_key_name,
                    shared_key_base64,
                    endpoint,
                    *ttl_secs,
                    Utc::now(),
                )?;
                Ok(request)
            }
        }
    }

    /// Drop any cached token for this connection's credentials, forcing a
    /// fresh exchange on the next request. Called after the remote endpoint
    /// rejected a bearer-authenticated request.
    pub async fn invalidate_token(&self) {
        if let Some(spec @ CredentialSpec::Oauth2 { .. }) = &self.credentials {
            self.tokens.invalidate(spec).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use base64::Engine;
    use reqwest::Method;
    use url::Url;

    use crate::security::token_cache::{FetchedToken, TokenExchange};
    use crate::security::B64_URL_FORGIVING;

    struct StaticToken;

    #[async_trait]
    impl TokenExchange for StaticToken {
        async fn exchange(&self, _: &CredentialSpec) -> Result<FetchedToken, PublishError> {
            let header = B64_URL_FORGIVING.encode(br#"{"alg":"none"}"#);
            let payload = B64_URL_FORGIVING.encode(br#"{"sub":"svc"}"#);
            Ok(FetchedToken {
                access_token: format!("{header}.{payload}.sig"),
                expires_in: Some(std::time::Duration::from_secs(3600)),
            })
        }
    }

    fn authenticator(credentials: Option<CredentialSpec>) -> RequestAuthenticator {
        RequestAuthenticator::new(credentials, Arc::new(TokenCache::new(Arc::new(StaticToken))))
    }

    fn request() -> HttpRequest {
        HttpRequest::new(
            Method::POST,
            Url::parse("https://sink.example.com/events").unwrap(),
        )
        .with_body(b"{}".to_vec())
    }

    #[tokio::test]
    async fn no_credentials_is_passthrough() {
        let signed = authenticator(None).authenticate(request()).await.unwrap();
        assert!(signed.headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn oauth2_attaches_a_bearer_token() {
        let auth = authenticator(Some(CredentialSpec::Oauth2 {
            client_id: "cid".into(),
            client_secret: "s".into(),
            token_endpoint: "https://login.example.com/token".into(),
            scope: None,
        }));
        let signed = auth.authenticate(request()).await.unwrap();
        let value = signed.headers.get("authorization").unwrap().to_str().unwrap();
        assert!(value.starts_with("Bearer "));
    }

    #[tokio::test]
    async fn aws_credentials_produce_a_sigv4_authorization() {
        let auth = authenticator(Some(CredentialSpec::AwsSigv4 {
            access_key: "ak".into(),
            secret_key: "sk".into(),
            region: "us-east-1".into(),
            service: "iam".into(),
            double_encode: false,
            canonical_header_names: vec![],
        }));
        let signed = auth.authenticate(request()).await.unwrap();
        let value = signed.headers.get("authorization").unwrap().to_str().unwrap();
        assert!(value.starts_with("AWS4-HMAC-SHA256 Credential=ak/"));
        assert!(signed.headers.get("x-amz-date").is_some());
    }

    #[tokio::test]
    async fn azure_monitor_credentials_produce_a_shared_key_authorization() {
        let auth = authenticator(Some(CredentialSpec::AzureMonitor {
            workspace_id: "ws".into(),
            shared_key_base64: "aGk=".into(),
        }));
        let signed = auth.authenticate(request()).await.unwrap();
        let value = signed.headers.get("authorization").unwrap().to_str().unwrap();
        assert!(value.starts_with("SharedKey ws:"));
        assert!(signed.headers.get("x-ms-date").is_some());
    }

    #[tokio::test]
    async fn azure_sasl_credentials_produce_a_sas_authorization() {
        let auth = authenticator(Some(CredentialSpec::AzureSasl {
            shared_key_name: "root".into(),
            shared_key_base64: "aGk=".into(),
            endpoint: "https://hub.servicebus.windows.net/events".into(),
            ttl_secs: 300,
        }));
        let signed = auth.authenticate(request()).await.unwrap();
        let value = signed.headers.get("authorization").unwrap().to_str().unwrap();
        assert!(value.starts_with("SharedAccessSignature sr="));
    }

    #[tokio::test]
    async fn invalidate_token_only_touches_oauth2_credentials() {
        let auth = authenticator(Some(CredentialSpec::AzureMonitor {
            workspace_id: "ws".into(),
            shared_key_base64: "aGk=".into(),
        }));
        // No cached token exists for HMAC credentials; this must not panic.
        auth.invalidate_token().await;
    }
}
