use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::Client;
use tracing::trace;

use crate::config::ConnectionConfig;
use crate::error::PublishError;
use crate::transport::{HttpRequest, HttpResponse};

/// Lowest-level request/response exchange. The pipeline treats this as
/// opaque; TLS, proxying and tunneling are the implementation's business.
#[async_trait]
pub trait Exchange: Send + Sync + 'static {
    async fn exchange(&self, request: HttpRequest) -> Result<HttpResponse, PublishError>;
}

/// Default [`Exchange`] over a shared `reqwest` client. Connection pooling
/// and idle timeouts live here, invisible to callers: an idle connection
/// being reaped between requests never surfaces as a failure.
pub struct ReqwestExchange {
    client: Client,
    omit_body_methods: HashSet<String>,
    via_proxy: bool,
}

impl ReqwestExchange {
    pub fn from_config(config: &ConnectionConfig) -> Result<Self, PublishError> {
        let mut builder = Client::builder().pool_idle_timeout(config.idle_timeout());

        let via_proxy = config.proxy.is_some();
        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| PublishError::InvalidRequest(format!("proxy URL: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| PublishError::InternalError(format!("building http client: {e}")))?;

        Ok(Self {
            client,
            omit_body_methods: config
                .omit_body_methods
                .iter()
                .map(|m| m.to_ascii_uppercase())
                .collect(),
            via_proxy,
        })
    }
}

#[async_trait]
impl Exchange for ReqwestExchange {
    async fn exchange(&self, request: HttpRequest) -> Result<HttpResponse, PublishError> {
        let method = request.method.clone();
        let mut builder = self
            .client
            .request(request.method, request.uri)
            .headers(request.headers);

        let omit_body = self.omit_body_methods.contains(method.as_str());
        if let Some(body) = request.body {
            if !omit_body {
                builder = builder.body(body);
            } else {
                trace!(method = %method, "omitting request body per configuration");
            }
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_transport_error(&e, self.via_proxy))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| PublishError::InternalError(format!("reading response body: {e}")))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Transport errors all become `InternalError` except a refused proxy
/// tunnel, which callers need to distinguish. `reqwest` reports the
/// rejecting status only in the error text, so it is recovered from there,
/// falling back to a generic 502.
fn map_transport_error(err: &reqwest::Error, via_proxy: bool) -> PublishError {
    let rendered = error_chain(err);
    if via_proxy && (err.is_connect() || rendered.contains("tunnel")) {
        return PublishError::ProxyConnectionFailed {
            status: extract_status_code(&rendered).unwrap_or(502),
        };
    }
    PublishError::InternalError(rendered)
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut rendered = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// First standalone three-digit HTTP status code in `text`, if any.
fn extract_status_code(text: &str) -> Option<u16> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter_map(|token| token.parse::<u16>().ok())
        .find(|code| (100..=599).contains(code))
}
