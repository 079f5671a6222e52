//! Coordinates the egress path: outbound signals become HTTP requests,
//! flow through the publish pipeline, and responses claiming to be live
//! command replies are validated before being acknowledged.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::error::PublishError;
use crate::pipeline::PublishPipeline;
use crate::roundtrip::{self, SignalIdentity};
use crate::security::authenticator::RequestAuthenticator;
use crate::security::oauth2::TokenEndpointClient;
use crate::security::token_cache::TokenCache;
use crate::transport::exchange::{Exchange, ReqwestExchange};
use crate::transport::{HttpRequest, Outcome};

/// Where a signal is routed. The adapter interprets the address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTarget {
    pub address: String,
}

impl RoutingTarget {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

/// External protocol adapter: the wire-level envelope is somebody else's
/// business. This crate only needs requests out and parsed signals back.
pub trait ProtocolAdapter: Send + Sync + 'static {
    type Signal: Send + 'static;

    fn to_http_request(
        &self,
        signal: &Self::Signal,
        target: &RoutingTarget,
    ) -> Result<HttpRequest, PublishError>;

    fn identity(&self, signal: &Self::Signal) -> SignalIdentity;

    /// Whether the signal is a command awaiting a live reply.
    fn expects_response(&self, signal: &Self::Signal) -> bool;

    fn parse_response(
        &self,
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<Self::Signal, PublishError>;
}

/// A signal to deliver, paired with its routing target.
#[derive(Debug)]
pub struct OutboundSignal<S> {
    pub signal: S,
    pub target: RoutingTarget,
}

/// What the caller hears back for every outbound signal.
#[derive(Debug)]
pub enum DeliveryEvent<S> {
    Acknowledged {
        command: SignalIdentity,
        status: u16,
        /// The parsed, validated live reply, when one was expected.
        response: Option<S>,
    },
    /// Always carries the command's identity (and so its correlation id),
    /// never the mismatched response's.
    Failed {
        command: SignalIdentity,
        error: PublishError,
    },
}

/// Per-request context carried through the pipeline.
struct PublishContext {
    identity: SignalIdentity,
    expects_response: bool,
}

/// Start the publisher with the default reqwest transport.
pub fn spawn<A: ProtocolAdapter>(
    config: &ConnectionConfig,
    adapter: A,
    signals: mpsc::Receiver<OutboundSignal<A::Signal>>,
    events: mpsc::Sender<DeliveryEvent<A::Signal>>,
) -> Result<(), PublishError> {
    let exchange = Arc::new(ReqwestExchange::from_config(config)?);
    spawn_with_exchange(config, adapter, exchange, signals, events)
}

/// Start the publisher over an injected transport.
pub fn spawn_with_exchange<A: ProtocolAdapter>(
    config: &ConnectionConfig,
    adapter: A,
    exchange: Arc<dyn Exchange>,
    signals: mpsc::Receiver<OutboundSignal<A::Signal>>,
    events: mpsc::Sender<DeliveryEvent<A::Signal>>,
) -> Result<(), PublishError> {
    let tokens = Arc::new(TokenCache::new(Arc::new(TokenEndpointClient::new()?)));
    let authenticator = Arc::new(RequestAuthenticator::new(config.credentials.clone(), tokens));
    let (pipeline, outcomes) = PublishPipeline::spawn(config, authenticator.clone(), exchange);

    let adapter = Arc::new(adapter);
    tokio::spawn(intake(adapter.clone(), pipeline, signals, events.clone()));
    tokio::spawn(drain(adapter, authenticator, outcomes, events));
    Ok(())
}

async fn intake<A: ProtocolAdapter>(
    adapter: Arc<A>,
    pipeline: PublishPipeline<PublishContext>,
    mut signals: mpsc::Receiver<OutboundSignal<A::Signal>>,
    events: mpsc::Sender<DeliveryEvent<A::Signal>>,
) {
    while let Some(outbound) = signals.recv().await {
        let identity = adapter.identity(&outbound.signal);
        match adapter.to_http_request(&outbound.signal, &outbound.target) {
            Ok(request) => {
                let context = PublishContext {
                    identity: identity.clone(),
                    expects_response: adapter.expects_response(&outbound.signal),
                };
                if let Err(rejected) = pipeline.submit(request, context) {
                    warn!(
                        kind = rejected.error.kind(),
                        correlation_id = ?rejected.context.identity.correlation_id,
                        "submission rejected before dispatch"
                    );
                    let _ = events
                        .send(DeliveryEvent::Failed {
                            command: rejected.context.identity,
                            error: rejected.error,
                        })
                        .await;
                }
            }
            Err(error) => {
                let _ = events
                    .send(DeliveryEvent::Failed {
                        command: identity,
                        error,
                    })
                    .await;
            }
        }
    }
    debug!("signal source closed, publisher intake ending");
}

async fn drain<A: ProtocolAdapter>(
    adapter: Arc<A>,
    authenticator: Arc<RequestAuthenticator>,
    mut outcomes: mpsc::Receiver<(Outcome, PublishContext)>,
    events: mpsc::Sender<DeliveryEvent<A::Signal>>,
) {
    while let Some((outcome, context)) = outcomes.recv().await {
        let event = match outcome {
            Outcome::Failure(error) => DeliveryEvent::Failed {
                command: context.identity,
                error,
            },
            Outcome::Response(response) => {
                if response.status == 401 {
                    // Rejected bearer token: evict so the next request
                    // performs a fresh exchange.
                    authenticator.invalidate_token().await;
                }
                if context.expects_response && !response.body.is_empty() {
                    correlate_reply(adapter.as_ref(), context, response)
                } else {
                    DeliveryEvent::Acknowledged {
                        command: context.identity,
                        status: response.status,
                        response: None,
                    }
                }
            }
        };
        if events.send(event).await.is_err() {
            debug!("delivery event receiver dropped, publisher drain ending");
            break;
        }
    }
}

fn correlate_reply<A: ProtocolAdapter>(
    adapter: &A,
    context: PublishContext,
    response: crate::transport::HttpResponse,
) -> DeliveryEvent<A::Signal> {
    match adapter.parse_response(&response.body, response.content_type()) {
        Ok(parsed) => {
            let response_identity = adapter.identity(&parsed);
            match roundtrip::validate_round_trip(&context.identity, &response_identity) {
                Ok(()) => DeliveryEvent::Acknowledged {
                    command: context.identity,
                    status: response.status,
                    response: Some(parsed),
                },
                Err(reason) => DeliveryEvent::Failed {
                    command: context.identity,
                    error: PublishError::RoundTrip(reason),
                },
            }
        }
        Err(error) => {
            let error = match error {
                malformed @ PublishError::MalformedResponse(_) => malformed,
                other => PublishError::MalformedResponse(other.to_string()),
            };
            DeliveryEvent::Failed {
                command: context.identity,
                error,
            }
        }
    }
}
