//! Bounded-parallelism publish pipeline.
//!
//! Turns a stream of `(request, context)` pairs into `(outcome, context)`
//! pairs. Admission control is a bounded queue with a drop-new overflow
//! policy plus a semaphore bounding simultaneous in-flight calls; there is
//! no global lock. Outcomes complete in whatever order the network
//! produces them.

pub mod rewrite;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, warn};

use crate::config::ConnectionConfig;
use crate::error::PublishError;
use crate::security::authenticator::RequestAuthenticator;
use crate::transport::exchange::Exchange;
use crate::transport::{HttpRequest, Outcome};

/// A submitted request waiting for dispatch.
struct PendingRequest<C> {
    request: HttpRequest,
    context: C,
    enqueued_at: Instant,
}

/// A submission the queue refused. Returns the request and context to the
/// caller so it can report the failure with full context.
#[derive(Debug)]
pub struct RejectedSubmission<C> {
    pub error: PublishError,
    pub request: HttpRequest,
    pub context: C,
}

/// Handle for submitting work to a running pipeline. Cheap to clone.
pub struct PublishPipeline<C> {
    queue: mpsc::Sender<PendingRequest<C>>,
}

impl<C> Clone for PublishPipeline<C> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
        }
    }
}

impl<C: Send + 'static> PublishPipeline<C> {
    /// Start the worker pool. Returns the submission handle and the stream
    /// of `(outcome, context)` pairs. The pool stops once every handle is
    /// dropped and the queue has drained.
    pub fn spawn(
        config: &ConnectionConfig,
        authenticator: Arc<RequestAuthenticator>,
        exchange: Arc<dyn Exchange>,
    ) -> (Self, mpsc::Receiver<(Outcome, C)>) {
        let workers = config.worker_count();
        let (queue_tx, queue_rx) = mpsc::channel(config.max_queue_size.max(1));
        let (outcome_tx, outcome_rx) = mpsc::channel(workers * 2);

        let worker = Worker {
            queue: Arc::new(Mutex::new(queue_rx)),
            permits: Arc::new(Semaphore::new(workers)),
            authenticator,
            exchange,
            outcomes: outcome_tx,
            timeout: config.request_timeout(),
        };
        tokio::spawn(supervise(worker));

        (Self { queue: queue_tx }, outcome_rx)
    }

    /// Submit one request. Never blocks: a full queue drops the newest
    /// submission and reports it back immediately.
    pub fn submit(&self, request: HttpRequest, context: C) -> Result<(), RejectedSubmission<C>> {
        let pending = PendingRequest {
            request,
            context,
            enqueued_at: Instant::now(),
        };
        match self.queue.try_send(pending) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(pending)) => {
                warn!("publish queue full, dropping newest submission");
                Err(RejectedSubmission {
                    error: PublishError::QueueOverflow,
                    request: pending.request,
                    context: pending.context,
                })
            }
            Err(TrySendError::Closed(pending)) => Err(RejectedSubmission {
                error: PublishError::InternalError("publish pipeline stopped".into()),
                request: pending.request,
                context: pending.context,
            }),
        }
    }
}

struct Worker<C> {
    queue: Arc<Mutex<mpsc::Receiver<PendingRequest<C>>>>,
    permits: Arc<Semaphore>,
    authenticator: Arc<RequestAuthenticator>,
    exchange: Arc<dyn Exchange>,
    outcomes: mpsc::Sender<(Outcome, C)>,
    timeout: Duration,
}

impl<C> Clone for Worker<C> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            permits: self.permits.clone(),
            authenticator: self.authenticator.clone(),
            exchange: self.exchange.clone(),
            outcomes: self.outcomes.clone(),
            timeout: self.timeout,
        }
    }
}

/// Restart the dispatch loop if it ever panics. Ordinary per-request
/// failures never reach this path; they are reported as outcomes.
async fn supervise<C: Send + 'static>(worker: Worker<C>) {
    loop {
        let handle = tokio::spawn(dispatch_loop(worker.clone()));
        match handle.await {
            Ok(()) => break,
            Err(join_error) if join_error.is_panic() => {
                error!("publish dispatch loop panicked, restarting worker pool");
            }
            Err(_) => break,
        }
    }
}

async fn dispatch_loop<C: Send + 'static>(worker: Worker<C>) {
    loop {
        let pending = { worker.queue.lock().await.recv().await };
        let Some(pending) = pending else {
            debug!("publish queue closed, dispatch loop ending");
            break;
        };
        let Ok(permit) = worker.permits.clone().acquire_owned().await else {
            break;
        };

        let worker = worker.clone();
        tokio::spawn(async move {
            debug!(
                queued_ms = pending.enqueued_at.elapsed().as_millis() as u64,
                uri = %pending.request.uri,
                "dispatching request"
            );
            let outcome = dispatch_one(
                pending.request,
                worker.authenticator.as_ref(),
                worker.exchange.as_ref(),
                worker.timeout,
            )
            .await;
            drop(permit);
            if worker.outcomes.send((outcome, pending.context)).await.is_err() {
                debug!("outcome receiver dropped, discarding result");
            }
        });
    }
}

/// Rewrite, authenticate and dispatch one request under the deadline.
/// Timing out drops the in-flight future, so a response arriving after the
/// timeout was reported can never be delivered a second time.
async fn dispatch_one(
    request: HttpRequest,
    authenticator: &RequestAuthenticator,
    exchange: &dyn Exchange,
    deadline: Duration,
) -> Outcome {
    let attempt = async {
        let mut request = request;
        if !request.headers.contains_key("x-request-id") {
            request.set_header("x-request-id", &uuid::Uuid::new_v4().to_string())?;
        }
        rewrite::apply_reserved_headers(&mut request);
        rewrite::extract_basic_auth(&mut request)?;
        let request = authenticator.authenticate(request).await?;
        exchange.exchange(request).await
    };

    match tokio::time::timeout(deadline, attempt).await {
        Ok(Ok(response)) => Outcome::Response(response),
        Ok(Err(error)) => {
            warn!(kind = error.kind(), error = %error, "publish attempt failed");
            Outcome::Failure(error)
        }
        Err(_) => {
            warn!(
                timeout_ms = deadline.as_millis() as u64,
                "request deadline expired, abandoning in-flight call"
            );
            Outcome::Failure(PublishError::Timeout(deadline))
        }
    }
}
