//! Round-trip correlation validation.
//!
//! When an HTTP response claims to be a live reply to a command, the
//! identity extracted from the parsed response must correspond to the
//! identity of the command that produced it. The decision is a pure
//! function over the two identities; rejected responses are logged and
//! surfaced, never silently dropped.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// Identity of a signal as far as correlation is concerned. Extracted from
/// both the originating command and the parsed response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalIdentity {
    /// Dotted type identifier, e.g. `thing.create` or `thing.createResponse`.
    pub signal_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl SignalIdentity {
    pub fn new(signal_type: impl Into<String>) -> Self {
        Self {
            signal_type: signal_type.into(),
            entity_id: None,
            correlation_id: None,
        }
    }

    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Why a response was rejected as a reply to a command. Carries both sides
/// so misbehaving endpoints can be audited from the logs alone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("correlation id mismatch (command {command:?}, response {response:?})")]
    CorrelationIdMismatch {
        command: Option<String>,
        response: Option<String>,
    },
    #[error("response type {response:?} is not related to command type {command:?}")]
    TypeMismatch { response: String, command: String },
    #[error("entity id mismatch (command {command:?}, response {response:?})")]
    EntityIdMismatch {
        command: Option<String>,
        response: Option<String>,
    },
}

/// Decide whether `response` is an acceptable reply to `command`.
///
/// Rules are evaluated in order, first mismatch wins:
/// 1. both correlation ids absent: accept, nothing to correlate
/// 2. correlation ids differ (including present vs absent): reject
/// 3. error responses of the same domain are exempt from type checks
/// 4. unrelated response type: reject
/// 5. differing entity ids: reject
pub fn decide(command: &SignalIdentity, response: &SignalIdentity) -> Result<(), RejectReason> {
    match (&command.correlation_id, &response.correlation_id) {
        (None, None) => return Ok(()),
        (c, r) if c != r => {
            return Err(RejectReason::CorrelationIdMismatch {
                command: c.clone(),
                response: r.clone(),
            })
        }
        _ => {}
    }

    if is_error_response(&response.signal_type)
        && domain(&response.signal_type) == domain(&command.signal_type)
    {
        return Ok(());
    }

    if !is_related(&response.signal_type, &command.signal_type) {
        return Err(RejectReason::TypeMismatch {
            response: response.signal_type.clone(),
            command: command.signal_type.clone(),
        });
    }

    if command.entity_id != response.entity_id {
        return Err(RejectReason::EntityIdMismatch {
            command: command.entity_id.clone(),
            response: response.entity_id.clone(),
        });
    }

    Ok(())
}

/// [`decide`] plus the audit log entry required for rejected responses.
/// The logged correlation id is the command's, so downstream consumers can
/// still track the original request.
pub fn validate_round_trip(
    command: &SignalIdentity,
    response: &SignalIdentity,
) -> Result<(), RejectReason> {
    let verdict = decide(command, response);
    if let Err(reason) = &verdict {
        error!(
            category = "response",
            r#type = "dropped",
            correlation_id = ?command.correlation_id,
            entity_id = ?command.entity_id,
            command_type = %command.signal_type,
            response_type = %response.signal_type,
            reason = %reason,
            "response does not correspond to the command that produced it"
        );
    }
    verdict
}

/// Domain of a dotted type identifier: the segment before the first `.`.
fn domain(signal_type: &str) -> &str {
    signal_type.split('.').next().unwrap_or(signal_type)
}

/// Name of a dotted type identifier: everything after the first `.`.
fn name(signal_type: &str) -> &str {
    signal_type
        .split_once('.')
        .map(|(_, rest)| rest)
        .unwrap_or("")
}

/// Error replies use the plain `error` name within the command's domain.
fn is_error_response(signal_type: &str) -> bool {
    name(signal_type) == "error"
}

/// Response-of-command naming convention: same domain, and either the
/// command name with a `Response` suffix or a bare acknowledgement.
fn is_related(response_type: &str, command_type: &str) -> bool {
    if domain(response_type) != domain(command_type) {
        return false;
    }
    let response_name = name(response_type);
    response_name == format!("{}Response", name(command_type))
        || response_name == "acknowledgement"
}
