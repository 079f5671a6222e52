//! Azure Monitor (Log Analytics HTTP Data Collector) shared-key signing.

use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::PublishError;
use crate::security::{decode_shared_key, B64_FORGIVING};
use crate::transport::HttpRequest;

type HmacSha256 = Hmac<Sha256>;

const RFC1123_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";
const LOGS_RESOURCE: &str = "/api/logs";
const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Sign `request` in place: attaches `x-ms-date` and
/// `Authorization: SharedKey <workspace>:<signature>`.
pub fn sign(
    request: &mut HttpRequest,
    workspace_id: &str,
    shared_key_base64: &str,
    at: DateTime<Utc>,
) -> Result<(), PublishError> {
    let date = at.format(RFC1123_FORMAT).to_string();
    let content_length = request.body_bytes().len();
    let content_type = request
        .headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_owned();

    let string_to_sign =
        format!("POST\n{content_length}\n{content_type}\nx-ms-date:{date}\n{LOGS_RESOURCE}");
    let signature = compute_signature(shared_key_base64, &string_to_sign)?;

    request.set_header("x-ms-date", &date)?;
    request.set_header("authorization", &format!("SharedKey {workspace_id}:{signature}"))?;
    Ok(())
}

fn compute_signature(shared_key_base64: &str, string_to_sign: &str) -> Result<String, PublishError> {
    let key = decode_shared_key(shared_key_base64)?;
    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC can take key of any size");
    mac.update(string_to_sign.as_bytes());
    Ok(B64_FORGIVING.encode(mac.finalize().into_bytes()))
}
