//! Azure shared-access-signature tokens (Service Bus / Event Hubs SASL).

use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::PublishError;
use crate::security::{decode_shared_key, B64_FORGIVING};
use crate::transport::HttpRequest;

type HmacSha256 = Hmac<Sha256>;

/// Build a `SharedAccessSignature` authorization value for `endpoint`,
/// valid for `ttl_secs` from the signing instant.
pub fn authorization_token(
    shared_key_name: &str,
    shared_key_base64: &str,
    endpoint: &str,
    ttl_secs: u64,
    at: DateTime<Utc>,
) -> Result<String, PublishError> {
    let expiry = (at + ChronoDuration::seconds(ttl_secs as i64)).timestamp();
    let resource = form_urlencode(endpoint);
    let string_to_sign = format!("{resource}\n{expiry}");

    let key = decode_shared_key(shared_key_base64)?;
    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC can take key of any size");
    mac.update(string_to_sign.as_bytes());
    let signature = B64_FORGIVING.encode(mac.finalize().into_bytes());

    Ok(format!(
        "SharedAccessSignature sr={resource}&sig={}&se={expiry}&skn={shared_key_name}",
        form_urlencode(&signature)
    ))
}

/// Sign `request` in place with a freshly minted SAS token.
pub fn sign(
    request: &mut HttpRequest,
    shared_key_name: &str,
    shared_key_base64: &str,
    endpoint: &str,
    ttl_secs: u64,
    at: DateTime<Utc>,
) -> Result<(), PublishError> {
    let token = authorization_token(shared_key_name, shared_key_base64, endpoint, ttl_secs, at)?;
    request.set_header("authorization", &token)?;
    Ok(())
}

fn form_urlencode(input: &str) -> String {
    url::form_urlencoded::byte_serialize(input.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const KEY_NAME: &str = "RootManageSharedAccessKey";
    const KEY: &str = "SGFsbG8gV2VsdCEgSXN0IGRhcyBhbG";
    const ENDPOINT: &str = "https://my-hub.servicebus.windows.net/events";

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn token_carries_the_encoded_resource_and_expiry() {
        let token = authorization_token(KEY_NAME, KEY, ENDPOINT, 300, instant()).unwrap();
        assert!(token.starts_with(
            "SharedAccessSignature sr=https%3A%2F%2Fmy-hub.servicebus.windows.net%2Fevents&sig="
        ));
        // 2021-01-01T00:00:00Z + 300s
        assert!(token.contains("&se=1609459500&"));
        assert!(token.ends_with(&format!("&skn={KEY_NAME}")));
    }

    #[test]
    fn token_is_deterministic_for_a_fixed_instant() {
        let first = authorization_token(KEY_NAME, KEY, ENDPOINT, 300, instant()).unwrap();
        let second = authorization_token(KEY_NAME, KEY, ENDPOINT, 300, instant()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn ttl_moves_the_expiry_and_the_signature() {
        let short = authorization_token(KEY_NAME, KEY, ENDPOINT, 60, instant()).unwrap();
        let long = authorization_token(KEY_NAME, KEY, ENDPOINT, 600, instant()).unwrap();
        assert_ne!(short, long);
    }

    #[test]
    fn sign_attaches_the_authorization_header() {
        let mut request = HttpRequest::new(
            reqwest::Method::POST,
            url::Url::parse(ENDPOINT).unwrap(),
        );
        sign(&mut request, KEY_NAME, KEY, ENDPOINT, 300, instant()).unwrap();
        let auth = request.headers.get("authorization").unwrap().to_str().unwrap();
        assert!(auth.starts_with("SharedAccessSignature "));
    }
}
