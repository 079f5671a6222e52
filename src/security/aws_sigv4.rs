//! AWS Signature Version 4 request signing.
//!
//! Pure over `(request, credentials, signing instant)`: the same inputs
//! always produce the same signature, which is what makes the algorithm
//! testable against golden vectors.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::PublishError;
use crate::transport::HttpRequest;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const DATE_STAMP_FORMAT: &str = "%Y%m%d";

/// Signing inputs beyond the request itself.
#[derive(Debug, Clone)]
pub struct SigV4Params<'a> {
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub region: &'a str,
    pub service: &'a str,
    /// Encode canonical path segments twice. S3-style paths differ from the
    /// other services here; no default is assumed, callers configure it.
    pub double_encode: bool,
    /// Extra header names to sign beyond `host` and `x-amz-date`.
    pub extra_headers: &'a [String],
}

/// Sign `request` in place: attaches `x-amz-date` and `Authorization`.
pub fn sign(
    request: &mut HttpRequest,
    params: &SigV4Params<'_>,
    at: DateTime<Utc>,
) -> Result<(), PublishError> {
    let amz_date = at.format(AMZ_DATE_FORMAT).to_string();
    let date_stamp = at.format(DATE_STAMP_FORMAT).to_string();

    let (canonical, signed_headers) = canonical_request(request, params, &amz_date)?;

    let credential_scope = format!(
        "{date_stamp}/{}/{}/aws4_request",
        params.region, params.service
    );
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{credential_scope}\n{}",
        hex::encode(Sha256::digest(canonical.as_bytes()))
    );

    let key = signing_key(params.secret_key, &date_stamp, params.region, params.service);
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

    request.set_header("x-amz-date", &amz_date)?;
    request.set_header(
        "authorization",
        &format!(
            "{ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
            params.access_key
        ),
    )?;
    Ok(())
}

/// Canonical request plus the `;`-joined signed header list.
fn canonical_request(
    request: &HttpRequest,
    params: &SigV4Params<'_>,
    amz_date: &str,
) -> Result<(String, String), PublishError> {
    let mut headers = std::collections::BTreeMap::new();
    headers.insert("host".to_owned(), host_header(request)?);
    headers.insert("x-amz-date".to_owned(), amz_date.to_owned());
    for name in params.extra_headers {
        let lower = name.to_ascii_lowercase();
        if headers.contains_key(&lower) {
            continue;
        }
        let values: Vec<String> = request
            .headers
            .get_all(&lower)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(normalize_header_value)
            .collect();
        if !values.is_empty() {
            headers.insert(lower, values.join(","));
        }
    }

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");

    let canonical = format!(
        "{}\n{}\n{}\n{canonical_headers}\n{signed_headers}\n{}",
        request.method.as_str(),
        canonical_uri(request.uri.path(), params.double_encode),
        canonical_query(request),
        hex::encode(Sha256::digest(request.body_bytes()))
    );
    Ok((canonical, signed_headers))
}

fn host_header(request: &HttpRequest) -> Result<String, PublishError> {
    let host = request
        .uri
        .host_str()
        .ok_or_else(|| PublishError::InvalidRequest("request URI has no host".into()))?;
    Ok(match request.uri.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    })
}

/// Each path segment URI-encoded, twice when `double_encode` is set.
fn canonical_uri(path: &str, double_encode: bool) -> String {
    if path.is_empty() {
        return "/".to_owned();
    }
    path.split('/')
        .map(|segment| {
            let encoded = uri_encode(segment);
            if double_encode {
                uri_encode(&encoded)
            } else {
                encoded
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Query parameters encoded and sorted by name, then value.
fn canonical_query(request: &HttpRequest) -> String {
    let mut pairs: Vec<(String, String)> = request
        .uri
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encoding as SigV4 defines it: unreserved characters pass
/// through, everything else becomes uppercase `%XX`, spaces are `%20`.
fn uri_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(*byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Header values are trimmed with internal whitespace runs collapsed.
fn normalize_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `kSigning = HMAC(HMAC(HMAC(HMAC("AWS4"+secret, date), region), service), "aws4_request")`
fn signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_secret = format!("AWS4{secret_key}");
    let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
