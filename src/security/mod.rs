pub mod authenticator;
pub mod aws_sigv4;
pub mod azure_monitor;
pub mod azure_sasl;
pub mod credentials;
pub mod oauth2;
pub mod token_cache;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

use crate::error::PublishError;

/// Standard base64, tolerant of missing padding on decode. Shared keys are
/// commonly stored with their trailing `=` stripped.
pub(crate) const B64_FORGIVING: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// URL-safe base64 for JWT segments, which are unpadded by convention.
pub(crate) const B64_URL_FORGIVING: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode a base64 shared key as handed out by Azure portals.
pub(crate) fn decode_shared_key(shared_key_base64: &str) -> Result<Vec<u8>, PublishError> {
    use base64::Engine;
    B64_FORGIVING
        .decode(shared_key_base64.trim())
        .map_err(|e| PublishError::InvalidRequest(format!("shared key is not valid base64: {e}")))
}
