use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Signing/auth strategy for one logical connection. Closed union: new
/// strategies are added here and dispatched in
/// [`authenticator::RequestAuthenticator`](crate::security::authenticator::RequestAuthenticator),
/// never looked up by open-ended type strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CredentialSpec {
    /// OAuth2 client-credentials grant against a token endpoint.
    Oauth2 {
        client_id: String,
        client_secret: String,
        token_endpoint: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<String>,
    },
    /// AWS Signature Version 4 request signing.
    AwsSigv4 {
        access_key: String,
        secret_key: String,
        region: String,
        service: String,
        /// Encode canonical path segments twice (S3-style paths differ).
        #[serde(default)]
        double_encode: bool,
        /// Extra header names to include in the canonical headers, beyond
        /// the always-signed `host` and `x-amz-date`.
        #[serde(default)]
        canonical_header_names: Vec<String>,
    },
    /// Azure Monitor (Log Analytics) shared-key signing.
    AzureMonitor {
        workspace_id: String,
        shared_key_base64: String,
    },
    /// Azure shared-access-signature tokens (Service Bus / Event Hubs).
    AzureSasl {
        shared_key_name: String,
        shared_key_base64: String,
        endpoint: String,
        #[serde(default = "default_sas_ttl_secs")]
        ttl_secs: u64,
    },
}

fn default_sas_ttl_secs() -> u64 {
    300
}

impl CredentialSpec {
    /// Stable fingerprint identifying this credential. Keys the token cache,
    /// so two connections with identical credentials share cached tokens.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            Self::Oauth2 {
                client_id,
                client_secret,
                token_endpoint,
                scope,
            } => {
                hasher.update(b"oauth2\n");
                hasher.update(client_id.as_bytes());
                hasher.update(b"\n");
                hasher.update(client_secret.as_bytes());
                hasher.update(b"\n");
                hasher.update(token_endpoint.as_bytes());
                hasher.update(b"\n");
                hasher.update(scope.as_deref().unwrap_or("").as_bytes());
            }
            Self::AwsSigv4 {
                access_key,
                region,
                service,
                ..
            } => {
                hasher.update(b"aws-sigv4\n");
                hasher.update(access_key.as_bytes());
                hasher.update(b"\n");
                hasher.update(region.as_bytes());
                hasher.update(b"\n");
                hasher.update(service.as_bytes());
            }
            Self::AzureMonitor { workspace_id, .. } => {
                hasher.update(b"azure-monitor\n");
                hasher.update(workspace_id.as_bytes());
            }
            Self::AzureSasl {
                shared_key_name,
                endpoint,
                ..
            } => {
                hasher.update(b"azure-sasl\n");
                hasher.update(shared_key_name.as_bytes());
                hasher.update(b"\n");
                hasher.update(endpoint.as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oauth2(scope: Option<&str>) -> CredentialSpec {
        CredentialSpec::Oauth2 {
            client_id: "cid".into(),
            client_secret: "secret".into(),
            token_endpoint: "https://login.example.com/token".into(),
            scope: scope.map(String::from),
        }
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(oauth2(None).fingerprint(), oauth2(None).fingerprint());
    }

    #[test]
    fn fingerprint_distinguishes_scopes() {
        assert_ne!(
            oauth2(Some("read")).fingerprint(),
            oauth2(Some("write")).fingerprint()
        );
    }

    #[test]
    fn fingerprint_distinguishes_variants() {
        let aws = CredentialSpec::AwsSigv4 {
            access_key: "cid".into(),
            secret_key: "secret".into(),
            region: "us-east-1".into(),
            service: "iam".into(),
            double_encode: false,
            canonical_header_names: vec![],
        };
        assert_ne!(oauth2(None).fingerprint(), aws.fingerprint());
    }

    #[test]
    fn deserializes_from_tagged_json() {
        let spec: CredentialSpec = serde_json::from_str(
            r#"{
                "type": "oauth2",
                "client_id": "cid",
                "client_secret": "secret",
                "token_endpoint": "https://login.example.com/token"
            }"#,
        )
        .unwrap();
        assert_eq!(spec, oauth2(None));
    }

    #[test]
    fn aws_defaults_apply() {
        let spec: CredentialSpec = serde_json::from_str(
            r#"{
                "type": "aws-sigv4",
                "access_key": "k",
                "secret_key": "s",
                "region": "eu-west-1",
                "service": "s3"
            }"#,
        )
        .unwrap();
        match spec {
            CredentialSpec::AwsSigv4 {
                double_encode,
                canonical_header_names,
                ..
            } => {
                assert!(!double_encode);
                assert!(canonical_header_names.is_empty());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
