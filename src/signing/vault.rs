// ABOUTME: Vault SSH secrets engine client for signing user keys.
// ABOUTME: Posts to /v1/{mount}/sign/{role} and returns data.signed_key.

use super::{KeySigner, SignedCertificate, SigningError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "https://127.0.0.1:8200";
pub const DEFAULT_MOUNT: &str = "ssh";
pub const DEFAULT_ROLE: &str = "user";

/// Connection settings for the Vault signing endpoint.
#[derive(Clone)]
pub struct VaultConfig {
    /// Base URL, e.g. `https://vault.example.com:8200`.
    pub address: String,
    pub token: Option<String>,
    /// Mount path of the SSH secrets engine.
    pub mount: String,
    /// Signing role configured on the mount.
    pub role: String,
    pub timeout: Duration,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            token: None,
            mount: DEFAULT_MOUNT.to_string(),
            role: DEFAULT_ROLE.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("address", &self.address)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("mount", &self.mount)
            .field("role", &self.role)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl VaultConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = mount.into();
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn sign_url(&self) -> String {
        format!(
            "{}/v1/{}/sign/{}",
            self.address.trim_end_matches('/'),
            self.mount.trim_matches('/'),
            urlencoding::encode(&self.role)
        )
    }
}

#[derive(Serialize)]
struct SignRequest<'a> {
    public_key: &'a str,
    valid_principals: &'a str,
    cert_type: &'static str,
    extensions: BTreeMap<&'static str, &'static str>,
}

#[derive(Deserialize)]
struct SecretResponse {
    data: Option<SignedKeyData>,
}

#[derive(Deserialize)]
struct SignedKeyData {
    signed_key: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

/// [`KeySigner`] backed by Vault's SSH secrets engine.
#[derive(Debug)]
pub struct VaultSigner {
    config: VaultConfig,
    client: reqwest::Client,
}

impl VaultSigner {
    pub fn new(config: VaultConfig) -> Result<Self, SigningError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SigningError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }
}

#[async_trait]
impl KeySigner for VaultSigner {
    async fn sign_key(
        &self,
        public_key: &[u8],
        principal: &str,
    ) -> Result<SignedCertificate, SigningError> {
        let public_key = std::str::from_utf8(public_key)
            .map_err(|e| {
                SigningError::InvalidInput(format!("public key is not valid UTF-8: {e}"))
            })?
            .trim();
        if public_key.is_empty() {
            return Err(SigningError::InputMissing("public key"));
        }
        if principal.is_empty() {
            return Err(SigningError::InputMissing("principal"));
        }

        let body = SignRequest {
            public_key,
            valid_principals: principal,
            cert_type: "user",
            extensions: BTreeMap::from([("permit-port-forwarding", ""), ("permit-pty", "")]),
        };

        let url = self.config.sign_url();
        tracing::debug!("Requesting certificate for {} from {}", principal, url);

        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.config.token {
            request = request.header("X-Vault-Token", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SigningError::Transport(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SigningError::Transport(format!("failed to read response: {e}")))?;

        if status.is_server_error() {
            return Err(SigningError::Transport(format!(
                "signing backend unavailable ({}): {}",
                status.as_u16(),
                text.trim()
            )));
        }

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .ok()
                .filter(|r| !r.errors.is_empty())
                .map(|r| r.errors.join("; "))
                .unwrap_or_else(|| text.trim().to_string());
            return Err(SigningError::IssuanceDenied {
                status: status.as_u16(),
                message,
            });
        }

        let secret: SecretResponse = serde_json::from_str(&text)
            .map_err(|e| SigningError::Transport(format!("malformed response: {e}")))?;

        secret
            .data
            .and_then(|d| d.signed_key)
            .filter(|key| !key.trim().is_empty())
            .map(SignedCertificate::new)
            .ok_or_else(|| {
                SigningError::Transport("response did not contain data.signed_key".to_string())
            })
    }
}
