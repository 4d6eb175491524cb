//! GitHub push webhooks: installation and delivery signature checks.
//!
//! Provides:
//! - `verify_github_signature()` -- constant-time `X-Hub-Signature-256` check
//! - `WebhookInstaller` -- registers a push hook on the repository once at startup

use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

use flowgate_types::workflow::GitTrigger;

type HmacSha256 = Hmac<Sha256>;

/// Header GitHub signs deliveries with.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

const GITHUB_API: &str = "https://api.github.com";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("HMAC signature verification failed")]
    HmacVerificationFailed,

    #[error("missing X-Hub-Signature-256 header")]
    MissingSignature,

    #[error("invalid HMAC key: {0}")]
    InvalidKey(String),

    #[error("cannot derive a GitHub owner/repo from '{0}'")]
    InvalidRepo(String),

    #[error("webhook installation needs a token")]
    MissingToken,

    #[error("webhook request failed: {0}")]
    Request(String),

    #[error("GitHub rejected the webhook ({status}): {body}")]
    Rejected { status: u16, body: String },
}

// ---------------------------------------------------------------------------
// HMAC-SHA256 verification
// ---------------------------------------------------------------------------

/// Verify a hex HMAC-SHA256 signature of `body`.
pub fn verify_hmac_sha256(secret: &[u8], body: &[u8], signature_hex: &str) -> Result<(), WebhookError> {
    let expected = hex_decode(signature_hex).ok_or(WebhookError::HmacVerificationFailed)?;
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| WebhookError::InvalidKey(e.to_string()))?;
    mac.update(body);
    // Constant-time comparison.
    mac.verify_slice(&expected)
        .map_err(|_| WebhookError::HmacVerificationFailed)
}

/// Verify a GitHub delivery. The header value has the form `sha256=<hex>`.
pub fn verify_github_signature(secret: &str, body: &[u8], header: Option<&str>) -> Result<(), WebhookError> {
    let header = header.ok_or(WebhookError::MissingSignature)?;
    let hex = header.strip_prefix("sha256=").unwrap_or(header);
    verify_hmac_sha256(secret.as_bytes(), body, hex)
}

/// Compute a hex HMAC-SHA256 signature.
pub fn compute_hmac_sha256_hex(secret: &[u8], body: &[u8]) -> Result<String, WebhookError> {
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| WebhookError::InvalidKey(e.to_string()))?;
    mac.update(body);
    Ok(mac
        .finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

// ---------------------------------------------------------------------------
// Installation
// ---------------------------------------------------------------------------

/// `owner/name` from `https://github.com/owner/name(.git)`, `git@github.com:owner/name.git`
/// or a bare `owner/name`.
pub fn repo_slug(repo: &str) -> Option<String> {
    let trimmed = repo.trim().trim_end_matches('/').trim_end_matches(".git");
    let path = if let Some(rest) = trimmed.split_once("://").map(|(_, rest)| rest) {
        rest.split_once('/')?.1
    } else if let Some((_, rest)) = trimmed.split_once(':') {
        rest
    } else {
        trimmed
    };
    let mut parts = path.split('/').filter(|p| !p.is_empty());
    let (owner, name) = (parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    Some(format!("{owner}/{name}"))
}

/// Result of an installation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Created,
    /// GitHub answered 422: a hook with this URL is already configured.
    AlreadyExists,
}

/// Creates push webhooks through the GitHub REST API.
#[derive(Debug, Clone)]
pub struct WebhookInstaller {
    client: reqwest::Client,
    api_base: String,
}

impl Default for WebhookInstaller {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookInstaller {
    pub fn new() -> Self {
        Self::with_api_base(GITHUB_API)
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Register a push hook on `trigger.repo` that delivers to `callback_url`.
    pub async fn install(&self, trigger: &GitTrigger, callback_url: &str) -> Result<InstallOutcome, WebhookError> {
        let token = trigger
            .token
            .as_deref()
            .or(trigger.github_token.as_deref())
            .filter(|t| !t.is_empty())
            .ok_or(WebhookError::MissingToken)?;
        let slug = repo_slug(&trigger.repo).ok_or_else(|| WebhookError::InvalidRepo(trigger.repo.clone()))?;

        let mut config = json!({
            "url": callback_url,
            "content_type": "json",
            "insecure_ssl": "0",
        });
        if let Some(secret) = &trigger.secret {
            config["secret"] = json!(secret);
        }
        let body = json!({
            "name": "web",
            "active": true,
            "events": ["push"],
            "config": config,
        });

        let response = self
            .client
            .post(format!("{}/repos/{slug}/hooks", self.api_base))
            .header("Authorization", format!("token {token}"))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "flowgate")
            .json(&body)
            .send()
            .await
            .map_err(|e| WebhookError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        match status {
            200 | 201 => {
                tracing::info!(repo = %slug, callback = %callback_url, "webhook installed");
                Ok(InstallOutcome::Created)
            }
            422 => {
                tracing::info!(repo = %slug, "webhook already exists");
                Ok(InstallOutcome::AlreadyExists)
            }
            _ => Err(WebhookError::Rejected {
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::one_shot;

    fn trigger(repo: &str) -> GitTrigger {
        GitTrigger {
            method: flowgate_types::workflow::GitTriggerMethod::Webhook,
            repo: repo.into(),
            branch: "main".into(),
            files: Vec::new(),
            poll_interval_seconds: 60,
            github_token: None,
            token: Some("ghp_install".into()),
            secret: Some("s3cret".into()),
        }
    }

    #[test]
    fn github_signature_roundtrip() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let sig = compute_hmac_sha256_hex(b"s3cret", body).unwrap();
        let header = format!("sha256={sig}");
        assert!(verify_github_signature("s3cret", body, Some(&header)).is_ok());
        assert!(verify_github_signature("other", body, Some(&header)).is_err());
        assert!(verify_github_signature("s3cret", b"tampered", Some(&header)).is_err());
        assert!(matches!(
            verify_github_signature("s3cret", body, None),
            Err(WebhookError::MissingSignature)
        ));
        assert!(verify_hmac_sha256(b"s3cret", body, "zz").is_err());
    }

    #[test]
    fn slugs_from_common_url_shapes() {
        assert_eq!(repo_slug("https://github.com/acme/infra.git").as_deref(), Some("acme/infra"));
        assert_eq!(repo_slug("git@github.com:acme/infra.git").as_deref(), Some("acme/infra"));
        assert_eq!(repo_slug("acme/infra").as_deref(), Some("acme/infra"));
        assert_eq!(repo_slug("https://github.com/acme"), None);
        assert_eq!(repo_slug("https://github.com/acme/infra/tree/main"), None);
    }

    #[tokio::test]
    async fn install_posts_push_hook() {
        let (url, server) = one_shot("201 Created", r#"{"id":1}"#).await;
        let base = url.trim_end_matches("/hook").to_string();
        let installer = WebhookInstaller::with_api_base(base);

        let outcome = installer
            .install(&trigger("https://github.com/acme/infra"), "https://flows.example.com/api/infra/apply")
            .await
            .unwrap();
        assert_eq!(outcome, InstallOutcome::Created);

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /repos/acme/infra/hooks"));
        assert!(raw.to_lowercase().contains("authorization: token ghp_install"));
    }

    #[tokio::test]
    async fn existing_hook_is_not_an_error() {
        let (url, _server) = one_shot("422 Unprocessable Entity", r#"{"message":"Hook already exists"}"#).await;
        let installer = WebhookInstaller::with_api_base(url.trim_end_matches("/hook"));
        let outcome = installer.install(&trigger("acme/infra"), "https://x/api/a/b").await.unwrap();
        assert_eq!(outcome, InstallOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn rejection_and_missing_token() {
        let (url, _server) = one_shot("401 Unauthorized", r#"{"message":"Bad credentials"}"#).await;
        let installer = WebhookInstaller::with_api_base(url.trim_end_matches("/hook"));
        let err = installer.install(&trigger("acme/infra"), "https://x").await.unwrap_err();
        assert!(matches!(err, WebhookError::Rejected { status: 401, .. }));

        let mut no_token = trigger("acme/infra");
        no_token.token = None;
        assert!(matches!(
            installer.install(&no_token, "https://x").await,
            Err(WebhookError::MissingToken)
        ));
    }
}
