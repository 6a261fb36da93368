//! CI webhook handling: payload shapes, signature verification, and the
//! mapping from pull-request events to gate checks.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::core::models::TriggeredBy;
use crate::gate::CheckRequest;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Pull-request events that trigger a gate check.
const HANDLED_EVENTS: &[&str] = &[
    "pull_request.opened",
    "pull_request.synchronize",
    "pull_request.reopened",
];

/// Incoming CI webhook payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event_type: String,
    #[serde(default)]
    pub pull_request: Option<PullRequestInfo>,
    #[serde(default)]
    pub repository: Option<RepositoryRef>,
}

/// Pull-request details from the webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: i64,
    #[serde(default)]
    pub title: Option<String>,
    pub head: HeadRef,
}

/// Head commit of the pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadRef {
    pub sha: String,
    #[serde(rename = "ref")]
    pub branch: String,
}

/// Repository reference from the webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub clone_url: String,
}

impl WebhookPayload {
    /// Whether this event maps to a gate check. Unknown event types are
    /// ignored, not errors.
    pub fn is_handled(&self) -> bool {
        HANDLED_EVENTS.contains(&self.event_type.as_str()) && self.pull_request.is_some()
    }

    /// Build the check request for a tracked repository.
    pub fn to_check_request(&self, repo_id: Uuid) -> Option<CheckRequest> {
        let pr = self.pull_request.as_ref()?;
        Some(CheckRequest {
            repo_id,
            branch: Some(pr.head.branch.clone()),
            commit_sha: Some(pr.head.sha.clone()),
            pr_number: Some(pr.number),
            pr_title: pr.title.clone(),
            triggered_by: TriggeredBy::Webhook,
        })
    }
}

/// Verify an HMAC-SHA256 webhook signature (`sha256=<hex>` header form).
///
/// Comparison is constant-time via the MAC verify primitive.
pub fn verify_signature(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let Some(hex_signature) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Some(expected) = decode_hex(hex_signature) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Produce the signature header value for a body (used by tests and the
/// pre-commit helper).
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("sha256={hex}")
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(event: &str) -> WebhookPayload {
        WebhookPayload {
            event_type: event.to_string(),
            pull_request: Some(PullRequestInfo {
                number: 42,
                title: Some("Add feature".to_string()),
                head: HeadRef {
                    sha: "abc123".to_string(),
                    branch: "feature/x".to_string(),
                },
            }),
            repository: Some(RepositoryRef {
                clone_url: "https://example.com/r.git".to_string(),
            }),
        }
    }

    #[test]
    fn test_handled_events() {
        assert!(payload("pull_request.opened").is_handled());
        assert!(payload("pull_request.synchronize").is_handled());
        assert!(payload("pull_request.reopened").is_handled());
        assert!(!payload("pull_request.closed").is_handled());
        assert!(!payload("push").is_handled());
    }

    #[test]
    fn test_check_request_mapping() {
        let repo_id = Uuid::new_v4();
        let request = payload("pull_request.opened")
            .to_check_request(repo_id)
            .unwrap();
        assert_eq!(request.repo_id, repo_id);
        assert_eq!(request.branch.as_deref(), Some("feature/x"));
        assert_eq!(request.commit_sha.as_deref(), Some("abc123"));
        assert_eq!(request.pr_number, Some(42));
        assert_eq!(request.triggered_by, TriggeredBy::Webhook);
    }

    #[test]
    fn test_signature_roundtrip() {
        let body = br#"{"event_type":"pull_request.opened"}"#;
        let header = sign("s3cret", body);
        assert!(verify_signature("s3cret", body, &header));
        assert!(!verify_signature("wrong", body, &header));
        assert!(!verify_signature("s3cret", b"tampered", &header));
        assert!(!verify_signature("s3cret", body, "sha256=zz"));
        assert!(!verify_signature("s3cret", body, "md5=abcd"));
    }

    #[test]
    fn test_payload_deserialisation() {
        let json = r#"{
            "event_type": "pull_request.opened",
            "pull_request": {"number": 7, "title": "Fix", "head": {"sha": "deadbeef", "ref": "fix/bug"}},
            "repository": {"clone_url": "https://example.com/a.git"}
        }"#;
        let parsed: WebhookPayload = serde_json::from_str(json).unwrap();
        assert!(parsed.is_handled());
        assert_eq!(parsed.pull_request.unwrap().head.branch, "fix/bug");
    }
}
