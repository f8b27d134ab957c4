//! Signed webhook delivery.
//!
//! The payload is serialized once and the HMAC signature is computed over
//! those exact bytes, so receivers can verify against the raw request body.
//! Delivery is a single POST; retry policy belongs to the caller's next
//! evaluation cycle, not this layer.

use crate::error::{NotifyError, Result};
use crate::{truncate_string, AlertNotifier, MAX_BODY_LENGTH};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use oxtrack_common::types::{Alert, NotificationType};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A resolved delivery target: endpoint URL, decrypted signing secret, and
/// whether the endpoint has passed verification.
#[derive(Debug, Clone)]
pub struct WebhookEndpoint {
    pub channel_id: i64,
    pub url: String,
    pub secret: Option<String>,
    pub verified: bool,
}

pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn render_body(alert: &Alert, kind: NotificationType) -> Result<String> {
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "alert_name": alert.name,
            "status": kind.to_string(),
            "condition": alert.condition.to_string(),
            "timeframe": alert.timeframe.to_string(),
            "alert_id": alert.id,
            "project_id": alert.project_id,
            "team_id": alert.team_id,
            "threshold": alert.threshold,
            "high_priority": alert.high_priority,
        });
        Ok(serde_json::to_string(&payload)?)
    }

    /// Hex HMAC-SHA-256 of the body under the endpoint secret.
    pub fn sign(secret: &str, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertNotifier for WebhookNotifier {
    async fn notify(
        &self,
        alert: &Alert,
        kind: NotificationType,
        endpoint: &WebhookEndpoint,
    ) -> Result<()> {
        if !endpoint.verified {
            return Err(NotifyError::UnverifiedEndpoint(endpoint.channel_id));
        }

        let body = Self::render_body(alert, kind)?;
        let mut request = self
            .client
            .post(&endpoint.url)
            .header("Content-Type", "application/json");
        if let Some(secret) = &endpoint.secret {
            request = request.header(SIGNATURE_HEADER, Self::sign(secret, &body));
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::info!(
                alert_id = alert.id,
                channel_id = endpoint.channel_id,
                status = %status,
                "Webhook delivered"
            );
            return Ok(());
        }

        let resp_body = match response.text().await {
            Ok(text) => truncate_string(&text, MAX_BODY_LENGTH),
            Err(e) => format!("[Failed to read response body: {e}]"),
        };
        tracing::warn!(
            alert_id = alert.id,
            channel_id = endpoint.channel_id,
            status = %status,
            "Webhook endpoint rejected delivery"
        );
        Err(NotifyError::ApiError {
            status: status.as_u16(),
            body: resp_body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use oxtrack_common::types::{AlertCondition, AlertStatus, AlertTimeframe};

    fn alert() -> Alert {
        Alert {
            id: 42,
            project_id: 7,
            project_name: "backend".to_string(),
            team_id: 3,
            name: "error spike".to_string(),
            description: None,
            threshold: 100,
            condition: AlertCondition::OccurrenceCount,
            timeframe: AlertTimeframe::OneHour,
            high_priority: true,
            status: AlertStatus::Triggered,
            last_triggered_at: None,
            resolved_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn payload_carries_wire_names() {
        let body = WebhookNotifier::render_body(&alert(), NotificationType::Triggered).unwrap();
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["alert_name"], "error spike");
        assert_eq!(v["status"], "triggered");
        assert_eq!(v["condition"], "occurrences");
        assert_eq!(v["timeframe"], "1h");
        assert_eq!(v["alert_id"], 42);
        assert_eq!(v["project_id"], 7);
        assert_eq!(v["team_id"], 3);
        assert_eq!(v["threshold"], 100);
        assert_eq!(v["high_priority"], true);
        assert!(v["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn resolved_payload_reports_resolved_status() {
        let body = WebhookNotifier::render_body(&alert(), NotificationType::Resolved).unwrap();
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["status"], "resolved");
    }

    #[test]
    fn signature_is_stable_hex_hmac() {
        let sig = WebhookNotifier::sign("whsec_123", r#"{"a":1}"#);
        assert_eq!(sig, WebhookNotifier::sign("whsec_123", r#"{"a":1}"#));
        assert_ne!(sig, WebhookNotifier::sign("other", r#"{"a":1}"#));
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));

        // Verification the way a receiver would do it.
        let mut mac = HmacSha256::new_from_slice(b"whsec_123").unwrap();
        mac.update(br#"{"a":1}"#);
        assert!(mac.verify_slice(&hex::decode(sig).unwrap()).is_ok());
    }

    #[tokio::test]
    async fn unverified_endpoint_is_rejected_before_any_io() {
        let notifier = WebhookNotifier::new();
        let endpoint = WebhookEndpoint {
            channel_id: 9,
            url: "http://127.0.0.1:1/hook".to_string(),
            secret: Some("whsec_123".to_string()),
            verified: false,
        };
        let err = notifier
            .notify(&alert(), NotificationType::Triggered, &endpoint)
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::UnverifiedEndpoint(9)));
    }
}
