//! Outbound alert notifications.
//!
//! The only delivery channel today is signed webhooks; the
//! [`AlertNotifier`] trait is the seam the evaluation worker talks
//! through, so tests can substitute a recording stub.

pub mod error;
pub mod webhook;

pub use error::{NotifyError, Result};
pub use webhook::{WebhookEndpoint, WebhookNotifier};

use async_trait::async_trait;
use oxtrack_common::types::{Alert, NotificationType};

/// Delivers one alert notification to one endpoint.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(
        &self,
        alert: &Alert,
        kind: NotificationType,
        endpoint: &WebhookEndpoint,
    ) -> Result<()>;
}

/// Cap stored response bodies so a misbehaving endpoint cannot bloat the
/// delivery log.
pub(crate) const MAX_BODY_LENGTH: usize = 2048;

pub(crate) fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::truncate_string;

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo wörld";
        let t = truncate_string(s, 3);
        assert!(t.starts_with("hé") || t.starts_with("h"));
        assert!(t.ends_with("[truncated]"));
    }

    #[test]
    fn short_strings_pass_through() {
        assert_eq!(truncate_string("ok", 10), "ok");
    }
}
