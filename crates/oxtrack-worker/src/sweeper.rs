use crate::MetricsSource;
use anyhow::Result;
use chrono::Utc;
use oxtrack_common::types::{Alert, AlertCondition, AlertStatus, NotificationType};
use oxtrack_notify::{AlertNotifier, WebhookEndpoint};
use oxtrack_registry::Registry;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};

/// How long an acquired per-alert lock stays valid before another instance
/// may take it over. Generous relative to one evaluation so only a crashed
/// holder ever loses its lock.
const LOCK_LEASE_MINUTES: i64 = 5;

pub struct AlertSweeper {
    registry: Arc<Registry>,
    metrics: Arc<dyn MetricsSource>,
    notifier: Arc<dyn AlertNotifier>,
    instance_id: String,
    tick_secs: u64,
}

impl AlertSweeper {
    pub fn new(
        registry: Arc<Registry>,
        metrics: Arc<dyn MetricsSource>,
        notifier: Arc<dyn AlertNotifier>,
        instance_id: &str,
        tick_secs: u64,
    ) -> Self {
        Self {
            registry,
            metrics,
            notifier,
            instance_id: instance_id.to_string(),
            tick_secs,
        }
    }

    /// Run until shutdown is signalled. The first sweep happens immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            instance_id = %self.instance_id,
            tick_secs = self.tick_secs,
            "Alert sweeper started"
        );

        let mut tick = interval(Duration::from_secs(self.tick_secs));
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "Alert evaluation cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!(instance_id = %self.instance_id, "Alert sweeper stopped");
                        return;
                    }
                }
            }
        }
    }

    /// One evaluation cycle. A registry failure listing alerts aborts the
    /// cycle; a single alert failing is logged and the sweep continues.
    pub async fn sweep(&self) -> Result<()> {
        let removed = self.registry.cleanup_expired_locks().await?;
        if removed > 0 {
            tracing::debug!(removed, "Removed expired alert locks");
        }

        let alerts = self.registry.list_evaluatable_alerts().await?;
        for alert in alerts {
            if let Err(e) = self.evaluate(&alert).await {
                tracing::error!(alert_id = alert.id, error = %e, "Alert evaluation failed");
            }
        }
        Ok(())
    }

    async fn evaluate(&self, alert: &Alert) -> Result<()> {
        let acquired = self
            .registry
            .acquire_alert_lock(
                alert.id,
                &self.instance_id,
                chrono::Duration::minutes(LOCK_LEASE_MINUTES),
            )
            .await?;
        if !acquired {
            // Another instance is on it; not an error.
            return Ok(());
        }

        let result = self.evaluate_locked(alert).await;

        if let Err(e) = self
            .registry
            .release_alert_lock(alert.id, &self.instance_id)
            .await
        {
            tracing::warn!(alert_id = alert.id, error = %e, "Failed to release alert lock");
        }
        result
    }

    async fn evaluate_locked(&self, alert: &Alert) -> Result<()> {
        let to = Utc::now();
        let from = to - alert.timeframe.duration();

        let group_ids = self.metrics.group_ids(alert.project_id, from, to)?;
        let value = if group_ids.is_empty() {
            0
        } else {
            let metrics = self
                .metrics
                .issue_metrics(alert.project_id, &group_ids, from, to)?;
            // A single issue must breach on its own; load spread across
            // many issues does not count.
            match alert.condition {
                AlertCondition::OccurrenceCount => {
                    metrics.iter().map(|m| m.times_seen).max().unwrap_or(0)
                }
                AlertCondition::DistinctUserCount => {
                    metrics.iter().map(|m| m.user_count).max().unwrap_or(0)
                }
            }
        };

        // Strictly greater than: a value equal to the threshold never fires.
        let breached = value as i64 > alert.threshold;

        match (alert.status, breached) {
            (AlertStatus::Active, true) => {
                tracing::info!(
                    alert_id = alert.id,
                    value,
                    threshold = alert.threshold,
                    "Alert triggered"
                );
                self.registry.mark_triggered(alert.id).await?;
                self.fan_out(alert, NotificationType::Triggered).await?;
            }
            (AlertStatus::Triggered, false) => {
                tracing::info!(
                    alert_id = alert.id,
                    value,
                    threshold = alert.threshold,
                    "Alert resolved"
                );
                self.registry.mark_resolved(alert.id).await?;
                self.fan_out(alert, NotificationType::Resolved).await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Send one notification per enabled channel of the owning team. Every
    /// attempt leaves a delivery record, pending first, then sent or failed.
    async fn fan_out(&self, alert: &Alert, kind: NotificationType) -> Result<()> {
        let channels = self.registry.list_enabled_channels(alert.team_id).await?;
        for channel in channels {
            let notification = self
                .registry
                .create_notification(alert.id, channel.id, kind)
                .await?;

            let Some(config) = self.registry.get_webhook_config(channel.id).await? else {
                self.registry
                    .mark_notification_failed(&notification.id, "no webhook endpoint configured")
                    .await?;
                continue;
            };
            let secret = self.registry.webhook_secret(&config)?;
            let endpoint = WebhookEndpoint {
                channel_id: channel.id,
                url: config.url.clone(),
                secret,
                verified: config.verified_at.is_some(),
            };

            match self.notifier.notify(alert, kind, &endpoint).await {
                Ok(()) => {
                    self.registry.mark_notification_sent(&notification.id).await?;
                }
                Err(e) => {
                    tracing::warn!(
                        alert_id = alert.id,
                        channel_id = channel.id,
                        error = %e,
                        "Notification delivery failed"
                    );
                    self.registry
                        .mark_notification_failed(&notification.id, &e.to_string())
                        .await?;
                }
            }
        }
        Ok(())
    }
}
