use anyhow::Result;
use chrono::Utc;
use oxtrack_common::types::{
    AlertNotification, ChannelType, NotificationChannel, NotificationStatus, NotificationType,
    WebhookConfig,
};
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ActiveValue::Set, ColumnTrait, EntityTrait, Order,
    QueryFilter, QueryOrder, QuerySelect,
};

use crate::entities::{alert_notification, notification_channel, webhook_config};
use crate::store::Registry;

fn to_channel(m: notification_channel::Model) -> Result<NotificationChannel> {
    Ok(NotificationChannel {
        id: m.id,
        team_id: m.team_id,
        name: m.name,
        channel_type: m.channel_type.parse().map_err(anyhow::Error::msg)?,
        enabled: m.enabled,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

fn to_webhook(m: webhook_config::Model) -> WebhookConfig {
    WebhookConfig {
        channel_id: m.channel_id,
        url: m.url,
        encrypted_secret: m.encrypted_secret,
        verified_at: m.verified_at.map(|t| t.with_timezone(&Utc)),
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

fn to_notification(m: alert_notification::Model) -> Result<AlertNotification> {
    Ok(AlertNotification {
        id: m.id,
        alert_id: m.alert_id,
        channel_id: m.channel_id,
        notification_type: m.notification_type.parse().map_err(anyhow::Error::msg)?,
        status: m.status.parse().map_err(anyhow::Error::msg)?,
        error: m.error,
        sent_at: m.sent_at.map(|t| t.with_timezone(&Utc)),
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

impl Registry {
    pub async fn create_channel(
        &self,
        team_id: i64,
        name: &str,
        channel_type: ChannelType,
    ) -> Result<NotificationChannel> {
        let now = Utc::now().fixed_offset();
        let am = notification_channel::ActiveModel {
            id: NotSet,
            team_id: Set(team_id),
            name: Set(name.to_string()),
            channel_type: Set(channel_type.to_string()),
            enabled: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        to_channel(model)
    }

    pub async fn list_channels(&self, team_id: i64) -> Result<Vec<NotificationChannel>> {
        let rows = notification_channel::Entity::find()
            .filter(notification_channel::Column::TeamId.eq(team_id))
            .order_by(notification_channel::Column::Id, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_channel).collect()
    }

    /// Channels notifications fan out to for a team.
    pub async fn list_enabled_channels(&self, team_id: i64) -> Result<Vec<NotificationChannel>> {
        let rows = notification_channel::Entity::find()
            .filter(notification_channel::Column::TeamId.eq(team_id))
            .filter(notification_channel::Column::Enabled.eq(true))
            .order_by(notification_channel::Column::Id, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_channel).collect()
    }

    pub async fn set_channel_enabled(
        &self,
        id: i64,
        enabled: bool,
    ) -> Result<Option<NotificationChannel>> {
        let model = notification_channel::Entity::find_by_id(id)
            .one(self.db())
            .await?;
        let Some(m) = model else {
            return Ok(None);
        };
        let mut am: notification_channel::ActiveModel = m.into();
        am.enabled = Set(enabled);
        am.updated_at = Set(Utc::now().fixed_offset());
        let updated = am.update(self.db()).await?;
        Ok(Some(to_channel(updated)?))
    }

    /// Delete a channel along with its webhook configuration, atomically.
    pub async fn delete_channel(&self, id: i64) -> Result<bool> {
        self.with_transaction(move |txn| {
            Box::pin(async move {
                webhook_config::Entity::delete_by_id(id).exec(txn).await?;
                let res = notification_channel::Entity::delete_by_id(id)
                    .exec(txn)
                    .await?;
                Ok(res.rows_affected > 0)
            })
        })
        .await
    }

    /// Create or replace the webhook endpoint for a channel. The signing
    /// secret is encrypted at rest; any previous verification is voided.
    pub async fn set_webhook_config(
        &self,
        channel_id: i64,
        url: &str,
        secret: Option<&str>,
    ) -> Result<WebhookConfig> {
        let encrypted_secret = match secret {
            Some(s) => Some(self.secret_encryptor.encrypt(s)?),
            None => None,
        };
        let now = Utc::now().fixed_offset();

        let existing = webhook_config::Entity::find_by_id(channel_id)
            .one(self.db())
            .await?;
        let model = match existing {
            Some(m) => {
                let mut am: webhook_config::ActiveModel = m.into();
                am.url = Set(url.to_string());
                am.encrypted_secret = Set(encrypted_secret);
                am.verified_at = Set(None);
                am.updated_at = Set(now);
                am.update(self.db()).await?
            }
            None => {
                let am = webhook_config::ActiveModel {
                    channel_id: Set(channel_id),
                    url: Set(url.to_string()),
                    encrypted_secret: Set(encrypted_secret),
                    verified_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                am.insert(self.db()).await?
            }
        };
        Ok(to_webhook(model))
    }

    pub async fn get_webhook_config(&self, channel_id: i64) -> Result<Option<WebhookConfig>> {
        let model = webhook_config::Entity::find_by_id(channel_id)
            .one(self.db())
            .await?;
        Ok(model.map(to_webhook))
    }

    /// Decrypt the signing secret of a webhook configuration.
    pub fn webhook_secret(&self, config: &WebhookConfig) -> Result<Option<String>> {
        config
            .encrypted_secret
            .as_deref()
            .map(|s| self.secret_encryptor.decrypt(s))
            .transpose()
    }

    pub async fn mark_webhook_verified(&self, channel_id: i64) -> Result<bool> {
        let model = webhook_config::Entity::find_by_id(channel_id)
            .one(self.db())
            .await?;
        let Some(m) = model else {
            return Ok(false);
        };
        let now = Utc::now().fixed_offset();
        let mut am: webhook_config::ActiveModel = m.into();
        am.verified_at = Set(Some(now));
        am.updated_at = Set(now);
        am.update(self.db()).await?;
        Ok(true)
    }

    /// Record a pending delivery attempt.
    pub async fn create_notification(
        &self,
        alert_id: i64,
        channel_id: i64,
        notification_type: NotificationType,
    ) -> Result<AlertNotification> {
        let now = Utc::now().fixed_offset();
        let am = alert_notification::ActiveModel {
            id: Set(oxtrack_common::id::next_id()),
            alert_id: Set(alert_id),
            channel_id: Set(channel_id),
            notification_type: Set(notification_type.to_string()),
            status: Set(NotificationStatus::Pending.to_string()),
            error: Set(None),
            sent_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        to_notification(model)
    }

    pub async fn mark_notification_sent(&self, id: &str) -> Result<Option<AlertNotification>> {
        let model = alert_notification::Entity::find_by_id(id)
            .one(self.db())
            .await?;
        let Some(m) = model else {
            return Ok(None);
        };
        let now = Utc::now().fixed_offset();
        let mut am: alert_notification::ActiveModel = m.into();
        am.status = Set(NotificationStatus::Sent.to_string());
        am.sent_at = Set(Some(now));
        am.error = Set(None);
        am.updated_at = Set(now);
        let updated = am.update(self.db()).await?;
        Ok(Some(to_notification(updated)?))
    }

    pub async fn mark_notification_failed(
        &self,
        id: &str,
        error: &str,
    ) -> Result<Option<AlertNotification>> {
        let model = alert_notification::Entity::find_by_id(id)
            .one(self.db())
            .await?;
        let Some(m) = model else {
            return Ok(None);
        };
        let now = Utc::now().fixed_offset();
        let mut am: alert_notification::ActiveModel = m.into();
        am.status = Set(NotificationStatus::Failed.to_string());
        am.error = Set(Some(error.to_string()));
        am.updated_at = Set(now);
        let updated = am.update(self.db()).await?;
        Ok(Some(to_notification(updated)?))
    }

    pub async fn list_notifications(
        &self,
        alert_id: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<AlertNotification>> {
        let rows = alert_notification::Entity::find()
            .filter(alert_notification::Column::AlertId.eq(alert_id))
            .order_by(alert_notification::Column::CreatedAt, Order::Desc)
            .offset(offset as u64)
            .limit(limit as u64)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_notification).collect()
    }

    pub async fn list_pending_notifications(&self) -> Result<Vec<AlertNotification>> {
        let rows = alert_notification::Entity::find()
            .filter(
                alert_notification::Column::Status.eq(NotificationStatus::Pending.to_string()),
            )
            .order_by(alert_notification::Column::CreatedAt, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_notification).collect()
    }
}
