pub mod alert;
pub mod alert_lock;
pub mod alert_notification;
pub mod notification_channel;
pub mod webhook_config;
