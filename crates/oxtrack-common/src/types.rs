use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single frame of an exception stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub module: String,
    pub function: String,
    pub filename: String,
    pub line_no: Option<u32>,
    /// True when the frame belongs to application code rather than a
    /// framework or the standard library.
    pub in_app: bool,
}

/// One exception from an event's exception chain, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    pub exception_type: String,
    pub value: String,
    pub frames: Vec<StackFrame>,
}

/// An ingested error event. Append-only: never mutated after ingestion
/// except through the soft-delete flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub project_id: i64,
    /// Issue (group) id the event was attributed to by the ingestion path.
    pub group_id: i64,
    pub level: String,
    pub platform: String,
    pub message: String,
    pub exceptions: Vec<ExceptionInfo>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub user_ip: Option<String>,
    pub tags: HashMap<String, String>,
    pub release: Option<String>,
    pub environment: Option<String>,
    pub server_name: Option<String>,
    pub deleted: bool,
    pub retention_days: u32,
}

/// Derived per-issue metrics over a time window. Computed on demand by the
/// analytics store; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueMetrics {
    pub group_id: i64,
    pub times_seen: u64,
    pub user_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Which derived metric an alert threshold applies to.
///
/// # Examples
///
/// ```
/// use oxtrack_common::types::AlertCondition;
///
/// let c: AlertCondition = "users_affected".parse().unwrap();
/// assert_eq!(c, AlertCondition::DistinctUserCount);
/// assert_eq!(c.to_string(), "users_affected");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    #[serde(rename = "occurrences")]
    OccurrenceCount,
    #[serde(rename = "users_affected")]
    DistinctUserCount,
}

impl std::fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertCondition::OccurrenceCount => write!(f, "occurrences"),
            AlertCondition::DistinctUserCount => write!(f, "users_affected"),
        }
    }
}

impl std::str::FromStr for AlertCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "occurrences" => Ok(AlertCondition::OccurrenceCount),
            "users_affected" => Ok(AlertCondition::DistinctUserCount),
            _ => Err(format!("unknown alert condition: {s}")),
        }
    }
}

/// The lookback window an alert condition is evaluated over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertTimeframe {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl AlertTimeframe {
    /// Length of the lookback window.
    pub fn duration(&self) -> Duration {
        match self {
            AlertTimeframe::OneMinute => Duration::minutes(1),
            AlertTimeframe::FiveMinutes => Duration::minutes(5),
            AlertTimeframe::FifteenMinutes => Duration::minutes(15),
            AlertTimeframe::OneHour => Duration::hours(1),
            AlertTimeframe::OneDay => Duration::days(1),
            AlertTimeframe::OneWeek => Duration::weeks(1),
            AlertTimeframe::ThirtyDays => Duration::days(30),
        }
    }
}

impl std::fmt::Display for AlertTimeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertTimeframe::OneMinute => "1m",
            AlertTimeframe::FiveMinutes => "5m",
            AlertTimeframe::FifteenMinutes => "15m",
            AlertTimeframe::OneHour => "1h",
            AlertTimeframe::OneDay => "1d",
            AlertTimeframe::OneWeek => "1w",
            AlertTimeframe::ThirtyDays => "30d",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AlertTimeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(AlertTimeframe::OneMinute),
            "5m" => Ok(AlertTimeframe::FiveMinutes),
            "15m" => Ok(AlertTimeframe::FifteenMinutes),
            "1h" => Ok(AlertTimeframe::OneHour),
            "1d" => Ok(AlertTimeframe::OneDay),
            "1w" => Ok(AlertTimeframe::OneWeek),
            "30d" => Ok(AlertTimeframe::ThirtyDays),
            _ => Err(format!("unknown alert timeframe: {s}")),
        }
    }
}

/// Alert lifecycle state. The only transitions are Active -> Triggered
/// (threshold breached) and Triggered -> Active (resolved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Triggered,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Active => write!(f, "active"),
            AlertStatus::Triggered => write!(f, "triggered"),
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AlertStatus::Active),
            "triggered" => Ok(AlertStatus::Triggered),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

/// A user-defined alert rule. `status` is mutated only by the evaluation
/// worker; everything else by the owning team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub project_id: i64,
    /// Denormalized project name, captured at creation for list filtering.
    pub project_name: String,
    pub team_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub threshold: i64,
    pub condition: AlertCondition,
    pub timeframe: AlertTimeframe,
    pub high_priority: bool,
    pub status: AlertStatus,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ephemeral mutual-exclusion record for one alert. At most one unexpired
/// lock may exist per alert id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertLock {
    pub alert_id: i64,
    pub instance_id: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Kind of notification channel. Webhook is the only delivery type today;
/// the enum keeps the wire name stable for future kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Webhook,
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelType::Webhook => write!(f, "webhook"),
        }
    }
}

impl std::str::FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook" => Ok(ChannelType::Webhook),
            _ => Err(format!("unknown channel type: {s}")),
        }
    }
}

/// Team-scoped notification destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: i64,
    pub team_id: i64,
    pub name: String,
    pub channel_type: ChannelType,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Webhook endpoint configuration for one channel. Delivery is attempted
/// only after the endpoint has been verified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub channel_id: i64,
    pub url: String,
    /// AES-256-GCM encrypted signing secret (base64, nonce-prefixed).
    pub encrypted_secret: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Whether a notification announces a trigger or a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Triggered,
    Resolved,
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationType::Triggered => write!(f, "triggered"),
            NotificationType::Resolved => write!(f, "resolved"),
        }
    }
}

impl std::str::FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "triggered" => Ok(NotificationType::Triggered),
            "resolved" => Ok(NotificationType::Resolved),
            _ => Err(format!("unknown notification type: {s}")),
        }
    }
}

/// Delivery state of one notification row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Pending => write!(f, "pending"),
            NotificationStatus::Sent => write!(f, "sent"),
            NotificationStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NotificationStatus::Pending),
            "sent" => Ok(NotificationStatus::Sent),
            "failed" => Ok(NotificationStatus::Failed),
            _ => Err(format!("unknown notification status: {s}")),
        }
    }
}

/// One delivery attempt. Created as Pending before the send, updated to
/// Sent or Failed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertNotification {
    pub id: String,
    pub alert_id: i64,
    pub channel_id: i64,
    pub notification_type: NotificationType,
    pub status: NotificationStatus,
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Format a tag map into sorted `key=value` pairs.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use oxtrack_common::types::format_tags;
///
/// let mut tags = HashMap::new();
/// tags.insert("release".to_string(), "1.0.0".to_string());
/// tags.insert("env".to_string(), "prod".to_string());
/// assert_eq!(format_tags(&tags), "env=prod, release=1.0.0");
/// ```
pub fn format_tags(tags: &HashMap<String, String>) -> String {
    if tags.is_empty() {
        return String::new();
    }
    let mut pairs: Vec<String> = tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    pairs.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_roundtrip_and_duration() {
        for s in ["1m", "5m", "15m", "1h", "1d", "1w", "30d"] {
            let tf: AlertTimeframe = s.parse().unwrap();
            assert_eq!(tf.to_string(), s);
        }
        assert_eq!(
            AlertTimeframe::OneHour.duration(),
            chrono::Duration::hours(1)
        );
        assert_eq!(
            AlertTimeframe::ThirtyDays.duration(),
            chrono::Duration::days(30)
        );
    }

    #[test]
    fn condition_wire_names() {
        assert_eq!(AlertCondition::OccurrenceCount.to_string(), "occurrences");
        assert_eq!(
            AlertCondition::DistinctUserCount.to_string(),
            "users_affected"
        );
        assert!("count".parse::<AlertCondition>().is_err());
    }

    #[test]
    fn status_roundtrip() {
        let st: AlertStatus = "triggered".parse().unwrap();
        assert_eq!(st, AlertStatus::Triggered);
        assert_eq!(AlertStatus::Active.to_string(), "active");
    }
}
