/// Errors from the notification subsystem.
///
/// # Examples
///
/// ```rust
/// use oxtrack_notify::error::NotifyError;
///
/// let err = NotifyError::UnverifiedEndpoint(7);
/// assert!(err.to_string().contains("7"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Delivery was requested for a webhook endpoint that has never passed
    /// verification.
    #[error("Notify: webhook endpoint for channel {0} is not verified")]
    UnverifiedEndpoint(i64),

    /// The HTTP request itself failed (connect, TLS, timeout).
    #[error("Notify: HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The endpoint answered with a non-2xx status.
    #[error("Notify: endpoint returned status={status}, body={body}")]
    ApiError { status: u16, body: String },

    /// Payload serialization failed.
    #[error("Notify: JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
