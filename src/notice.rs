//! User-facing notices (toasts). Controllers publish here; whatever shell
//! hosts the core renders them however it likes.

use crate::error::ApiError;
use crate::model::UnixTimeMs;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub id: Uuid,
    pub level: NoticeLevel,
    pub title: String,
    pub body: Option<String>,
    /// Set when the notice concerns one rejected input field.
    pub field: Option<String>,
    pub created_at: UnixTimeMs,
}

impl Notice {
    #[must_use]
    pub fn new(level: NoticeLevel, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            level,
            title: title.into(),
            body: None,
            field: None,
            created_at: UnixTimeMs::now(),
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// Broadcast bus for notices. Cloning shares the same bus; dropping every
/// receiver just means notices go nowhere, which is fine for headless use.
#[derive(Debug, Clone)]
pub struct NoticeCenter {
    tx: broadcast::Sender<Notice>,
}

impl Default for NoticeCenter {
    fn default() -> Self {
        Self::new(crate::NOTICE_BUS_CAPACITY)
    }
}

impl NoticeCenter {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, notice: Notice) {
        debug!(
            level = ?notice.level,
            title = %notice.title,
            listeners = self.tx.receiver_count(),
            "notice emitted"
        );
        // Send only fails when nobody is listening; that is not an error.
        let _ = self.tx.send(notice);
    }

    pub fn success(&self, title: impl Into<String>) {
        self.emit(Notice::new(NoticeLevel::Success, title));
    }

    pub fn info(&self, title: impl Into<String>) {
        self.emit(Notice::new(NoticeLevel::Info, title));
    }

    pub fn warning(&self, title: impl Into<String>) {
        self.emit(Notice::new(NoticeLevel::Warning, title));
    }

    pub fn error(&self, title: impl Into<String>) {
        self.emit(Notice::new(NoticeLevel::Error, title));
    }

    /// Surfaces an API failure. Field-level validation errors fan out to one
    /// notice per rejected entry; everything else becomes a single notice
    /// with the error's user-facing text.
    pub fn notify_api_error(&self, error: &ApiError) {
        if error.has_field_errors() {
            for (field, messages) in &error.field_errors {
                for message in messages {
                    self.emit(
                        Notice::new(NoticeLevel::Error, message.clone()).with_field(field.clone()),
                    );
                }
            }
            return;
        }
        self.emit(Notice::new(NoticeLevel::Error, error.user_facing_message()));
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn emit_reaches_subscriber() {
        let center = NoticeCenter::new(8);
        let mut rx = center.subscribe();

        center.success("Contact created");

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.level, NoticeLevel::Success);
        assert_eq!(notice.title, "Contact created");
        assert!(notice.field.is_none());
    }

    #[tokio::test]
    async fn field_errors_fan_out_one_notice_per_entry() {
        let center = NoticeCenter::new(8);
        let mut rx = center.subscribe();

        let body = br#"{"errors":{"email":["Enter a valid email address."],"phone":["This field is required.","Too short."]}}"#;
        let error = ApiError::from_status_body(400, Some(body));
        center.notify_api_error(&error);

        let mut received = Vec::new();
        while let Ok(notice) = rx.try_recv() {
            received.push(notice);
        }

        assert_eq!(received.len(), 3);
        assert!(received.iter().all(|n| n.level == NoticeLevel::Error));
        assert_eq!(
            received.iter().filter(|n| n.field.as_deref() == Some("phone")).count(),
            2
        );
    }

    #[tokio::test]
    async fn generic_error_is_single_notice() {
        let center = NoticeCenter::new(8);
        let mut rx = center.subscribe();

        center.notify_api_error(&ApiError::new(ErrorKind::Network, "connection refused"));

        let notice = rx.recv().await.unwrap();
        assert!(notice.title.contains("Unable to connect"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emit_without_listeners_is_harmless() {
        let center = NoticeCenter::default();
        center.error("nobody home");
        assert_eq!(center.listener_count(), 0);
    }
}
