use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

/// Outbound messages for the mail/SMS layer, which lives outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Notification {
    #[serde(rename_all = "camelCase")]
    BookingConfirmed {
        booking_id: Ulid,
        parent_email: String,
        parent_name: String,
        date: NaiveDate,
        time: String,
        lesson_type: String,
        amount_paid: Option<i64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification not queued: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn enqueue(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// In-process fan-out. Delivery workers subscribe; with nobody listening a
/// message is dropped, which is not an error.
pub struct NotifyHub {
    sender: broadcast::Sender<Notification>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Notifier for NotifyHub {
    async fn enqueue(&self, notification: Notification) -> Result<(), NotifyError> {
        if self.sender.send(notification).is_err() {
            tracing::debug!("notification dropped: no subscribers");
        }
        Ok(())
    }
}
