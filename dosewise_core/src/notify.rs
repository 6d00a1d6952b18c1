//! Notification dispatch seam.
//!
//! Lifecycle transitions notify caregivers as a side effect. Dispatch
//! is fire-and-forget: a failed or slow dispatcher must never roll
//! back a committed transition, so the trait returns nothing.

use crate::DoseStatus;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Payload handed to the dispatcher on take/skip/missed transitions
#[derive(Clone, Debug)]
pub struct Notification {
    pub patient_id: String,
    pub medication_id: Uuid,
    pub event_id: Uuid,
    pub status: DoseStatus,
    pub scheduled_date_time: DateTime<Utc>,
    pub message: String,
}

/// Dispatcher seam; implementations deliver however they like
pub trait Notifier {
    fn dispatch(&self, notification: &Notification);
}

/// Default notifier that records the notification in the log
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn dispatch(&self, notification: &Notification) {
        tracing::info!(
            patient_id = %notification.patient_id,
            event_id = %notification.event_id,
            status = notification.status.as_str(),
            "{}",
            notification.message
        );
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::cell::RefCell;

    /// Captures dispatched notifications for assertions
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: RefCell<Vec<Notification>>,
    }

    impl Notifier for RecordingNotifier {
        fn dispatch(&self, notification: &Notification) {
            self.sent.borrow_mut().push(notification.clone());
        }
    }
}
