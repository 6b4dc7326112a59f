use crate::subsystems::HormoneKind;
use heapless::Deque;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const MAX_RECORDED_NOTIFICATIONS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Status,
    Warning,
    Critical,
}

/// Change notifications pushed by the core towards the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    BatteryLevel { level: u8 },
    ReservoirLevel { hormone: HormoneKind, level: u8 },
    Glucose { glucose: u16, hormone: Option<HormoneKind>, units: u8 },
    OperationTime { hours: u64 },
    Log { severity: Severity, message: String },
}

pub trait NotificationSink: Send + Sync {
    /// Must not block; a sink that cannot deliver drops the notification.
    fn notify(&self, notification: Notification);
}

impl NotificationSink for broadcast::Sender<Notification> {
    fn notify(&self, notification: Notification) {
        // No subscribers is the normal state when no UI is attached
        let _ = self.send(notification);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _notification: Notification) {}
}

/// Keeps the most recent notifications in a bounded ring.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    history: Arc<Mutex<Deque<Notification, MAX_RECORDED_NOTIFICATIONS>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Notification> {
        match self.history.lock() {
            Ok(history) => history.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn log_messages(&self, severity: Severity) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Log { severity: s, message } if s == severity => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut history) = self.history.lock() {
            history.clear();
        }
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        let mut history = match self.history.lock() {
            Ok(history) => history,
            Err(poisoned) => poisoned.into_inner(),
        };
        if history.is_full() {
            history.pop_front();
        }
        let _ = history.push_back(notification);
    }
}

/// Logging and alerting front for the core. Every message goes to `tracing`
/// and is mirrored to the notification sink so an attached UI can show it.
#[derive(Clone)]
pub struct Tracer {
    sink: Arc<dyn NotificationSink>,
}

impl Tracer {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    pub fn silent() -> Self {
        Self::new(Arc::new(NullSink))
    }

    pub fn log_status(&self, message: &str) {
        info!("{}", message);
        self.log(Severity::Status, message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!("{}", message);
        self.log(Severity::Warning, message);
    }

    pub fn log_critical(&self, message: &str) {
        error!("{}", message);
        self.log(Severity::Critical, message);
    }

    pub fn log_at(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Status => self.log_status(message),
            Severity::Warning => self.log_warning(message),
            Severity::Critical => self.log_critical(message),
        }
    }

    pub fn notify(&self, notification: Notification) {
        self.sink.notify(notification);
    }

    fn log(&self, severity: Severity, message: &str) {
        self.sink.notify(Notification::Log {
            severity,
            message: message.to_string(),
        });
    }
}

impl core::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}
