use std::fmt;
use std::sync::Mutex;

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// Transient (or persistent) message addressed to the person using the app.
///
/// Notifications are a presentation side effect. Stores emit them after every
/// mutation outcome and the subscription manager emits one when the change
/// feed is lost for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    /// Entity display name ("Lead", "Deal") or "Connection".
    pub entity: &'static str,
    /// Short action key: "create", "update", "delete", "load", "connection".
    pub action: &'static str,
    pub message: String,
    /// Persistent notifications stay until dismissed by the user.
    pub persistent: bool,
    /// Optional action offered alongside the message (e.g. "reload").
    pub retry_action: Option<&'static str>,
}

impl Notification {
    pub fn success(entity: &'static str, action: &'static str, message: impl Into<String>) -> Self {
        Self::transient(NotificationLevel::Success, entity, action, message)
    }

    pub fn info(entity: &'static str, action: &'static str, message: impl Into<String>) -> Self {
        Self::transient(NotificationLevel::Info, entity, action, message)
    }

    pub fn error(entity: &'static str, action: &'static str, message: impl Into<String>) -> Self {
        Self::transient(NotificationLevel::Error, entity, action, message)
    }

    /// Non-dismissing warning carrying a manual retry action.
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Warning,
            entity: "Connection",
            action: "connection",
            message: message.into(),
            persistent: true,
            retry_action: Some("reload"),
        }
    }

    fn transient(
        level: NotificationLevel,
        entity: &'static str,
        action: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            entity,
            action,
            message: message.into(),
            persistent: false,
            retry_action: None,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}] {}", self.entity, self.action, self.message)
    }
}

/// Sink for user-facing notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Renders notifications as tracing events. Used when no UI is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, n: Notification) {
        match n.level {
            NotificationLevel::Success | NotificationLevel::Info => {
                tracing::info!(entity = n.entity, action = n.action, "{}", n.message)
            }
            NotificationLevel::Warning => {
                tracing::warn!(
                    entity = n.entity,
                    action = n.action,
                    persistent = n.persistent,
                    "{}",
                    n.message
                )
            }
            NotificationLevel::Error => {
                tracing::error!(entity = n.entity, action = n.action, "{}", n.message)
            }
        }
    }
}

/// Records every notification in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, level: NotificationLevel) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|n| n.level == level)
            .count()
    }

    pub fn clear(&self) {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, notification: Notification) {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);
    }
}
