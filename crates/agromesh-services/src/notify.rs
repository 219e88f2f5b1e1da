//! Notification seam for application-visible node problems.
//!
//! An explicit `ErrorResponse` and a poll timeout are distinct conditions
//! and are reported as distinct reasons.

use std::fmt;
use std::sync::Arc;

use agromesh_core::NodeAddress;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum NotifyReason {
    /// The node did not answer a poll before the deadline.
    NoResponse,
    /// The node answered with an `ErrorResponse` carrying this code.
    ErrorResponse(u8),
    /// The poll request could not be put on the air.
    SendFailed,
}

impl fmt::Display for NotifyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyReason::NoResponse => f.write_str("no response"),
            NotifyReason::ErrorResponse(code) => write!(f, "error response 0x{code:02x}"),
            NotifyReason::SendFailed => f.write_str("request send failed"),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, node: &NodeAddress, reason: NotifyReason);
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, node: &NodeAddress, reason: NotifyReason) {
        tracing::warn!(node = %node, %reason, "node problem");
    }
}

/// Fan a notification out to several notifiers.
#[derive(Clone, Default)]
pub struct NotifierSet {
    targets: Vec<Arc<dyn Notifier>>,
}

impl NotifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, target: Arc<dyn Notifier>) -> Self {
        self.targets.push(target);
        self
    }
}

impl Notifier for NotifierSet {
    fn notify(&self, node: &NodeAddress, reason: NotifyReason) {
        for t in &self.targets {
            t.notify(node, reason);
        }
    }
}
