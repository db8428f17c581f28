use std::fmt;

use chrono::{DateTime, Local};
use serde::Serialize;

use earl_core::Target;

/// Discriminant of an application event.
///
/// Wire representation (JSON `type` field) is the snake_case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppEventKind {
    /// Doorbell triggered for a target.
    DoorbellTrigger,
    /// A door's reed contact reported open/closed (value 1/0).
    DoorSensor,
    /// Request to open the door for a target.
    OpenRequest,
    /// Request to keep the bell quiet until the event's timeout.
    HushBellRequest,
    UserAdded,
    UserUpdated,
    UserDeleted,
    /// Posted once when the daemon comes up.
    EarlStarted,
    TerminalConnect,
    TerminalDisconnect,
}

impl fmt::Display for AppEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppEventKind::DoorbellTrigger => "doorbell_trigger",
            AppEventKind::DoorSensor => "door_sensor",
            AppEventKind::OpenRequest => "open_request",
            AppEventKind::HushBellRequest => "hush_bell_request",
            AppEventKind::UserAdded => "user_added",
            AppEventKind::UserUpdated => "user_updated",
            AppEventKind::UserDeleted => "user_deleted",
            AppEventKind::EarlStarted => "earl_started",
            AppEventKind::TerminalConnect => "terminal_connect",
            AppEventKind::TerminalDisconnect => "terminal_disconnect",
        };
        write!(f, "{name}")
    }
}

/// An event on the application bus.
///
/// Events are kept deliberately loose: a kind, the target they concern,
/// an FYI source and human-readable message, and two optional parameters
/// whose meaning depends on the kind. The timestamp is stamped by the bus
/// on post when the producer left it unset.
#[derive(Debug, Clone, Serialize)]
pub struct AppEvent {
    pub timestamp: Option<DateTime<Local>>,
    #[serde(rename = "type")]
    pub kind: AppEventKind,
    pub target: Target,
    pub source: String,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<DateTime<Local>>,
}

impl AppEvent {
    pub fn new(kind: AppEventKind, target: Target) -> Self {
        AppEvent {
            timestamp: None,
            kind,
            target,
            source: String::new(),
            msg: String::new(),
            value: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    #[must_use]
    pub fn msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = msg.into();
        self
    }

    #[must_use]
    pub fn value(mut self, value: i64) -> Self {
        self.value = Some(value);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: DateTime<Local>) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
