use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse change categories views can subscribe to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Topic {
    AttendanceChanged,
    RosterChanged,
    DirectoryChanged,
    SmsChanged,
    SessionChanged,
    SessionClock,
    ChannelStatus,
}

impl Topic {
    pub const ALL: [Topic; 7] = [
        Topic::AttendanceChanged,
        Topic::RosterChanged,
        Topic::DirectoryChanged,
        Topic::SmsChanged,
        Topic::SessionChanged,
        Topic::SessionClock,
        Topic::ChannelStatus,
    ];

    /// Event name used when a topic is forwarded to the webview.
    pub fn event_name(&self) -> &'static str {
        match self {
            Topic::AttendanceChanged => "attendance-changed",
            Topic::RosterChanged => "roster-changed",
            Topic::DirectoryChanged => "directory-changed",
            Topic::SmsChanged => "sms-changed",
            Topic::SessionChanged => "session-changed",
            Topic::SessionClock => "session-clock",
            Topic::ChannelStatus => "channel-status",
        }
    }
}

/// A change notification.
///
/// `kind` is the tag of whatever caused it (a server message type such as
/// `attendance_marked`, or a local one such as `session_started`). `data` may
/// be partial or null: subscribers treat the update as a dirty flag and
/// re-fetch from the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    pub topic: Topic,
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Update {
    pub fn new(topic: Topic, kind: impl Into<String>) -> Self {
        Self {
            topic,
            kind: kind.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}
