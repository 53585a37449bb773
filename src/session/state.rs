use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

use super::{DetectionEvent, Roster, RosterChange, RosterEntry};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        }
    }
}

/// What happened to a detection handed to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum DetectionOutcome {
    Inserted,
    Updated,
    Unresolved,
    Ignored { reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct CaptureSession {
    pub status: SessionStatus,
    pub session_id: Option<String>,
    pub operator_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: u64,
    pub unresolved_count: u64,
    pub roster: Roster,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Replaces whatever was here with a fresh active session.
    pub fn begin(&mut self, session_id: String, operator_id: Option<String>, now: DateTime<Utc>) {
        *self = Self {
            status: SessionStatus::Active,
            session_id: Some(session_id),
            operator_id,
            started_at: Some(now),
            ended_at: None,
            elapsed_seconds: 0,
            unresolved_count: 0,
            roster: Roster::new(),
        };
    }

    /// Freezes the clock. The roster stays for review until the next start.
    pub fn end(&mut self, now: DateTime<Utc>) -> Result<(), CaptureError> {
        if !self.is_active() {
            return Err(CaptureError::stale(self.status.as_str(), "stop"));
        }
        self.status = SessionStatus::Ended;
        self.ended_at = Some(now);
        Ok(())
    }

    /// Advances the clock by one second if `session_id` is still the active
    /// session. Returns the new elapsed value.
    pub fn tick(&mut self, session_id: &str) -> Option<u64> {
        if !self.is_active() || self.session_id.as_deref() != Some(session_id) {
            return None;
        }
        self.elapsed_seconds = self.elapsed_seconds.saturating_add(1);
        Some(self.elapsed_seconds)
    }

    pub fn apply_detection(&mut self, event: &DetectionEvent) -> DetectionOutcome {
        if !self.is_active() {
            return DetectionOutcome::Ignored {
                reason: CaptureError::stale(self.status.as_str(), "record a detection").to_string(),
            };
        }
        if let Some(origin) = event.session_id.as_deref() {
            if self.session_id.as_deref() != Some(origin) {
                return DetectionOutcome::Ignored {
                    reason: format!("detection belongs to session {origin}"),
                };
            }
        }
        match self.roster.apply(event) {
            Some(RosterChange::Inserted) => DetectionOutcome::Inserted,
            Some(RosterChange::Updated) => DetectionOutcome::Updated,
            None => {
                self.unresolved_count = self.unresolved_count.saturating_add(1);
                DetectionOutcome::Unresolved
            }
        }
    }

    pub fn roster_newest_first(&self) -> Vec<RosterEntry> {
        self.roster.newest_first()
    }
}
