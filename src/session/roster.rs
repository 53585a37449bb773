use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DetectionEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub subject_id: String,
    pub display_name: String,
    pub confidence: f64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub thumbnail: Option<String>,
    /// Detections folded into this entry.
    pub hits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RosterChange {
    Inserted,
    Updated,
}

/// Deduplicated set of subjects seen in one session.
///
/// Entries keep the position of their first sighting; later detections of
/// the same subject overwrite confidence and time in place.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Vec<RosterEntry>,
    index: HashMap<String, usize>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn get(&self, subject_id: &str) -> Option<&RosterEntry> {
        self.index.get(subject_id).map(|&slot| &self.entries[slot])
    }

    /// Folds a resolved detection in. Returns `None` for unresolved events,
    /// which cannot be deduplicated.
    pub fn apply(&mut self, event: &DetectionEvent) -> Option<RosterChange> {
        let subject_id = event.subject_id.as_ref()?;

        if let Some(&slot) = self.index.get(subject_id) {
            let entry = &mut self.entries[slot];
            entry.confidence = event.confidence;
            entry.last_seen_at = event.observed_at;
            entry.hits = entry.hits.saturating_add(1);
            if !event.display_name.is_empty() && event.display_name != *subject_id {
                entry.display_name = event.display_name.clone();
            }
            if event.thumbnail.is_some() {
                entry.thumbnail = event.thumbnail.clone();
            }
            return Some(RosterChange::Updated);
        }

        self.index.insert(subject_id.clone(), self.entries.len());
        self.entries.push(RosterEntry {
            subject_id: subject_id.clone(),
            display_name: event.display_name.clone(),
            confidence: event.confidence,
            first_seen_at: event.observed_at,
            last_seen_at: event.observed_at,
            thumbnail: event.thumbnail.clone(),
            hits: 1,
        });
        Some(RosterChange::Inserted)
    }

    /// First-seen order.
    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    /// Display order: most recently added subject first.
    pub fn newest_first(&self) -> Vec<RosterEntry> {
        self.entries.iter().rev().cloned().collect()
    }

    pub fn average_confidence(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let total: f64 = self.entries.iter().map(|entry| entry.confidence).sum();
        total / self.entries.len() as f64
    }
}
