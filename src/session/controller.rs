use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::{
    sync::{watch, Mutex as AsyncMutex},
    task::JoinHandle,
    time,
};
use uuid::Uuid;

use crate::{
    api::IdentityStore,
    capture::{CaptureStatus, SamplerController},
    channel::ChannelStatus,
    db::{CaptureRecord, CaptureRecordStatus, Database, RosterRecord},
    error::CaptureError,
    fanout::{Topic, Update, UpdateBus},
    utils::time::format_mm_ss,
};

use super::{
    CaptureSession, DetectionEvent, DetectionOutcome, RosterEntry, SessionMetrics, SessionStatus,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: Option<String>,
    pub status: SessionStatus,
    pub operator_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: u64,
    pub clock: String,
    /// Most recently added subject first.
    pub roster: Vec<RosterEntry>,
    pub unresolved_count: u64,
}

impl From<&CaptureSession> for SessionSnapshot {
    fn from(session: &CaptureSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            status: session.status,
            operator_id: session.operator_id.clone(),
            started_at: session.started_at,
            ended_at: session.ended_at,
            elapsed_seconds: session.elapsed_seconds,
            clock: format_mm_ss(session.elapsed_seconds),
            roster: session.roster_newest_first(),
            unresolved_count: session.unresolved_count,
        }
    }
}

/// Result of a lifecycle request. Requests that do not fit the current state
/// are not errors; they come back as `Ignored`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SessionOutcome {
    Applied { snapshot: SessionSnapshot },
    Ignored { reason: String },
}

impl SessionOutcome {
    fn ignored(err: CaptureError) -> Self {
        SessionOutcome::Ignored {
            reason: err.to_string(),
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, SessionOutcome::Applied { .. })
    }
}

struct Finished {
    record: CaptureRecord,
    roster: Vec<RosterRecord>,
}

/// Owns the single attendance capture session of the process.
///
/// All mutation goes through here: lifecycle transitions, the one-second
/// clock and the deduplicated roster. Every change is announced on the
/// update bus so views can refresh.
#[derive(Clone)]
pub struct DetectionSession {
    state: Arc<Mutex<CaptureSession>>,
    sampler: Arc<AsyncMutex<SamplerController>>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    bus: UpdateBus,
    identity: IdentityStore,
    expected_count: Arc<AtomicUsize>,
    channel_status: watch::Receiver<ChannelStatus>,
    capture_status: watch::Receiver<CaptureStatus>,
    history: Option<Database>,
    tick_interval: Duration,
    heartbeat_every_ticks: u32,
}

impl DetectionSession {
    pub fn new(
        sampler: SamplerController,
        bus: UpdateBus,
        identity: IdentityStore,
        channel_status: watch::Receiver<ChannelStatus>,
    ) -> Self {
        let capture_status = sampler.subscribe_status();
        Self {
            state: Arc::new(Mutex::new(CaptureSession::new())),
            sampler: Arc::new(AsyncMutex::new(sampler)),
            ticker: Arc::new(Mutex::new(None)),
            bus,
            identity,
            expected_count: Arc::new(AtomicUsize::new(0)),
            channel_status,
            capture_status,
            history: None,
            tick_interval: Duration::from_secs(1),
            heartbeat_every_ticks: 10,
        }
    }

    /// Records sessions in `db`, checkpointing every `heartbeat_every_ticks`
    /// clock ticks.
    pub fn with_history(mut self, db: Database, heartbeat_every_ticks: u32) -> Self {
        self.history = Some(db);
        self.heartbeat_every_ticks = heartbeat_every_ticks.max(1);
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, CaptureSession> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::from(&*self.lock_state())
    }

    pub fn status(&self) -> SessionStatus {
        self.lock_state().status
    }

    pub fn metrics(&self) -> SessionMetrics {
        let capture_status = self.capture_status.borrow().clone();
        let channel_state = self.channel_status.borrow().state();
        SessionMetrics::derive(
            &self.lock_state(),
            self.expected_count(),
            capture_status,
            channel_state,
        )
    }

    pub fn expected_count(&self) -> usize {
        self.expected_count.load(Ordering::SeqCst)
    }

    pub fn set_expected_count(&self, count: usize) {
        let previous = self.expected_count.swap(count, Ordering::SeqCst);
        if previous != count {
            log_debug!("expected attendance count {previous} -> {count}");
        }
    }

    pub async fn start(&self) -> Result<SessionOutcome, CaptureError> {
        let operator = self.identity.current().ok_or(CaptureError::NotAuthenticated)?;

        let mut sampler = self.sampler.lock().await;
        {
            let state = self.lock_state();
            if state.is_active() {
                let err = CaptureError::stale(state.status.as_str(), "start");
                log_warn!("{err}");
                return Ok(SessionOutcome::ignored(err));
            }
        }

        self.cancel_ticker();
        let session_id = Uuid::new_v4().to_string();
        // Nothing has changed yet if the camera refuses.
        sampler.arm(session_id.clone())?;

        let started_at = Utc::now();
        let snapshot = {
            let mut state = self.lock_state();
            state.begin(session_id.clone(), Some(operator.id.to_string()), started_at);
            SessionSnapshot::from(&*state)
        };
        self.spawn_ticker(session_id.clone());
        drop(sampler);

        if let Some(db) = &self.history {
            let record = CaptureRecord {
                id: session_id.clone(),
                operator_id: snapshot.operator_id.clone(),
                status: CaptureRecordStatus::Active,
                started_at,
                ended_at: None,
                elapsed_seconds: 0,
                present_count: 0,
                unresolved_count: 0,
                average_confidence: 0.0,
                created_at: started_at,
                updated_at: started_at,
            };
            if let Err(err) = db.insert_capture_session(&record).await {
                log_error!("failed to record capture session {session_id}: {err:#}");
            }
        }

        log_info!("capture session {session_id} started by {}", operator.email);
        self.bus.publish(
            Update::new(Topic::SessionChanged, "session_started")
                .with_data(json!({ "sessionId": session_id })),
        );
        self.bus.publish(
            Update::new(Topic::RosterChanged, "roster_reset")
                .with_data(json!({ "sessionId": session_id })),
        );
        Ok(SessionOutcome::Applied { snapshot })
    }

    pub async fn stop(&self) -> SessionOutcome {
        let mut sampler = self.sampler.lock().await;
        let (snapshot, finished) = {
            let mut state = self.lock_state();
            let ended_at = Utc::now();
            if let Err(err) = state.end(ended_at) {
                log_warn!("{err}");
                return SessionOutcome::ignored(err);
            }
            // No tick may send once this returns.
            sampler.halt();
            self.cancel_ticker();
            (SessionSnapshot::from(&*state), finished_record(&state, ended_at))
        };

        if let Err(err) = sampler.disarm().await {
            log_error!("failed to stop sampling cleanly: {err:#}");
        }
        drop(sampler);

        if let (Some(db), Some(finished)) = (&self.history, finished) {
            if let Err(err) = db
                .finish_capture_session(&finished.record, finished.roster)
                .await
            {
                log_error!("failed to store capture session {}: {err:#}", finished.record.id);
            }
        }

        log_info!(
            "capture session {} ended after {} with {} present",
            snapshot.session_id.as_deref().unwrap_or("?"),
            snapshot.clock,
            snapshot.roster.len()
        );
        self.bus.publish(
            Update::new(Topic::SessionChanged, "session_ended")
                .with_data(json!({ "sessionId": snapshot.session_id })),
        );
        SessionOutcome::Applied { snapshot }
    }

    /// Folds one detection into the roster. Only an active session accepts
    /// detections; anything else is logged and dropped.
    pub fn on_detection(&self, event: DetectionEvent) -> DetectionOutcome {
        let (outcome, session_id) = {
            let mut state = self.lock_state();
            (state.apply_detection(&event), state.session_id.clone())
        };

        match &outcome {
            DetectionOutcome::Ignored { reason } => {
                log_debug!("detection for {:?} ignored: {reason}", event.subject_id);
            }
            DetectionOutcome::Unresolved => {
                self.bus.publish(
                    Update::new(Topic::RosterChanged, "detection_unresolved")
                        .with_data(json!({ "sessionId": session_id })),
                );
            }
            DetectionOutcome::Inserted | DetectionOutcome::Updated => {
                self.bus.publish(
                    Update::new(Topic::RosterChanged, "detection_result").with_data(json!({
                        "sessionId": session_id,
                        "subjectId": event.subject_id,
                        "confidence": event.confidence,
                    })),
                );
            }
        }
        outcome
    }

    /// Stops any running session. Used on shutdown.
    pub async fn shutdown(&self) {
        if self.status() == SessionStatus::Active {
            self.stop().await;
        }
        self.cancel_ticker();
    }

    fn spawn_ticker(&self, session_id: String) {
        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = ticker.take() {
            handle.abort();
        }

        let state = self.state.clone();
        let bus = self.bus.clone();
        let history = self.history.clone();
        let tick_interval = self.tick_interval;
        let heartbeat_every = self.heartbeat_every_ticks;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + tick_interval, tick_interval);
            let mut ticks: u32 = 0;
            loop {
                interval.tick().await;

                let (elapsed, present) = {
                    let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
                    match guard.tick(&session_id) {
                        Some(elapsed) => (elapsed, guard.roster.len()),
                        None => break,
                    }
                };

                bus.publish(Update::new(Topic::SessionClock, "tick").with_data(json!({
                    "sessionId": session_id,
                    "elapsedSeconds": elapsed,
                    "clock": format_mm_ss(elapsed),
                })));

                ticks = ticks.wrapping_add(1);
                if ticks % heartbeat_every == 0 {
                    if let Some(db) = history.clone() {
                        let session_id = session_id.clone();
                        tokio::spawn(async move {
                            if let Err(err) = db
                                .update_capture_progress(&session_id, elapsed, present as u64, Utc::now())
                                .await
                            {
                                log_warn!("failed to checkpoint session {session_id}: {err:#}");
                            }
                        });
                    }
                }
            }
        });

        *ticker = Some(handle);
    }

    fn cancel_ticker(&self) {
        if let Some(handle) = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

fn finished_record(state: &CaptureSession, ended_at: DateTime<Utc>) -> Option<Finished> {
    let session_id = state.session_id.clone()?;
    let started_at = state.started_at.unwrap_or(ended_at);
    let roster = state
        .roster
        .entries()
        .iter()
        .enumerate()
        .map(|(position, entry)| RosterRecord {
            session_id: session_id.clone(),
            subject_id: entry.subject_id.clone(),
            position: position as u64,
            display_name: entry.display_name.clone(),
            confidence: entry.confidence,
            first_seen_at: entry.first_seen_at,
            last_seen_at: entry.last_seen_at,
            hits: entry.hits,
        })
        .collect();

    Some(Finished {
        record: CaptureRecord {
            id: session_id,
            operator_id: state.operator_id.clone(),
            status: CaptureRecordStatus::Ended,
            started_at,
            ended_at: Some(ended_at),
            elapsed_seconds: state.elapsed_seconds,
            present_count: state.roster.len() as u64,
            unresolved_count: state.unresolved_count,
            average_confidence: state.roster.average_confidence(),
            created_at: started_at,
            updated_at: ended_at,
        },
        roster,
    })
}
