use base64::{engine::general_purpose::STANDARD, Engine as _};
use tauri::State;

use crate::{
    api::{AttendanceRecord, Faculty, LoginPayload, Student, User},
    channel::ChannelStatus,
    db::{CaptureRecord, RosterRecord},
    metrics::MetricsSnapshot,
    session::{SessionMetrics, SessionOutcome, SessionSnapshot},
};

use crate::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 50;

#[tauri::command]
pub async fn login(state: State<'_, AppState>, payload: LoginPayload) -> Result<User, String> {
    state
        .console
        .identity()
        .sign_in(state.api.as_ref(), payload)
        .await
        .map_err(|e| e.to_string())
}

/// Ends any running capture before clearing the operator.
#[tauri::command]
pub async fn logout(state: State<'_, AppState>) -> Result<(), String> {
    state.console.session().stop().await;
    state.console.identity().sign_out();
    Ok(())
}

#[tauri::command]
pub async fn start_session(state: State<'_, AppState>) -> Result<SessionOutcome, String> {
    state
        .console
        .session()
        .start()
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn stop_session(state: State<'_, AppState>) -> Result<SessionOutcome, String> {
    Ok(state.console.session().stop().await)
}

#[tauri::command]
pub fn get_session_snapshot(state: State<'_, AppState>) -> SessionSnapshot {
    state.console.session().snapshot()
}

#[tauri::command]
pub fn get_session_metrics(state: State<'_, AppState>) -> SessionMetrics {
    state.console.session().metrics()
}

/// The webview owns the camera; it posts stills here as base64 JPEG, with or
/// without the `data:` prefix. `error` reports a denied or lost camera.
#[tauri::command]
pub fn submit_camera_frame(
    state: State<'_, AppState>,
    frame: Option<String>,
    error: Option<String>,
) -> Result<(), String> {
    if let Some(reason) = error {
        state.frames.report_unavailable(reason);
        return Ok(());
    }
    let frame = frame.ok_or_else(|| "frame or error is required".to_string())?;
    let encoded = frame
        .split_once(";base64,")
        .map(|(_, data)| data)
        .unwrap_or(&frame);
    let bytes = STANDARD.decode(encoded).map_err(|e| e.to_string())?;
    state.frames.submit_encoded(&bytes).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn get_channel_status(state: State<'_, AppState>) -> ChannelStatus {
    state.console.channel().status()
}

#[tauri::command]
pub fn list_attendance(state: State<'_, AppState>) -> Vec<AttendanceRecord> {
    state.attendance.records()
}

#[tauri::command]
pub fn list_students(state: State<'_, AppState>) -> Vec<Student> {
    state.directory.listing().students
}

#[tauri::command]
pub fn list_faculty(state: State<'_, AppState>) -> Vec<Faculty> {
    state.directory.listing().faculty
}

#[tauri::command]
pub async fn list_capture_history(
    state: State<'_, AppState>,
    limit: Option<usize>,
) -> Result<Vec<CaptureRecord>, String> {
    state
        .db
        .list_capture_sessions(limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn get_capture_roster(
    state: State<'_, AppState>,
    session_id: String,
) -> Result<Vec<RosterRecord>, String> {
    state
        .db
        .get_capture_roster(&session_id)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn get_capture_metrics(state: State<'_, AppState>) -> Result<MetricsSnapshot, String> {
    Ok(state.console.metrics().get_snapshot().await)
}
