//! Tauri commands for console settings.
//!
//! Changes are persisted immediately and picked up on the next launch.

use tauri::State;

use crate::{
    config::{ConsoleConfig, SamplerConfig},
    AppState,
};

#[tauri::command]
pub fn get_console_config(state: State<'_, AppState>) -> ConsoleConfig {
    state.settings.config()
}

#[tauri::command]
pub fn update_sampler_config(
    state: State<'_, AppState>,
    sampler: SamplerConfig,
) -> Result<ConsoleConfig, String> {
    state
        .settings
        .update_sampler(sampler)
        .map_err(|e| e.to_string())?;
    Ok(state.settings.config())
}

#[tauri::command]
pub fn update_api_base_url(
    state: State<'_, AppState>,
    url: String,
) -> Result<ConsoleConfig, String> {
    state
        .settings
        .update_api_base_url(url)
        .map_err(|e| e.to_string())?;
    Ok(state.settings.config())
}
