pub mod api;
pub mod capture;
pub mod channel;
pub mod config;
#[cfg(feature = "desktop")]
mod config_commands;
pub mod console;
pub mod db;
pub mod error;
pub mod fanout;
pub mod metrics;
pub mod session;
pub mod utils;
pub mod views;

pub use console::Console;
pub use error::CaptureError;
pub use utils::logging::init_logging;

#[cfg(feature = "desktop")]
mod desktop {
    use std::sync::Arc;

    use log::warn;
    use tauri::Manager;

    use crate::{
        api::HttpApi,
        capture::{DeviceRegistry, FrameSlot, FrameSlotSource},
        channel::WsConnector,
        config::SettingsStore,
        config_commands::{get_console_config, update_api_base_url, update_sampler_config},
        console::Console,
        db::Database,
        session::commands::{
            get_capture_metrics, get_capture_roster, get_channel_status, get_session_metrics,
            get_session_snapshot, list_attendance, list_capture_history, list_faculty,
            list_students, login, logout, start_session, stop_session, submit_camera_frame,
        },
        views::{AttendanceFeed, DirectoryView, WebviewBridge},
    };

    const CAMERA_DEVICE_ID: &str = "webview-camera";

    pub(crate) struct AppState {
        pub(crate) console: Console,
        pub(crate) api: Arc<HttpApi>,
        pub(crate) db: Database,
        pub(crate) frames: FrameSlot,
        pub(crate) directory: DirectoryView,
        pub(crate) attendance: AttendanceFeed,
        pub(crate) settings: SettingsStore,
        _bridge: WebviewBridge,
    }

    #[cfg_attr(mobile, tauri::mobile_entry_point)]
    pub fn run() {
        crate::init_logging();

        log::info!("Attendance console starting up...");

        tauri::Builder::default()
            .plugin(tauri_plugin_opener::init())
            .setup(|app| {
                let result = (|| -> anyhow::Result<()> {
                    let app_data_dir = app
                        .path()
                        .app_data_dir()
                        .map_err(|err| anyhow::anyhow!(err))?;
                    std::fs::create_dir_all(&app_data_dir)?;

                    let db_path = app_data_dir.join("attendance.sqlite3");
                    let database = Database::new(db_path)?;

                    // Captures that were running when the app last exited.
                    {
                        let db_for_recovery = database.clone();
                        tauri::async_runtime::block_on(async move {
                            let recovered = db_for_recovery.recover_interrupted_captures().await?;
                            if recovered > 0 {
                                warn!("Marked {recovered} unfinished capture session(s) as interrupted");
                            }
                            Ok::<(), anyhow::Error>(())
                        })?;
                    }

                    let settings_store = SettingsStore::new(app_data_dir.join("settings.json"))?;
                    let config = settings_store.config();

                    let api = Arc::new(HttpApi::new(&config.api_base_url, config.http_timeout()));
                    let frames = FrameSlot::new();
                    let source = FrameSlotSource::new(
                        CAMERA_DEVICE_ID,
                        frames.clone(),
                        DeviceRegistry::new(),
                    );
                    let app_handle = app.handle().clone();

                    let state = tauri::async_runtime::block_on(async move {
                        let console = Console::new(
                            &config,
                            Arc::new(WsConnector),
                            Box::new(source),
                            Some(database.clone()),
                        );
                        console.connect()?;
                        let directory = console.mount_directory(api.clone());
                        let attendance = console.mount_attendance(api.clone());
                        let bridge = WebviewBridge::attach(console.bus(), app_handle);
                        Ok::<_, anyhow::Error>(AppState {
                            console,
                            api,
                            db: database,
                            frames,
                            directory,
                            attendance,
                            settings: settings_store,
                            _bridge: bridge,
                        })
                    })?;

                    app.manage(state);
                    Ok(())
                })();

                result.map_err(|err| err.into())
            })
            .invoke_handler(tauri::generate_handler![
                login,
                logout,
                start_session,
                stop_session,
                get_session_snapshot,
                get_session_metrics,
                submit_camera_frame,
                get_channel_status,
                list_attendance,
                list_students,
                list_faculty,
                list_capture_history,
                get_capture_roster,
                get_capture_metrics,
                get_console_config,
                update_sampler_config,
                update_api_base_url,
            ])
            .run(tauri::generate_context!())
            .expect("error while running tauri application");
    }
}

#[cfg(feature = "desktop")]
pub(crate) use desktop::AppState;
#[cfg(feature = "desktop")]
pub use desktop::run;
