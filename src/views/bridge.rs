use tauri::{AppHandle, Emitter};

use crate::fanout::{SubscriptionGuard, Topic, UpdateBus};

/// Forwards every bus topic to the webview as a Tauri event named after the
/// topic (`attendance-changed`, `roster-changed`, ...).
pub struct WebviewBridge {
    _subscriptions: Vec<SubscriptionGuard>,
}

impl WebviewBridge {
    pub fn attach(bus: &UpdateBus, app_handle: AppHandle) -> Self {
        let subscriptions = Topic::ALL
            .iter()
            .map(|&topic| {
                let app_handle = app_handle.clone();
                bus.subscribe_scoped(topic, move |update| {
                    if let Err(err) = app_handle.emit(topic.event_name(), update) {
                        log::warn!("failed to emit {}: {err}", topic.event_name());
                    }
                })
            })
            .collect();
        Self {
            _subscriptions: subscriptions,
        }
    }
}
