//! Process-level wiring: one bus, one push channel, one sampler and one
//! detection session, with the channel's inbound stream routed into them.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;

use crate::{
    api::{AttendanceLog, Directory, IdentityStore},
    capture::{FrameSampler, SamplerController, VideoSource},
    channel::{ChannelStatus, Connector, InboundEvent, InboundMessage, PushChannel},
    config::ConsoleConfig,
    db::Database,
    fanout::{Topic, Update, UpdateBus},
    metrics::MetricsCollector,
    session::DetectionSession,
    views::{AttendanceFeed, DirectoryView},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

pub struct Console {
    bus: UpdateBus,
    channel: PushChannel,
    session: DetectionSession,
    identity: IdentityStore,
    metrics: MetricsCollector,
    socket_url: Result<String, String>,
    attendance_feed_limit: usize,
    status_forwarder: JoinHandle<()>,
}

impl Console {
    /// Builds the pipeline. Must be called inside a tokio runtime. Finished
    /// captures are written to `history` when one is given.
    pub fn new(
        config: &ConsoleConfig,
        connector: Arc<dyn Connector>,
        source: Box<dyn VideoSource>,
        history: Option<Database>,
    ) -> Self {
        let bus = UpdateBus::new();
        let identity = IdentityStore::new();
        let metrics = MetricsCollector::new();
        let channel = PushChannel::new(connector, config.reconnect.clone());

        let sampler = FrameSampler::new(
            source,
            Arc::new(channel.clone()),
            config.sampler.clone(),
            metrics.clone(),
        );
        let mut session = DetectionSession::new(
            SamplerController::new(sampler),
            bus.clone(),
            identity.clone(),
            channel.subscribe_status(),
        );
        if let Some(db) = history {
            session = session.with_history(db, config.heartbeat_every_ticks());
        }

        {
            let session = session.clone();
            let bus = bus.clone();
            channel.on_event(move |event| route_inbound(&session, &bus, event));
        }
        let status_forwarder = tokio::spawn(forward_channel_status(
            channel.subscribe_status(),
            bus.clone(),
        ));

        Self {
            bus,
            channel,
            session,
            identity,
            metrics,
            socket_url: config.socket_url().map_err(|err| err.to_string()),
            attendance_feed_limit: config.attendance_feed_limit,
            status_forwarder,
        }
    }

    /// Opens the push channel at the configured socket address.
    pub fn connect(&self) -> Result<()> {
        let url = self.socket_url.clone().map_err(anyhow::Error::msg)?;
        self.channel.open(&url);
        Ok(())
    }

    pub fn mount_directory(&self, directory: Arc<dyn Directory>) -> DirectoryView {
        DirectoryView::mount(&self.bus, directory, Some(self.session.clone()))
    }

    pub fn mount_attendance(&self, log: Arc<dyn AttendanceLog>) -> AttendanceFeed {
        AttendanceFeed::mount(&self.bus, log, self.attendance_feed_limit)
    }

    pub fn bus(&self) -> &UpdateBus {
        &self.bus
    }

    pub fn channel(&self) -> &PushChannel {
        &self.channel
    }

    pub fn session(&self) -> &DetectionSession {
        &self.session
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.identity
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub async fn shutdown(&self) {
        self.session.shutdown().await;
        self.channel.close();
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.status_forwarder.abort();
        self.channel.close();
        // The handler holds the session, which holds the channel.
        self.channel.clear_handler();
    }
}

/// Detections go to the session; change notices fan out to every topic they
/// dirty. Keepalives and unknown tags stop here.
fn route_inbound(session: &DetectionSession, bus: &UpdateBus, event: InboundEvent) {
    match event.message {
        InboundMessage::Detection(detection) => {
            session.on_detection(detection);
        }
        InboundMessage::Change { kind, data } => {
            for &topic in kind.topics() {
                bus.publish(Update::new(topic, kind.tag()).with_data(data.clone()));
            }
        }
        InboundMessage::Ping | InboundMessage::Pong => {}
        InboundMessage::Unknown(tag) => {
            log_debug!("ignoring inbound message type {tag} (epoch {})", event.epoch);
        }
    }
}

async fn forward_channel_status(
    mut status: tokio::sync::watch::Receiver<ChannelStatus>,
    bus: UpdateBus,
) {
    loop {
        let current = status.borrow_and_update().clone();
        match serde_json::to_value(&current) {
            Ok(data) => bus.publish(
                Update::new(Topic::ChannelStatus, current.state().as_str()).with_data(data),
            ),
            Err(err) => log_warn!("failed to serialize channel status: {err}"),
        }
        if status.changed().await.is_err() {
            break;
        }
    }
}
