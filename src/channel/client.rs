use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError, RwLock,
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;

use crate::config::ReconnectPolicy;

use super::{
    backoff::Backoff,
    envelope::{parse_inbound, InboundMessage, OutboundMessage},
    transport::{Connector, WireSink, WireStream},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const OUTBOUND_CAPACITY: usize = 16;
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::Closed => "closed",
        }
    }
}

/// Connection status exposed to the view layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ChannelStatus {
    Idle,
    Connecting,
    #[serde(rename_all = "camelCase")]
    Connected { epoch: u64 },
    #[serde(rename_all = "camelCase")]
    Reconnecting {
        attempt: u32,
        last_error: Option<String>,
    },
    Disconnected { reason: String },
}

impl ChannelStatus {
    pub fn state(&self) -> ChannelState {
        match self {
            ChannelStatus::Connected { .. } => ChannelState::Open,
            ChannelStatus::Connecting | ChannelStatus::Reconnecting { .. } => {
                ChannelState::Connecting
            }
            ChannelStatus::Idle | ChannelStatus::Disconnected { .. } => ChannelState::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DropReason {
    NotOpen,
    Backlogged,
    FramePending,
    Encode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "camelCase")]
pub enum SendOutcome {
    Queued,
    Dropped(DropReason),
}

/// An inbound message tagged with the connection epoch it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub epoch: u64,
    pub message: InboundMessage,
}

type InboundHandler = Arc<dyn Fn(InboundEvent) + Send + Sync>;

struct Outgoing {
    text: String,
    is_frame: bool,
}

struct ChannelShared {
    status_tx: watch::Sender<ChannelStatus>,
    handler: RwLock<Option<InboundHandler>>,
    /// Queue of the live epoch, tagged with that epoch's number.
    outbound: Mutex<Option<(u64, mpsc::Sender<Outgoing>)>>,
    frame_pending: AtomicBool,
    closed: AtomicBool,
    epoch: AtomicU64,
}

impl ChannelShared {
    /// Status writes from a connection task lose against `close()` and
    /// against any task that replaced it.
    fn set_status(&self, cancel: &CancellationToken, status: ChannelStatus) {
        self.status_tx.send_if_modified(|current| {
            if cancel.is_cancelled() || self.closed.load(Ordering::SeqCst) || *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    /// Returns false, installing nothing, once `cancel` has fired.
    fn install_outbound(
        &self,
        cancel: &CancellationToken,
        epoch: u64,
        sender: mpsc::Sender<Outgoing>,
    ) -> bool {
        let mut outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        if cancel.is_cancelled() {
            return false;
        }
        *outbound = Some((epoch, sender));
        self.frame_pending.store(false, Ordering::SeqCst);
        true
    }

    /// Drops the queue of `epoch`. A newer epoch's queue is left alone.
    fn clear_outbound(&self, epoch: u64) {
        let mut outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(&*outbound, Some((owner, _)) if *owner == epoch) {
            *outbound = None;
            self.frame_pending.store(false, Ordering::SeqCst);
        }
    }

    fn clear_any_outbound(&self) {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.frame_pending.store(false, Ordering::SeqCst);
    }

    fn frame_flushed(&self, epoch: u64) {
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(&*outbound, Some((owner, _)) if *owner == epoch) {
            self.frame_pending.store(false, Ordering::SeqCst);
        }
    }

    fn enqueue(&self, outgoing: Outgoing) -> SendOutcome {
        if self.status_tx.borrow().state() != ChannelState::Open {
            return SendOutcome::Dropped(DropReason::NotOpen);
        }
        let guard = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let Some((_, sender)) = guard.as_ref() else {
            return SendOutcome::Dropped(DropReason::NotOpen);
        };
        match sender.try_send(outgoing) {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Dropped(DropReason::Backlogged),
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Dropped(DropReason::NotOpen),
        }
    }

    fn dispatch(&self, epoch: u64, text: &str) {
        let message = match parse_inbound(text) {
            Ok(message) => message,
            Err(err) => {
                log_warn!("discarding inbound message on epoch {epoch}: {err}");
                return;
            }
        };

        if message == InboundMessage::Ping {
            if let Ok(pong) = OutboundMessage::Pong.to_wire() {
                self.enqueue(Outgoing {
                    text: pong,
                    is_frame: false,
                });
            }
        }

        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => handler(InboundEvent { epoch, message }),
            None => log_debug!("no inbound handler registered; dropping {message:?}"),
        }
    }
}

/// The one logical link to the attendance service.
///
/// Cloning shares the same connection. The channel reconnects by itself
/// with jittered exponential backoff and re-sends its `ping` handshake before
/// reporting itself open again. Nothing inbound is buffered across epochs, so
/// a reconnect can never replay an event.
#[derive(Clone)]
pub struct PushChannel {
    shared: Arc<ChannelShared>,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    task: Arc<Mutex<Option<(JoinHandle<()>, CancellationToken)>>>,
}

impl PushChannel {
    pub fn new(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        let (status_tx, _) = watch::channel(ChannelStatus::Idle);
        Self {
            shared: Arc::new(ChannelShared {
                status_tx,
                handler: RwLock::new(None),
                outbound: Mutex::new(None),
                frame_pending: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
            }),
            connector,
            policy,
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts connecting in the background. Watch [`status`](Self::status)
    /// or [`subscribe_status`](Self::subscribe_status) for the outcome.
    /// Reopening an already running channel restarts it.
    pub fn open(&self, address: &str) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((handle, token)) = task.take() {
            token.cancel();
            handle.abort();
        }

        self.shared.closed.store(false, Ordering::SeqCst);
        self.shared.status_tx.send_replace(ChannelStatus::Connecting);

        let token = CancellationToken::new();
        let handle = tokio::spawn(connection_loop(
            self.shared.clone(),
            self.connector.clone(),
            address.to_string(),
            self.policy.clone(),
            token.clone(),
        ));
        *task = Some((handle, token));
        log_info!("push channel opening {address}");
    }

    /// Idempotent. Stops the connection and any pending retry.
    pub fn close(&self) {
        let previous = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // Cancel first so the old task can no longer install a queue.
        if let Some((_handle, token)) = previous {
            token.cancel();
        }
        let was_closed = self.shared.closed.swap(true, Ordering::SeqCst);
        self.shared.clear_any_outbound();
        if !was_closed {
            self.shared.status_tx.send_replace(ChannelStatus::Disconnected {
                reason: "closed".into(),
            });
            log_info!("push channel closed");
        }
    }

    /// Registers the inbound dispatcher, replacing any previous one.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(InboundEvent) + Send + Sync + 'static,
    {
        let mut slot = self
            .shared
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            log_warn!("replacing the registered inbound handler");
        }
        *slot = Some(Arc::new(handler));
    }

    /// Drops the inbound dispatcher. Later messages are logged and discarded.
    pub fn clear_handler(&self) {
        self.shared
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Enqueues one message. Never errors: when the channel is not open the
    /// message is dropped and the reason reported.
    pub fn send(&self, message: &OutboundMessage) -> SendOutcome {
        let text = match message.to_wire() {
            Ok(text) => text,
            Err(err) => {
                log_warn!("failed to serialize outbound message: {err}");
                return SendOutcome::Dropped(DropReason::Encode);
            }
        };
        self.shared.enqueue(Outgoing {
            text,
            is_frame: false,
        })
    }

    /// Sends a captured frame. At most one frame is in flight: until the
    /// previous one has been flushed to the transport, further frames are
    /// dropped with [`DropReason::FramePending`].
    pub fn send_frame(&self, session_id: &str, data_url: String) -> SendOutcome {
        if !self.is_open() {
            return SendOutcome::Dropped(DropReason::NotOpen);
        }
        if self.shared.frame_pending.swap(true, Ordering::SeqCst) {
            return SendOutcome::Dropped(DropReason::FramePending);
        }

        let message = OutboundMessage::StreamFrame {
            session_id: session_id.to_string(),
            frame: data_url,
        };
        let outcome = match message.to_wire() {
            Ok(text) => self.shared.enqueue(Outgoing {
                text,
                is_frame: true,
            }),
            Err(_) => SendOutcome::Dropped(DropReason::Encode),
        };
        if outcome != SendOutcome::Queued {
            self.shared.frame_pending.store(false, Ordering::SeqCst);
        }
        outcome
    }

    pub fn status(&self) -> ChannelStatus {
        self.shared.status_tx.borrow().clone()
    }

    pub fn state(&self) -> ChannelState {
        self.shared.status_tx.borrow().state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    pub fn frame_pending(&self) -> bool {
        self.shared.frame_pending.load(Ordering::SeqCst)
    }

    pub fn epoch(&self) -> u64 {
        self.shared.epoch.load(Ordering::SeqCst)
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.shared.status_tx.subscribe()
    }
}

enum EpochEnd {
    Cancelled,
    Dropped { announced: bool, reason: String },
}

async fn connection_loop(
    shared: Arc<ChannelShared>,
    connector: Arc<dyn Connector>,
    address: String,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(&policy);
    let mut failures: u32 = 0;

    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connector.connect(&address) => result,
        };

        let last_error = match connected {
            Ok((sink, stream)) => {
                let epoch = shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                match run_epoch(&shared, epoch, sink, stream, &cancel).await {
                    EpochEnd::Cancelled => break,
                    EpochEnd::Dropped { announced, reason } => {
                        log_warn!("push channel epoch {epoch} ended: {reason}");
                        if announced {
                            backoff.reset();
                            failures = 0;
                        }
                        reason
                    }
                }
            }
            Err(err) => {
                log_warn!("push channel connect to {address} failed: {err:#}");
                format!("{err:#}")
            }
        };

        failures = failures.saturating_add(1);
        if let Some(max) = policy.max_attempts {
            if failures > max {
                shared.set_status(&cancel, ChannelStatus::Disconnected {
                    reason: format!("gave up after {failures} attempts: {last_error}"),
                });
                break;
            }
        }

        shared.set_status(&cancel, ChannelStatus::Reconnecting {
            attempt: failures,
            last_error: Some(last_error),
        });
        let delay = backoff.next_delay();
        log_debug!("push channel retrying in {delay:?} (attempt {failures})");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = time::sleep(delay) => {}
        }
    }
}

async fn run_epoch(
    shared: &ChannelShared,
    epoch: u64,
    mut sink: WireSink,
    mut stream: WireStream,
    cancel: &CancellationToken,
) -> EpochEnd {
    // Announce before anyone may treat the link as usable.
    let hello = match OutboundMessage::Ping.to_wire() {
        Ok(hello) => hello,
        Err(err) => {
            return EpochEnd::Dropped {
                announced: false,
                reason: format!("failed to encode handshake: {err}"),
            }
        }
    };
    tokio::select! {
        _ = cancel.cancelled() => return EpochEnd::Cancelled,
        sent = sink.send(hello) => {
            if let Err(err) = sent {
                return EpochEnd::Dropped {
                    announced: false,
                    reason: format!("handshake failed: {err:#}"),
                };
            }
        }
    }

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outgoing>(OUTBOUND_CAPACITY);
    if !shared.install_outbound(cancel, epoch, outbound_tx) {
        return EpochEnd::Cancelled;
    }
    shared.set_status(cancel, ChannelStatus::Connected { epoch });
    log_info!("push channel open (epoch {epoch})");

    let end = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break EpochEnd::Cancelled,
            inbound = stream.next() => match inbound {
                Some(Ok(text)) => shared.dispatch(epoch, &text),
                Some(Err(err)) => break EpochEnd::Dropped {
                    announced: true,
                    reason: format!("{err:#}"),
                },
                None => break EpochEnd::Dropped {
                    announced: true,
                    reason: "closed by peer".into(),
                },
            },
            Some(outgoing) = outbound_rx.recv() => {
                let result = sink.send(outgoing.text).await;
                if outgoing.is_frame {
                    shared.frame_flushed(epoch);
                }
                if let Err(err) = result {
                    break EpochEnd::Dropped {
                        announced: true,
                        reason: format!("send failed: {err:#}"),
                    };
                }
            }
        }
    };

    // Queued frames die with the epoch; they are never carried over.
    shared.clear_outbound(epoch);
    let _ = time::timeout(CLOSE_TIMEOUT, sink.close()).await;
    end
}
