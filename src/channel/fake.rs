//! In-memory transport for tests. Every `connect` hands the far end of a new
//! link to the test through the `accepted` receiver.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use anyhow::{anyhow, Result};
use futures::{channel::mpsc as fmpsc, future::BoxFuture, SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::transport::{Connector, WireSink, WireStream};

pub(crate) struct FakeServer {
    to_client: fmpsc::UnboundedSender<Result<String>>,
    from_client: fmpsc::UnboundedReceiver<String>,
}

impl FakeServer {
    pub(crate) fn push(&self, text: &str) {
        let _ = self.to_client.unbounded_send(Ok(text.to_string()));
    }

    pub(crate) async fn next_outbound(&mut self) -> Option<String> {
        self.from_client.next().await
    }

    /// Everything the client has flushed so far, without waiting.
    pub(crate) fn drain_outbound(&mut self) -> Vec<String> {
        let mut sent = Vec::new();
        while let Ok(Some(text)) = self.from_client.try_next() {
            sent.push(text);
        }
        sent
    }
}

#[derive(Clone)]
pub(crate) struct FakeConnector {
    accepted: mpsc::UnboundedSender<FakeServer>,
    refuse: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<FakeServer>) {
        let (accepted, accepted_rx) = mpsc::unbounded_channel();
        (
            Self {
                accepted,
                refuse: Arc::new(AtomicBool::new(false)),
                attempts: Arc::new(AtomicUsize::new(0)),
            },
            accepted_rx,
        )
    }

    pub(crate) fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    fn connect(&self, _address: &str) -> BoxFuture<'static, Result<(WireSink, WireStream)>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self.refuse.load(Ordering::SeqCst);
        let accepted = self.accepted.clone();
        Box::pin(async move {
            if refused {
                return Err(anyhow!("connection refused"));
            }
            let (to_client, client_rx) = fmpsc::unbounded();
            let (client_tx, from_client) = fmpsc::unbounded();
            accepted
                .send(FakeServer {
                    to_client,
                    from_client,
                })
                .map_err(|_| anyhow!("test dropped the accept queue"))?;

            let sink: WireSink = Box::pin(client_tx.sink_map_err(anyhow::Error::from));
            let stream: WireStream = Box::pin(client_rx);
            Ok((sink, stream))
        })
    }
}
