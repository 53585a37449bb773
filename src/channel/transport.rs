use std::pin::Pin;

use anyhow::{Context, Result};
use futures::{future, future::BoxFuture, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;

pub type WireSink = Pin<Box<dyn Sink<String, Error = anyhow::Error> + Send>>;
pub type WireStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Opens one connection epoch. The push channel owns reconnection; a
/// connector only knows how to dial once.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, address: &str) -> BoxFuture<'static, Result<(WireSink, WireStream)>>;
}

/// WebSocket transport carrying text frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, address: &str) -> BoxFuture<'static, Result<(WireSink, WireStream)>> {
        let address = address.to_string();
        Box::pin(async move {
            let (socket, _response) = tokio_tungstenite::connect_async(address.as_str())
                .await
                .with_context(|| format!("failed to connect to {address}"))?;
            let (write, read) = socket.split();

            let sink = write
                .sink_map_err(anyhow::Error::from)
                .with(|text: String| future::ready(Ok::<_, anyhow::Error>(Message::Text(text))));

            // Pings are answered by tungstenite itself; only text reaches us.
            let stream = read.filter_map(|frame| {
                future::ready(match frame {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(_) => None,
                    Err(err) => Some(Err(anyhow::Error::from(err))),
                })
            });

            let sink: WireSink = Box::pin(sink);
            let stream: WireStream = Box::pin(stream);
            Ok((sink, stream))
        })
    }
}
