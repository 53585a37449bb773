pub mod backoff;
pub mod client;
pub mod envelope;
pub mod transport;

#[cfg(test)]
pub(crate) mod fake;

pub use backoff::Backoff;
pub use client::{
    ChannelState, ChannelStatus, DropReason, InboundEvent, PushChannel, SendOutcome,
};
pub use envelope::{parse_inbound, ChangeKind, InboundMessage, OutboundMessage, ResetTarget};
pub use transport::{Connector, WireSink, WireStream, WsConnector};
