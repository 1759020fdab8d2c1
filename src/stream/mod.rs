//! Push stream: wire messages and the websocket client

mod client;
mod messages;

pub use client::{stream_url, StreamClient, StreamEvent, StreamEventKind, StreamSettings};
pub use messages::{decode_update, ControlMessage, PushMessage};
