//! Framed IPC between the launcher and its extension workers.
//!
//! This crate provides both halves of the extension protocol:
//! * [`frame`]: length-prefixed binary framing, independent of payload content
//! * [`message`]: the JSON payloads carried by frames (queries, results, events, manifest)
//! * [`protocol`]: correlation id generation and classification of inbound frames
//! * [`channel`]: the launcher side, a per-worker request/response channel with correlation,
//!   per-request timeouts and in-flight backpressure
//! * [`responder`]: the extension side, a loop that announces a manifest, answers heartbeats
//!   and serves queries through a [`QueryHandler`]

#![warn(missing_docs)]

pub mod channel;
pub mod error;
pub mod frame;
pub mod message;
pub mod protocol;
pub mod responder;

pub use channel::{Channel, ChannelConfig, ChannelEvent, ChannelHandle, CloseReason, InflightPolicy};
pub use error::{Error, Result};
pub use frame::{DEFAULT_MAX_FRAME_BYTES, Frame, FrameKind};
pub use message::{
	ErrorBody, EventBody, Manifest, PROTOCOL_VERSION, QueryRequest, RequestBody, ResponseBody, ResultItem,
};
pub use protocol::{CounterIdGen, Inbound};
pub use responder::{QueryHandler, serve};
