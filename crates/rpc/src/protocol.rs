//! Correlation ids and frame/message conversion.

use serde::Serialize;

use crate::frame::{Frame, FrameKind};
use crate::message::{ErrorBody, EventBody, RequestBody, ResponseBody};
use crate::Result;

/// Simple counter-based correlation id generator.
///
/// Starts at 1; id 0 is reserved on the wire for "no correlation".
#[derive(Debug, Clone, Copy)]
pub struct CounterIdGen(u64);

impl CounterIdGen {
	/// Creates a new counter starting at 1.
	#[must_use]
	pub const fn new() -> Self {
		Self(1)
	}

	/// Generates the next unique id and increments the counter.
	#[allow(clippy::should_implement_trait, reason = "convention")]
	pub fn next(&mut self) -> u64 {
		let id = self.0;
		self.0 = self.0.checked_add(1).unwrap_or(1);
		id
	}
}

impl Default for CounterIdGen {
	fn default() -> Self {
		Self::new()
	}
}

/// Classification of a decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
	/// An incoming request.
	Request(u64, RequestBody),
	/// A successful response.
	Response(u64, ResponseBody),
	/// A failed response.
	Failure(u64, ErrorBody),
	/// An unsolicited event.
	Event(EventBody),
}

impl Inbound {
	/// Decodes the payload of `frame` according to its kind.
	///
	/// # Errors
	///
	/// Returns [`crate::Error::Codec`] if the payload does not parse for that kind.
	pub fn decode(frame: &Frame) -> Result<Self> {
		let payload = frame.payload.as_slice();
		// `read_frame` guarantees a correlation id on every non-event kind.
		let id = frame.correlation.unwrap_or_default();
		Ok(match frame.kind {
			FrameKind::Request => Self::Request(id, serde_json::from_slice(payload)?),
			FrameKind::Response => Self::Response(id, serde_json::from_slice(payload)?),
			FrameKind::Error => Self::Failure(id, serde_json::from_slice(payload)?),
			FrameKind::Event => Self::Event(serde_json::from_slice(payload)?),
		})
	}
}

fn encode(kind: FrameKind, correlation: Option<u64>, body: &impl Serialize) -> Result<Frame> {
	Ok(Frame {
		kind,
		correlation,
		payload: serde_json::to_vec(body)?,
	})
}

impl Frame {
	/// Builds a request frame.
	///
	/// # Errors
	///
	/// Returns [`crate::Error::Codec`] if the body fails to serialize.
	pub fn request(id: u64, body: &RequestBody) -> Result<Self> {
		encode(FrameKind::Request, Some(id), body)
	}

	/// Builds a successful response frame.
	///
	/// # Errors
	///
	/// Returns [`crate::Error::Codec`] if the body fails to serialize.
	pub fn response(id: u64, body: &ResponseBody) -> Result<Self> {
		encode(FrameKind::Response, Some(id), body)
	}

	/// Builds an error response frame.
	///
	/// # Errors
	///
	/// Returns [`crate::Error::Codec`] if the body fails to serialize.
	pub fn failure(id: u64, body: &ErrorBody) -> Result<Self> {
		encode(FrameKind::Error, Some(id), body)
	}

	/// Builds an event frame.
	///
	/// # Errors
	///
	/// Returns [`crate::Error::Codec`] if the body fails to serialize.
	pub fn event(body: &EventBody) -> Result<Self> {
		encode(FrameKind::Event, None, body)
	}
}
