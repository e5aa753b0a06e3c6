//! Error type shared by both ends of the channel.

use std::io;
use std::time::Duration;

/// A convenient type alias for `Result` with `E` = [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible channel errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The channel's I/O loop has stopped.
	#[error("channel closed")]
	ChannelClosed,
	/// A payload could not be encoded or decoded.
	#[error("payload codec failed: {0}")]
	Codec(#[from] serde_json::Error),
	/// A frame header is invalid.
	#[error("malformed frame: {0}")]
	Malformed(String),
	/// A frame declares a length above the configured limit.
	#[error("frame of {len} bytes exceeds the {max} byte limit")]
	FrameTooLarge {
		/// Declared length.
		len: usize,
		/// Configured limit.
		max: usize,
	},
	/// The stream ended in the middle of a frame.
	#[error("stream ended mid-frame")]
	Truncated,
	/// Input/output errors from the underlying stream.
	#[error("{0}")]
	Io(#[from] io::Error),
	/// No response arrived in time.
	#[error("request timed out after {0:?}")]
	Timeout(Duration),
	/// The in-flight limit is reached and the channel rejects new requests.
	#[error("in-flight limit of {0} reached")]
	Backpressure(usize),
	/// The peer answered the request with an error frame.
	#[error("peer error: {0}")]
	Remote(String),
}

impl Error {
	/// Whether the error means the connection itself is unusable.
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			Self::ChannelClosed | Self::Codec(_) | Self::Malformed(_) | Self::FrameTooLarge { .. } | Self::Truncated | Self::Io(_)
		)
	}
}
