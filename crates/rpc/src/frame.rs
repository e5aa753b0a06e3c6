//! Length-prefixed binary framing.
//!
//! Wire layout, all integers little-endian:
//!
//! ```text
//! +-----------+---------+------------------+-----------------+
//! | len: u32  | kind:u8 | correlation: u64 | payload bytes   |
//! +-----------+---------+------------------+-----------------+
//!             |<----------------- len bytes ---------------->|
//! ```
//!
//! `len` covers the kind byte, the correlation id and the payload, so a reader always knows
//! exactly how many bytes to consume without looking inside the payload. Correlation id `0`
//! means "none" and is the only value allowed on events.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, Result};

/// Bytes of kind plus correlation id that precede every payload.
pub const HEADER_LEN: usize = 1 + 8;

/// Default upper bound on a single frame, header included.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Message kind carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
	/// A correlated request.
	Request = 1,
	/// A successful correlated response.
	Response = 2,
	/// An unsolicited, uncorrelated event.
	Event = 3,
	/// A failed correlated response.
	Error = 4,
}

impl TryFrom<u8> for FrameKind {
	type Error = Error;

	fn try_from(value: u8) -> Result<Self> {
		match value {
			1 => Ok(Self::Request),
			2 => Ok(Self::Response),
			3 => Ok(Self::Event),
			4 => Ok(Self::Error),
			other => Err(Error::Malformed(format!("unknown frame kind {other}"))),
		}
	}
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
	/// Message kind.
	pub kind: FrameKind,
	/// Correlation id; `None` exactly for events.
	pub correlation: Option<u64>,
	/// Opaque payload.
	pub payload: Vec<u8>,
}

impl Frame {
	/// Total encoded length, length prefix included.
	pub fn encoded_len(&self) -> usize {
		4 + HEADER_LEN + self.payload.len()
	}

	/// Encodes into a single contiguous buffer.
	///
	/// # Errors
	///
	/// Returns [`Error::FrameTooLarge`] if the frame exceeds `max_bytes`.
	pub fn encode(&self, max_bytes: usize) -> Result<Vec<u8>> {
		let len = HEADER_LEN + self.payload.len();
		if len > max_bytes || u32::try_from(len).is_err() {
			return Err(Error::FrameTooLarge { len, max: max_bytes });
		}
		let mut buf = Vec::with_capacity(4 + len);
		buf.extend_from_slice(&(len as u32).to_le_bytes());
		buf.push(self.kind as u8);
		buf.extend_from_slice(&self.correlation.unwrap_or(0).to_le_bytes());
		buf.extend_from_slice(&self.payload);
		Ok(buf)
	}
}

/// Reads one frame.
///
/// Returns `Ok(None)` on a clean end of stream at a frame boundary.
///
/// # Errors
///
/// - [`Error::Truncated`] when the stream ends inside a frame.
/// - [`Error::FrameTooLarge`] / [`Error::Malformed`] for invalid headers.
/// - [`Error::Io`] for transport failures.
///
/// Not cancel-safe: a partially read frame is lost if the future is dropped.
pub async fn read_frame<R>(reader: &mut R, max_bytes: usize) -> Result<Option<Frame>>
where
	R: AsyncRead + Unpin + ?Sized,
{
	let mut len_buf = [0u8; 4];
	let mut filled = 0;
	while filled < len_buf.len() {
		let n = reader.read(&mut len_buf[filled..]).await?;
		if n == 0 {
			return if filled == 0 { Ok(None) } else { Err(Error::Truncated) };
		}
		filled += n;
	}

	let len = u32::from_le_bytes(len_buf) as usize;
	if len < HEADER_LEN {
		return Err(Error::Malformed(format!("frame length {len} is shorter than the header")));
	}
	if len > max_bytes {
		return Err(Error::FrameTooLarge { len, max: max_bytes });
	}

	let mut body = vec![0u8; len];
	reader.read_exact(&mut body).await.map_err(|e| match e.kind() {
		std::io::ErrorKind::UnexpectedEof => Error::Truncated,
		_ => Error::Io(e),
	})?;

	let kind = FrameKind::try_from(body[0])?;
	let mut id_bytes = [0u8; 8];
	id_bytes.copy_from_slice(&body[1..HEADER_LEN]);
	let correlation = match (kind, u64::from_le_bytes(id_bytes)) {
		(FrameKind::Event, 0) => None,
		(FrameKind::Event, id) => {
			return Err(Error::Malformed(format!("event frame carries correlation id {id}")));
		}
		(_, 0) => return Err(Error::Malformed(format!("{kind:?} frame without correlation id"))),
		(_, id) => Some(id),
	};

	body.drain(..HEADER_LEN);
	Ok(Some(Frame {
		kind,
		correlation,
		payload: body,
	}))
}

/// Writes one frame and flushes.
///
/// # Errors
///
/// Returns [`Error::FrameTooLarge`] or [`Error::Io`].
pub async fn write_frame<W>(writer: &mut W, frame: &Frame, max_bytes: usize) -> Result<()>
where
	W: AsyncWrite + Unpin + ?Sized,
{
	let buf = frame.encode(max_bytes)?;
	writer.write_all(&buf).await?;
	writer.flush().await?;
	Ok(())
}
