//! Launcher side of one worker connection.
//!
//! A [`Channel`] owns the write half of the transport and the table of outstanding requests.
//! It runs as its own task; callers talk to it through cloneable [`ChannelHandle`]s. Frame
//! reads happen on a separate pump task because [`read_frame`] is not cancel-safe and the I/O
//! loop has to select between inbound frames and outbound messages.
//!
//! Every request gets a fresh correlation id from the loop. A response whose id is not
//! outstanding is dropped and counted as an anomaly; it never tears the connection down. A
//! frame that cannot be read or decoded does: the loop fails every pending request, reports
//! [`ChannelEvent::Closed`] and exits.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::frame::{DEFAULT_MAX_FRAME_BYTES, Frame, read_frame, write_frame};
use crate::message::{EventBody, RequestBody, ResponseBody};
use crate::protocol::{CounterIdGen, Inbound};
use crate::{Error, Result};


/// Capacity of the pump-to-loop frame queue.
const INBOUND_QUEUE: usize = 64;
/// Number of abandoned correlation ids remembered to tell late responses from stray ones.
const ABANDONED_MEMORY: usize = 256;

/// What to do with a request when the in-flight limit is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InflightPolicy {
	/// Wait for a slot, bounded by the request timeout.
	#[default]
	Queue,
	/// Fail immediately with [`Error::Backpressure`].
	Reject,
}

/// Per-channel limits.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
	/// Maximum requests awaiting a response at once.
	pub max_in_flight: usize,
	/// Behavior when `max_in_flight` is reached.
	pub policy: InflightPolicy,
	/// Upper bound on a request, queueing time included.
	pub request_timeout: Duration,
	/// Maximum accepted frame size in either direction.
	pub max_frame_bytes: usize,
}

impl Default for ChannelConfig {
	fn default() -> Self {
		Self {
			max_in_flight: 8,
			policy: InflightPolicy::Queue,
			request_timeout: Duration::from_secs(2),
			max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
		}
	}
}

/// Why a channel stopped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloseReason {
	/// The worker closed its end.
	#[error("end of stream")]
	Eof,
	/// The worker sent something that is not a valid frame or payload.
	#[error("malformed input: {0}")]
	Malformed(String),
	/// The transport failed.
	#[error("transport error: {0}")]
	Io(String),
	/// The launcher closed the channel.
	#[error("closed locally")]
	Local,
}

impl CloseReason {
	/// Whether the close should be handled as a worker failure.
	pub fn is_failure(&self) -> bool {
		!matches!(self, Self::Local)
	}
}

impl From<Error> for CloseReason {
	fn from(err: Error) -> Self {
		match err {
			Error::Io(e) => Self::Io(e.to_string()),
			other => Self::Malformed(other.to_string()),
		}
	}
}

/// Notifications from the I/O loop to the channel owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
	/// An unsolicited event from the worker.
	Event(EventBody),
	/// The loop exited; no further events follow.
	Closed(CloseReason),
}

enum Outbound {
	Request {
		body: RequestBody,
		reply: oneshot::Sender<Result<ResponseBody>>,
	},
	Event(EventBody),
	Close,
}

#[derive(Default)]
struct Shared {
	closed: AtomicBool,
	anomalies: AtomicU64,
	/// Send time of every request still awaited, keyed by correlation id.
	outstanding: Mutex<BTreeMap<u64, Instant>>,
}

/// Cloneable handle for issuing requests over a [`Channel`].
#[derive(Clone)]
pub struct ChannelHandle {
	name: Arc<str>,
	tx: mpsc::UnboundedSender<Outbound>,
	permits: Arc<Semaphore>,
	config: Arc<ChannelConfig>,
	shared: Arc<Shared>,
}

impl std::fmt::Debug for ChannelHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ChannelHandle")
			.field("name", &self.name)
			.field("in_flight", &self.in_flight())
			.field("closed", &self.is_closed())
			.finish()
	}
}

impl ChannelHandle {
	/// Sends a request and waits for the correlated response.
	///
	/// # Errors
	///
	/// - [`Error::Backpressure`] when the limit is reached under [`InflightPolicy::Reject`].
	/// - [`Error::Timeout`] when no response (or, when queueing, no slot) arrives in time.
	/// - [`Error::Remote`] when the worker answers with an error frame.
	/// - [`Error::ChannelClosed`] when the loop stops before answering.
	pub async fn request(&self, body: RequestBody) -> Result<ResponseBody> {
		if self.is_closed() {
			return Err(Error::ChannelClosed);
		}
		let timeout = self.config.request_timeout;
		let deadline = Instant::now() + timeout;

		let _permit = match self.config.policy {
			InflightPolicy::Reject => Arc::clone(&self.permits)
				.try_acquire_owned()
				.map_err(|_| Error::Backpressure(self.config.max_in_flight))?,
			InflightPolicy::Queue => timeout_at(deadline, Arc::clone(&self.permits).acquire_owned())
				.await
				.map_err(|_| Error::Timeout(timeout))?
				.map_err(|_| Error::ChannelClosed)?,
		};

		let (reply, response) = oneshot::channel();
		self.tx
			.send(Outbound::Request { body, reply })
			.map_err(|_| Error::ChannelClosed)?;

		match timeout_at(deadline, response).await {
			Ok(Ok(result)) => result,
			Ok(Err(_)) => Err(Error::ChannelClosed),
			Err(_) => Err(Error::Timeout(timeout)),
		}
	}

	/// Queues an event for the worker.
	///
	/// # Errors
	///
	/// Returns [`Error::ChannelClosed`] if the loop has stopped.
	pub fn notify(&self, event: EventBody) -> Result<()> {
		self.tx.send(Outbound::Event(event)).map_err(|_| Error::ChannelClosed)
	}

	/// Asks the loop to stop after the messages already queued.
	pub fn close(&self) {
		let _ = self.tx.send(Outbound::Close);
	}

	/// Channel name used in logs.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Requests currently holding an in-flight slot.
	pub fn in_flight(&self) -> usize {
		self.config
			.max_in_flight
			.saturating_sub(self.permits.available_permits())
	}

	/// Age of the oldest request the worker has not answered yet.
	pub fn oldest_outstanding(&self) -> Option<Duration> {
		self.shared
			.outstanding
			.lock()
			.values()
			.min()
			.map(|sent| sent.elapsed())
	}

	/// Responses dropped because nothing was waiting for their correlation id.
	pub fn anomalies(&self) -> u64 {
		self.shared.anomalies.load(Ordering::Relaxed)
	}

	/// Whether the I/O loop has exited.
	pub fn is_closed(&self) -> bool {
		self.shared.closed.load(Ordering::Acquire) || self.tx.is_closed()
	}
}

/// I/O loop for one worker connection.
pub struct Channel<W> {
	name: Arc<str>,
	writer: W,
	max_frame_bytes: usize,
	ids: CounterIdGen,
	pending: HashMap<u64, oneshot::Sender<Result<ResponseBody>>>,
	abandoned: VecDeque<u64>,
	shared: Arc<Shared>,
	events: mpsc::UnboundedSender<ChannelEvent>,
	pump: JoinHandle<()>,
}

impl<W> Channel<W>
where
	W: AsyncWrite + Unpin + Send + 'static,
{
	/// Starts the I/O loop on the current tokio runtime.
	///
	/// Returns the request handle and the receiver of worker events. The receiver always ends
	/// with exactly one [`ChannelEvent::Closed`].
	pub fn spawn<R>(
		name: impl Into<Arc<str>>,
		reader: R,
		writer: W,
		config: ChannelConfig,
	) -> (ChannelHandle, mpsc::UnboundedReceiver<ChannelEvent>)
	where
		R: AsyncRead + Unpin + Send + 'static,
	{
		let name: Arc<str> = name.into();
		let shared = Arc::new(Shared::default());
		let (tx, outbound) = mpsc::unbounded_channel();
		let (events, events_rx) = mpsc::unbounded_channel();
		let (frames_tx, inbound) = mpsc::channel(INBOUND_QUEUE);

		let pump = tokio::spawn(pump_frames(BufReader::new(reader), config.max_frame_bytes, frames_tx));

		let channel = Self {
			name: Arc::clone(&name),
			writer,
			max_frame_bytes: config.max_frame_bytes,
			ids: CounterIdGen::new(),
			pending: HashMap::new(),
			abandoned: VecDeque::with_capacity(ABANDONED_MEMORY),
			shared: Arc::clone(&shared),
			events,
			pump,
		};
		tokio::spawn(channel.run(outbound, inbound));

		let handle = ChannelHandle {
			name,
			tx,
			permits: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
			config: Arc::new(ChannelConfig {
				max_in_flight: config.max_in_flight.max(1),
				..config
			}),
			shared,
		};
		(handle, events_rx)
	}

	async fn run(
		mut self,
		mut outbound: mpsc::UnboundedReceiver<Outbound>,
		mut inbound: mpsc::Receiver<Result<Option<Frame>>>,
	) {
		let reason = loop {
			let ctl = tokio::select! {
				biased;

				frame = inbound.recv() => match frame {
					Some(Ok(Some(frame))) => self.dispatch_frame(frame),
					Some(Ok(None)) | None => ControlFlow::Break(CloseReason::Eof),
					Some(Err(err)) => ControlFlow::Break(CloseReason::from(err)),
				},

				out = outbound.recv() => match out {
					Some(Outbound::Close) | None => ControlFlow::Break(CloseReason::Local),
					Some(out) => self.dispatch_outbound(out).await,
				},
			};

			if let ControlFlow::Break(reason) = ctl {
				break reason;
			}
		};

		self.shutdown(reason, outbound).await;
	}

	/// Writes one outbound message, registering requests as pending.
	///
	/// Every outbound message, heartbeats included, first drops requests whose callers gave up.
	async fn dispatch_outbound(&mut self, out: Outbound) -> ControlFlow<CloseReason> {
		self.prune_abandoned();
		let (frame, reply) = match out {
			Outbound::Request { body, reply } => {
				let id = self.ids.next();
				match Frame::request(id, &body) {
					Ok(frame) => (frame, Some((id, reply))),
					Err(err) => {
						let _ = reply.send(Err(err));
						return ControlFlow::Continue(());
					}
				}
			}
			Outbound::Event(event) => match Frame::event(&event) {
				Ok(frame) => (frame, None),
				Err(err) => {
					warn!(channel = %self.name, error = %err, "failed to encode event");
					return ControlFlow::Continue(());
				}
			},
			Outbound::Close => return ControlFlow::Break(CloseReason::Local),
		};

		if let Err(err) = write_frame(&mut self.writer, &frame, self.max_frame_bytes).await {
			// Oversized frames are refused before any byte is written; the stream stays usable.
			let fatal = matches!(err, Error::Io(_));
			let reason = CloseReason::Io(err.to_string());
			if let Some((_, reply)) = reply {
				let _ = reply.send(Err(if fatal { Error::ChannelClosed } else { err }));
			}
			return if fatal { ControlFlow::Break(reason) } else { ControlFlow::Continue(()) };
		}

		if let Some((id, reply)) = reply {
			self.pending.insert(id, reply);
			self.shared.outstanding.lock().insert(id, Instant::now());
		}
		ControlFlow::Continue(())
	}

	/// Routes one inbound frame.
	fn dispatch_frame(&mut self, frame: Frame) -> ControlFlow<CloseReason> {
		let inbound = match Inbound::decode(&frame) {
			Ok(inbound) => inbound,
			Err(err) => return ControlFlow::Break(CloseReason::Malformed(err.to_string())),
		};

		match inbound {
			Inbound::Response(id, body) => self.complete(id, Ok(body)),
			Inbound::Failure(id, body) => self.complete(id, Err(Error::Remote(body.message))),
			Inbound::Event(event) => {
				let _ = self.events.send(ChannelEvent::Event(event));
			}
			Inbound::Request(id, _) => {
				self.shared.anomalies.fetch_add(1, Ordering::Relaxed);
				warn!(channel = %self.name, correlation = id, "worker sent a request; dropped");
			}
		}
		ControlFlow::Continue(())
	}

	fn complete(&mut self, id: u64, result: Result<ResponseBody>) {
		self.shared.outstanding.lock().remove(&id);
		match self.pending.remove(&id) {
			Some(reply) => {
				if reply.send(result).is_err() {
					debug!(channel = %self.name, correlation = id, "rpc.response.late");
				}
			}
			None if self.abandoned.contains(&id) => {
				debug!(channel = %self.name, correlation = id, "rpc.response.late");
			}
			None => {
				self.shared.anomalies.fetch_add(1, Ordering::Relaxed);
				warn!(
					channel = %self.name,
					correlation = id,
					"response without outstanding request; dropped"
				);
			}
		}
	}

	/// Forgets requests whose callers stopped waiting.
	fn prune_abandoned(&mut self) {
		let mut outstanding = self.shared.outstanding.lock();
		let abandoned = &mut self.abandoned;
		self.pending.retain(|id, reply| {
			if !reply.is_closed() {
				return true;
			}
			outstanding.remove(id);
			if abandoned.len() == ABANDONED_MEMORY {
				abandoned.pop_front();
			}
			abandoned.push_back(*id);
			false
		});
	}

	async fn shutdown(mut self, reason: CloseReason, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
		self.shared.closed.store(true, Ordering::Release);
		self.pump.abort();
		outbound.close();

		for (_, reply) in self.pending.drain() {
			let _ = reply.send(Err(Error::ChannelClosed));
		}
		self.shared.outstanding.lock().clear();
		while let Ok(out) = outbound.try_recv() {
			if let Outbound::Request { reply, .. } = out {
				let _ = reply.send(Err(Error::ChannelClosed));
			}
		}

		if reason.is_failure() {
			warn!(channel = %self.name, reason = %reason, "channel closed");
		} else {
			debug!(channel = %self.name, "channel closed");
		}
		let _ = self.writer.shutdown().await;
		let _ = self.events.send(ChannelEvent::Closed(reason));
	}
}

/// Reads frames until end of stream or the first error, forwarding each result.
async fn pump_frames<R>(mut reader: BufReader<R>, max_frame_bytes: usize, frames: mpsc::Sender<Result<Option<Frame>>>)
where
	R: AsyncRead + Unpin,
{
	loop {
		let result = read_frame(&mut reader, max_frame_bytes).await;
		let last = !matches!(result, Ok(Some(_)));
		if frames.send(result).await.is_err() || last {
			break;
		}
	}
}
