//! Lifecycle supervision for extension workers.
//!
//! # Purpose
//!
//! - Own every extension worker: spawn it, check its manifest, probe it with heartbeats,
//!   restart it after failures and stop it on request.
//! - Publish per-worker state so the query path can pick workers without touching the
//!   lifecycle machinery.
//! - Exclude query routing and result merging; see `beacon_core::aggregator`.
//!
//! # Mental model
//!
//! - Every registered extension has one [`WorkerSnapshot`] in a `watch` channel. Readers
//!   clone snapshots; they never block the worker.
//! - While an extension runs, exactly one lifecycle task drives it. That task is the only
//!   writer of the snapshot. It spawns the process, opens a [`Channel`] on its stdio, waits
//!   for the manifest, then loops over heartbeat ticks, channel events and process exit.
//! - Any failure after the handshake (process exit, channel close, missed heartbeats) ends
//!   the current incarnation. The task marks the worker [`WorkerState::Degraded`], waits out
//!   the backoff in [`WorkerState::Restarting`] and launches again, or stops for good once the
//!   [`RestartPolicy`] budget is spent.
//! - A worker that answers the handshake wrongly (timeout, other id, other protocol version)
//!   is stopped without restarts: relaunching the same binary cannot fix it.
//! - The query path holds only [`ReadyWorker`]s: an id, the manifest and a cloned
//!   [`ChannelHandle`].
//!
//! # Key types
//!
//! | Type | Meaning | Constraints | Constructed / mutated in |
//! |---|---|---|---|
//! | [`SupervisorHandle`] | Registry of extensions and their lifecycle tasks | MUST NOT hold its registry lock across an await | `SupervisorHandle::*` |
//! | [`WorkerSnapshot`] | Published state of one extension | MUST only be written by the running lifecycle task | `Lifecycle::transition` |
//! | [`ReadyWorker`] | Dispatch target for one query | MUST only be produced from an accepting state | `SupervisorHandle::ready_workers` |
//! | [`StateChange`] | Broadcast record of one transition | MUST be sent after the snapshot is updated | `Lifecycle::transition` |
//!
//! # Invariants
//!
//! 1. Workers MUST only move along edges of the lifecycle graph.
//!    - Enforced in: `Lifecycle::transition`, `WorkerState::can_transition_to`
//!    - Tested by: `supervisor::tests::crash_restarts_through_degraded_and_restarting`
//!    - Failure symptom: the query path sees a worker as ready before its handshake finished.
//!
//! 2. A handshake failure MUST stop that extension without restarts.
//!    - Enforced in: `Lifecycle::handshake`, `Lifecycle::run`, `SupervisorHandle::start`
//!    - Tested by: `supervisor::tests::version_mismatch_is_fatal`, `supervisor::tests::handshake_timeout_is_fatal`,
//!      `supervisor::tests::rejected_worker_needs_reload`
//!    - Failure symptom: an incompatible extension is respawned in a tight loop.
//!
//! 3. Exhausted workers MUST stay stopped, reported once, until reloaded.
//!    - Enforced in: `Lifecycle::run`, `SupervisorHandle::start`
//!    - Tested by: `supervisor::tests::restarts_are_bounded`, `supervisor::tests::reload_revives_exhausted_worker`
//!    - Failure symptom: a crashing extension burns CPU forever or floods the log.
//!
//! 4. One worker's failure MUST NOT change any other worker's state.
//!    - Enforced in: one lifecycle task and one channel per worker
//!    - Tested by: `supervisor::tests::failure_is_isolated`
//!    - Failure symptom: a crashing extension takes healthy ones down with it.

use std::sync::Arc;
use std::time::Duration;

use beacon_rpc::{Channel, ChannelConfig, ChannelEvent, ChannelHandle, CloseReason, EventBody, Manifest, PROTOCOL_VERSION};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::launcher::{ProcessHandle, WorkerLauncher};
use crate::policy::{HealthConfig, RestartPolicy};
use crate::{Error, ExtensionSpec, Result, WorkerState};

#[cfg(test)]
mod tests;

const STATE_CHANGE_BUFFER: usize = 256;

/// Supervisor-wide settings, shared by every worker.
#[derive(Debug, Clone, Default)]
pub struct SupervisorConfig {
	/// Handshake and heartbeat timing.
	pub health: HealthConfig,
	/// Restart budget and backoff.
	pub restart: RestartPolicy,
	/// Per-worker channel limits.
	pub channel: ChannelConfig,
}

/// Published state of one extension.
#[derive(Debug, Clone, Default)]
pub struct WorkerSnapshot {
	/// Current lifecycle state.
	pub state: WorkerState,
	/// Restarts performed since the last start or reload.
	pub restarts: u32,
	/// Last acknowledged heartbeat.
	pub last_heartbeat: Option<Instant>,
	/// Manifest announced by the current or last incarnation.
	pub manifest: Option<Arc<Manifest>>,
	/// Request handle, present while the worker accepts queries.
	pub channel: Option<ChannelHandle>,
	/// Set once the restart budget is spent; cleared by reload.
	pub exhausted: bool,
	/// Set when the handshake failed; cleared by reload.
	pub rejected: bool,
	/// Most recent failure.
	pub last_error: Option<String>,
}

impl WorkerSnapshot {
	/// Whether only [`SupervisorHandle::reload`] can bring the worker back.
	pub fn needs_reload(&self) -> bool {
		self.exhausted || self.rejected
	}
}

/// A worker the query path may dispatch to.
#[derive(Debug, Clone)]
pub struct ReadyWorker {
	/// Extension id.
	pub id: Arc<str>,
	/// Announced manifest.
	pub manifest: Arc<Manifest>,
	/// Request handle.
	pub channel: ChannelHandle,
}

/// One lifecycle transition, as broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
	/// Extension id.
	pub id: Arc<str>,
	/// State entered.
	pub state: WorkerState,
	/// Restart count at the time of the transition.
	pub restarts: u32,
}

/// Registered extension with its current snapshot.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
	/// Registered spec.
	pub spec: Arc<ExtensionSpec>,
	/// Snapshot at the time of the call.
	pub snapshot: WorkerSnapshot,
}

struct Running {
	cancel: CancellationToken,
	task: JoinHandle<()>,
}

struct Entry {
	spec: Arc<ExtensionSpec>,
	state: Arc<watch::Sender<WorkerSnapshot>>,
	running: Option<Running>,
}

struct Inner {
	launcher: Arc<dyn WorkerLauncher>,
	config: Arc<SupervisorConfig>,
	/// Registration order is preserved.
	entries: Mutex<Vec<Entry>>,
	changes: broadcast::Sender<StateChange>,
	root: CancellationToken,
}

impl Drop for Inner {
	fn drop(&mut self) {
		self.root.cancel();
	}
}

/// Cloneable handle on the extension supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
	inner: Arc<Inner>,
}

impl std::fmt::Debug for SupervisorHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SupervisorHandle")
			.field("workers", &self.inner.entries.lock().len())
			.finish_non_exhaustive()
	}
}

impl SupervisorHandle {
	/// Creates a supervisor with no registered extensions.
	pub fn new(launcher: Arc<dyn WorkerLauncher>, config: SupervisorConfig) -> Self {
		let (changes, _) = broadcast::channel(STATE_CHANGE_BUFFER);
		Self {
			inner: Arc::new(Inner {
				launcher,
				config: Arc::new(config),
				entries: Mutex::new(Vec::new()),
				changes,
				root: CancellationToken::new(),
			}),
		}
	}

	/// Registers an extension in the `Stopped` state.
	///
	/// # Errors
	///
	/// Returns [`Error::Duplicate`] if the id is taken, or the spec's validation error.
	pub fn register(&self, spec: ExtensionSpec) -> Result<()> {
		spec.validate()?;
		let mut entries = self.inner.entries.lock();
		if entries.iter().any(|e| e.spec.id == spec.id) {
			return Err(Error::Duplicate(spec.id));
		}
		info!(extension = %spec.id, "extension registered");
		entries.push(Entry {
			spec: Arc::new(spec),
			state: Arc::new(watch::Sender::new(WorkerSnapshot::default())),
			running: None,
		});
		Ok(())
	}

	/// Starts the lifecycle task of a registered extension. Starting a running one is a no-op.
	///
	/// # Errors
	///
	/// Returns [`Error::Unknown`], [`Error::Exhausted`], [`Error::Rejected`] or [`Error::ShutDown`].
	pub fn start(&self, id: &str) -> Result<()> {
		if self.inner.root.is_cancelled() {
			return Err(Error::ShutDown);
		}
		let mut entries = self.inner.entries.lock();
		let entry = entries
			.iter_mut()
			.find(|e| e.spec.id == id)
			.ok_or_else(|| Error::Unknown(id.to_string()))?;

		{
			let snap = entry.state.borrow();
			if snap.exhausted {
				return Err(Error::Exhausted(id.to_string()));
			}
			if snap.rejected {
				return Err(Error::Rejected(id.to_string()));
			}
		}
		if entry.running.as_ref().is_some_and(|r| !r.task.is_finished()) {
			return Ok(());
		}

		entry.state.send_modify(|snap| snap.restarts = 0);
		let cancel = self.inner.root.child_token();
		let lifecycle = Lifecycle {
			id: Arc::from(id),
			spec: Arc::clone(&entry.spec),
			launcher: Arc::clone(&self.inner.launcher),
			config: Arc::clone(&self.inner.config),
			state: Arc::clone(&entry.state),
			changes: self.inner.changes.clone(),
			cancel: cancel.clone(),
		};
		let task = tokio::spawn(lifecycle.run());
		entry.running = Some(Running { cancel, task });
		Ok(())
	}

	/// Starts every registered extension that is neither exhausted nor rejected.
	pub fn start_all(&self) {
		let ids: Vec<String> = self.inner.entries.lock().iter().map(|e| e.spec.id.clone()).collect();
		for id in ids {
			if let Err(err) = self.start(&id) {
				warn!(extension = %id, error = %err, "extension not started");
			}
		}
	}

	/// Stops an extension and waits for its lifecycle task to finish.
	///
	/// # Errors
	///
	/// Returns [`Error::Unknown`] if no such extension is registered.
	pub async fn stop(&self, id: &str) -> Result<()> {
		let running = {
			let mut entries = self.inner.entries.lock();
			let entry = entries
				.iter_mut()
				.find(|e| e.spec.id == id)
				.ok_or_else(|| Error::Unknown(id.to_string()))?;
			entry.running.take()
		};
		if let Some(running) = running {
			self.join(id, running).await;
		}
		Ok(())
	}

	/// Stops an extension, forgets its failures and starts it again.
	///
	/// # Errors
	///
	/// Returns [`Error::Unknown`] or [`Error::ShutDown`].
	pub async fn reload(&self, id: &str) -> Result<()> {
		self.stop(id).await?;
		if let Some(state) = self.state_sender(id) {
			state.send_modify(|snap| {
				snap.exhausted = false;
				snap.rejected = false;
				snap.restarts = 0;
				snap.last_error = None;
			});
		}
		info!(extension = %id, "extension reloaded");
		self.start(id)
	}

	/// Stops every extension. The supervisor refuses to start workers afterwards.
	pub async fn shutdown_all(&self) {
		self.inner.root.cancel();
		let running: Vec<(String, Running)> = self
			.inner
			.entries
			.lock()
			.iter_mut()
			.filter_map(|e| e.running.take().map(|r| (e.spec.id.clone(), r)))
			.collect();
		for (id, running) in running {
			self.join(&id, running).await;
		}
		info!("supervisor shut down");
	}

	async fn join(&self, id: &str, running: Running) {
		running.cancel.cancel();
		let health = &self.inner.config.health;
		let budget = health.shutdown_grace + health.handshake_timeout + Duration::from_secs(1);
		let mut task = running.task;
		if tokio::time::timeout(budget, &mut task).await.is_err() {
			warn!(extension = %id, "lifecycle task did not stop in time; aborted");
			task.abort();
			if let Some(state) = self.state_sender(id) {
				state.send_modify(|snap| {
					snap.state = WorkerState::Stopped;
					snap.channel = None;
				});
			}
		}
	}

	/// Workers that currently accept queries, in registration order.
	pub fn ready_workers(&self) -> Vec<ReadyWorker> {
		self.inner
			.entries
			.lock()
			.iter()
			.filter_map(|e| {
				let snap = e.state.borrow();
				if !snap.state.is_accepting() {
					return None;
				}
				Some(ReadyWorker {
					id: Arc::from(e.spec.id.as_str()),
					manifest: Arc::clone(snap.manifest.as_ref()?),
					channel: snap.channel.clone()?,
				})
			})
			.collect()
	}

	/// Current state of an extension.
	pub fn state(&self, id: &str) -> Option<WorkerState> {
		self.snapshot(id).map(|snap| snap.state)
	}

	/// Current snapshot of an extension.
	pub fn snapshot(&self, id: &str) -> Option<WorkerSnapshot> {
		self.state_sender(id).map(|state| state.borrow().clone())
	}

	/// Receiver that observes every snapshot update of an extension.
	pub fn watch(&self, id: &str) -> Option<watch::Receiver<WorkerSnapshot>> {
		self.state_sender(id).map(|state| state.subscribe())
	}

	/// Stream of transitions across all extensions.
	pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
		self.inner.changes.subscribe()
	}

	/// Every registered extension with its snapshot, in registration order.
	pub fn list(&self) -> Vec<WorkerStatus> {
		self.inner
			.entries
			.lock()
			.iter()
			.map(|e| WorkerStatus {
				spec: Arc::clone(&e.spec),
				snapshot: e.state.borrow().clone(),
			})
			.collect()
	}

	fn state_sender(&self, id: &str) -> Option<Arc<watch::Sender<WorkerSnapshot>>> {
		self.inner
			.entries
			.lock()
			.iter()
			.find(|e| e.spec.id == id)
			.map(|e| Arc::clone(&e.state))
	}
}

/// How one incarnation of a worker ended.
enum Exit {
	/// Stop requested.
	Cancelled,
	/// The worker can never work as configured.
	Rejected(String),
	/// Transient failure; eligible for restart.
	Failed(String),
}

struct Lifecycle {
	id: Arc<str>,
	spec: Arc<ExtensionSpec>,
	launcher: Arc<dyn WorkerLauncher>,
	config: Arc<SupervisorConfig>,
	state: Arc<watch::Sender<WorkerSnapshot>>,
	changes: broadcast::Sender<StateChange>,
	cancel: CancellationToken,
}

impl Lifecycle {
	async fn run(self) {
		loop {
			match self.run_once().await {
				Exit::Cancelled => {
					self.transition(WorkerState::Stopped, |snap| snap.channel = None);
					return;
				}
				Exit::Rejected(reason) => {
					error!(extension = %self.id, reason = %reason, "extension rejected");
					self.transition(WorkerState::Stopped, |snap| {
						snap.channel = None;
						snap.rejected = true;
						snap.last_error = Some(reason);
					});
					return;
				}
				Exit::Failed(reason) => {
					warn!(extension = %self.id, reason = %reason, "worker failed");
					self.transition(WorkerState::Degraded, |snap| {
						snap.channel = None;
						snap.last_error = Some(reason);
					});
				}
			}

			let restarts = self.state.borrow().restarts;
			self.transition(WorkerState::Restarting, |_| {});
			let Some(delay) = self.config.restart.restart_delay(restarts) else {
				error!(extension = %self.id, restarts, "extension.restart.exhausted");
				self.transition(WorkerState::Stopped, |snap| snap.exhausted = true);
				return;
			};

			debug!(extension = %self.id, delay_ms = delay.as_millis() as u64, "restart scheduled");
			tokio::select! {
				_ = self.cancel.cancelled() => {
					self.transition(WorkerState::Stopped, |_| {});
					return;
				}
				_ = tokio::time::sleep(delay) => {}
			}
			self.state.send_modify(|snap| snap.restarts = restarts.saturating_add(1));
		}
	}

	async fn run_once(&self) -> Exit {
		self.transition(WorkerState::Starting, |_| {});
		let launched = tokio::select! {
			_ = self.cancel.cancelled() => return Exit::Cancelled,
			launched = self.launcher.launch(&self.spec) => launched,
		};
		let io = match launched {
			Ok(io) => io,
			Err(err) => return Exit::Failed(err.to_string()),
		};

		let mut process = io.process;
		let (channel, mut events) = Channel::spawn(
			Arc::clone(&self.id),
			io.reader,
			io.writer,
			self.config.channel.clone(),
		);
		self.transition(WorkerState::Handshaking, |_| {});

		let exit = match self.handshake(&mut events).await {
			Ok(manifest) => {
				info!(extension = %self.id, name = %manifest.name, "extension ready");
				let handle = channel.clone();
				self.transition(WorkerState::Ready, |snap| {
					snap.manifest = Some(Arc::new(manifest));
					snap.channel = Some(handle);
					snap.last_heartbeat = Some(Instant::now());
				});
				self.supervise(&channel, &mut events, process.as_mut()).await
			}
			Err(exit) => exit,
		};

		if matches!(exit, Exit::Cancelled) {
			let _ = channel.notify(EventBody::Shutdown);
			channel.close();
			let grace = self.config.health.shutdown_grace;
			if tokio::time::timeout(grace, process.wait()).await.is_err() {
				debug!(extension = %self.id, "worker ignored shutdown; killing");
			}
		} else {
			channel.close();
		}
		process.kill().await;
		exit
	}

	/// Waits for the manifest event and checks it against the spec.
	async fn handshake(&self, events: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> Result<Manifest, Exit> {
		let deadline = Instant::now() + self.config.health.handshake_timeout;
		loop {
			let event = tokio::select! {
				_ = self.cancel.cancelled() => return Err(Exit::Cancelled),
				_ = tokio::time::sleep_until(deadline) => {
					return Err(Exit::Rejected("no manifest before handshake timeout".into()));
				}
				event = events.recv() => event,
			};
			match event {
				Some(ChannelEvent::Event(EventBody::Manifest(manifest))) => {
					if manifest.protocol_version != PROTOCOL_VERSION {
						return Err(Exit::Rejected(format!(
							"protocol version {} is not supported (expected {PROTOCOL_VERSION})",
							manifest.protocol_version
						)));
					}
					if manifest.id != *self.id {
						return Err(Exit::Rejected(format!("worker announced itself as `{}`", manifest.id)));
					}
					return Ok(manifest);
				}
				Some(ChannelEvent::Event(other)) => {
					debug!(extension = %self.id, event = ?other, "event before manifest ignored");
				}
				Some(ChannelEvent::Closed(reason)) => return Err(Exit::Failed(reason.to_string())),
				None => return Err(Exit::Failed(CloseReason::Eof.to_string())),
			}
		}
	}

	/// Drives a ready worker until it fails or is cancelled.
	async fn supervise(
		&self,
		channel: &ChannelHandle,
		events: &mut mpsc::UnboundedReceiver<ChannelEvent>,
		process: &mut dyn ProcessHandle,
	) -> Exit {
		let health = &self.config.health;
		let mut ticker = tokio::time::interval_at(Instant::now() + health.heartbeat_interval, health.heartbeat_interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		let mut seq: u64 = 0;
		let mut awaiting: Option<u64> = None;
		let mut missed: u32 = 0;

		loop {
			tokio::select! {
				_ = self.cancel.cancelled() => return Exit::Cancelled,

				status = process.wait() => return Exit::Failed(format!("process exited: {status}")),

				event = events.recv() => match event {
					Some(ChannelEvent::Event(EventBody::HeartbeatAck { seq: acked })) => {
						if awaiting.is_some_and(|pending| acked <= pending) {
							missed = 0;
							if awaiting == Some(acked) {
								awaiting = None;
							}
							self.state.send_modify(|snap| snap.last_heartbeat = Some(Instant::now()));
						}
					}
					Some(ChannelEvent::Event(EventBody::Error { message })) => {
						warn!(extension = %self.id, message = %message, "extension reported an error");
					}
					Some(ChannelEvent::Event(other)) => {
						debug!(extension = %self.id, event = ?other, "unexpected event ignored");
					}
					Some(ChannelEvent::Closed(reason)) => return Exit::Failed(reason.to_string()),
					None => return Exit::Failed(CloseReason::Eof.to_string()),
				},

				_ = ticker.tick() => {
					if awaiting.is_some() {
						missed += 1;
						debug!(extension = %self.id, missed, "heartbeat unanswered");
						if missed >= health.missed_heartbeats {
							return Exit::Failed(format!("{missed} heartbeats unanswered"));
						}
					}
					seq += 1;
					if channel.notify(EventBody::Heartbeat { seq }).is_err() {
						return Exit::Failed("channel closed".into());
					}
					awaiting = Some(seq);

					let overdue = channel
						.oldest_outstanding()
						.is_some_and(|age| age > health.soft_request_timeout);
					let current = self.state.borrow().state;
					match (current, overdue) {
						(WorkerState::Ready, true) => self.transition(WorkerState::Busy, |_| {}),
						(WorkerState::Busy, false) => self.transition(WorkerState::Ready, |_| {}),
						_ => {}
					}
				}
			}
		}
	}

	/// Moves to `next`, applies `update` and broadcasts the change.
	fn transition(&self, next: WorkerState, update: impl FnOnce(&mut WorkerSnapshot)) {
		let mut restarts = 0;
		self.state.send_modify(|snap| {
			if !snap.state.can_transition_to(next) {
				warn!(extension = %self.id, from = %snap.state, to = %next, "worker.state.unexpected");
			}
			debug!(extension = %self.id, from = %snap.state, to = %next, "worker.state");
			snap.state = next;
			update(snap);
			restarts = snap.restarts;
		});
		let _ = self.changes.send(StateChange {
			id: Arc::clone(&self.id),
			state: next,
			restarts,
		});
	}
}
