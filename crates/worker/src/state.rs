use std::fmt;

/// Lifecycle state of one extension worker.
///
/// ```text
/// Stopped -> Starting -> Handshaking -> Ready <-> Busy
///                 ^                       |        |
///                 |                       v        v
///            Restarting <------------- Degraded <--+
/// ```
///
/// Every running state may also fall to `Stopped` on shutdown, and `Restarting` falls to
/// `Stopped` once restarts are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WorkerState {
	/// Not running.
	#[default]
	Stopped,
	/// Process spawn in progress.
	Starting,
	/// Process running; waiting for its manifest.
	Handshaking,
	/// Accepting queries.
	Ready,
	/// Accepting queries, but a request is overdue.
	Busy,
	/// Failed; about to be torn down.
	Degraded,
	/// Waiting out the restart backoff.
	Restarting,
}

impl WorkerState {
	/// Whether queries may be dispatched to a worker in this state.
	pub const fn is_accepting(self) -> bool {
		matches!(self, Self::Ready | Self::Busy)
	}

	/// Whether `self -> next` is an edge of the lifecycle graph.
	pub fn can_transition_to(self, next: Self) -> bool {
		use WorkerState::*;
		match (self, next) {
			(Stopped, Starting) => true,
			(Starting, Handshaking | Degraded) => true,
			(Handshaking, Ready | Degraded) => true,
			(Ready, Busy) | (Busy, Ready) => true,
			(Ready | Busy, Degraded) => true,
			(Degraded, Restarting) => true,
			(Restarting, Starting) => true,
			(Stopped, _) => false,
			(_, Stopped) => true,
			_ => false,
		}
	}

	/// Lowercase name used in logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Stopped => "stopped",
			Self::Starting => "starting",
			Self::Handshaking => "handshaking",
			Self::Ready => "ready",
			Self::Busy => "busy",
			Self::Degraded => "degraded",
			Self::Restarting => "restarting",
		}
	}
}

impl fmt::Display for WorkerState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
