use std::time::Duration;

/// What the supervisor does after a worker fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartPolicy {
	/// Leave the worker stopped.
	Never,
	/// Restart with exponential backoff, at most `max_restarts` times.
	OnFailure {
		/// Restarts allowed before the worker is stopped for good.
		max_restarts: u32,
		/// Delay before the first restart; doubled for each further one.
		backoff: Duration,
		/// Upper bound on the delay.
		max_backoff: Duration,
	},
}

impl RestartPolicy {
	/// Delay before restart number `restarts + 1`, or `None` once the budget is spent.
	pub fn restart_delay(&self, restarts: u32) -> Option<Duration> {
		match self {
			Self::Never => None,
			Self::OnFailure {
				max_restarts,
				backoff,
				max_backoff,
			} => {
				if restarts >= *max_restarts {
					return None;
				}
				let factor = 1u32.checked_shl(restarts).unwrap_or(u32::MAX);
				Some(backoff.saturating_mul(factor).min(*max_backoff))
			}
		}
	}
}

impl Default for RestartPolicy {
	fn default() -> Self {
		Self::OnFailure {
			max_restarts: 3,
			backoff: Duration::from_millis(200),
			max_backoff: Duration::from_secs(5),
		}
	}
}

/// Timing of the handshake and liveness probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
	/// Time a fresh worker has to announce its manifest.
	pub handshake_timeout: Duration,
	/// Period between heartbeats.
	pub heartbeat_interval: Duration,
	/// Consecutive unanswered heartbeats that mark the worker degraded.
	pub missed_heartbeats: u32,
	/// Age at which an unanswered request flags the worker busy.
	pub soft_request_timeout: Duration,
	/// Time a worker gets to exit after a shutdown request before it is killed.
	pub shutdown_grace: Duration,
}

impl Default for HealthConfig {
	fn default() -> Self {
		Self {
			handshake_timeout: Duration::from_secs(2),
			heartbeat_interval: Duration::from_secs(1),
			missed_heartbeats: 3,
			soft_request_timeout: Duration::from_millis(500),
			shutdown_grace: Duration::from_millis(300),
		}
	}
}
