use std::io;
use std::path::PathBuf;

/// Errors raised while discovering, launching or controlling extension workers.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The worker process could not be spawned.
	#[error("failed to spawn `{command}`: {source}")]
	Spawn {
		/// Command that was executed.
		command: String,
		/// Underlying spawn error.
		#[source]
		source: io::Error,
	},
	/// A spawned process did not expose the expected stdio pipe.
	#[error("worker process has no {0} pipe")]
	MissingPipe(&'static str),
	/// A manifest file could not be read.
	#[error("failed to read {}: {source}", path.display())]
	Read {
		/// Manifest path.
		path: PathBuf,
		/// Underlying I/O error.
		#[source]
		source: io::Error,
	},
	/// A manifest file is not valid JSON for an extension spec.
	#[error("invalid manifest {}: {source}", path.display())]
	Parse {
		/// Manifest path.
		path: PathBuf,
		/// Underlying parse error.
		#[source]
		source: serde_json::Error,
	},
	/// The spec is well formed but unusable.
	#[error("extension `{id}`: {reason}")]
	InvalidSpec {
		/// Extension id, possibly empty.
		id: String,
		/// What is wrong with it.
		reason: String,
	},
	/// An extension with this id is already registered.
	#[error("extension `{0}` is already registered")]
	Duplicate(String),
	/// No extension with this id is registered.
	#[error("unknown extension `{0}`")]
	Unknown(String),
	/// The extension used up its restarts and needs a reload.
	#[error("extension `{0}` exhausted its restarts")]
	Exhausted(String),
	/// The extension failed its handshake and needs a reload.
	#[error("extension `{0}` was rejected at handshake")]
	Rejected(String),
	/// The supervisor has been shut down.
	#[error("supervisor is shut down")]
	ShutDown,
	/// The launcher itself failed.
	#[error("launch failed: {0}")]
	Launch(String),
}

/// Convenience alias for worker results.
pub type Result<T, E = Error> = std::result::Result<T, E>;
