//! Worker process launching for production and testing.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::{Error, ExtensionSpec, Result};

/// Boxed read half of a worker transport.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of a worker transport.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A running worker: its transport and a handle on whatever executes it.
pub struct WorkerIo {
	/// Bytes from the worker.
	pub reader: BoxReader,
	/// Bytes to the worker.
	pub writer: BoxWriter,
	/// Exit observation and forced termination.
	pub process: Box<dyn ProcessHandle>,
}

impl std::fmt::Debug for WorkerIo {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WorkerIo").finish_non_exhaustive()
	}
}

/// Lifetime of one launched worker.
#[async_trait]
pub trait ProcessHandle: Send {
	/// Resolves once the worker has exited, describing how.
	///
	/// Must be cancel-safe and may be awaited again after it resolved.
	async fn wait(&mut self) -> String;

	/// Terminates the worker forcefully and reaps it.
	async fn kill(&mut self);
}

/// Starts extension workers.
///
/// The supervisor uses [`ProcessLauncher`] in production; tests swap in
/// [`crate::test_helpers::InProcessLauncher`].
#[async_trait]
pub trait WorkerLauncher: Send + Sync + 'static {
	/// Launches a worker for `spec`.
	async fn launch(&self, spec: &ExtensionSpec) -> Result<WorkerIo>;
}

/// Launcher that runs each extension as a child process speaking over stdin/stdout.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
	/// Creates a process launcher.
	#[must_use]
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
	async fn launch(&self, spec: &ExtensionSpec) -> Result<WorkerIo> {
		let mut command = Command::new(&spec.command);
		command
			.args(&spec.args)
			.envs(&spec.env)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::inherit())
			.kill_on_drop(true);
		if let Some(cwd) = &spec.cwd {
			command.current_dir(cwd);
		}

		let mut child = command.spawn().map_err(|source| Error::Spawn {
			command: spec.command.clone(),
			source,
		})?;
		let stdin = child.stdin.take().ok_or(Error::MissingPipe("stdin"))?;
		let stdout = child.stdout.take().ok_or(Error::MissingPipe("stdout"))?;
		debug!(extension = %spec.id, pid = ?child.id(), "worker process spawned");

		Ok(WorkerIo {
			reader: Box::new(stdout),
			writer: Box::new(stdin),
			process: Box::new(ChildProcess { child, exit: None }),
		})
	}
}

struct ChildProcess {
	child: Child,
	exit: Option<String>,
}

#[async_trait]
impl ProcessHandle for ChildProcess {
	async fn wait(&mut self) -> String {
		if let Some(exit) = &self.exit {
			return exit.clone();
		}
		let exit = match self.child.wait().await {
			Ok(status) => status.to_string(),
			Err(err) => format!("wait failed: {err}"),
		};
		self.exit = Some(exit.clone());
		exit
	}

	async fn kill(&mut self) {
		if self.exit.is_some() {
			return;
		}
		if let Err(err) = self.child.kill().await {
			warn!(error = %err, "failed to kill worker process");
		}
		self.exit = Some("killed".into());
	}
}
