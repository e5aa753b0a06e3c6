//! In-process fake extensions for tests.
//!
//! [`InProcessLauncher`] runs each "worker" as a tokio task on the other end of a
//! [`tokio::io::duplex`] pipe. Per-extension [`Behavior`] scripts inject the failures a real
//! process can show: crashes, hangs, wrong manifests and ignored heartbeats.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_rpc::{
	DEFAULT_MAX_FRAME_BYTES, EventBody, Frame, Manifest, QueryHandler, QueryRequest, ResultItem, frame, serve,
};
use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;

use crate::launcher::{ProcessHandle, WorkerIo, WorkerLauncher};
use crate::{Error, ExtensionSpec, Result};

const PIPE_CAPACITY: usize = 64 * 1024;

/// What the fake worker does on one launch.
#[derive(Debug, Clone)]
pub enum Behavior {
	/// Serves queries by filtering its items on the query text.
	Healthy,
	/// Acknowledges heartbeats but never answers a query.
	Silent,
	/// Answers queries after a delay.
	Slow(Duration),
	/// Serves normally, then exits with a failure after the given time.
	CrashAfter(Duration),
	/// Keeps its pipes open but never sends anything.
	Mute,
	/// Announces this manifest instead of one derived from the spec.
	Announce(Manifest),
	/// Announces itself, then ignores every message.
	Deaf,
	/// The launch itself fails.
	FailSpawn,
}

#[derive(Default)]
struct Script {
	behaviors: VecDeque<Behavior>,
	items: Vec<ResultItem>,
	launches: usize,
}

/// Launcher whose workers are tasks in the current runtime.
///
/// Each launch consumes the next scripted [`Behavior`] of the extension; once the script is
/// empty, the last behavior repeats. Unscripted extensions are [`Behavior::Healthy`].
#[derive(Default)]
pub struct InProcessLauncher {
	scripts: Mutex<HashMap<String, Script>>,
}

impl InProcessLauncher {
	/// Creates a launcher with no scripts.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the behaviors of successive launches of `id`.
	#[must_use]
	pub fn script(self, id: &str, behaviors: impl IntoIterator<Item = Behavior>) -> Self {
		self.scripts.lock().entry(id.to_string()).or_default().behaviors = behaviors.into_iter().collect();
		self
	}

	/// Sets the items `id` answers queries from.
	#[must_use]
	pub fn items(self, id: &str, items: Vec<ResultItem>) -> Self {
		self.scripts.lock().entry(id.to_string()).or_default().items = items;
		self
	}

	/// Number of launches of `id` so far.
	pub fn launches(&self, id: &str) -> usize {
		self.scripts.lock().get(id).map_or(0, |s| s.launches)
	}

	fn next_launch(&self, id: &str) -> (Behavior, Vec<ResultItem>) {
		let mut scripts = self.scripts.lock();
		let script = scripts.entry(id.to_string()).or_default();
		script.launches += 1;
		let behavior = if script.behaviors.len() > 1 {
			script.behaviors.pop_front()
		} else {
			script.behaviors.front().cloned()
		};
		(behavior.unwrap_or(Behavior::Healthy), script.items.clone())
	}
}

/// Manifest a well-behaved worker for `spec` announces.
pub fn manifest_for(spec: &ExtensionSpec) -> Manifest {
	Manifest {
		priority_weight: spec.priority_weight,
		keywords: spec.keywords.clone(),
		..Manifest::new(spec.id.clone(), spec.name.clone())
	}
}

#[async_trait]
impl WorkerLauncher for InProcessLauncher {
	async fn launch(&self, spec: &ExtensionSpec) -> Result<WorkerIo> {
		let (behavior, items) = self.next_launch(&spec.id);
		if matches!(behavior, Behavior::FailSpawn) {
			return Err(Error::Launch(format!("scripted spawn failure for `{}`", spec.id)));
		}

		let (launcher_end, worker_end) = tokio::io::duplex(PIPE_CAPACITY);
		let (reader, writer) = tokio::io::split(launcher_end);
		let task = tokio::spawn(run_fake(behavior, manifest_for(spec), items, worker_end));
		Ok(WorkerIo {
			reader: Box::new(reader),
			writer: Box::new(writer),
			process: Box::new(FakeProcess { task, exit: None }),
		})
	}
}

async fn run_fake(behavior: Behavior, manifest: Manifest, items: Vec<ResultItem>, stream: DuplexStream) -> String {
	let (reader, mut writer) = tokio::io::split(stream);
	let handler = |delay: Option<Duration>| Arc::new(FakeHandler { items, delay });

	match behavior {
		Behavior::Healthy => exit_text(serve(manifest, handler(Some(Duration::ZERO)), reader, writer).await),
		Behavior::Silent => exit_text(serve(manifest, handler(None), reader, writer).await),
		Behavior::Slow(delay) => exit_text(serve(manifest, handler(Some(delay)), reader, writer).await),
		Behavior::Announce(announced) => {
			exit_text(serve(announced, handler(Some(Duration::ZERO)), reader, writer).await)
		}
		Behavior::CrashAfter(after) => {
			let serving = serve(manifest, handler(Some(Duration::ZERO)), reader, writer);
			let _ = tokio::time::timeout(after, serving).await;
			"exit status: 1".into()
		}
		Behavior::Mute => {
			let _held = (reader, writer);
			std::future::pending::<String>().await
		}
		Behavior::Deaf => {
			let Ok(announce) = Frame::event(&EventBody::Manifest(manifest)) else {
				return "exit status: 2".into();
			};
			if frame::write_frame(&mut writer, &announce, DEFAULT_MAX_FRAME_BYTES).await.is_err() {
				return "exit status: 2".into();
			}
			let mut reader = tokio::io::BufReader::new(reader);
			while let Ok(Some(_)) = frame::read_frame(&mut reader, DEFAULT_MAX_FRAME_BYTES).await {}
			"exit status: 0".into()
		}
		Behavior::FailSpawn => "never launched".into(),
	}
}

fn exit_text(result: beacon_rpc::Result<()>) -> String {
	match result {
		Ok(()) => "exit status: 0".into(),
		Err(err) => format!("exit status: 1 ({err})"),
	}
}

/// Query handler of a fake worker.
///
/// `delay: None` never answers.
struct FakeHandler {
	items: Vec<ResultItem>,
	delay: Option<Duration>,
}

impl QueryHandler for FakeHandler {
	async fn query(&self, request: QueryRequest) -> std::result::Result<Vec<ResultItem>, String> {
		let Some(delay) = self.delay else {
			return std::future::pending().await;
		};
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}
		let needle = request.query_text.to_lowercase();
		Ok(self
			.items
			.iter()
			.filter(|item| item.label.to_lowercase().contains(&needle))
			.cloned()
			.collect())
	}
}

struct FakeProcess {
	task: JoinHandle<String>,
	exit: Option<String>,
}

#[async_trait]
impl ProcessHandle for FakeProcess {
	async fn wait(&mut self) -> String {
		if let Some(exit) = &self.exit {
			return exit.clone();
		}
		let exit = match (&mut self.task).await {
			Ok(exit) => exit,
			Err(err) if err.is_cancelled() => "killed".into(),
			Err(err) => format!("panicked: {err}"),
		};
		self.exit = Some(exit.clone());
		exit
	}

	async fn kill(&mut self) {
		if self.exit.is_none() {
			self.task.abort();
			let _ = (&mut self.task).await;
			self.exit = Some("killed".into());
		}
	}
}

impl Drop for FakeProcess {
	fn drop(&mut self) {
		self.task.abort();
	}
}
