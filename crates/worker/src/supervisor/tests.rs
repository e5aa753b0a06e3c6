use std::time::Duration;

use beacon_rpc::{QueryRequest, RequestBody, ResponseBody, ResultItem};
use pretty_assertions::assert_eq;

use super::*;
use crate::test_helpers::{Behavior, InProcessLauncher};

const WAIT: Duration = Duration::from_secs(3);

fn fast_config(max_restarts: u32) -> SupervisorConfig {
	SupervisorConfig {
		health: HealthConfig {
			handshake_timeout: Duration::from_millis(200),
			heartbeat_interval: Duration::from_millis(20),
			missed_heartbeats: 3,
			soft_request_timeout: Duration::from_millis(100),
			shutdown_grace: Duration::from_millis(50),
		},
		restart: RestartPolicy::OnFailure {
			max_restarts,
			backoff: Duration::from_millis(5),
			max_backoff: Duration::from_millis(20),
		},
		channel: ChannelConfig::default(),
	}
}

fn supervisor(launcher: InProcessLauncher, max_restarts: u32, ids: &[&str]) -> (SupervisorHandle, Arc<InProcessLauncher>) {
	let launcher = Arc::new(launcher);
	let handle = SupervisorHandle::new(launcher.clone(), fast_config(max_restarts));
	for id in ids {
		handle.register(ExtensionSpec::new(*id, id.to_uppercase(), "fake")).unwrap();
	}
	(handle, launcher)
}

async fn wait_until(handle: &SupervisorHandle, id: &str, pred: impl FnMut(&WorkerSnapshot) -> bool) -> WorkerSnapshot {
	let mut rx = handle.watch(id).unwrap();
	tokio::time::timeout(WAIT, rx.wait_for(pred))
		.await
		.expect("state reached in time")
		.expect("state sender alive")
		.clone()
}

/// Collects the states `id` enters until `last` has been seen `times` times.
async fn states_until(
	changes: &mut broadcast::Receiver<StateChange>,
	id: &str,
	last: WorkerState,
	times: usize,
) -> Vec<WorkerState> {
	let mut seen = Vec::new();
	let mut hits = 0;
	while hits < times {
		let change = tokio::time::timeout(WAIT, changes.recv()).await.unwrap().unwrap();
		if &*change.id != id {
			continue;
		}
		seen.push(change.state);
		if change.state == last {
			hits += 1;
		}
	}
	seen
}

fn query(text: &str) -> RequestBody {
	RequestBody::Query(QueryRequest {
		query_text: text.into(),
		generation_id: 1,
	})
}

#[tokio::test]
async fn healthy_worker_becomes_ready_and_serves() {
	let launcher = InProcessLauncher::new().items("files", vec![ResultItem::new("f1", "Firefox profile", 0.7)]);
	let (handle, launcher) = supervisor(launcher, 2, &["files"]);
	assert_eq!(handle.state("files"), Some(WorkerState::Stopped));

	handle.start("files").unwrap();
	let snap = wait_until(&handle, "files", |s| s.state == WorkerState::Ready).await;
	assert_eq!(snap.manifest.as_ref().map(|m| m.id.as_str()), Some("files"));

	let ready = handle.ready_workers();
	assert_eq!(ready.len(), 1);
	let ResponseBody::Results { items } = ready[0].channel.request(query("fire")).await.unwrap();
	assert_eq!(items, vec![ResultItem::new("f1", "Firefox profile", 0.7)]);

	handle.shutdown_all().await;
	assert_eq!(handle.state("files"), Some(WorkerState::Stopped));
	assert!(handle.ready_workers().is_empty());
	assert_eq!(launcher.launches("files"), 1);
	assert!(matches!(handle.start("files"), Err(Error::ShutDown)));
}

#[tokio::test]
async fn version_mismatch_is_fatal() {
	let wrong = Manifest {
		protocol_version: PROTOCOL_VERSION + 1,
		..Manifest::new("calc", "Calc")
	};
	let launcher = InProcessLauncher::new().script("calc", [Behavior::Announce(wrong)]);
	let (handle, launcher) = supervisor(launcher, 3, &["calc"]);
	handle.start("calc").unwrap();

	let snap = wait_until(&handle, "calc", |s| s.last_error.is_some() && s.state == WorkerState::Stopped).await;
	assert!(snap.last_error.unwrap().contains("protocol version"));
	assert!(!snap.exhausted);
	assert!(snap.rejected);
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert_eq!(launcher.launches("calc"), 1);
}

#[tokio::test]
async fn foreign_id_is_fatal() {
	let launcher = InProcessLauncher::new().script("calc", [Behavior::Announce(Manifest::new("other", "Other"))]);
	let (handle, launcher) = supervisor(launcher, 3, &["calc"]);
	handle.start("calc").unwrap();

	let snap = wait_until(&handle, "calc", |s| s.last_error.is_some() && s.state == WorkerState::Stopped).await;
	assert!(snap.last_error.unwrap().contains("`other`"));
	assert_eq!(launcher.launches("calc"), 1);
}

#[tokio::test]
async fn rejected_worker_needs_reload() {
	let wrong = Manifest {
		protocol_version: PROTOCOL_VERSION + 1,
		..Manifest::new("calc", "Calc")
	};
	let launcher = InProcessLauncher::new().script("calc", [Behavior::Announce(wrong), Behavior::Healthy]);
	let (handle, launcher) = supervisor(launcher, 3, &["calc"]);
	handle.start("calc").unwrap();

	let snap = wait_until(&handle, "calc", |s| s.rejected).await;
	assert_eq!(snap.state, WorkerState::Stopped);
	assert!(snap.needs_reload());
	assert!(matches!(handle.start("calc"), Err(Error::Rejected(_))));
	assert!(matches!(handle.start("calc"), Err(Error::Rejected(_))));
	assert_eq!(launcher.launches("calc"), 1);

	handle.reload("calc").await.unwrap();
	let snap = wait_until(&handle, "calc", |s| s.state == WorkerState::Ready).await;
	assert!(!snap.rejected);
	assert_eq!(launcher.launches("calc"), 2);
}

#[tokio::test]
async fn handshake_timeout_is_fatal() {
	let launcher = InProcessLauncher::new().script("mute", [Behavior::Mute]);
	let (handle, launcher) = supervisor(launcher, 3, &["mute"]);
	let mut changes = handle.subscribe();
	handle.start("mute").unwrap();

	let states = states_until(&mut changes, "mute", WorkerState::Stopped, 1).await;
	assert_eq!(states, vec![WorkerState::Starting, WorkerState::Handshaking, WorkerState::Stopped]);
	let snap = handle.snapshot("mute").unwrap();
	assert!(snap.last_error.unwrap().contains("handshake"));
	assert_eq!(launcher.launches("mute"), 1);
}

#[tokio::test]
async fn crash_restarts_through_degraded_and_restarting() {
	let launcher = InProcessLauncher::new().script("flaky", [Behavior::CrashAfter(Duration::from_millis(50)), Behavior::Healthy]);
	let (handle, launcher) = supervisor(launcher, 2, &["flaky"]);
	let mut changes = handle.subscribe();
	handle.start("flaky").unwrap();

	let states = states_until(&mut changes, "flaky", WorkerState::Ready, 2).await;
	assert_eq!(
		states,
		vec![
			WorkerState::Starting,
			WorkerState::Handshaking,
			WorkerState::Ready,
			WorkerState::Degraded,
			WorkerState::Restarting,
			WorkerState::Starting,
			WorkerState::Handshaking,
			WorkerState::Ready,
		]
	);
	let snap = handle.snapshot("flaky").unwrap();
	assert_eq!(snap.restarts, 1);
	assert!(snap.channel.is_some());
	assert_eq!(launcher.launches("flaky"), 2);
}

#[tokio::test]
async fn restarts_are_bounded() {
	let launcher = InProcessLauncher::new().script("crashy", [Behavior::CrashAfter(Duration::from_millis(10))]);
	let (handle, launcher) = supervisor(launcher, 2, &["crashy"]);
	handle.start("crashy").unwrap();

	let snap = wait_until(&handle, "crashy", |s| s.exhausted).await;
	assert_eq!(snap.state, WorkerState::Stopped);
	assert_eq!(snap.restarts, 2);
	assert_eq!(launcher.launches("crashy"), 3);
	assert!(handle.ready_workers().is_empty());
	assert!(matches!(handle.start("crashy"), Err(Error::Exhausted(_))));
}

#[tokio::test]
async fn reload_revives_exhausted_worker() {
	let launcher = InProcessLauncher::new().script(
		"boot",
		[Behavior::FailSpawn, Behavior::FailSpawn, Behavior::FailSpawn, Behavior::Healthy],
	);
	let (handle, launcher) = supervisor(launcher, 2, &["boot"]);
	handle.start("boot").unwrap();
	wait_until(&handle, "boot", |s| s.exhausted).await;

	handle.reload("boot").await.unwrap();
	let snap = wait_until(&handle, "boot", |s| s.state == WorkerState::Ready).await;
	assert!(!snap.exhausted);
	assert_eq!(snap.restarts, 0);
	assert_eq!(launcher.launches("boot"), 4);
}

#[tokio::test]
async fn missed_heartbeats_degrade_and_restart() {
	let launcher = InProcessLauncher::new().script("deaf", [Behavior::Deaf, Behavior::Healthy]);
	let (handle, _launcher) = supervisor(launcher, 2, &["deaf"]);
	let mut changes = handle.subscribe();
	handle.start("deaf").unwrap();

	let states = states_until(&mut changes, "deaf", WorkerState::Ready, 2).await;
	assert!(states.contains(&WorkerState::Degraded));
	let snap = handle.snapshot("deaf").unwrap();
	assert!(snap.last_error.unwrap().contains("heartbeats unanswered"));
	assert!(snap.last_heartbeat.is_some());
}

#[tokio::test]
async fn failure_is_isolated() {
	let launcher = InProcessLauncher::new().script("bad", [Behavior::CrashAfter(Duration::from_millis(10))]);
	let (handle, _launcher) = supervisor(launcher, 1, &["good", "bad"]);
	let mut changes = handle.subscribe();
	handle.start_all();

	wait_until(&handle, "good", |s| s.state == WorkerState::Ready).await;
	wait_until(&handle, "bad", |s| s.exhausted).await;

	let mut good_states = Vec::new();
	while let Ok(change) = changes.try_recv() {
		if &*change.id == "good" {
			good_states.push(change.state);
		}
	}
	assert_eq!(good_states, vec![WorkerState::Starting, WorkerState::Handshaking, WorkerState::Ready]);
	let ready: Vec<_> = handle.ready_workers().into_iter().map(|w| w.id.to_string()).collect();
	assert_eq!(ready, vec!["good".to_string()]);
}

#[tokio::test]
async fn overdue_request_marks_worker_busy() {
	let launcher = InProcessLauncher::new().script("slow", [Behavior::Silent]);
	let (handle, _launcher) = supervisor(launcher, 2, &["slow"]);
	handle.start("slow").unwrap();
	wait_until(&handle, "slow", |s| s.state == WorkerState::Ready).await;

	let worker = handle.ready_workers().remove(0);
	let pending = tokio::spawn(async move { worker.channel.request(query("anything")).await });

	wait_until(&handle, "slow", |s| s.state == WorkerState::Busy).await;
	assert_eq!(handle.ready_workers().len(), 1, "busy workers still accept queries");
	pending.abort();
}

#[tokio::test]
async fn stop_then_start_launches_again() {
	let (handle, launcher) = supervisor(InProcessLauncher::new(), 2, &["app"]);
	handle.start("app").unwrap();
	wait_until(&handle, "app", |s| s.state == WorkerState::Ready).await;

	handle.stop("app").await.unwrap();
	assert_eq!(handle.state("app"), Some(WorkerState::Stopped));
	assert!(handle.ready_workers().is_empty());

	handle.start("app").unwrap();
	wait_until(&handle, "app", |s| s.state == WorkerState::Ready).await;
	assert_eq!(launcher.launches("app"), 2);
}

#[tokio::test]
async fn registration_errors() {
	let (handle, _launcher) = supervisor(InProcessLauncher::new(), 2, &["app"]);
	assert!(matches!(
		handle.register(ExtensionSpec::new("app", "Again", "fake")),
		Err(Error::Duplicate(_))
	));
	assert!(matches!(handle.start("ghost"), Err(Error::Unknown(_))));
	assert!(matches!(handle.stop("ghost").await, Err(Error::Unknown(_))));
	assert_eq!(handle.list().len(), 1);
}
