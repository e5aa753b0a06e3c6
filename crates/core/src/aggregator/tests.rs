use std::time::Duration;

use beacon_rpc::{Manifest, PROTOCOL_VERSION};
use beacon_worker::test_helpers::{Behavior, InProcessLauncher};
use beacon_worker::{ExtensionSpec, HealthConfig, RestartPolicy, SupervisorConfig};
use pretty_assertions::assert_eq;

use super::*;
use crate::provider::{ProviderError, StaticProvider};

fn apps(labels: &[&str]) -> StaticProvider {
	let candidates = labels
		.iter()
		.map(|label| Candidate::new(label.to_lowercase().replace(' ', "-"), *label, Source::Local("apps".into())))
		.collect();
	StaticProvider::new("apps", candidates)
}

fn search(max_results: usize, deadline_ms: u64) -> SearchConfig {
	SearchConfig {
		max_results,
		local_budget: Duration::from_secs(1),
		extension_deadline: Duration::from_millis(deadline_ms),
	}
}

fn labels(outcome: &QueryOutcome) -> Vec<&str> {
	outcome.items().iter().map(|item| item.label.as_str()).collect()
}

fn ids(outcome: &QueryOutcome) -> Vec<&str> {
	outcome.items().iter().map(|item| item.id.as_str()).collect()
}

fn ranked(outcome: QueryOutcome) -> QueryResults {
	match outcome {
		QueryOutcome::Ranked(results) => results,
		other => panic!("expected ranked results, got {other:?}"),
	}
}

fn worker_config() -> SupervisorConfig {
	SupervisorConfig {
		health: HealthConfig {
			handshake_timeout: Duration::from_millis(500),
			heartbeat_interval: Duration::from_millis(50),
			missed_heartbeats: 3,
			soft_request_timeout: Duration::from_millis(200),
			shutdown_grace: Duration::from_millis(50),
		},
		restart: RestartPolicy::OnFailure {
			max_restarts: 2,
			backoff: Duration::from_millis(5),
			max_backoff: Duration::from_millis(20),
		},
		channel: Default::default(),
	}
}

fn extensions(launcher: &Arc<InProcessLauncher>, specs: Vec<ExtensionSpec>) -> SupervisorHandle {
	let handle = SupervisorHandle::new(launcher.clone(), worker_config());
	for spec in specs {
		handle.register(spec).unwrap();
	}
	handle
}

async fn wait_ready(handle: &SupervisorHandle, id: &str) {
	let mut rx = handle.watch(id).unwrap();
	tokio::time::timeout(Duration::from_secs(3), rx.wait_for(|s| s.state == WorkerState::Ready))
		.await
		.expect("worker ready in time")
		.expect("worker state alive");
}

async fn started(launcher: &Arc<InProcessLauncher>, specs: Vec<ExtensionSpec>) -> SupervisorHandle {
	let ids: Vec<String> = specs.iter().map(|s| s.id.clone()).collect();
	let handle = extensions(launcher, specs);
	handle.start_all();
	for id in &ids {
		wait_ready(&handle, id).await;
	}
	handle
}

#[tokio::test]
async fn fire_ranks_firefox_then_file_manager() {
	let aggregator = Aggregator::builder()
		.provider(apps(&["GIMP", "File Manager", "Firefox"]), 1.0)
		.build();

	let outcome = aggregator.query("fire").await;
	assert_eq!(labels(&outcome), vec!["Firefox", "File Manager"]);
	assert_eq!(outcome.items()[0].spans, vec![0..4]);
}

#[tokio::test]
async fn results_are_capped_without_reordering() {
	let many: Vec<String> = (0..30).map(|i| format!("App {i:02}")).collect();
	let many: Vec<&str> = many.iter().map(String::as_str).collect();
	let capped = Aggregator::builder().provider(apps(&many), 1.0).search(search(5, 50)).build();
	let full = Aggregator::builder().provider(apps(&many), 1.0).search(search(100, 50)).build();

	let capped = capped.query("app").await;
	let full = full.query("app").await;
	assert_eq!(full.items().len(), 30);
	assert_eq!(capped.items(), &full.items()[..5]);
	assert_eq!(labels(&capped), vec!["App 00", "App 01", "App 02", "App 03", "App 04"]);
}

#[tokio::test]
async fn empty_query_lists_used_candidates() {
	let aggregator = Aggregator::builder()
		.provider(apps(&["Firefox", "GIMP", "Terminal"]), 1.0)
		.build();
	assert!(aggregator.query("").await.items().is_empty());

	aggregator.record_selection(&"gimp".into(), SystemTime::now());
	aggregator.record_selection(&"terminal".into(), SystemTime::now());
	aggregator.record_selection(&"gimp".into(), SystemTime::now());

	assert_eq!(ids(&aggregator.query("   ").await), vec!["gimp", "terminal"]);
}

#[tokio::test]
async fn failing_providers_are_skipped() {
	struct Broken;
	impl CandidateProvider for Broken {
		fn name(&self) -> &str {
			"broken"
		}
		fn list_candidates(&self) -> Result<Vec<Candidate>, ProviderError> {
			Err(ProviderError::Failed("index missing".into()))
		}
	}

	struct Panicky;
	impl CandidateProvider for Panicky {
		fn name(&self) -> &str {
			"panicky"
		}
		fn list_candidates(&self) -> Result<Vec<Candidate>, ProviderError> {
			panic!("provider bug")
		}
	}

	let aggregator = Aggregator::builder()
		.provider(Broken, 1.0)
		.provider(Panicky, 1.0)
		.provider(apps(&["Firefox"]), 1.0)
		.build();
	assert_eq!(labels(&aggregator.query("fire").await), vec!["Firefox"]);
}

#[derive(Clone, Default)]
struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

impl std::io::Write for Captured {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		self.0.lock().extend_from_slice(buf);
		Ok(buf.len())
	}

	fn flush(&mut self) -> std::io::Result<()> {
		Ok(())
	}
}

#[tokio::test]
async fn slow_provider_is_reported_and_later_ones_skipped() {
	struct Slow;
	impl CandidateProvider for Slow {
		fn name(&self) -> &str {
			"slow"
		}
		fn list_candidates(&self) -> Result<Vec<Candidate>, ProviderError> {
			std::thread::sleep(Duration::from_millis(40));
			Ok(vec![Candidate::new("files", "Files", Source::Local("slow".into()))])
		}
	}

	let captured = Captured::default();
	let writer = captured.clone();
	let subscriber = tracing_subscriber::fmt()
		.with_ansi(false)
		.with_writer(move || writer.clone())
		.finish();
	let _guard = tracing::subscriber::set_default(subscriber);

	let aggregator = Aggregator::builder()
		.provider(Slow, 1.0)
		.provider(apps(&["Firefox"]), 1.0)
		.search(SearchConfig {
			local_budget: Duration::from_millis(10),
			..search(20, 100)
		})
		.build();
	assert_eq!(labels(&aggregator.query("fi").await), vec!["Files"]);

	let log = String::from_utf8_lossy(&captured.0.lock()).into_owned();
	let over = log
		.lines()
		.find(|line| line.contains("aggregator.provider.over_budget"))
		.expect("overrun logged");
	assert!(over.contains("slow"));
	assert!(log.contains("local budget exhausted"));
}

#[tokio::test]
async fn duplicate_ids_keep_the_best_entry() {
	let terminal = |provider: &str| {
		StaticProvider::new(
			provider.to_string(),
			vec![Candidate::new("term", "Terminal", Source::Local(provider.into()))],
		)
	};

	let tie = Aggregator::builder()
		.provider(terminal("first"), 1.0)
		.provider(terminal("second"), 1.0)
		.build();
	let outcome = tie.query("term").await;
	assert_eq!(outcome.items().len(), 1);
	assert_eq!(outcome.items()[0].source, Source::Local("first".into()));

	let weighted = Aggregator::builder()
		.provider(terminal("first"), 1.0)
		.provider(terminal("second"), 2.0)
		.build();
	let outcome = weighted.query("term").await;
	assert_eq!(outcome.items().len(), 1);
	assert_eq!(outcome.items()[0].source, Source::Local("second".into()));
	assert_eq!(outcome.items()[0].score, 2.0);
}

#[tokio::test]
async fn extension_results_are_clamped_and_weighted() {
	let launcher = Arc::new(InProcessLauncher::new().items("files", vec![ResultItem::new("f1", "Firefox profile", 3.0)]));
	let spec = ExtensionSpec {
		priority_weight: 0.5,
		..ExtensionSpec::new("files", "Files", "fake")
	};
	let supervisor = started(&launcher, vec![spec]).await;
	let aggregator = Aggregator::builder()
		.provider(apps(&["Firefox"]), 1.0)
		.extensions(supervisor.clone())
		.search(search(20, 1_000))
		.build();

	let results = ranked(aggregator.query("firefox").await);
	let got: Vec<(&str, f64)> = results.items.iter().map(|i| (i.id.as_str(), i.score)).collect();
	assert_eq!(got, vec![("firefox", 1.0), ("files:f1", 0.5)]);
	assert_eq!(results.items[1].source, Source::Extension("files".into()));
	assert!(results.timed_out.is_empty());
	supervisor.shutdown_all().await;
}

#[tokio::test]
async fn silent_extension_is_bounded_by_the_deadline() {
	let launcher = Arc::new(InProcessLauncher::new().script("mute", [Behavior::Silent]));
	let supervisor = started(&launcher, vec![ExtensionSpec::new("mute", "Mute", "fake")]).await;
	let aggregator = Aggregator::builder()
		.provider(apps(&["Firefox"]), 1.0)
		.extensions(supervisor.clone())
		.search(search(20, 100))
		.build();

	let results = ranked(aggregator.query("fire").await);
	assert!(results.elapsed < Duration::from_secs(1));
	assert!(results.elapsed >= Duration::from_millis(100));
	assert_eq!(results.timed_out, vec![Arc::<str>::from("mute")]);
	assert_eq!(results.items.len(), 1);
	assert_eq!(results.items[0].label, "Firefox");
	supervisor.shutdown_all().await;
}

#[tokio::test]
async fn newer_query_supersedes_older_one() {
	let launcher = Arc::new(
		InProcessLauncher::new()
			.script("slow", [Behavior::Slow(Duration::from_millis(400))])
			.items("slow", vec![ResultItem::new("s", "first result", 1.0)]),
	);
	let supervisor = started(&launcher, vec![ExtensionSpec::new("slow", "Slow", "fake")]).await;
	let aggregator = Arc::new(
		Aggregator::builder()
			.provider(apps(&["Firefox"]), 1.0)
			.extensions(supervisor.clone())
			.search(search(20, 150))
			.build(),
	);

	let first = tokio::spawn({
		let aggregator = Arc::clone(&aggregator);
		async move { aggregator.query("fi").await }
	});
	tokio::time::sleep(Duration::from_millis(30)).await;
	let second = ranked(aggregator.query("fir").await);

	match first.await.unwrap() {
		QueryOutcome::Superseded { generation, by } => assert_eq!((generation.get(), by.get()), (1, 2)),
		other => panic!("expected supersession, got {other:?}"),
	}
	assert_eq!(second.generation.get(), 2);
	assert_eq!(aggregator.latest().latest().map(|r| r.generation.get()), Some(2));
	supervisor.shutdown_all().await;
}

#[test]
fn latest_results_never_go_back() {
	let slot = LatestResults::new();
	let clock = GenerationClock::new();
	let (one, two) = (clock.next(), clock.next());
	let results = |generation| QueryResults {
		generation,
		items: Vec::new(),
		timed_out: Vec::new(),
		elapsed: Duration::ZERO,
	};

	assert!(slot.publish(results(two)));
	assert!(!slot.publish(results(one)));
	assert!(!slot.publish(results(two)));
	assert_eq!(slot.latest().map(|r| r.generation), Some(two));
}

#[tokio::test]
async fn keyword_routes_to_one_extension() {
	let launcher = Arc::new(
		InProcessLauncher::new()
			.items("calc", vec![ResultItem::new("4", "2+2 = 4", 1.0), ResultItem::new("x", "unrelated", 1.0)])
			.items("notes", vec![ResultItem::new("c", "calc notes", 0.9)]),
	);
	let supervisor = started(
		&launcher,
		vec![
			ExtensionSpec::new("calc", "Calculator", "fake").with_keywords(["calc"]),
			ExtensionSpec::new("notes", "Notes", "fake"),
		],
	)
	.await;
	let aggregator = Aggregator::builder()
		.provider(apps(&["Calculator"]), 1.0)
		.extensions(supervisor.clone())
		.search(search(20, 1_000))
		.build();

	assert_eq!(ids(&aggregator.query("calc 2+2").await), vec!["calc:4"]);
	assert_eq!(
		ids(&aggregator.query("calc").await),
		vec!["calculator", "keyword:calc", "notes:c"]
	);
	supervisor.shutdown_all().await;
}

#[tokio::test]
async fn keyword_starts_stopped_extension() {
	let launcher = Arc::new(InProcessLauncher::new().items("calc", vec![ResultItem::new("4", "2+2 = 4", 1.0)]));
	let supervisor = extensions(
		&launcher,
		vec![ExtensionSpec::new("calc", "Calculator", "fake").with_keywords(["calc"])],
	);
	let aggregator = Aggregator::builder()
		.provider(apps(&["Calculator"]), 1.0)
		.extensions(supervisor.clone())
		.search(search(20, 1_000))
		.build();

	assert!(aggregator.query("calc 2+2").await.items().is_empty());
	wait_ready(&supervisor, "calc").await;
	assert_eq!(ids(&aggregator.query("calc 2+2").await), vec!["calc:4"]);
	assert_eq!(launcher.launches("calc"), 1);
	supervisor.shutdown_all().await;
}

#[tokio::test]
async fn keyword_never_respawns_rejected_extension() {
	let incompatible = Manifest {
		protocol_version: PROTOCOL_VERSION + 98,
		..Manifest::new("calc", "Calculator")
	};
	let launcher = Arc::new(InProcessLauncher::new().script("calc", [Behavior::Announce(incompatible)]));
	let supervisor = extensions(
		&launcher,
		vec![ExtensionSpec::new("calc", "Calculator", "fake").with_keywords(["calc"])],
	);
	let aggregator = Aggregator::builder()
		.extensions(supervisor.clone())
		.search(search(20, 100))
		.build();

	assert!(aggregator.query("calc 1").await.items().is_empty());
	let mut rx = supervisor.watch("calc").unwrap();
	tokio::time::timeout(Duration::from_secs(3), rx.wait_for(|s| s.rejected))
		.await
		.expect("rejected in time")
		.expect("worker state alive");

	for text in ["calc 1+", "calc 1+1", "calc 1+12"] {
		assert!(aggregator.query(text).await.items().is_empty());
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	let snap = supervisor.snapshot("calc").unwrap();
	assert_eq!(snap.state, WorkerState::Stopped);
	assert!(snap.last_error.unwrap().contains("protocol version"));
	assert_eq!(launcher.launches("calc"), 1);
	supervisor.shutdown_all().await;
}
