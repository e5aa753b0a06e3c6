//! Per-query fan-out, merge and publication.
//!
//! A query gets a fresh [`Generation`], runs every local provider synchronously under
//! [`SearchConfig::local_budget`], and meanwhile asks every accepting extension worker through
//! its channel. Extension answers are awaited until [`SearchConfig::extension_deadline`]; answers
//! that arrive later, or for a generation that has been superseded, are dropped on arrival.
//! Requests are never cancelled at the worker.
//!
//! Local and extension candidates form one pool that is ranked in a single pass and truncated to
//! [`SearchConfig::max_results`]. The outcome is returned to the caller and published to
//! [`LatestResults`], which never goes back to an older generation.
//!
//! A query whose first word is an extension keyword, followed by a space, is routed to that
//! extension alone. If the extension is stopped, it is started and the keystroke returns nothing.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use beacon_matcher::{Needle, match_list, normalize};
use beacon_rpc::{QueryRequest, RequestBody, ResponseBody, ResultItem};
use beacon_worker::{ReadyWorker, SupervisorHandle, WorkerState, WorkerStatus};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::candidate::{Candidate, CandidateId, Source};
use crate::provider::CandidateProvider;
use crate::query::{Generation, GenerationClock, Query};
use crate::rank::{RankWeights, RankedItem, Ranker, Scored};
use crate::usage::{MemoryUsageStore, UsageStore};

#[cfg(test)]
mod tests;

/// Limits of one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
	/// Most items returned.
	pub max_results: usize,
	/// Time the local provider pass may take; providers not reached in time are skipped.
	pub local_budget: Duration,
	/// Time extension answers are waited for.
	pub extension_deadline: Duration,
}

impl Default for SearchConfig {
	fn default() -> Self {
		Self {
			max_results: 20,
			local_budget: Duration::from_millis(25),
			extension_deadline: Duration::from_millis(200),
		}
	}
}

/// Ranked results of one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResults {
	/// Generation the results belong to.
	pub generation: Generation,
	/// Best first, at most `max_results`.
	pub items: Vec<RankedItem>,
	/// Extensions that did not answer before the deadline.
	pub timed_out: Vec<Arc<str>>,
	/// Time from issue to completion.
	pub elapsed: Duration,
}

/// Result of [`Aggregator::query`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
	/// The query completed and its results are current.
	Ranked(QueryResults),
	/// A newer query was issued before this one completed.
	Superseded {
		/// Generation of this query.
		generation: Generation,
		/// Generation that replaced it.
		by: Generation,
	},
}

impl QueryOutcome {
	/// Ranked items, empty when superseded.
	pub fn items(&self) -> &[RankedItem] {
		match self {
			Self::Ranked(results) => &results.items,
			Self::Superseded { .. } => &[],
		}
	}
}

/// Slot holding the newest published results.
///
/// Publication is guarded by generation: results older than or equal to the ones held are
/// refused, so a slow query can never overwrite a newer one.
#[derive(Debug, Clone)]
pub struct LatestResults {
	slot: Arc<watch::Sender<Option<Arc<QueryResults>>>>,
}

impl Default for LatestResults {
	fn default() -> Self {
		Self::new()
	}
}

impl LatestResults {
	/// Creates an empty slot.
	pub fn new() -> Self {
		let (slot, _) = watch::channel(None);
		Self { slot: Arc::new(slot) }
	}

	/// Stores `results` if they are newer than the held ones; returns whether they were stored.
	pub fn publish(&self, results: QueryResults) -> bool {
		self.slot.send_if_modified(|held| {
			if held.as_ref().is_some_and(|h| h.generation >= results.generation) {
				return false;
			}
			*held = Some(Arc::new(results));
			true
		})
	}

	/// Newest published results.
	pub fn latest(&self) -> Option<Arc<QueryResults>> {
		self.slot.borrow().clone()
	}

	/// Receiver notified on every successful publication.
	pub fn subscribe(&self) -> watch::Receiver<Option<Arc<QueryResults>>> {
		self.slot.subscribe()
	}
}

struct LocalSource {
	provider: Arc<dyn CandidateProvider>,
	weight: f64,
}

/// Builder for [`Aggregator`].
#[derive(Default)]
pub struct AggregatorBuilder {
	providers: Vec<LocalSource>,
	extensions: Option<SupervisorHandle>,
	usage: Option<Arc<dyn UsageStore>>,
	weights: RankWeights,
	matcher: beacon_matcher::Config,
	search: SearchConfig,
}

impl AggregatorBuilder {
	/// Adds a local provider whose candidates are weighted by `weight`.
	///
	/// Registration order decides which duplicate survives a score tie.
	#[must_use]
	pub fn provider(mut self, provider: impl CandidateProvider + 'static, weight: f64) -> Self {
		self.providers.push(LocalSource {
			provider: Arc::new(provider),
			weight,
		});
		self
	}

	/// Adds an already shared provider.
	#[must_use]
	pub fn shared_provider(mut self, provider: Arc<dyn CandidateProvider>, weight: f64) -> Self {
		self.providers.push(LocalSource { provider, weight });
		self
	}

	/// Routes queries to the extensions of `supervisor`.
	#[must_use]
	pub fn extensions(mut self, supervisor: SupervisorHandle) -> Self {
		self.extensions = Some(supervisor);
		self
	}

	/// Uses `usage` for selection history instead of a private in-memory store.
	#[must_use]
	pub fn usage(mut self, usage: Arc<dyn UsageStore>) -> Self {
		self.usage = Some(usage);
		self
	}

	/// Sets the usage boost tuning.
	#[must_use]
	pub fn ranker(mut self, weights: RankWeights) -> Self {
		self.weights = weights;
		self
	}

	/// Sets the matcher tuning.
	#[must_use]
	pub fn matcher(mut self, config: beacon_matcher::Config) -> Self {
		self.matcher = config;
		self
	}

	/// Sets the query limits.
	#[must_use]
	pub fn search(mut self, search: SearchConfig) -> Self {
		self.search = search;
		self
	}

	/// Builds the aggregator.
	pub fn build(self) -> Aggregator {
		let (current, _) = watch::channel(Generation::default());
		Aggregator {
			providers: self.providers,
			extensions: self.extensions,
			usage: self.usage.unwrap_or_else(|| Arc::new(MemoryUsageStore::new())),
			ranker: Ranker::new(self.weights),
			matcher: self.matcher,
			search: self.search,
			clock: GenerationClock::new(),
			current,
			latest: LatestResults::new(),
		}
	}
}

type ExtensionReply = (Arc<str>, f64, beacon_rpc::Result<Vec<ResultItem>>);

/// Where a query goes.
enum Route {
	/// Every local provider and every accepting extension.
	Everywhere,
	/// One extension, with the text after its keyword.
	Keyword { worker: ReadyWorker, text: String },
	/// A keyword extension that cannot answer this keystroke.
	Nowhere,
}

/// Merges local and extension results into one ranking per query.
pub struct Aggregator {
	providers: Vec<LocalSource>,
	extensions: Option<SupervisorHandle>,
	usage: Arc<dyn UsageStore>,
	ranker: Ranker,
	matcher: beacon_matcher::Config,
	search: SearchConfig,
	clock: GenerationClock,
	current: watch::Sender<Generation>,
	latest: LatestResults,
}

impl std::fmt::Debug for Aggregator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Aggregator")
			.field("providers", &self.providers.iter().map(|s| s.provider.name()).collect::<Vec<_>>())
			.field("search", &self.search)
			.field("generation", &self.clock.current())
			.finish_non_exhaustive()
	}
}

impl Aggregator {
	/// Starts building an aggregator.
	pub fn builder() -> AggregatorBuilder {
		AggregatorBuilder::default()
	}

	/// Slot the results of every completed query are published to.
	pub fn latest(&self) -> &LatestResults {
		&self.latest
	}

	/// Most recently issued generation.
	pub fn generation(&self) -> Generation {
		self.clock.current()
	}

	/// Query limits in use.
	pub fn search_config(&self) -> &SearchConfig {
		&self.search
	}

	/// Selection history.
	pub fn usage(&self) -> &Arc<dyn UsageStore> {
		&self.usage
	}

	/// Records that the user picked `id` at `at`.
	pub fn record_selection(&self, id: &CandidateId, at: SystemTime) {
		self.usage.record_selection(id, at);
		debug!(candidate = %id, "aggregator.selection");
	}

	/// Runs one query to completion or supersession.
	///
	/// Completes within the local budget plus the extension deadline, whatever the workers do.
	pub async fn query(&self, text: &str) -> QueryOutcome {
		let started = Instant::now();
		let generation = self.clock.next();
		self.current.send_if_modified(|current| {
			if *current < generation {
				*current = generation;
				true
			} else {
				false
			}
		});
		let mut newer = self.current.subscribe();
		let query = Query::new(text, generation);

		if query.is_empty() {
			let items = self.default_items(&query, started);
			return self.finish(generation, items, Vec::new(), started);
		}

		let (everywhere, workers, text) = match self.route(&query) {
			Route::Nowhere => return self.finish(generation, Vec::new(), Vec::new(), started),
			Route::Keyword { worker, text } => (false, vec![worker], text),
			Route::Everywhere => {
				let workers = self.extensions.as_ref().map(SupervisorHandle::ready_workers).unwrap_or_default();
				(true, workers, query.raw().trim().to_string())
			}
		};
		let (replies_tx, mut replies) = mpsc::unbounded_channel();
		let mut pending = dispatch(generation, workers, &text, &replies_tx);
		drop(replies_tx);

		let mut pool = if everywhere { self.local_pass(&query, started) } else { Vec::new() };
		if let Some(by) = self.superseded_by(generation) {
			return QueryOutcome::Superseded { generation, by };
		}

		let deadline = tokio::time::sleep(self.search.extension_deadline);
		tokio::pin!(deadline);
		while !pending.is_empty() {
			tokio::select! {
				changed = newer.changed() => {
					if changed.is_err() {
						break;
					}
					if let Some(by) = self.superseded_by(generation) {
						debug!(%generation, %by, "aggregator.superseded");
						return QueryOutcome::Superseded { generation, by };
					}
				}
				reply = replies.recv() => {
					let Some((id, weight, result)) = reply else { break };
					pending.retain(|p| *p != id);
					match result {
						Ok(items) => pool.extend(extension_items(&id, weight, items)),
						Err(err) => warn!(extension = %id, %generation, error = %err, "extension query failed"),
					}
				}
				() = &mut deadline => {
					debug!(%generation, waiting = pending.len(), "aggregator.extension.deadline");
					break;
				}
			}
		}

		if let Some(by) = self.superseded_by(generation) {
			return QueryOutcome::Superseded { generation, by };
		}
		let pool = collapse_duplicates(pool);
		let mut items = self.ranker.rank(pool, self.usage.as_ref(), query.issued_at());
		items.truncate(self.search.max_results);
		self.finish(generation, items, pending, started)
	}

	fn finish(&self, generation: Generation, items: Vec<RankedItem>, timed_out: Vec<Arc<str>>, started: Instant) -> QueryOutcome {
		let results = QueryResults {
			generation,
			items,
			timed_out,
			elapsed: started.elapsed(),
		};
		debug!(
			%generation,
			results = results.items.len(),
			timed_out = results.timed_out.len(),
			elapsed_ms = results.elapsed.as_millis() as u64,
			"aggregator.query"
		);
		self.latest.publish(results.clone());
		QueryOutcome::Ranked(results)
	}

	fn superseded_by(&self, generation: Generation) -> Option<Generation> {
		let current = *self.current.borrow();
		(current > generation).then_some(current)
	}

	/// Decides between normal fan-out and keyword mode.
	fn route(&self, query: &Query) -> Route {
		let Some(supervisor) = &self.extensions else {
			return Route::Everywhere;
		};
		let Some((word, rest)) = query.leading_word() else {
			return Route::Everywhere;
		};
		let Some(status) = supervisor.list().into_iter().find(|s| trigger_keywords(s).any(|k| k == word)) else {
			return Route::Everywhere;
		};

		let id = status.spec.id.as_str();
		let snapshot = &status.snapshot;
		if snapshot.state.is_accepting()
			&& let Some(worker) = supervisor.ready_workers().into_iter().find(|w| &*w.id == id)
		{
			return Route::Keyword {
				worker,
				text: rest.to_string(),
			};
		}
		if snapshot.state == WorkerState::Stopped && !snapshot.needs_reload() {
			match supervisor.start(id) {
				Ok(()) => info!(extension = %id, "starting extension on keyword"),
				Err(err) => warn!(extension = %id, error = %err, "keyword extension could not start"),
			}
		} else {
			debug!(extension = %id, state = %snapshot.state, "keyword extension not accepting");
		}
		Route::Nowhere
	}

	/// Candidates of every provider, skipping failed or panicking ones and those past the budget.
	fn collect_local(&self, started: Instant) -> Vec<(Candidate, f64)> {
		let mut collected = Vec::new();
		for source in &self.providers {
			let name = source.provider.name();
			if started.elapsed() >= self.search.local_budget {
				warn!(provider = name, budget_ms = self.search.local_budget.as_millis() as u64, "local budget exhausted, skipping provider");
				continue;
			}
			let call = Instant::now();
			match panic::catch_unwind(AssertUnwindSafe(|| source.provider.list_candidates())) {
				Ok(Ok(candidates)) => collected.extend(candidates.into_iter().map(|c| (c, source.weight))),
				Ok(Err(err)) => warn!(provider = name, error = %err, "provider failed"),
				Err(_) => error!(provider = name, "provider panicked"),
			}
			let took = call.elapsed();
			if took > self.search.local_budget {
				warn!(
					provider = name,
					elapsed_ms = took.as_millis() as u64,
					budget_ms = self.search.local_budget.as_millis() as u64,
					"aggregator.provider.over_budget"
				);
			}
		}
		collected.extend(self.keyword_items().into_iter().map(|c| (c, 1.0)));
		collected
	}

	fn local_pass(&self, query: &Query, started: Instant) -> Vec<Scored> {
		let Some(needle) = Needle::new(query.normalized(), &self.matcher) else {
			return Vec::new();
		};
		let candidates = self.collect_local(started);
		match_list(&needle, &candidates, |(c, _)| c.keywords.as_slice())
			.into_iter()
			.map(|(index, hit)| {
				let (candidate, weight) = &candidates[index];
				Scored {
					candidate: candidate.clone(),
					sub_score: hit.score,
					source_weight: *weight,
					spans: if hit.keyword == 0 { hit.spans } else { Vec::new() },
				}
			})
			.collect()
	}

	/// Previously selected local candidates, ranked by usage alone.
	fn default_items(&self, query: &Query, started: Instant) -> Vec<RankedItem> {
		let used = self
			.collect_local(started)
			.into_iter()
			.filter(|(c, _)| self.usage.get(&c.id).is_some())
			.map(|(candidate, weight)| Scored {
				candidate,
				sub_score: 1.0,
				source_weight: weight,
				spans: Vec::new(),
			})
			.collect();
		let mut items = self.ranker.rank(collapse_duplicates(used), self.usage.as_ref(), query.issued_at());
		items.truncate(self.search.max_results);
		items
	}

	/// One entry per extension keyword, so typing a keyword shows the extension.
	fn keyword_items(&self) -> Vec<Candidate> {
		let Some(supervisor) = &self.extensions else {
			return Vec::new();
		};
		let mut items = Vec::new();
		for status in supervisor.list() {
			let name = status
				.snapshot
				.manifest
				.as_ref()
				.map_or_else(|| status.spec.name.clone(), |m| m.name.clone());
			let source = Source::Extension(Arc::from(status.spec.id.as_str()));
			for keyword in trigger_keywords(&status) {
				let id = CandidateId::new(format!("keyword:{keyword}"));
				if items.iter().any(|c: &Candidate| c.id == id) {
					continue;
				}
				items.push(
					Candidate::new(id, name.clone(), source.clone())
						.with_keywords([keyword.as_str()])
						.with_description(format!("{keyword} …")),
				);
			}
		}
		items
	}
}

/// Normalized trigger keywords of an extension: configured ones, then announced ones.
fn trigger_keywords(status: &WorkerStatus) -> impl Iterator<Item = String> + '_ {
	let announced = status.snapshot.manifest.iter().flat_map(|m| m.keywords.iter());
	let mut seen = Vec::new();
	status
		.spec
		.keywords
		.iter()
		.chain(announced)
		.map(|k| normalize(k))
		.filter(move |k| {
			if k.is_empty() || k.contains(' ') || seen.contains(k) {
				return false;
			}
			seen.push(k.clone());
			true
		})
}

/// Sends the query to every worker on its own task; replies land in `replies`.
///
/// Tasks outlive the query. Once the receiver is gone their results are discarded.
fn dispatch(
	generation: Generation,
	workers: Vec<ReadyWorker>,
	text: &str,
	replies: &mpsc::UnboundedSender<ExtensionReply>,
) -> Vec<Arc<str>> {
	workers
		.into_iter()
		.map(|worker| {
			let replies = replies.clone();
			let body = RequestBody::Query(QueryRequest {
				query_text: text.to_string(),
				generation_id: generation.get(),
			});
			let id = Arc::clone(&worker.id);
			tokio::spawn(async move {
				let result = worker.channel.request(body).await.map(|response| match response {
					ResponseBody::Results { items } => items,
				});
				if replies.send((Arc::clone(&worker.id), worker.manifest.priority_weight, result)).is_err() {
					debug!(extension = %worker.id, %generation, "aggregator.extension.late");
				}
			});
			id
		})
		.collect()
}

fn extension_items(id: &Arc<str>, weight: f64, items: Vec<ResultItem>) -> impl Iterator<Item = Scored> + '_ {
	items.into_iter().map(move |item| {
		let mut candidate = Candidate::new(
			CandidateId::for_extension_item(id, &item.id),
			item.label,
			Source::Extension(Arc::clone(id)),
		);
		candidate.description = item.description;
		Scored {
			candidate,
			sub_score: item.score,
			source_weight: weight,
			spans: Vec::new(),
		}
	})
}

/// Keeps one entry per candidate id: the best base score, the earliest on ties.
fn collapse_duplicates(pool: Vec<Scored>) -> Vec<Scored> {
	let mut index: HashMap<CandidateId, usize> = HashMap::with_capacity(pool.len());
	let mut kept: Vec<Scored> = Vec::with_capacity(pool.len());
	for scored in pool {
		match index.get(&scored.candidate.id) {
			Some(&at) => {
				if scored.base_score() > kept[at].base_score() {
					kept[at] = scored;
				}
			}
			None => {
				index.insert(scored.candidate.id.clone(), kept.len());
				kept.push(scored);
			}
		}
	}
	kept
}
