//! Wiring of providers, extensions and the aggregator from a [`LauncherConfig`].

use std::sync::Arc;
use std::time::SystemTime;

use beacon_worker::{SupervisorHandle, WorkerLauncher, WorkerStatus, discover};
use tracing::{info, warn};

use crate::aggregator::{Aggregator, QueryOutcome};
use crate::candidate::CandidateId;
use crate::config::LauncherConfig;
use crate::provider::{DesktopEntryProvider, StaticProvider};
use crate::Result;

/// Name of the provider built from `[[providers.entries]]`.
pub const STATIC_PROVIDER: &str = "builtin";

/// A running launcher core: one aggregator over local providers and supervised extensions.
#[derive(Debug, Clone)]
pub struct Session {
	aggregator: Arc<Aggregator>,
	supervisor: SupervisorHandle,
}

impl Session {
	/// Builds providers, registers discovered extensions and starts them.
	///
	/// Must be called inside a tokio runtime.
	///
	/// # Errors
	///
	/// Returns an error if an applications directory exists but cannot be read.
	pub fn from_config(config: &LauncherConfig, launcher: Arc<dyn WorkerLauncher>) -> Result<Self> {
		let supervisor = SupervisorHandle::new(launcher, config.supervisor_config());
		if let Some(dir) = &config.extensions.dir {
			for spec in discover(dir) {
				let id = spec.id.clone();
				if let Err(err) = supervisor.register(spec) {
					warn!(extension = %id, error = %err, "extension not registered");
				}
			}
		}

		let mut builder = Aggregator::builder()
			.extensions(supervisor.clone())
			.ranker(config.rank_weights())
			.matcher(config.matcher.clone())
			.search(config.search_config());
		if config.providers.desktop {
			let desktop = DesktopEntryProvider::new(config.providers.desktop_dirs.clone());
			let count = desktop.refresh()?;
			info!(applications = count, "desktop entries loaded");
			builder = builder.provider(desktop, config.providers.desktop_weight);
		}
		if !config.providers.entries.is_empty() {
			builder = builder.provider(
				StaticProvider::from_entries(STATIC_PROVIDER, &config.providers.entries),
				config.providers.static_weight,
			);
		}

		supervisor.start_all();
		info!(extensions = supervisor.list().len(), "session started");
		Ok(Self {
			aggregator: Arc::new(builder.build()),
			supervisor,
		})
	}

	/// Wraps already built parts.
	pub fn from_parts(aggregator: Arc<Aggregator>, supervisor: SupervisorHandle) -> Self {
		Self { aggregator, supervisor }
	}

	/// The aggregator.
	pub fn aggregator(&self) -> &Arc<Aggregator> {
		&self.aggregator
	}

	/// The extension supervisor.
	pub fn supervisor(&self) -> &SupervisorHandle {
		&self.supervisor
	}

	/// Runs one query.
	pub async fn query(&self, text: &str) -> QueryOutcome {
		self.aggregator.query(text).await
	}

	/// Records that the user picked `id`.
	pub fn select(&self, id: &CandidateId) {
		self.aggregator.record_selection(id, SystemTime::now());
	}

	/// Every registered extension with its current state.
	pub fn extensions(&self) -> Vec<WorkerStatus> {
		self.supervisor.list()
	}

	/// Stops every extension.
	pub async fn shutdown(&self) {
		self.supervisor.shutdown_all().await;
		info!("session stopped");
	}
}
