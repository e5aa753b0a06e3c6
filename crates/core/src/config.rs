//! Launcher configuration.
//!
//! Every field has a default, so an empty or missing file is a valid configuration. The file
//! lives at `$BEACON_CONFIG_DIR/config.toml` when that variable is set, otherwise at
//! `<config dir>/beacon/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use beacon_rpc::{ChannelConfig, DEFAULT_MAX_FRAME_BYTES, InflightPolicy};
use beacon_worker::{HealthConfig, RestartPolicy, SupervisorConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::aggregator::SearchConfig;
use crate::rank::RankWeights;

/// Config file name inside the config directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "BEACON_CONFIG_DIR";

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {}: {error}", path.display())]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// The file is not valid TOML for [`LauncherConfig`].
	#[error("failed to parse {}: {source}", path.display())]
	Parse {
		/// Path to the file.
		path: PathBuf,
		/// The underlying TOML error.
		#[source]
		source: toml::de::Error,
	},

	/// A value is out of range.
	#[error("invalid configuration: {0}")]
	Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LauncherConfig {
	/// Query fan-out and result limits.
	pub search: SearchSection,
	/// Usage boost tuning.
	pub ranking: RankWeights,
	/// Matcher tuning.
	pub matcher: beacon_matcher::Config,
	/// Extension discovery and supervision.
	pub extensions: ExtensionsSection,
	/// Local providers.
	pub providers: ProvidersSection,
}

/// `[search]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSection {
	/// Most results returned per query.
	pub max_results: usize,
	/// Time budget of the local provider pass.
	pub local_budget_ms: u64,
	/// How long a query waits for extension results.
	pub extension_deadline_ms: u64,
}

impl Default for SearchSection {
	fn default() -> Self {
		Self {
			max_results: 20,
			local_budget_ms: 25,
			extension_deadline_ms: 200,
		}
	}
}

/// `[extensions]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionsSection {
	/// Directory scanned for extension manifests; `None` disables discovery.
	pub dir: Option<PathBuf>,
	/// Requests awaiting a response per worker.
	pub max_in_flight: usize,
	/// What a request does when `max_in_flight` is reached.
	pub inflight_policy: InflightPolicy,
	/// Upper bound on one request, queueing included.
	pub request_timeout_ms: u64,
	/// Period between heartbeats.
	pub heartbeat_interval_ms: u64,
	/// Unanswered heartbeats before a worker is considered failed.
	pub missed_heartbeats: u32,
	/// Time a new worker has to announce its manifest.
	pub handshake_timeout_ms: u64,
	/// Request age at which a worker is reported busy.
	pub soft_request_timeout_ms: u64,
	/// Time a worker gets to exit before it is killed.
	pub shutdown_grace_ms: u64,
	/// Restarts allowed after a failure; `0` disables restarting.
	pub max_restarts: u32,
	/// Delay before the first restart, doubled for each further one.
	pub backoff_ms: u64,
	/// Cap on the restart delay.
	pub max_backoff_ms: u64,
	/// Largest frame accepted in either direction.
	pub max_frame_bytes: usize,
}

impl Default for ExtensionsSection {
	fn default() -> Self {
		let channel = ChannelConfig::default();
		let health = HealthConfig::default();
		Self {
			dir: dirs::data_dir().map(|d| d.join("beacon").join("extensions")),
			max_in_flight: channel.max_in_flight,
			inflight_policy: channel.policy,
			request_timeout_ms: millis(channel.request_timeout),
			heartbeat_interval_ms: millis(health.heartbeat_interval),
			missed_heartbeats: health.missed_heartbeats,
			handshake_timeout_ms: millis(health.handshake_timeout),
			soft_request_timeout_ms: millis(health.soft_request_timeout),
			shutdown_grace_ms: millis(health.shutdown_grace),
			max_restarts: 3,
			backoff_ms: 200,
			max_backoff_ms: 5_000,
			max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
		}
	}
}

/// `[providers]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersSection {
	/// Whether installed applications are searched.
	pub desktop: bool,
	/// Directories holding `.desktop` files, highest precedence first.
	pub desktop_dirs: Vec<PathBuf>,
	/// Source weight of installed applications.
	pub desktop_weight: f64,
	/// Source weight of configured entries.
	pub static_weight: f64,
	/// Extra fixed candidates.
	pub entries: Vec<StaticEntry>,
}

impl Default for ProvidersSection {
	fn default() -> Self {
		Self {
			desktop: true,
			desktop_dirs: default_desktop_dirs(),
			desktop_weight: 1.0,
			static_weight: 1.0,
			entries: Vec::new(),
		}
	}
}

/// One `[[providers.entries]]` item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticEntry {
	/// Candidate id.
	pub id: String,
	/// Display label.
	pub label: String,
	/// Extra search keywords.
	#[serde(default)]
	pub keywords: Vec<String>,
	/// Secondary line.
	#[serde(default)]
	pub description: Option<String>,
	/// Tie-break priority.
	#[serde(default)]
	pub priority: f64,
}

fn millis(duration: Duration) -> u64 {
	u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// `applications` below the user data dir, then below each `XDG_DATA_DIRS` entry.
fn default_desktop_dirs() -> Vec<PathBuf> {
	let system = std::env::var("XDG_DATA_DIRS")
		.ok()
		.filter(|v| !v.is_empty())
		.unwrap_or_else(|| "/usr/local/share:/usr/share".to_string());
	dirs::data_dir()
		.into_iter()
		.chain(std::env::split_paths(&system))
		.map(|dir| dir.join("applications"))
		.collect()
}

/// Directory holding `config.toml`.
pub fn config_dir() -> Option<PathBuf> {
	if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
		return Some(PathBuf::from(dir));
	}
	dirs::config_dir().map(|d| d.join("beacon"))
}

impl LauncherConfig {
	/// Loads `path`, or the default config file when `path` is `None`.
	///
	/// An explicit path must exist; a missing default file yields the defaults.
	///
	/// # Errors
	///
	/// Returns [`ConfigError`] if the file cannot be read, parsed or validated.
	pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
		let (path, required) = match path {
			Some(path) => (path.to_path_buf(), true),
			None => match config_dir() {
				Some(dir) => (dir.join(CONFIG_FILE), false),
				None => return Ok(Self::default()),
			},
		};
		let text = match std::fs::read_to_string(&path) {
			Ok(text) => text,
			Err(error) if !required && error.kind() == std::io::ErrorKind::NotFound => {
				debug!(path = %path.display(), "no config file, using defaults");
				return Ok(Self::default());
			}
			Err(error) => return Err(ConfigError::Io { path, error }),
		};
		let config = Self::parse(&text).map_err(|err| match err {
			ConfigError::Parse { source, .. } => ConfigError::Parse { path: path.clone(), source },
			other => other,
		})?;
		debug!(path = %path.display(), "config loaded");
		Ok(config)
	}

	/// Parses and validates TOML text.
	///
	/// # Errors
	///
	/// Returns [`ConfigError::Parse`] or [`ConfigError::Invalid`].
	pub fn parse(text: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
			path: PathBuf::new(),
			source,
		})?;
		config.validate()?;
		Ok(config)
	}

	/// Checks value ranges serde cannot express.
	///
	/// # Errors
	///
	/// Returns [`ConfigError::Invalid`] naming the first offending field.
	pub fn validate(&self) -> Result<(), ConfigError> {
		let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
		if self.search.max_results == 0 {
			return invalid("search.max_results must be at least 1");
		}
		if self.extensions.max_in_flight == 0 {
			return invalid("extensions.max_in_flight must be at least 1");
		}
		if self.extensions.missed_heartbeats == 0 {
			return invalid("extensions.missed_heartbeats must be at least 1");
		}
		if self.extensions.heartbeat_interval_ms == 0 {
			return invalid("extensions.heartbeat_interval_ms must be positive");
		}
		if self.extensions.max_frame_bytes < 64 {
			return invalid("extensions.max_frame_bytes must be at least 64");
		}
		if self.matcher.fuzzy_ceiling >= self.matcher.prefix_score {
			return invalid("matcher.fuzzy_ceiling must be below matcher.prefix_score");
		}
		let weights = [
			("ranking.max_boost", self.ranking.max_boost),
			("providers.desktop_weight", self.providers.desktop_weight),
			("providers.static_weight", self.providers.static_weight),
		];
		if let Some((name, _)) = weights.iter().find(|(_, w)| !w.is_finite() || *w < 0.0) {
			return Err(ConfigError::Invalid(format!("{name} must be a non-negative number")));
		}
		Ok(())
	}

	/// Aggregator limits.
	pub fn search_config(&self) -> SearchConfig {
		SearchConfig {
			max_results: self.search.max_results,
			local_budget: Duration::from_millis(self.search.local_budget_ms),
			extension_deadline: Duration::from_millis(self.search.extension_deadline_ms),
		}
	}

	/// Ranker weights.
	pub fn rank_weights(&self) -> RankWeights {
		self.ranking.clone()
	}

	/// Supervisor settings shared by every extension.
	pub fn supervisor_config(&self) -> SupervisorConfig {
		let ext = &self.extensions;
		SupervisorConfig {
			health: HealthConfig {
				handshake_timeout: Duration::from_millis(ext.handshake_timeout_ms),
				heartbeat_interval: Duration::from_millis(ext.heartbeat_interval_ms),
				missed_heartbeats: ext.missed_heartbeats,
				soft_request_timeout: Duration::from_millis(ext.soft_request_timeout_ms),
				shutdown_grace: Duration::from_millis(ext.shutdown_grace_ms),
			},
			restart: if ext.max_restarts == 0 {
				RestartPolicy::Never
			} else {
				RestartPolicy::OnFailure {
					max_restarts: ext.max_restarts,
					backoff: Duration::from_millis(ext.backoff_ms),
					max_backoff: Duration::from_millis(ext.max_backoff_ms),
				}
			},
			channel: ChannelConfig {
				max_in_flight: ext.max_in_flight,
				policy: ext.inflight_policy,
				request_timeout: Duration::from_millis(ext.request_timeout_ms),
				max_frame_bytes: ext.max_frame_bytes,
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_file_is_default() {
		assert_eq!(LauncherConfig::parse("").unwrap(), LauncherConfig::default());
	}

	#[test]
	fn sections_override_defaults() {
		let config = LauncherConfig::parse(
			r#"
			[search]
			max_results = 5
			extension_deadline_ms = 80

			[ranking]
			half_life_secs = 60

			[extensions]
			dir = "/opt/beacon"
			inflight_policy = "reject"
			max_restarts = 0

			[[providers.entries]]
			id = "lock"
			label = "Lock Screen"
			keywords = ["suspend"]
			"#,
		)
		.unwrap();

		let search = config.search_config();
		assert_eq!(search.max_results, 5);
		assert_eq!(search.extension_deadline, Duration::from_millis(80));
		assert_eq!(search.local_budget, Duration::from_millis(25));
		assert_eq!(config.rank_weights().half_life, Duration::from_secs(60));
		assert_eq!(config.extensions.dir.as_deref(), Some(Path::new("/opt/beacon")));
		assert_eq!(config.providers.entries[0].keywords, vec!["suspend"]);

		let supervisor = config.supervisor_config();
		assert_eq!(supervisor.restart, RestartPolicy::Never);
		assert_eq!(supervisor.channel.policy, InflightPolicy::Reject);
	}

	#[test]
	fn out_of_range_values_are_rejected() {
		let err = LauncherConfig::parse("[search]\nmax_results = 0\n").unwrap_err();
		assert!(matches!(err, ConfigError::Invalid(ref m) if m.contains("max_results")));
		let err = LauncherConfig::parse("[providers]\ndesktop_weight = -1.0\n").unwrap_err();
		assert!(matches!(err, ConfigError::Invalid(ref m) if m.contains("desktop_weight")));
		assert!(matches!(LauncherConfig::parse("[serach]\n"), Err(ConfigError::Parse { .. })));
	}

	#[test]
	fn explicit_path_must_exist() {
		let dir = tempfile::tempdir().unwrap();
		let missing = dir.path().join("nope.toml");
		assert!(matches!(LauncherConfig::load(Some(&missing)), Err(ConfigError::Io { .. })));

		let path = dir.path().join(CONFIG_FILE);
		std::fs::write(&path, "[search]\nmax_results = 3\n").unwrap();
		assert_eq!(LauncherConfig::load(Some(&path)).unwrap().search.max_results, 3);

		std::fs::write(&path, "[search]\nmax_results = \"many\"\n").unwrap();
		match LauncherConfig::load(Some(&path)) {
			Err(ConfigError::Parse { path: reported, .. }) => assert_eq!(reported, path),
			other => panic!("expected parse error, got {other:?}"),
		}
	}
}
