//! Local candidate providers.

use std::path::PathBuf;
use std::sync::Arc;

use crate::Candidate;
use crate::candidate::Source;

mod desktop;

pub use desktop::DesktopEntryProvider;

/// Failure of one provider to list its candidates.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProviderError {
	/// A source file or directory could not be read.
	#[error("failed to read {}: {source}", path.display())]
	Io {
		/// Path that failed.
		path: PathBuf,
		/// Underlying I/O error.
		#[source]
		source: std::io::Error,
	},
	/// Any other provider-specific failure.
	#[error("{0}")]
	Failed(String),
}

/// Source of local candidates, queried synchronously on every keystroke.
pub trait CandidateProvider: Send + Sync {
	/// Name used as the candidates' [`Source::Local`] tag and in logs.
	fn name(&self) -> &str;

	/// Current candidates.
	///
	/// Expensive providers should cache; this is called once per query.
	fn list_candidates(&self) -> Result<Vec<Candidate>, ProviderError>;
}

/// Provider over a fixed candidate list.
#[derive(Debug, Clone)]
pub struct StaticProvider {
	name: Arc<str>,
	candidates: Vec<Candidate>,
}

impl StaticProvider {
	/// Creates a provider returning `candidates` as given.
	pub fn new(name: impl Into<Arc<str>>, candidates: Vec<Candidate>) -> Self {
		Self {
			name: name.into(),
			candidates,
		}
	}

	/// Builds candidates from configured entries, tagged with this provider's name.
	pub fn from_entries(name: impl Into<Arc<str>>, entries: &[crate::config::StaticEntry]) -> Self {
		let name: Arc<str> = name.into();
		let candidates = entries
			.iter()
			.map(|entry| {
				let mut candidate = Candidate::new(entry.id.as_str(), entry.label.as_str(), Source::Local(Arc::clone(&name)))
					.with_keywords(&entry.keywords)
					.with_priority(entry.priority);
				candidate.description = entry.description.clone();
				candidate
			})
			.collect();
		Self { name, candidates }
	}
}

impl CandidateProvider for StaticProvider {
	fn name(&self) -> &str {
		&self.name
	}

	fn list_candidates(&self) -> Result<Vec<Candidate>, ProviderError> {
		Ok(self.candidates.clone())
	}
}
