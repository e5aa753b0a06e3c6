use thiserror::Error;

use crate::config::ConfigError;
use crate::provider::ProviderError;

/// Errors from setting up or driving a launcher session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
	/// Configuration could not be loaded.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Extension supervision failed.
	#[error(transparent)]
	Worker(#[from] beacon_worker::Error),
	/// A provider could not be built.
	#[error(transparent)]
	Provider(#[from] ProviderError),
}

/// Result alias for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
