//! On-disk extension manifests and directory discovery.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use beacon_rpc::PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Error, Result};

/// File name looked up in every extension directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// How to run one extension, as declared by its `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionSpec {
	/// Unique extension id; the worker must announce the same id.
	pub id: String,
	/// Display name.
	pub name: String,
	/// Executable to spawn.
	pub command: String,
	/// Arguments passed to `command`.
	#[serde(default)]
	pub args: Vec<String>,
	/// Extra environment variables.
	#[serde(default)]
	pub env: BTreeMap<String, String>,
	/// Working directory; defaults to the manifest's directory.
	#[serde(default)]
	pub cwd: Option<PathBuf>,
	/// Protocol version the extension speaks.
	#[serde(default = "current_protocol")]
	pub protocol_version: u32,
	/// Weight applied to this extension's scores.
	#[serde(default = "unit_weight")]
	pub priority_weight: f64,
	/// Trigger keywords for keyword mode.
	#[serde(default)]
	pub keywords: Vec<String>,
}

fn current_protocol() -> u32 {
	PROTOCOL_VERSION
}

fn unit_weight() -> f64 {
	1.0
}

impl ExtensionSpec {
	/// Creates a spec with default weight and no arguments or keywords.
	pub fn new(id: impl Into<String>, name: impl Into<String>, command: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			name: name.into(),
			command: command.into(),
			args: Vec::new(),
			env: BTreeMap::new(),
			cwd: None,
			protocol_version: PROTOCOL_VERSION,
			priority_weight: 1.0,
			keywords: Vec::new(),
		}
	}

	/// Sets the trigger keywords.
	#[must_use]
	pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.keywords = keywords.into_iter().map(Into::into).collect();
		self
	}

	/// Reads and validates a manifest file.
	///
	/// # Errors
	///
	/// Returns [`Error::Read`], [`Error::Parse`] or [`Error::InvalidSpec`].
	pub fn load(path: &Path) -> Result<Self> {
		let text = std::fs::read_to_string(path).map_err(|source| Error::Read {
			path: path.to_path_buf(),
			source,
		})?;
		let mut spec: Self = serde_json::from_str(&text).map_err(|source| Error::Parse {
			path: path.to_path_buf(),
			source,
		})?;
		if spec.cwd.is_none() {
			spec.cwd = path.parent().map(Path::to_path_buf);
		}
		spec.validate()?;
		Ok(spec)
	}

	/// Checks the fields the supervisor relies on.
	///
	/// # Errors
	///
	/// Returns [`Error::InvalidSpec`] describing the first problem found.
	pub fn validate(&self) -> Result<()> {
		let invalid = |reason: String| Error::InvalidSpec {
			id: self.id.clone(),
			reason,
		};
		if self.id.trim().is_empty() {
			return Err(invalid("empty id".into()));
		}
		if self.command.trim().is_empty() {
			return Err(invalid("empty command".into()));
		}
		if self.protocol_version != PROTOCOL_VERSION {
			return Err(invalid(format!(
				"protocol version {} is not supported (expected {PROTOCOL_VERSION})",
				self.protocol_version
			)));
		}
		if !self.priority_weight.is_finite() || self.priority_weight < 0.0 {
			return Err(invalid(format!("invalid priority weight {}", self.priority_weight)));
		}
		Ok(())
	}
}

/// Finds every valid extension below `dir`.
///
/// Each direct subdirectory holding a [`MANIFEST_FILE`] is one extension. Invalid manifests
/// and repeated ids are logged and skipped. The result is sorted by id.
pub fn discover(dir: &Path) -> Vec<ExtensionSpec> {
	let entries = match std::fs::read_dir(dir) {
		Ok(entries) => entries,
		Err(err) => {
			debug!(dir = %dir.display(), error = %err, "extension directory not readable");
			return Vec::new();
		}
	};

	let mut manifests: Vec<PathBuf> = entries
		.filter_map(|entry| entry.ok())
		.map(|entry| entry.path().join(MANIFEST_FILE))
		.filter(|path| path.is_file())
		.collect();
	manifests.sort();

	let mut specs: Vec<ExtensionSpec> = Vec::with_capacity(manifests.len());
	for path in manifests {
		match ExtensionSpec::load(&path) {
			Ok(spec) if specs.iter().any(|s| s.id == spec.id) => {
				warn!(path = %path.display(), extension = %spec.id, "duplicate extension id; skipped");
			}
			Ok(spec) => {
				debug!(path = %path.display(), extension = %spec.id, "extension discovered");
				specs.push(spec);
			}
			Err(err) => warn!(path = %path.display(), error = %err, "extension skipped"),
		}
	}
	specs.sort_by(|a, b| a.id.cmp(&b.id));
	specs
}

#[cfg(test)]
mod tests {
	use std::fs;

	use super::*;

	fn write_manifest(root: &Path, dir: &str, body: &str) {
		let dir = root.join(dir);
		fs::create_dir_all(&dir).unwrap();
		fs::write(dir.join(MANIFEST_FILE), body).unwrap();
	}

	#[test]
	fn discovers_valid_manifests_and_skips_the_rest() {
		let root = tempfile::tempdir().unwrap();
		write_manifest(
			root.path(),
			"calc",
			r#"{"id": "calc", "name": "Calculator", "command": "calc-ext", "keywords": ["="]}"#,
		);
		write_manifest(root.path(), "broken", "{ not json");
		write_manifest(
			root.path(),
			"future",
			r#"{"id": "future", "name": "Future", "command": "x", "protocol_version": 99}"#,
		);
		write_manifest(root.path(), "anon", r#"{"id": "", "name": "Anon", "command": "x"}"#);
		write_manifest(root.path(), "calc-copy", r#"{"id": "calc", "name": "Copy", "command": "y"}"#);
		fs::create_dir_all(root.path().join("empty")).unwrap();
		fs::write(root.path().join("stray.json"), "{}").unwrap();

		let specs = discover(root.path());
		assert_eq!(specs.len(), 1);
		let calc = &specs[0];
		assert_eq!(calc.id, "calc");
		assert_eq!(calc.name, "Calculator");
		assert_eq!(calc.keywords, vec!["=".to_string()]);
		assert_eq!(calc.protocol_version, PROTOCOL_VERSION);
		assert_eq!(calc.priority_weight, 1.0);
		assert_eq!(calc.cwd.as_deref(), Some(root.path().join("calc").as_path()));
	}

	#[test]
	fn missing_directory_yields_nothing() {
		let root = tempfile::tempdir().unwrap();
		assert!(discover(&root.path().join("nope")).is_empty());
	}

	#[test]
	fn negative_weight_is_rejected() {
		let mut spec = ExtensionSpec::new("w", "W", "w");
		spec.priority_weight = -1.0;
		assert!(matches!(spec.validate(), Err(Error::InvalidSpec { .. })));
	}
}
