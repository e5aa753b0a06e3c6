use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{CandidateProvider, ProviderError};
use crate::Candidate;
use crate::candidate::Source;

const GROUP: &str = "Desktop Entry";

/// Applications from freedesktop `.desktop` files.
///
/// Directories are scanned on first use and cached until [`DesktopEntryProvider::refresh`].
/// When two directories hold the same desktop file id, the earlier directory wins.
#[derive(Debug)]
pub struct DesktopEntryProvider {
	name: Arc<str>,
	dirs: Vec<PathBuf>,
	cache: RwLock<Option<Vec<Candidate>>>,
}

impl DesktopEntryProvider {
	/// Default provider name.
	pub const NAME: &'static str = "applications";

	/// Creates a provider over `dirs`, in precedence order.
	pub fn new(dirs: Vec<PathBuf>) -> Self {
		Self {
			name: Arc::from(Self::NAME),
			dirs,
			cache: RwLock::new(None),
		}
	}

	/// Rescans the directories, returning the number of applications found.
	///
	/// # Errors
	///
	/// Returns [`ProviderError::Io`] if an existing directory cannot be read.
	pub fn refresh(&self) -> Result<usize, ProviderError> {
		let candidates = self.scan()?;
		let count = candidates.len();
		*self.cache.write() = Some(candidates);
		Ok(count)
	}

	fn scan(&self) -> Result<Vec<Candidate>, ProviderError> {
		let mut found: Vec<Candidate> = Vec::new();
		for dir in &self.dirs {
			let mut files = Vec::new();
			match collect_desktop_files(dir, dir, &mut files) {
				Ok(()) => {}
				Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
				Err(source) => return Err(ProviderError::Io { path: dir.clone(), source }),
			}
			files.sort();
			for (id, path) in files {
				if found.iter().any(|c| c.id.as_str() == id) {
					continue;
				}
				let text = match std::fs::read_to_string(&path) {
					Ok(text) => text,
					Err(err) => {
						warn!(path = %path.display(), error = %err, "unreadable desktop entry");
						continue;
					}
				};
				if let Some(entry) = parse(&text) {
					found.push(entry.into_candidate(&id, &self.name));
				}
			}
		}
		debug!(provider = %self.name, count = found.len(), "desktop entries scanned");
		Ok(found)
	}
}

impl CandidateProvider for DesktopEntryProvider {
	fn name(&self) -> &str {
		&self.name
	}

	fn list_candidates(&self) -> Result<Vec<Candidate>, ProviderError> {
		if let Some(cached) = self.cache.read().as_ref() {
			return Ok(cached.clone());
		}
		let candidates = self.scan()?;
		*self.cache.write() = Some(candidates.clone());
		Ok(candidates)
	}
}

/// Collects `(desktop file id, path)` pairs below `dir`.
///
/// The id is the path relative to `root` with `/` replaced by `-`.
fn collect_desktop_files(root: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) -> io::Result<()> {
	for entry in std::fs::read_dir(dir)? {
		let path = entry?.path();
		if path.is_dir() {
			if let Err(err) = collect_desktop_files(root, &path, out) {
				warn!(path = %path.display(), error = %err, "unreadable applications subdirectory");
			}
			continue;
		}
		if path.extension().is_some_and(|ext| ext == "desktop")
			&& let Ok(relative) = path.strip_prefix(root)
		{
			let id = relative.to_string_lossy().replace(['/', '\\'], "-");
			out.push((id, path));
		}
	}
	Ok(())
}

#[derive(Debug, Default, PartialEq)]
struct DesktopEntry {
	name: String,
	generic_name: Option<String>,
	comment: Option<String>,
	keywords: Vec<String>,
	exec: Option<String>,
}

impl DesktopEntry {
	fn into_candidate(self, id: &str, provider: &Arc<str>) -> Candidate {
		let binary = self.exec.as_deref().and_then(exec_binary);
		let keywords = self
			.generic_name
			.iter()
			.chain(self.keywords.iter())
			.map(String::as_str)
			.chain(binary)
			.collect::<Vec<_>>();
		let mut candidate = Candidate::new(id, self.name, Source::Local(Arc::clone(provider))).with_keywords(keywords);
		candidate.description = self.comment.or(self.generic_name);
		candidate
	}
}

/// Program name of an `Exec` line: the basename of its first word.
fn exec_binary(exec: &str) -> Option<&str> {
	let first = exec.split_whitespace().next()?.trim_matches('"');
	let name = first.rsplit('/').next()?;
	(!name.is_empty() && !name.starts_with('%')).then_some(name)
}

/// Parses the `[Desktop Entry]` group, returning `None` for entries that must not be listed.
fn parse(text: &str) -> Option<DesktopEntry> {
	let mut entry = DesktopEntry::default();
	let mut in_group = false;
	let mut is_application = true;

	for line in text.lines().map(str::trim) {
		if line.is_empty() || line.starts_with('#') {
			continue;
		}
		if let Some(group) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
			in_group = group == GROUP;
			continue;
		}
		if !in_group {
			continue;
		}
		let Some((key, value)) = line.split_once('=') else {
			continue;
		};
		let value = value.trim();
		match key.trim() {
			"Name" => entry.name = value.to_string(),
			"GenericName" => entry.generic_name = Some(value.to_string()),
			"Comment" => entry.comment = Some(value.to_string()),
			"Keywords" => {
				entry.keywords = value.split(';').map(str::trim).filter(|k| !k.is_empty()).map(String::from).collect();
			}
			"Exec" => entry.exec = Some(value.to_string()),
			"Type" => is_application = value == "Application",
			"NoDisplay" | "Hidden" if value.eq_ignore_ascii_case("true") => return None,
			_ => {}
		}
	}

	(is_application && !entry.name.is_empty()).then_some(entry)
}
