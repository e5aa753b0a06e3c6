use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use beacon_matcher::normalize;

/// Stable identifier of a candidate, unique within one result pool.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CandidateId(Arc<str>);

impl CandidateId {
	/// Creates an id.
	pub fn new(id: impl AsRef<str>) -> Self {
		Self(Arc::from(id.as_ref()))
	}

	/// Id of an item returned by an extension.
	pub fn for_extension_item(extension: &str, item: &str) -> Self {
		Self::new(format!("{extension}:{item}"))
	}

	/// The id as a string slice.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for CandidateId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for CandidateId {
	fn from(id: &str) -> Self {
		Self::new(id)
	}
}

impl From<String> for CandidateId {
	fn from(id: String) -> Self {
		Self(Arc::from(id))
	}
}

impl Borrow<str> for CandidateId {
	fn borrow(&self) -> &str {
		&self.0
	}
}

/// Where a candidate came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
	/// A local provider, by name.
	Local(Arc<str>),
	/// An extension worker, by extension id.
	Extension(Arc<str>),
}

impl Source {
	/// Provider name or extension id.
	pub fn name(&self) -> &str {
		match self {
			Self::Local(name) | Self::Extension(name) => name,
		}
	}
}

impl fmt::Display for Source {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Local(name) => write!(f, "local:{name}"),
			Self::Extension(id) => write!(f, "extension:{id}"),
		}
	}
}

/// A selectable item before scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
	/// Stable id.
	pub id: CandidateId,
	/// Display label.
	pub label: String,
	/// Secondary line.
	pub description: Option<String>,
	/// Normalized keywords in priority order; the label always comes first.
	pub keywords: Vec<String>,
	/// Origin.
	pub source: Source,
	/// Static priority, used to break score ties.
	pub priority: f64,
}

impl Candidate {
	/// Creates a candidate whose only keyword is its label.
	pub fn new(id: impl Into<CandidateId>, label: impl Into<String>, source: Source) -> Self {
		let label = label.into();
		let first = normalize(&label);
		Self {
			id: id.into(),
			keywords: if first.is_empty() { Vec::new() } else { vec![first] },
			label,
			description: None,
			source,
			priority: 0.0,
		}
	}

	/// Appends keywords after the label, normalized and without duplicates.
	#[must_use]
	pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		for keyword in keywords {
			self.push_keyword(keyword.as_ref());
		}
		self
	}

	/// Sets the description.
	#[must_use]
	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = Some(description.into());
		self
	}

	/// Sets the static priority.
	#[must_use]
	pub fn with_priority(mut self, priority: f64) -> Self {
		self.priority = priority;
		self
	}

	fn push_keyword(&mut self, raw: &str) {
		let keyword = normalize(raw);
		if !keyword.is_empty() && !self.keywords.contains(&keyword) {
			self.keywords.push(keyword);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn label_is_first_keyword() {
		let c = Candidate::new("firefox", "Firefox  Web", Source::Local("apps".into()))
			.with_keywords(["Browser", "firefox web", " ", "INTERNET"]);
		assert_eq!(c.keywords, vec!["firefox web", "browser", "internet"]);
	}

	#[test]
	fn extension_item_ids_are_namespaced() {
		assert_eq!(CandidateId::for_extension_item("calc", "4").as_str(), "calc:4");
	}

	#[test]
	fn ids_are_looked_up_by_str() {
		let mut seen = std::collections::HashMap::new();
		seen.insert(CandidateId::from(String::from("gimp")), 2);
		assert_eq!(seen.get("gimp"), Some(&2));
		assert_eq!(CandidateId::new("gimp").to_string(), "gimp");
	}
}
