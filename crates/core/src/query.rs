use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use beacon_matcher::normalize;

/// Monotonic tag of one query issued by an [`crate::Aggregator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
	/// Raw generation number.
	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for Generation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Per-aggregator generation counter. The first generation handed out is 1.
#[derive(Debug, Default)]
pub struct GenerationClock {
	last: AtomicU64,
}

impl GenerationClock {
	/// Creates a clock that has not issued any generation yet.
	pub fn new() -> Self {
		Self::default()
	}

	/// Issues the next generation.
	pub fn next(&self) -> Generation {
		Generation(self.last.fetch_add(1, Ordering::AcqRel).wrapping_add(1))
	}

	/// Most recently issued generation, or `Generation(0)` before the first query.
	pub fn current(&self) -> Generation {
		Generation(self.last.load(Ordering::Acquire))
	}
}

/// One user query, immutable once issued.
#[derive(Debug, Clone)]
pub struct Query {
	raw: String,
	normalized: String,
	issued_at: SystemTime,
	generation: Generation,
}

impl Query {
	/// Creates a query, normalizing `raw`.
	pub fn new(raw: impl Into<String>, generation: Generation) -> Self {
		let raw = raw.into();
		Self {
			normalized: normalize(&raw),
			raw,
			issued_at: SystemTime::now(),
			generation,
		}
	}

	/// Text exactly as typed.
	pub fn raw(&self) -> &str {
		&self.raw
	}

	/// Lowercased, whitespace-collapsed text.
	pub fn normalized(&self) -> &str {
		&self.normalized
	}

	/// Wall-clock time the query was created.
	pub fn issued_at(&self) -> SystemTime {
		self.issued_at
	}

	/// Generation tag.
	pub fn generation(&self) -> Generation {
		self.generation
	}

	/// Whether the query normalizes to nothing.
	pub fn is_empty(&self) -> bool {
		self.normalized.is_empty()
	}

	/// Splits off the first word when it is followed by whitespace.
	///
	/// Returns the normalized first word and the raw remainder, so `"calc 2+2"` yields
	/// `("calc", "2+2")` and `"calc "` yields `("calc", "")`. A lone word yields `None`.
	pub fn leading_word(&self) -> Option<(String, &str)> {
		let (head, rest) = self.raw.trim_start().split_once(char::is_whitespace)?;
		Some((normalize(head), rest.trim_start()))
	}
}
