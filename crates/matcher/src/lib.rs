//! Keyword matching for launcher candidates.
//!
//! A query is normalized once and turned into a [`Needle`], which is then tested against each
//! candidate's ordered keyword list. Two kinds of hits exist:
//!
//! * **Prefix**: the keyword starts with the needle. Scores [`Config::prefix_score`].
//! * **Fuzzy**: the needle is an ordered subsequence of the keyword, allowing a small budget of
//!   query characters that do not appear at all ("typos"). Scores below the prefix score of the
//!   same keyword, rising with the longest contiguous run and falling with each typo.
//!
//! Later keywords weigh less than earlier ones, so a hit on the display label beats the same hit
//! on a secondary keyword. Matching is pure: the same needle and keywords always produce the
//! same [`Match`].

#![warn(missing_docs)]

mod batch;
mod needle;
mod normalize;

use std::ops::Range;

pub use batch::{PARALLEL_THRESHOLD, match_list};
pub use needle::{Needle, keyword_weight};
pub use normalize::normalize;

/// Matcher tuning knobs.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
	/// Upper bound on query characters a fuzzy hit may leave unmatched.
	///
	/// The effective budget also shrinks with short queries: at most one typo per four query
	/// characters.
	pub max_typos: u16,
	/// Score of a prefix hit on the first keyword.
	pub prefix_score: f64,
	/// Score of a perfect fuzzy hit (contiguous, no typos) on the first keyword.
	///
	/// Must stay below `prefix_score`.
	pub fuzzy_ceiling: f64,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			max_typos: 1,
			prefix_score: 1.0,
			fuzzy_ceiling: 0.9,
		}
	}
}

/// How a keyword matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MatchKind {
	/// Keyword starts with the query.
	Prefix,
	/// Query is a typo-tolerant subsequence of the keyword.
	Fuzzy,
}

/// A successful match of a query against one candidate.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Match {
	/// Sub-score in `0.0..=1.0`.
	pub score: f64,
	/// Hit classification.
	pub kind: MatchKind,
	/// Index of the winning keyword.
	pub keyword: usize,
	/// Character ranges of the winning keyword covered by the query, for highlighting.
	pub spans: Vec<Range<usize>>,
}
