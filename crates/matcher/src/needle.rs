use std::ops::Range;

use crate::{Config, Match, MatchKind};

#[cfg(test)]
mod tests;

/// Upper bound on fuzzy alignment start points tried per keyword.
const MAX_FUZZY_STARTS: usize = 16;

/// Weight applied to hits on the keyword at `index`.
///
/// The first keyword (usually the display label) weighs 1.0, each later keyword 0.1 less, with
/// a floor of 0.6.
#[inline]
pub fn keyword_weight(index: usize) -> f64 {
	(1.0 - 0.1 * index as f64).max(0.6)
}

/// A normalized query prepared for repeated matching.
#[derive(Debug, Clone)]
pub struct Needle {
	text: String,
	chars: Vec<char>,
	typo_budget: usize,
	config: Config,
}

/// One greedy alignment of the needle inside a keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Alignment {
	typos: usize,
	longest_run: usize,
	positions: Vec<usize>,
}

impl Alignment {
	/// Fewer typos first, then longer runs, then earlier first hit.
	fn beats(&self, other: &Self) -> bool {
		self.typos
			.cmp(&other.typos)
			.then(other.longest_run.cmp(&self.longest_run))
			.then(self.positions.first().cmp(&other.positions.first()))
			.is_lt()
	}
}

impl Needle {
	/// Prepares an already normalized query.
	///
	/// Returns `None` for the empty query, which matches nothing.
	pub fn new(normalized: &str, config: &Config) -> Option<Self> {
		if normalized.is_empty() {
			return None;
		}
		let chars: Vec<char> = normalized.chars().collect();
		let typo_budget = (config.max_typos as usize).min(chars.len() / 4);
		Some(Self {
			text: normalized.to_owned(),
			chars,
			typo_budget,
			config: config.clone(),
		})
	}

	/// The normalized query text.
	pub fn as_str(&self) -> &str {
		&self.text
	}

	/// Number of unmatched characters a fuzzy hit may contain for this needle.
	pub fn typo_budget(&self) -> usize {
		self.typo_budget
	}

	/// Matches against an ordered list of normalized keywords, keeping the best hit.
	///
	/// Ties keep the earliest keyword.
	pub fn match_keywords<S: AsRef<str>>(&self, keywords: &[S]) -> Option<Match> {
		let mut best: Option<Match> = None;
		for (index, keyword) in keywords.iter().enumerate() {
			let Some(hit) = self.match_keyword(keyword.as_ref(), index) else {
				continue;
			};
			if best.as_ref().is_none_or(|b| hit.score > b.score) {
				best = Some(hit);
			}
		}
		best
	}

	/// Matches a single normalized keyword sitting at `index` in its candidate's list.
	pub fn match_keyword(&self, keyword: &str, index: usize) -> Option<Match> {
		let weight = keyword_weight(index);

		if keyword.starts_with(self.text.as_str()) {
			return Some(Match {
				score: self.config.prefix_score * weight,
				kind: MatchKind::Prefix,
				keyword: index,
				spans: vec![0..self.chars.len()],
			});
		}

		let hay: Vec<char> = keyword.chars().collect();
		let alignment = self.align(&hay)?;
		let len = self.chars.len() as f64;
		let contiguity = 0.5 + 0.5 * alignment.longest_run as f64 / len;
		let score = self.config.fuzzy_ceiling * contiguity / (1.0 + alignment.typos as f64) * weight;

		Some(Match {
			score,
			kind: MatchKind::Fuzzy,
			keyword: index,
			spans: spans_of(&alignment.positions),
		})
	}

	/// Best greedy alignment over the first few occurrences of the needle's first character.
	fn align(&self, hay: &[char]) -> Option<Alignment> {
		let first = self.chars[0];
		let mut starts: Vec<usize> = hay
			.iter()
			.enumerate()
			.filter(|(_, c)| **c == first)
			.map(|(i, _)| i)
			.take(MAX_FUZZY_STARTS)
			.collect();
		if starts.is_empty() {
			starts.push(0);
		}

		let mut best: Option<Alignment> = None;
		for start in starts {
			let Some(candidate) = self.align_from(hay, start) else {
				continue;
			};
			if best.as_ref().is_none_or(|b| candidate.beats(b)) {
				best = Some(candidate);
			}
		}
		best
	}

	fn align_from(&self, hay: &[char], start: usize) -> Option<Alignment> {
		let mut cursor = start;
		let mut typos = 0usize;
		let mut positions = Vec::with_capacity(self.chars.len());

		for &c in &self.chars {
			match hay[cursor.min(hay.len())..].iter().position(|h| *h == c) {
				Some(offset) => {
					positions.push(cursor + offset);
					cursor += offset + 1;
				}
				None => {
					typos += 1;
					if typos > self.typo_budget {
						return None;
					}
				}
			}
		}

		if positions.is_empty() {
			return None;
		}

		let mut longest_run = 1;
		let mut run = 1;
		for pair in positions.windows(2) {
			if pair[1] == pair[0] + 1 {
				run += 1;
				longest_run = longest_run.max(run);
			} else {
				run = 1;
			}
		}

		Some(Alignment {
			typos,
			longest_run,
			positions,
		})
	}
}

/// Merges sorted character positions into contiguous ranges.
fn spans_of(positions: &[usize]) -> Vec<Range<usize>> {
	let mut spans: Vec<Range<usize>> = Vec::new();
	for &pos in positions {
		match spans.last_mut() {
			Some(last) if last.end == pos => last.end = pos + 1,
			_ => spans.push(pos..pos + 1),
		}
	}
	spans
}
