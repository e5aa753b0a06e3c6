use crate::{Match, Needle};

/// Candidate count above which [`match_list`] fans out over the rayon pool.
pub const PARALLEL_THRESHOLD: usize = 2048;

/// Matches every item, returning `(index, match)` pairs in input order.
///
/// `keywords` projects an item onto its normalized keyword list. Output order never depends on
/// whether the parallel path was taken.
pub fn match_list<T, K>(needle: &Needle, items: &[T], keywords: K) -> Vec<(usize, Match)>
where
	T: Sync,
	K: Fn(&T) -> &[String] + Sync,
{
	#[cfg(feature = "parallel")]
	if items.len() >= PARALLEL_THRESHOLD {
		use rayon::prelude::*;

		return items
			.par_iter()
			.enumerate()
			.filter_map(|(i, item)| needle.match_keywords(keywords(item)).map(|m| (i, m)))
			.collect();
	}

	items
		.iter()
		.enumerate()
		.filter_map(|(i, item)| needle.match_keywords(keywords(item)).map(|m| (i, m)))
		.collect()
}
