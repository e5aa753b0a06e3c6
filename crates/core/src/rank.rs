//! Scoring and total ordering of matched candidates.
//!
//! `total = sub_score × source_weight × usage_multiplier`, where the multiplier grows with the
//! number of past selections (saturating) and decays back to 1.0 as the last selection ages.
//! Equal totals are ordered by static priority, then recency, then label, then id, so the
//! order never depends on the order candidates arrived in.

use std::cmp::Ordering;
use std::ops::Range;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::usage::{UsageRecord, UsageStore};
use crate::{Candidate, CandidateId, Source};


/// Usage multiplier tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankWeights {
	/// Largest boost frequent use can add on top of 1.0.
	pub max_boost: f64,
	/// Selection count at which the boost reaches ~63% of `max_boost`.
	pub saturation: f64,
	/// Age after which a selection's boost has halved.
	#[serde(rename = "half_life_secs", with = "secs")]
	pub half_life: Duration,
}

impl Default for RankWeights {
	fn default() -> Self {
		Self {
			max_boost: 1.0,
			saturation: 5.0,
			half_life: Duration::from_secs(3 * 24 * 60 * 60),
		}
	}
}

mod secs {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(value.as_secs())
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		u64::deserialize(deserializer).map(Duration::from_secs)
	}
}

/// A candidate with its match sub-score, ready to be ranked.
#[derive(Debug, Clone)]
pub struct Scored {
	/// The matched candidate.
	pub candidate: Candidate,
	/// Match quality in `0.0..=1.0`; out-of-range values are clamped.
	pub sub_score: f64,
	/// Weight of the candidate's source.
	pub source_weight: f64,
	/// Highlight ranges in the label, if the label was the matched keyword.
	pub spans: Vec<Range<usize>>,
}

impl Scored {
	/// `sub_score × source_weight` after clamping; the part of the total that ignores usage.
	pub fn base_score(&self) -> f64 {
		let sub_score = if self.sub_score.is_nan() { 0.0 } else { self.sub_score.clamp(0.0, 1.0) };
		let source_weight = if self.source_weight.is_finite() { self.source_weight.max(0.0) } else { 0.0 };
		sub_score * source_weight
	}
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedItem {
	/// Candidate id.
	pub id: CandidateId,
	/// Display label.
	pub label: String,
	/// Secondary line.
	pub description: Option<String>,
	/// Total score.
	pub score: f64,
	/// Origin.
	pub source: Source,
	/// Static priority.
	pub priority: f64,
	/// Latest selection, if any.
	pub last_used: Option<SystemTime>,
	/// Highlight ranges in the label.
	pub spans: Vec<Range<usize>>,
}

impl RankedItem {
	/// Ranking order: best first.
	pub fn cmp_rank(&self, other: &Self) -> Ordering {
		other
			.score
			.total_cmp(&self.score)
			.then_with(|| other.priority.total_cmp(&self.priority))
			.then_with(|| other.last_used.cmp(&self.last_used))
			.then_with(|| self.label.cmp(&other.label))
			.then_with(|| self.id.cmp(&other.id))
	}
}

/// Turns scored candidates into a deterministic ranking.
#[derive(Debug, Clone, Default)]
pub struct Ranker {
	weights: RankWeights,
}

impl Ranker {
	/// Creates a ranker.
	pub fn new(weights: RankWeights) -> Self {
		Self { weights }
	}

	/// Weights in use.
	pub fn weights(&self) -> &RankWeights {
		&self.weights
	}

	/// Multiplier for a candidate with the given history; never below 1.0.
	pub fn usage_multiplier(&self, usage: Option<UsageRecord>, now: SystemTime) -> f64 {
		let Some(usage) = usage.filter(|u| u.count > 0) else {
			return 1.0;
		};
		let saturation = if self.weights.saturation > 0.0 { self.weights.saturation } else { 1.0 };
		let frequency = self.weights.max_boost * (1.0 - (-f64::from(usage.count) / saturation).exp());

		let age = now.duration_since(usage.last_used).unwrap_or_default().as_secs_f64();
		let half_life = self.weights.half_life.as_secs_f64();
		let recency = if half_life > 0.0 { 0.5f64.powf(age / half_life) } else if age == 0.0 { 1.0 } else { 0.0 };

		let multiplier = 1.0 + frequency * recency;
		if multiplier.is_finite() { multiplier.max(1.0) } else { 1.0 }
	}

	/// Scores and sorts `scored`, best first.
	pub fn rank(&self, scored: Vec<Scored>, usage: &dyn UsageStore, now: SystemTime) -> Vec<RankedItem> {
		let mut ranked: Vec<RankedItem> = scored
			.into_iter()
			.map(|s| {
				let record = usage.get(&s.candidate.id);
				RankedItem {
					score: s.base_score() * self.usage_multiplier(record, now),
					id: s.candidate.id,
					label: s.candidate.label,
					description: s.candidate.description,
					source: s.candidate.source,
					priority: s.candidate.priority,
					last_used: record.map(|r| r.last_used),
					spans: s.spans,
				}
			})
			.collect();
		ranked.sort_by(RankedItem::cmp_rank);
		ranked
	}
}
