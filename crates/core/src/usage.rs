//! Selection history feeding the ranker's usage multiplier.

use std::collections::HashMap;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::CandidateId;

/// How often and how recently a candidate was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageRecord {
	/// Number of selections.
	pub count: u32,
	/// Time of the latest selection.
	pub last_used: SystemTime,
}

/// Read/record interface over selection history.
///
/// Reads happen on every query and must be cheap; writes happen once per selection.
pub trait UsageStore: Send + Sync {
	/// History of one candidate.
	fn get(&self, id: &CandidateId) -> Option<UsageRecord>;

	/// Records a selection of `id` at `at`.
	fn record_selection(&self, id: &CandidateId, at: SystemTime);

	/// Every recorded candidate.
	fn entries(&self) -> Vec<(CandidateId, UsageRecord)>;
}

/// Process-local store behind a single-writer lock.
#[derive(Debug, Default)]
pub struct MemoryUsageStore {
	records: RwLock<HashMap<CandidateId, UsageRecord>>,
}

impl MemoryUsageStore {
	/// Creates an empty store.
	pub fn new() -> Self {
		Self::default()
	}
}

impl UsageStore for MemoryUsageStore {
	fn get(&self, id: &CandidateId) -> Option<UsageRecord> {
		self.records.read().get(id).copied()
	}

	fn record_selection(&self, id: &CandidateId, at: SystemTime) {
		let mut records = self.records.write();
		let record = records.entry(id.clone()).or_insert(UsageRecord { count: 0, last_used: at });
		record.count = record.count.saturating_add(1);
		record.last_used = record.last_used.max(at);
	}

	fn entries(&self) -> Vec<(CandidateId, UsageRecord)> {
		self.records.read().iter().map(|(id, r)| (id.clone(), *r)).collect()
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	#[test]
	fn selections_accumulate() {
		let store = MemoryUsageStore::new();
		let id = CandidateId::new("firefox");
		let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
		store.record_selection(&id, t0);
		store.record_selection(&id, t0 + Duration::from_secs(5));
		store.record_selection(&id, t0);

		let record = store.get(&id).unwrap();
		assert_eq!(record.count, 3);
		assert_eq!(record.last_used, t0 + Duration::from_secs(5));
		assert_eq!(store.get(&CandidateId::new("gimp")), None);
		assert_eq!(store.entries().len(), 1);
	}
}
