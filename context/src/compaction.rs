//! Compaction records and their side store.
//!
//! A record is an opaque replacement for a contiguous range of the log. It is
//! stored next to the log, never in it, and is keyed by the range it covers.
//! Appends never invalidate a record because ids are immutable; recompacting
//! is a caller decision.

use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use ctxbudget_types::{COMPACTION_KIND, ContentBlock, ItemBody, ItemId, Role, Sequence};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionRecord {
    covers: Range<ItemId>,
    produced_at: Sequence,
    payload: serde_json::Value,
    source_item_count: usize,
}

impl CompactionRecord {
    #[must_use]
    pub fn new(covers: Range<ItemId>, produced_at: Sequence, payload: serde_json::Value) -> Self {
        let source_item_count = (covers.end.value().saturating_sub(covers.start.value())) as usize;
        Self {
            covers,
            produced_at,
            payload,
            source_item_count,
        }
    }

    #[must_use]
    pub fn covers(&self) -> &Range<ItemId> {
        &self.covers
    }

    #[must_use]
    pub fn produced_at(&self) -> Sequence {
        self.produced_at
    }

    #[must_use]
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    #[must_use]
    pub fn source_item_count(&self) -> usize {
        self.source_item_count
    }

    /// The record rendered as a single item for a selection.
    #[must_use]
    pub fn as_item_body(&self) -> ItemBody {
        ItemBody::new(
            Role::CompactionSummary,
            vec![ContentBlock::structured(COMPACTION_KIND, self.payload.clone())],
        )
    }
}

fn key(range: &Range<ItemId>) -> (ItemId, ItemId) {
    (range.start, range.end)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompactionStore {
    records: BTreeMap<(ItemId, ItemId), CompactionRecord>,
}

impl CompactionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record, replacing and returning any record for the same range.
    pub fn insert(&mut self, record: CompactionRecord) -> Option<CompactionRecord> {
        self.records.insert(key(record.covers()), record)
    }

    #[must_use]
    pub fn get(&self, covers: &Range<ItemId>) -> Option<&CompactionRecord> {
        self.records.get(&key(covers))
    }

    pub fn remove(&mut self, covers: &Range<ItemId>) -> Option<CompactionRecord> {
        self.records.remove(&key(covers))
    }

    pub fn records(&self) -> impl Iterator<Item = &CompactionRecord> {
        self.records.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records starting exactly at `first_unpinned` and ending no later than
    /// `limit`, widest first. A record reaching back into the pinned prefix
    /// would repeat pinned items, so it never qualifies.
    #[must_use]
    pub fn prefix_candidates(&self, first_unpinned: ItemId, limit: ItemId) -> Vec<&CompactionRecord> {
        let mut candidates: Vec<_> = self
            .records()
            .filter(|r| r.covers.start == first_unpinned && r.covers.end <= limit)
            .collect();
        candidates.sort_by(|a, b| {
            b.source_item_count
                .cmp(&a.source_item_count)
                .then_with(|| b.covers.end.cmp(&a.covers.end))
        });
        candidates
    }
}

impl Serialize for CompactionStore {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_seq(self.records.values())
    }
}

impl<'de> Deserialize<'de> for CompactionStore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let records = Vec::<CompactionRecord>::deserialize(deserializer)?;
        let mut store = CompactionStore::new();
        for record in records {
            if record.covers.start >= record.covers.end {
                return Err(serde::de::Error::custom(format!(
                    "compaction record covers empty range {}..{}",
                    record.covers.start, record.covers.end
                )));
            }
            if store.insert(record).is_some() {
                return Err(serde::de::Error::custom("duplicate compaction record range"));
            }
        }
        Ok(store)
    }
}
