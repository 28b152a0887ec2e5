//! Append-only conversation log.
//!
//! The log is never mutated after append: items are not edited, reordered or
//! removed. Policies only ever produce projections over it.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use ctxbudget_types::{Budget, ConversationItem, ItemBody, ItemId, Role, Sequence};

#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    items: Vec<ConversationItem>,
}

impl ConversationLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a body, assigning the next id and sequence number.
    pub fn append(&mut self, body: ItemBody) -> ItemId {
        let id = self.next_id();
        let item = ConversationItem::new(id, self.next_sequence(), body);
        self.items.push(item);
        id
    }

    #[must_use]
    pub fn items(&self) -> &[ConversationItem] {
        &self.items
    }

    #[must_use]
    pub fn get(&self, id: ItemId) -> Option<&ConversationItem> {
        self.items.get(id.index())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn next_id(&self) -> ItemId {
        ItemId::new(self.items.len() as u64)
    }

    #[must_use]
    pub fn next_sequence(&self) -> Sequence {
        self.items.last().map_or(Sequence::new(0), |item| {
            Sequence::new(item.created_at().value() + 1)
        })
    }

    /// Items whose ids fall in `range`, or `None` if the range is empty or
    /// reaches past the end of the log.
    #[must_use]
    pub fn range_items(&self, range: &Range<ItemId>) -> Option<&[ConversationItem]> {
        if range.start >= range.end {
            return None;
        }
        self.items.get(range.start.index()..range.end.index())
    }
}

#[derive(Deserialize)]
struct ConversationLogSerde {
    items: Vec<ConversationItem>,
}

impl Serialize for ConversationLog {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        #[derive(Serialize)]
        struct Borrowed<'a> {
            items: &'a [ConversationItem],
        }
        Borrowed { items: &self.items }.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConversationLog {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let serde = ConversationLogSerde::deserialize(deserializer)?;
        serde.into_log().map_err(serde::de::Error::custom)
    }
}

impl ConversationLogSerde {
    fn into_log(self) -> Result<ConversationLog, String> {
        let mut previous: Option<Sequence> = None;
        for (index, item) in self.items.iter().enumerate() {
            let expected = index as u64;
            if item.id().value() != expected {
                return Err(format!(
                    "item id {} does not match position {expected}",
                    item.id()
                ));
            }
            if let Some(prev) = previous {
                if item.created_at() <= prev {
                    return Err(format!(
                        "item {} has created_at {} not after {prev}",
                        item.id(),
                        item.created_at()
                    ));
                }
            }
            previous = Some(item.created_at());
        }
        Ok(ConversationLog { items: self.items })
    }
}

/// Resolved pinned prefix and suffix of a log for one budget.
///
/// The prefix and suffix never overlap; pin counts beyond the log length clamp
/// so the whole log is pinned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pins {
    prefix: usize,
    suffix: usize,
    len: usize,
}

impl Pins {
    #[must_use]
    pub fn resolve(budget: &Budget, items: &[ConversationItem]) -> Self {
        let len = items.len();
        let leading_system = budget.pin_leading_system
            && items.first().is_some_and(|item| item.role() == Role::System);
        let prefix = budget.pin_first_n.max(usize::from(leading_system)).min(len);
        let suffix = budget.pin_last_n.min(len - prefix);
        Self {
            prefix,
            suffix,
            len,
        }
    }

    /// Number of pinned leading items.
    #[must_use]
    pub fn prefix(&self) -> usize {
        self.prefix
    }

    /// Number of pinned trailing items.
    #[must_use]
    pub fn suffix(&self) -> usize {
        self.suffix
    }

    /// Index of the first item in the pinned suffix.
    #[must_use]
    pub fn suffix_start(&self) -> usize {
        self.len - self.suffix
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.prefix + self.suffix
    }

    #[must_use]
    pub fn is_pinned(&self, index: usize) -> bool {
        index < self.prefix || (index >= self.suffix_start() && index < self.len)
    }

    /// Indices of the unpinned middle.
    #[must_use]
    pub fn unpinned(&self) -> Range<usize> {
        self.prefix..self.suffix_start()
    }
}
