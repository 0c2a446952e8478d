use crate::entry::{
    BytewiseComparator, InternalKey, LookupKey, StoredKey, UserComparator, ValueType, MAX_SEQUENCE,
};
use crate::error::{Result, StorageError};
use crate::view::ByteView;
use crossbeam_skiplist::SkipMap;
use std::cmp::Ordering as KeyOrdering;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Outcome of a point lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    Found(ByteView),
    Deleted,
    NotFound,
}

impl LookupResult {
    pub fn into_value(self) -> Option<ByteView> {
        match self {
            LookupResult::Found(value) => Some(value),
            LookupResult::Deleted | LookupResult::NotFound => None,
        }
    }
}

/// In-memory versioned index of recent writes.
///
/// Every insert adds a new version; nothing is overwritten. Readers pick a
/// version with a snapshot sequence, and [`Memtable::last_sequence`] only
/// advances once a whole batch has been inserted.
pub struct Memtable<C: UserComparator = BytewiseComparator> {
    data: SkipMap<StoredKey<C>, ByteView>,
    size: AtomicUsize,
    next_sequence: AtomicU64,
    visible_sequence: AtomicU64,
}

impl<C: UserComparator> Memtable<C> {
    pub fn new() -> Self {
        Self {
            data: SkipMap::new(),
            size: AtomicUsize::new(0),
            next_sequence: AtomicU64::new(1),
            visible_sequence: AtomicU64::new(0),
        }
    }

    pub fn insert(
        &self,
        sequence: u64,
        value_type: ValueType,
        user_key: &ByteView,
        value: ByteView,
    ) -> Result<()> {
        let key = StoredKey::<C>::new(sequence, value_type, user_key)?;

        // Calculate size increase: stored key + value
        let entry_size = user_key.len() + 12 + value.len();

        self.data.insert(key, value);
        self.size.fetch_add(entry_size, Ordering::Relaxed);
        Ok(())
    }

    /// Finds the newest version of `user_key` with a sequence `<= as_of`.
    pub fn lookup(&self, user_key: &ByteView, as_of: u64) -> Result<LookupResult> {
        let target = LookupKey::<C>::new(user_key, as_of)?;

        let Some(entry) = self.data.lower_bound(Bound::Included(target.as_stored())) else {
            return Ok(LookupResult::NotFound);
        };
        let found = entry.key();
        if C::compare(found.user_key(), target.user_key()) != KeyOrdering::Equal {
            return Ok(LookupResult::NotFound);
        }

        match found.value_type() {
            ValueType::Value => Ok(LookupResult::Found(entry.value().clone())),
            ValueType::Delete => Ok(LookupResult::Deleted),
            ValueType::Unknown => {
                tracing::warn!(
                    "Unknown value type in memtable entry {:?}, treating as not found",
                    found
                );
                Ok(LookupResult::NotFound)
            }
        }
    }

    /// Lookup at the latest published sequence.
    pub fn get(&self, user_key: &ByteView) -> Result<LookupResult> {
        self.lookup(user_key, self.last_sequence())
    }

    /// Newest visible value per user key in `[start, end)`, tombstones hidden.
    pub fn scan(&self, start: &ByteView, end: &ByteView, as_of: u64) -> Result<Vec<(ByteView, ByteView)>> {
        let mut results = Vec::new();
        let first = LookupKey::<C>::new(start, MAX_SEQUENCE)?;
        let end = end.to_bytes();
        let mut decided: Option<StoredKey<C>> = None;

        let mut cursor = self.data.lower_bound(Bound::Included(first.as_stored()));
        while let Some(entry) = cursor {
            let key = entry.key();
            if C::compare(key.user_key(), &end) != KeyOrdering::Less {
                break;
            }

            let already_decided = decided
                .as_ref()
                .map_or(false, |d| C::compare(d.user_key(), key.user_key()) == KeyOrdering::Equal);

            if !already_decided && key.sequence() <= as_of {
                match key.value_type() {
                    ValueType::Value => {
                        results.push((key.to_internal_key().user_key, entry.value().clone()));
                    }
                    ValueType::Delete => {}
                    ValueType::Unknown => {
                        tracing::warn!("Skipping memtable entry with unknown value type: {:?}", key);
                    }
                }
                decided = Some(key.clone());
            }

            cursor = entry.next();
        }

        Ok(results)
    }

    /// Bidirectional cursor over every version in index order.
    pub fn cursor(&self) -> Cursor<'_, C> {
        Cursor {
            data: &self.data,
            position: Position::BeforeFirst,
        }
    }

    /// Reserves `count` contiguous sequence numbers and returns the first.
    pub fn reserve_sequences(&self, count: u64) -> Result<u64> {
        let first = self.next_sequence.fetch_add(count, Ordering::AcqRel);
        let last = first.checked_add(count.saturating_sub(1));
        match last {
            Some(last) if last <= MAX_SEQUENCE => Ok(first),
            _ => {
                tracing::error!(
                    "Sequence space exhausted: requested {} sequences starting at {}",
                    count,
                    first
                );
                Err(StorageError::SequenceExhausted)
            }
        }
    }

    /// Makes every sequence up to `last` visible to readers.
    pub fn publish(&self, last: u64) {
        self.visible_sequence.fetch_max(last, Ordering::AcqRel);
    }

    /// Newest sequence whose batch has been fully applied.
    pub fn last_sequence(&self) -> u64 {
        self.visible_sequence.load(Ordering::Acquire)
    }

    /// Fast-forwards both counters past `max_sequence` after replay.
    pub fn recover_sequence(&self, max_sequence: u64) {
        self.next_sequence
            .fetch_max(max_sequence.saturating_add(1), Ordering::AcqRel);
        self.publish(max_sequence);
    }

    /// Name of the user key comparator ordering this index.
    pub fn comparator_name(&self) -> &'static str {
        C::name()
    }

    pub fn approximate_size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<C: UserComparator> Default for Memtable<C> {
    fn default() -> Self {
        Self::new()
    }
}

enum Position<C: UserComparator> {
    BeforeFirst,
    At(StoredKey<C>),
    AfterLast,
}

/// Cursor over memtable versions.
///
/// Each step is computed from the current key, so the cursor stays valid
/// while concurrent inserts happen.
pub struct Cursor<'a, C: UserComparator = BytewiseComparator> {
    data: &'a SkipMap<StoredKey<C>, ByteView>,
    position: Position<C>,
}

impl<'a, C: UserComparator> Cursor<'a, C> {
    /// Moves to the next entry in index order.
    pub fn next_entry(&mut self) -> Option<(InternalKey, ByteView)> {
        let data = self.data;
        let entry = match &self.position {
            Position::BeforeFirst => data.front(),
            Position::At(key) => data.lower_bound(Bound::Excluded(key)),
            Position::AfterLast => None,
        };
        self.settle(entry, Position::AfterLast)
    }

    /// Moves to the greatest entry strictly less than the current one.
    pub fn prev_entry(&mut self) -> Option<(InternalKey, ByteView)> {
        let data = self.data;
        let entry = match &self.position {
            Position::BeforeFirst => None,
            Position::At(key) => data.upper_bound(Bound::Excluded(key)),
            Position::AfterLast => data.back(),
        };
        self.settle(entry, Position::BeforeFirst)
    }

    /// Positions at the newest version of `user_key` visible at `as_of`, or
    /// the first entry after it.
    pub fn seek(&mut self, user_key: &ByteView, as_of: u64) -> Result<Option<(InternalKey, ByteView)>> {
        let data = self.data;
        let target = LookupKey::<C>::new(user_key, as_of)?;
        let entry = data.lower_bound(Bound::Included(target.as_stored()));
        Ok(self.settle(entry, Position::AfterLast))
    }

    fn settle(
        &mut self,
        entry: Option<crossbeam_skiplist::map::Entry<'a, StoredKey<C>, ByteView>>,
        exhausted: Position<C>,
    ) -> Option<(InternalKey, ByteView)> {
        match entry {
            Some(entry) => {
                let key = entry.key().clone();
                let item = (key.to_internal_key(), entry.value().clone());
                self.position = Position::At(key);
                Some(item)
            }
            None => {
                self.position = exhausted;
                None
            }
        }
    }
}

impl<'a, C: UserComparator> Iterator for Cursor<'a, C> {
    type Item = (InternalKey, ByteView);

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry()
    }
}
