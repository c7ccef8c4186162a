//! Types for implementing a table of predictors.

use crate::predictor::counter::*;

/// Interface to a table of predictors.
pub trait PredictorTable: Sized {
    /// The type of entry in the table.
    type Entry;

    /// Returns the number of entries in the table.
    fn size(&self) -> usize;

    /// Returns a reference to an entry in the table.
    fn get_entry(&self, idx: usize) -> &Self::Entry;

    /// Returns a mutable reference to an entry in the table.
    fn get_entry_mut(&mut self, idx: usize) -> &mut Self::Entry;

    /// Returns a bitmask corresponding to the number of entries in the table.
    fn index_mask(&self) -> usize {
        assert!(self.size().is_power_of_two());
        self.size() - 1
    }
}

/// Interface to a *tagged* table of predictors.
pub trait TaggedPredictorTable: PredictorTable {
    /// Returns the entry at `idx` if it holds a valid match for `tag`.
    fn lookup(&self, idx: usize, tag: u32) -> Option<&Self::Entry>;
}

/// The payload carried by entries in a tagged table, alongside the
/// confidence counter, usefulness counter and tag.
///
/// Direction tables carry nothing beyond the (signed) confidence counter;
/// target tables carry an address and use an unsigned confidence counter.
pub trait TablePayload: Clone + Default + std::fmt::Debug + PartialEq {
    /// Whether the confidence counter is signed.
    const SIGNED_CONFIDENCE: bool;

    /// Whether the entry holds something that can be used as a prediction.
    /// A tag match on an entry without an installed payload is a miss.
    fn is_installed(&self) -> bool;

    /// An entry is "pseudo-new" while its confidence is in the state an
    /// allocation leaves it in.
    fn is_pseudo_new(ctr: &SaturatingCounter) -> bool;

    /// Create a confidence counter for this kind of table.
    fn counter(bits: u8) -> SaturatingCounter {
        if Self::SIGNED_CONFIDENCE {
            SaturatingCounter::signed(bits)
        } else {
            SaturatingCounter::unsigned(bits)
        }
    }
}

/// Payload for direction (TAGE) tables: the direction lives in the sign of
/// the confidence counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Direction;
impl TablePayload for Direction {
    const SIGNED_CONFIDENCE: bool = true;
    fn is_installed(&self) -> bool { true }
    fn is_pseudo_new(ctr: &SaturatingCounter) -> bool { ctr.is_weak() }
}

/// Payload for target (ITTAGE) tables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Target(pub Option<usize>);
impl TablePayload for Target {
    const SIGNED_CONFIDENCE: bool = false;
    fn is_installed(&self) -> bool { self.0.is_some() }
    fn is_pseudo_new(ctr: &SaturatingCounter) -> bool { ctr.value() == 0 }
}

/// An entry in a tagged table.
#[derive(Clone, Debug, PartialEq)]
pub struct TaggedEntry<P: TablePayload> {
    /// [None] until the entry is first allocated
    pub tag: Option<u32>,
    pub ctr: SaturatingCounter,
    pub useful: SaturatingCounter,
    pub payload: P,
}
impl<P: TablePayload> TaggedEntry<P> {
    pub fn new(ctr_bits: u8, useful_bits: u8) -> Self {
        Self {
            tag: None,
            ctr: P::counter(ctr_bits),
            useful: SaturatingCounter::unsigned(useful_bits),
            payload: P::default(),
        }
    }

    pub fn tag_matches(&self, tag: u32) -> bool {
        self.tag == Some(tag) && self.payload.is_installed()
    }

    /// Overwrite this entry with a freshly allocated one.
    pub fn allocate(&mut self, tag: u32, ctr: i16, payload: P) {
        self.tag = Some(tag);
        self.ctr.set(ctr);
        self.useful.set(0);
        self.payload = payload;
    }

    /// Invalidate this entry.
    pub fn invalidate(&mut self) {
        self.tag = None;
        self.ctr.set(0);
        self.useful.set(0);
        self.payload = P::default();
    }

    pub fn is_pseudo_new(&self) -> bool {
        P::is_pseudo_new(&self.ctr)
    }
}

/// The index and tag computed for one tagged table at prediction time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct TableSlot {
    pub index: usize,
    pub tag: u32,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn target_entries_miss_until_installed() {
        let mut e: TaggedEntry<Target> = TaggedEntry::new(2, 1);
        e.tag = Some(5);
        assert!(!e.tag_matches(5));
        e.allocate(5, 0, Target(Some(0x4000)));
        assert!(e.tag_matches(5));
        assert!(!e.tag_matches(6));
        assert!(e.is_pseudo_new());
    }

    #[test]
    fn direction_allocation_resets_usefulness() {
        let mut e: TaggedEntry<Direction> = TaggedEntry::new(3, 2);
        e.useful.set(3);
        e.allocate(9, -1, Direction);
        assert_eq!(e.useful.value(), 0);
        assert_eq!(e.ctr.value(), -1);
        assert!(e.is_pseudo_new());
        e.invalidate();
        assert!(!e.tag_matches(9));
    }
}
