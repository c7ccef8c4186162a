//! A loop predictor.
//!
//! Loops with a constant trip count are recognized after the same count has
//! been observed a few times in a row; the predictor then knows exactly
//! which iteration exits the loop.

use serde::{ Deserialize, Serialize };

use crate::error::ConfigError;
use crate::Outcome;
use crate::predictor::counter::*;
use crate::predictor::tage::config::check_width;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// log2 of the number of sets
    pub log_sets: u8,

    /// Number of ways in each set
    pub ways: usize,

    pub tag_bits: u8,

    /// Width of the iteration and trip counters
    pub iter_bits: u8,

    /// Width of the trip count confidence counter
    pub conf_bits: u8,

    /// Width of the replacement age counter
    pub age_bits: u8,

    /// log2 of the number of "loop is beneficial" meta counters
    pub meta_log_size: u8,

    pub meta_bits: u8,
}
impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            log_sets: 4,
            ways: 4,
            tag_bits: 10,
            iter_bits: 10,
            conf_bits: 2,
            age_bits: 3,
            meta_log_size: 0,
            meta_bits: 7,
        }
    }
}
impl LoopConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ways == 0 {
            return Err(ConfigError::ZeroSizedTable { what: "loop predictor".into() });
        }
        if self.log_sets >= 24 || self.meta_log_size >= 24 {
            return Err(ConfigError::Invalid("loop predictor tables are too large".into()));
        }
        check_width("loop tag", self.tag_bits, 31)?;
        check_width("loop iteration counter", self.iter_bits, 15)?;
        check_width("loop confidence counter", self.conf_bits, SaturatingCounter::MAX_BITS)?;
        check_width("loop age counter", self.age_bits, SaturatingCounter::MAX_BITS)?;
        check_width("loop meta counter", self.meta_bits, SaturatingCounter::MAX_BITS)?;
        Ok(())
    }
}

/// An entry in the [LoopPredictor].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopEntry {
    pub tag: Option<u32>,

    /// Learned number of iterations (including the exit)
    pub trip: u16,

    /// Committed iteration count
    pub iter: u16,

    /// Iteration count including in-flight branches
    pub spec_iter: u16,

    /// Confidence in the trip count
    pub confidence: SaturatingCounter,

    /// Replacement age
    pub age: SaturatingCounter,

    /// Direction of the loop body
    pub dir: Outcome,
}
impl LoopEntry {
    fn new(cfg: &LoopConfig) -> Self {
        Self {
            tag: None,
            trip: 0,
            iter: 0,
            spec_iter: 0,
            confidence: SaturatingCounter::unsigned(cfg.conf_bits),
            age: SaturatingCounter::unsigned(cfg.age_bits),
            dir: Outcome::N,
        }
    }

    /// Forget the trip count, leaving the entry up for replacement.
    fn free(&mut self) {
        self.trip = 0;
        self.iter = 0;
        self.confidence.set(0);
        self.age.set(0);
    }
}

/// Result of looking up the loop predictor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopLookup {
    /// Entry holding this branch
    pub hit: Option<usize>,

    pub tag: u32,
    pub set: usize,

    /// The entry is confident in its trip count
    pub valid: bool,

    pub prediction: Outcome,

    /// Speculative iteration count at prediction time
    pub saved_iter: u16,
}

#[derive(Clone, Debug)]
pub struct LoopPredictor {
    pub cfg: LoopConfig,
    pub data: Vec<LoopEntry>,

    /// Tracks whether overriding with the loop predictor helps
    pub meta: Vec<SaturatingCounter>,
}
impl LoopPredictor {
    pub fn new(cfg: LoopConfig) -> Self {
        let data = vec![LoopEntry::new(&cfg); (1 << cfg.log_sets) * cfg.ways];
        let meta = vec![
            SaturatingCounter::signed(cfg.meta_bits).with_value(-1);
            1 << cfg.meta_log_size
        ];
        Self { cfg, data, meta }
    }

    fn iter_mask(&self) -> u16 {
        ((1u32 << self.cfg.iter_bits) - 1) as u16
    }

    pub fn get_set(&self, pc: usize) -> usize {
        (pc >> 2) & ((1 << self.cfg.log_sets) - 1)
    }

    pub fn get_tag(&self, pc: usize) -> u32 {
        ((pc >> (2 + self.cfg.log_sets as usize)) & ((1 << self.cfg.tag_bits) - 1)) as u32
    }

    fn meta_index(&self, pc: usize) -> usize {
        (pc >> 2) & (self.meta.len() - 1)
    }

    pub fn lookup(&self, pc: usize) -> LoopLookup {
        let set = self.get_set(pc);
        let tag = self.get_tag(pc);
        let mut res = LoopLookup { tag, set, ..Default::default() };
        let ways = self.cfg.ways;
        if let Some(idx) = (set * ways..(set + 1) * ways).find(|&i| self.data[i].tag == Some(tag)) {
            let entry = &self.data[idx];
            res.hit = Some(idx);
            res.valid = entry.trip != 0
                && entry.confidence.value() == entry.confidence.max();
            res.saved_iter = entry.spec_iter;
            res.prediction = if entry.spec_iter + 1 == entry.trip { !entry.dir } else { entry.dir };
        }
        res
    }

    /// Returns 'true' if the loop prediction should override TAGE.
    pub fn beneficial(&self, pc: usize) -> bool {
        self.meta[self.meta_index(pc)].value() >= 0
    }

    pub fn update_meta(&mut self, pc: usize, loop_correct: bool) {
        let idx = self.meta_index(pc);
        self.meta[idx].step(loop_correct);
    }

    fn entry_for(&mut self, lookup: &LoopLookup) -> Option<&mut LoopEntry> {
        let idx = lookup.hit?;
        let entry = &mut self.data[idx];
        if entry.tag == Some(lookup.tag) { Some(entry) } else { None }
    }

    /// Advance the speculative iteration count.
    pub fn speculative_update(&mut self, lookup: &LoopLookup, outcome: Outcome) {
        let mask = self.iter_mask();
        if let Some(entry) = self.entry_for(lookup) {
            if outcome != entry.dir {
                entry.spec_iter = 0;
            } else {
                entry.spec_iter = (entry.spec_iter + 1) & mask;
            }
        }
    }

    /// Undo [LoopPredictor::speculative_update].
    pub fn restore(&mut self, lookup: &LoopLookup) {
        if let Some(entry) = self.entry_for(lookup) {
            entry.spec_iter = lookup.saved_iter;
        }
    }

    /// Learn from a resolved branch. `alloc` and `way` were drawn when the
    /// branch updated history.
    pub fn commit(&mut self,
        lookup: &LoopLookup,
        outcome: Outcome,
        tage_outcome: Outcome,
        mispredicted: bool,
        alloc: bool,
        way: usize,
    )
    {
        let mask = self.iter_mask();
        if lookup.hit.is_some() {
            let Some(entry) = self.entry_for(lookup) else { return };
            if lookup.valid {
                if outcome != lookup.prediction {
                    log::debug!("loop entry {:?} freed after a wrong prediction", lookup.hit);
                    entry.free();
                    return;
                }
                if lookup.prediction != tage_outcome {
                    entry.age.increment();
                }
            }

            entry.iter = (entry.iter + 1) & mask;
            if entry.iter > entry.trip {
                entry.confidence.set(0);
                entry.trip = 0;
            }
            if outcome != entry.dir {
                if entry.iter == entry.trip {
                    entry.confidence.increment();
                    // Very short loops are left to TAGE
                    if entry.trip < 3 {
                        entry.dir = outcome;
                        entry.free();
                    }
                } else if entry.trip == 0 {
                    entry.confidence.set(0);
                    entry.trip = entry.iter;
                } else {
                    entry.trip = 0;
                    entry.confidence.set(0);
                }
                entry.iter = 0;
            }
        } else if mispredicted && alloc {
            let ways = self.cfg.ways;
            for i in 0..ways {
                let idx = lookup.set * ways + (way + i) % ways;
                let entry = &mut self.data[idx];
                if entry.age.value() == 0 {
                    *entry = LoopEntry::new(&self.cfg);
                    entry.tag = Some(lookup.tag);
                    entry.dir = !outcome;
                    entry.age.set(entry.age.max());
                    log::debug!("loop entry {} allocated for tag {:#x}", idx, lookup.tag);
                    break;
                }
                entry.age.decrement();
            }
        }
    }

    pub fn reset(&mut self) {
        let cfg = self.cfg.clone();
        *self = Self::new(cfg);
    }
}
