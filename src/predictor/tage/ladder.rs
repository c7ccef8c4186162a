//! Machinery shared by the direction and target predictors: the ladder of
//! tagged components, provider selection, the use-alt-on-new meta table,
//! allocation and aging.

use crate::history::*;
use crate::predictor::counter::*;
use crate::predictor::table::*;
use crate::predictor::tage::component::*;
use crate::predictor::tage::config::*;
use crate::predictor::tage::stat::*;

/// A ladder of tagged components with geometrically increasing history
/// lengths, generic over the payload stored in each entry.
///
/// Component 0 has the shortest history. Predictors using this keep a
/// [TableSlot] for every component in their per-branch record so that
/// commit-time updates touch exactly the entries seen at prediction time.
#[derive(Clone, Debug)]
pub struct TAGECore<P: TablePayload> {
    pub cfg: TAGEConfig,

    /// Tagged components
    pub comp: Vec<TAGEComponent<P>>,

    /// "Use alternate on newly allocated" counters
    pub use_alt: Vec<SaturatingCounter>,

    pub stat: TAGEStats,
}

impl<P: TablePayload> TAGECore<P> {
    /// Build the tables. The configuration is expected to be validated.
    pub fn new(cfg: TAGEConfig) -> Self {
        let comp = cfg.comp.iter().enumerate()
            .map(|(bank, c)| TAGEComponent::new(bank, c.clone(), cfg.ctr_bits, cfg.useful_bits))
            .collect();
        let use_alt = vec![
            SaturatingCounter::signed(cfg.use_alt_bits);
            cfg.use_alt_buckets * 2
        ];
        let stat = TAGEStats::new(cfg.num_tables());
        Self { cfg, comp, use_alt, stat }
    }

    /// Return the number of tagged components.
    pub fn num_tables(&self) -> usize { self.comp.len() }

    /// Compute the index and tag for every component.
    pub fn compute_slots(&self, pc: usize, path: &PathHistory) -> Vec<TableSlot> {
        self.comp.iter().map(|c| c.slot(pc, path)).collect()
    }

    /// Scan from the longest history down and return the longest matching
    /// component and the next (alternate) matching component.
    pub fn find_matches(&self, slots: &[TableSlot]) -> (Option<usize>, Option<usize>) {
        let mut hits = self.comp.iter().zip(slots).enumerate().rev()
            .filter(|(_, (c, s))| c.lookup(s.index, s.tag).is_some())
            .map(|(bank, _)| bank);
        let hit = hits.next();
        let alt = hits.next();
        (hit, alt)
    }

    pub fn entry(&self, bank: usize, slots: &[TableSlot]) -> &TaggedEntry<P> {
        self.comp[bank].get_entry(slots[bank].index)
    }

    pub fn entry_mut(&mut self, bank: usize, slots: &[TableSlot]) -> &mut TaggedEntry<P> {
        self.comp[bank].get_entry_mut(slots[bank].index)
    }

    /// The meta counter is keyed by a coarse bucket of the longest matching
    /// component and one bit describing the branch.
    pub fn use_alt_index(&self, bank: usize, class: bool) -> usize {
        let bucket = bank * self.cfg.use_alt_buckets / self.num_tables();
        bucket * 2 + class as usize
    }

    /// Returns 'true' if a pseudo-new entry in `bank` should defer to the
    /// alternate prediction.
    pub fn prefers_alt(&self, bank: usize, class: bool) -> bool {
        self.use_alt[self.use_alt_index(bank, class)].value() >= 0
    }

    pub fn update_use_alt(&mut self, bank: usize, class: bool, alt_correct: bool) {
        let idx = self.use_alt_index(bank, class);
        self.use_alt[idx].step(alt_correct);
    }

    pub fn update_usefulness(&mut self, bank: usize, slots: &[TableSlot], useful: bool) {
        self.entry_mut(bank, slots).useful.step(useful);
    }

    /// Try to allocate a new entry in a component with a longer history
    /// than `hit`.
    ///
    /// The scan starts just past `hit` (one further when `skip` is set) and
    /// visits at most `max_alloc_scan` components. The first candidate
    /// with a zero 'useful' counter is overwritten; every candidate passed
    /// over has its 'useful' counter decremented instead. Returns the
    /// component that received the new entry.
    pub fn allocate(&mut self,
        slots: &[TableSlot],
        hit: Option<usize>,
        skip: bool,
        payload: P,
        ctr: i16,
    ) -> Option<usize>
    {
        let n = self.num_tables();
        let first = hit.map_or(0, |bank| bank + 1);
        if first >= n {
            return None;
        }
        let start = if skip { (first + 1).min(n - 1) } else { first };

        for bank in (start..n).take(self.cfg.max_alloc_scan) {
            let slot = slots[bank];
            let entry = self.comp[bank].get_entry_mut(slot.index);
            if entry.useful.value() == 0 {
                entry.allocate(slot.tag, ctr, payload);
                self.stat.alcs += 1;
                log::debug!("allocated comp{} [{:#x}] tag {:#x}", bank, slot.index, slot.tag);
                return Some(bank);
            }
            entry.useful.decrement();
        }
        self.stat.failed_alcs += 1;
        None
    }

    /// Count one commit, periodically aging every 'useful' counter.
    pub fn tick(&mut self) {
        self.stat.clk += 1;
        if self.stat.clk % self.cfg.useful_reset_period == 0 {
            self.comp.iter_mut().for_each(|c| c.age_useful_bits());
            self.stat.resets += 1;
            log::debug!("aged useful counters at commit {}", self.stat.clk);
        }
    }

    pub fn reset(&mut self) {
        self.comp.iter_mut().for_each(|c| c.reset());
        self.use_alt.iter_mut().for_each(|c| c.set(0));
        self.stat = TAGEStats::new(self.num_tables());
    }
}

impl<P: TablePayload> FoldedHistory for TAGECore<P> {
    fn update_history(&mut self, ghr: &HistoryRegister) {
        self.comp.iter_mut().for_each(|c| c.update_history(ghr));
    }
    fn revert_history(&mut self, ghr: &HistoryRegister) {
        self.comp.iter_mut().for_each(|c| c.revert_history(ghr));
    }
}
