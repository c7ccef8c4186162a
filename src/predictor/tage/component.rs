
use crate::history::*;
use crate::predictor::counter::*;
use crate::predictor::table::*;
use crate::predictor::tage::config::*;

/// The base component of the direction predictor: a PC-indexed table of
/// unsigned saturating counters, used when no tagged component hits.
#[derive(Clone, Debug)]
pub struct TAGEBaseComponent {
    pub cfg: TAGEBaseConfig,

    /// A table of saturating counters
    pub data: Vec<SaturatingCounter>,
}
impl TAGEBaseComponent {
    pub fn new(cfg: TAGEBaseConfig) -> Self {
        let data = vec![SaturatingCounter::unsigned(cfg.ctr_bits); cfg.size()];
        Self { cfg, data }
    }

    pub fn get_index(&self, pc: usize) -> usize {
        (pc ^ (pc >> self.cfg.log_size)) & self.index_mask()
    }

    pub fn reset(&mut self) {
        self.data.iter_mut().for_each(|c| c.set(0));
    }
}
impl PredictorTable for TAGEBaseComponent {
    type Entry = SaturatingCounter;

    fn size(&self) -> usize { self.data.len() }

    fn get_entry(&self, idx: usize) -> &SaturatingCounter {
        &self.data[idx & self.index_mask()]
    }
    fn get_entry_mut(&mut self, idx: usize) -> &mut SaturatingCounter {
        let index = idx & self.index_mask();
        &mut self.data[index]
    }
}

/// A tagged component: a table of [TaggedEntry] indexed and tagged by a
/// hash of the program counter with folded global history.
#[derive(Clone, Debug)]
pub struct TAGEComponent<P: TablePayload> {
    pub cfg: TAGEComponentConfig,

    /// Position of this component in the ladder (0 is the shortest history)
    pub bank: usize,

    /// Table of entries
    pub data: Vec<TaggedEntry<P>>,

    /// Folded global history used to form an index
    pub csr_index: FoldedHistoryRegister,

    /// Folded global history used to form a tag. The second register is
    /// one bit narrower so the two folds do not cancel.
    pub csr_tag: [FoldedHistoryRegister; 2],
}
impl<P: TablePayload> TAGEComponent<P> {
    pub fn new(bank: usize, cfg: TAGEComponentConfig, ctr_bits: u8, useful_bits: u8)
        -> Self
    {
        let size = 1usize << cfg.log_size;
        let hlen = cfg.history_len;
        let tag_bits = cfg.tag_bits as usize;
        Self {
            bank,
            data: vec![TaggedEntry::new(ctr_bits, useful_bits); size],
            csr_index: FoldedHistoryRegister::new(cfg.log_size as usize, hlen),
            csr_tag: [
                FoldedHistoryRegister::new(tag_bits, hlen),
                FoldedHistoryRegister::new(tag_bits - 1, hlen),
            ],
            cfg,
        }
    }

    fn tag_mask(&self) -> usize {
        (1 << self.cfg.tag_bits) - 1
    }

    /// Hash the program counter, the folded history and a slice of path
    /// history into an index.
    pub fn get_index(&self, pc: usize, path: &PathHistory) -> usize {
        let log_size = self.cfg.log_size as usize;
        let shift = log_size.abs_diff(self.bank) + 1;
        let path_len = self.cfg.history_len.min(path.bits() as usize);
        let path_bits = path.value() & ((1u64 << path_len) - 1);
        let res = pc
            ^ (pc >> shift)
            ^ self.csr_index.output_usize()
            ^ fold_bits(path_bits, log_size);
        res & self.index_mask()
    }

    pub fn get_tag(&self, pc: usize) -> u32 {
        let res = pc
            ^ self.csr_tag[0].output_usize()
            ^ (self.csr_tag[1].output_usize() << 1);
        (res & self.tag_mask()) as u32
    }

    pub fn slot(&self, pc: usize, path: &PathHistory) -> TableSlot {
        TableSlot { index: self.get_index(pc, path), tag: self.get_tag(pc) }
    }

    /// Halve the 'useful' counter for all entries in this component.
    pub fn age_useful_bits(&mut self) {
        for entry in self.data.iter_mut() {
            entry.useful.halve();
        }
    }

    pub fn reset(&mut self) {
        self.data.iter_mut().for_each(|e| e.invalidate());
        self.csr_index.clear();
        self.csr_tag.iter_mut().for_each(|c| c.clear());
    }
}

impl<P: TablePayload> PredictorTable for TAGEComponent<P> {
    type Entry = TaggedEntry<P>;

    fn size(&self) -> usize { self.data.len() }

    fn get_entry(&self, idx: usize) -> &TaggedEntry<P> {
        &self.data[idx & self.index_mask()]
    }
    fn get_entry_mut(&mut self, idx: usize) -> &mut TaggedEntry<P> {
        let index = idx & self.index_mask();
        &mut self.data[index]
    }
}

impl<P: TablePayload> TaggedPredictorTable for TAGEComponent<P> {
    fn lookup(&self, idx: usize, tag: u32) -> Option<&TaggedEntry<P>> {
        let entry = self.get_entry(idx);
        if entry.tag_matches(tag) { Some(entry) } else { None }
    }
}

impl<P: TablePayload> FoldedHistory for TAGEComponent<P> {
    fn update_history(&mut self, ghr: &HistoryRegister) {
        self.csr_index.update(ghr);
        self.csr_tag.iter_mut().for_each(|c| c.update(ghr));
    }
    fn revert_history(&mut self, ghr: &HistoryRegister) {
        self.csr_index.revert(ghr);
        self.csr_tag.iter_mut().for_each(|c| c.revert(ghr));
    }
}

/// XOR-fold a value into `bits` bits.
pub fn fold_bits(mut value: u64, bits: usize) -> usize {
    let mask = (1u64 << bits) - 1;
    let mut res = 0;
    while value != 0 {
        res ^= value & mask;
        value >>= bits;
    }
    res as usize
}
