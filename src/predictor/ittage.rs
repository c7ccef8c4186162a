//! The ITTAGE indirect target predictor.
//!
//! See "A 64-Kbytes ITTAGE indirect branch predictor" (Seznec, 2011).
//! The tables are the same ladder used by TAGE with a target address in
//! every entry. When no table hits, no prediction is made and the host is
//! expected to fall back on something else (e.g. a BTB).

use rand::Rng;
use serde::{ Deserialize, Serialize };

use crate::error::{ ConfigError, PredictorError };
use crate::history::*;
use crate::random::RandomState;
use crate::{ BranchKind, Outcome };
use crate::predictor::*;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ITTAGEConfig {
    pub tage: TAGEConfig,

    /// History bits inserted by a conditional branch (0 or 1)
    pub hist_bits_conditional: usize,

    /// History bits inserted by an indirect jump
    pub hist_bits_ind_branch: usize,

    /// History bits inserted by an indirect call
    pub hist_bits_ind_call: usize,

    /// History bits inserted by a direct call
    pub hist_bits_call: usize,

    pub seed: Option<u64>,
}
impl Default for ITTAGEConfig {
    fn default() -> Self {
        Self {
            tage: TAGEConfig {
                ctr_bits: 2,
                useful_bits: 1,
                ..TAGEConfig::geometric(4, 640, 12, 9, 9)
            },
            hist_bits_conditional: 1,
            hist_bits_ind_branch: 2,
            hist_bits_ind_call: 2,
            hist_bits_call: 1,
            seed: None,
        }
    }
}
impl ITTAGEConfig {
    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tage.validate()?;
        if self.hist_bits_conditional > 1 {
            return Err(ConfigError::Invalid(
                "conditional branches insert at most one history bit".into()
            ));
        }
        for (what, bits) in [
            ("indirect jump", self.hist_bits_ind_branch),
            ("indirect call", self.hist_bits_ind_call),
            ("direct call", self.hist_bits_call),
        ] {
            if bits > 64 {
                return Err(ConfigError::Invalid(
                    format!("{} inserts {} history bits (at most 64)", what, bits)
                ));
            }
        }
        Ok(())
    }

    pub fn build(self) -> Result<ITTAGEPredictor, ConfigError> {
        self.validate()?;
        Ok(ITTAGEPredictor::new(self))
    }
}

/// Everything a target prediction depends on, kept until commit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ITTAGELookup {
    pub slots: Vec<TableSlot>,

    /// Longest matching component
    pub hit: Option<usize>,

    /// Next matching component below `hit`
    pub alt: Option<usize>,

    pub source: ProviderSource,
    pub longest_target: Option<usize>,
    pub alt_target: Option<usize>,
    pub pseudo_new: bool,

    /// The predicted target ([None] when nothing hit)
    pub target: Option<usize>,

    pub class: bool,
}

/// Per-branch record for [ITTAGEPredictor].
#[derive(Debug, Default)]
pub struct ITTAGEInfo {
    pub pc: usize,
    pub is_conditional: bool,
    pub state: RecordState,
    pub lookup: ITTAGELookup,
    pub spec: Option<SpeculativeUpdate>,
    pub alloc_skip: bool,
}

#[derive(Clone, Debug)]
pub struct ITTAGEPredictor {
    pub cfg: ITTAGEConfig,
    pub core: TAGECore<Target>,
    pub hist: SpeculativeHistory,
    pub rng: RandomState,
}

impl ITTAGEPredictor {
    fn new(cfg: ITTAGEConfig) -> Self {
        Self {
            core: TAGECore::new(cfg.tage.clone()),
            hist: SpeculativeHistory::new(
                cfg.tage.history_buffer_bits,
                cfg.tage.path_bits,
                cfg.tage.longest_history(),
            ),
            rng: RandomState::from_seed_option(cfg.seed),
            cfg,
        }
    }

    pub fn stat(&self) -> &TAGEStats { &self.core.stat }

    fn target_of(&self, bank: usize, slots: &[TableSlot]) -> Option<usize> {
        self.core.entry(bank, slots).payload.0
    }

    fn lookup(&self, pc: usize, is_conditional: bool) -> ITTAGEInfo {
        let slots = self.core.compute_slots(pc, &self.hist.path);
        let (hit, alt) = self.core.find_matches(&slots);
        let mut res = ITTAGELookup { hit, alt, class: is_conditional, ..Default::default() };

        if let Some(bank) = alt {
            res.alt_target = self.target_of(bank, &slots);
        }
        if let Some(bank) = hit {
            res.longest_target = self.target_of(bank, &slots);
            res.pseudo_new = self.core.entry(bank, &slots).is_pseudo_new();
            if res.pseudo_new && alt.is_some() && self.core.prefers_alt(bank, is_conditional) {
                res.source = ProviderSource::AltMatch;
                res.target = res.alt_target;
            } else {
                res.source = ProviderSource::LongestMatch;
                res.target = res.longest_target;
            }
        }
        res.slots = slots;
        log::trace!("predict {:#x}: hit {:?} alt {:?} target {:x?}",
            pc, res.hit, res.alt, res.target);

        ITTAGEInfo {
            pc,
            is_conditional,
            state: RecordState::Finalized,
            lookup: res,
            ..Default::default()
        }
    }

    fn finalize(&self, info: &mut ITTAGEInfo, pc: usize) {
        if info.state == RecordState::Provisional {
            *info = self.lookup(pc, info.is_conditional);
        }
    }

    /// The bits a branch inserts into global history.
    fn history_bits(&self, pc: usize, kind: BranchKind, taken: Outcome, target: usize)
        -> (u64, usize)
    {
        let nbits = match kind {
            BranchKind::DirectBranch => {
                return (taken.is_taken() as u64, self.cfg.hist_bits_conditional);
            },
            BranchKind::IndirectJump => self.cfg.hist_bits_ind_branch,
            BranchKind::DirectCall => self.cfg.hist_bits_call,
            BranchKind::IndirectCall => self.cfg.hist_bits_ind_call,
            BranchKind::DirectJump | BranchKind::Return => 0,
        };
        let mask = if nbits >= 64 { u64::MAX } else { (1u64 << nbits) - 1 };
        let hash = (target ^ (target >> 3) ^ pc) as u64;
        (hash & mask, nbits)
    }

    fn apply(&mut self,
        info: &mut ITTAGEInfo,
        pc: usize,
        kind: BranchKind,
        taken: Outcome,
        target: usize,
    ) -> Result<(), PredictorError>
    {
        let seed = self.rng;
        let alloc_skip = self.cfg.tage.alloc_skip && self.rng.gen_ratio(1, 4);
        let (hist, nbits) = self.history_bits(pc, kind, taken, target);
        let checkpoint = match report(self.hist.append(hist, nbits, pc, &mut [&mut self.core])) {
            Ok(cp) => cp,
            Err(e) => {
                self.rng = seed;
                return Err(e);
            },
        };
        info.alloc_skip = alloc_skip;
        info.spec = Some(SpeculativeUpdate { checkpoint, seed });
        Ok(())
    }

    fn undo(&mut self, info: &mut ITTAGEInfo) -> Result<(), PredictorError> {
        let Some(spec) = info.spec else { return Ok(()) };
        report(self.hist.rollback(&spec.checkpoint, &mut [&mut self.core]))?;
        self.rng = spec.seed;
        info.spec = None;
        Ok(())
    }

    fn train(&mut self, info: &ITTAGEInfo, target: usize) {
        let l = &info.lookup;
        let resolved = Some(target);
        let correct = l.target == resolved;
        self.core.stat.record(l.source, l.hit, correct);

        if let Some(bank) = l.hit {
            if l.pseudo_new && l.longest_target != l.alt_target
                && (l.longest_target == resolved || l.alt_target == resolved)
            {
                self.core.update_use_alt(bank, l.class, l.alt_target == resolved);
            }
        }

        // A missing prediction counts as a misprediction
        if !correct {
            self.core.allocate(&l.slots, l.hit, info.alloc_skip, Target(resolved), 0);
        }

        if let Some(bank) = l.hit {
            let entry = self.core.entry_mut(bank, &l.slots);
            if l.longest_target == resolved {
                entry.ctr.increment();
            } else {
                entry.ctr.decrement();
                if entry.ctr.value() == 0 {
                    log::debug!("comp{} [{:#x}] target {:x?} replaced with {:#x}",
                        bank, l.slots[bank].index, entry.payload.0, target);
                    entry.payload = Target(resolved);
                    self.core.stat.target_replacements += 1;
                }
            }
            if l.longest_target != l.alt_target {
                self.core.update_usefulness(bank, &l.slots, l.longest_target == resolved);
            }
        }
        self.core.tick();
    }
}

impl SpeculativePredictor for ITTAGEPredictor {
    type Info = ITTAGEInfo;
    type Prediction = Option<usize>;

    fn name(&self) -> &'static str { "ITTAGE" }

    fn predict(&self, pc: usize, is_conditional: bool) -> (Option<usize>, ITTAGEInfo) {
        let info = self.lookup(pc, is_conditional);
        (info.lookup.target, info)
    }

    fn placeholder(&self, pc: usize, is_conditional: bool) -> ITTAGEInfo {
        ITTAGEInfo { pc, is_conditional, ..Default::default() }
    }

    fn update_speculative_history(&mut self,
        info: &mut ITTAGEInfo,
        pc: usize,
        kind: BranchKind,
        taken: Outcome,
        target: usize,
    ) -> Result<(), PredictorError>
    {
        self.finalize(info, pc);
        self.undo(info)?;
        self.apply(info, pc, kind, taken, target)
    }

    fn repair(&mut self,
        info: &mut ITTAGEInfo,
        pc: usize,
        kind: BranchKind,
        taken: Outcome,
        target: usize,
    ) -> Result<(), PredictorError>
    {
        log::debug!("repair {:#x}: predicted {:x?}, resolved {:#x}",
            pc, info.lookup.target, target);
        self.update_speculative_history(info, pc, kind, taken, target)
    }

    fn commit(&mut self,
        mut info: ITTAGEInfo,
        pc: usize,
        kind: BranchKind,
        taken: Outcome,
        target: usize,
    ) -> Result<(), PredictorError>
    {
        self.finalize(&mut info, pc);
        if info.spec.is_none() {
            self.apply(&mut info, pc, kind, taken, target)?;
        }
        if kind.is_indirect_no_return() {
            self.train(&info, target);
        }
        if let Some(spec) = &info.spec {
            self.hist.retire(&spec.checkpoint);
        }
        Ok(())
    }

    fn squash(&mut self, mut info: ITTAGEInfo) -> Result<(), PredictorError> {
        self.undo(&mut info)
    }

    fn reset(&mut self) {
        self.core.reset();
        self.hist.clear();
        self.rng = RandomState::from_seed_option(self.cfg.seed);
    }
}
