
pub mod component;
pub mod config;
pub mod ladder;
pub mod stat;

pub use component::*;
pub use config::*;
pub use ladder::*;
pub use stat::*;

use crate::history::*;
use crate::Outcome;
use crate::predictor::StatefulPredictor;
use crate::predictor::counter::*;
use crate::predictor::table::*;

/// Identifies a particular TAGE component.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TAGEProvider {
    /// The base component
    #[default]
    Base,
    /// A tagged component
    Tagged(usize),
}

/// Coarse confidence of the counter that provided a prediction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Confidence {
    /// The counter sits next to the taken/not-taken boundary
    #[default]
    Low = 0,
    Medium = 1,
    /// The counter is saturated
    High = 2,
}
impl Confidence {
    pub fn of(ctr: &SaturatingCounter) -> Self {
        if ctr.is_saturated() {
            Self::High
        } else if ctr.is_weak() {
            Self::Low
        } else {
            Self::Medium
        }
    }
}

/// Everything a direction prediction depends on, kept until commit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TAGEPrediction {
    /// Index and tag computed for each tagged component
    pub slots: Vec<TableSlot>,

    /// Index into the base component
    pub base_idx: usize,

    /// Longest matching tagged component
    pub hit: Option<usize>,

    /// Next matching tagged component below `hit`
    pub alt: Option<usize>,

    /// The component providing the prediction
    pub provider: TAGEProvider,
    pub source: ProviderSource,

    /// The predicted direction
    pub outcome: Outcome,

    /// Direction from the longest matching component (or the base)
    pub longest_outcome: Outcome,

    /// Direction from the alternate component (or the base)
    pub alt_outcome: Outcome,

    /// The longest match was in a newly-allocated state
    pub pseudo_new: bool,

    pub confidence: Confidence,

    /// Extra bit keying the use-alt-on-new table
    pub class: bool,
}

/// The "TAgged GEometric history length" direction predictor.
///
/// See "A case for (partially) TAgged GEometric history length branch
/// prediction" (Seznec, 2006).
#[derive(Clone, Debug)]
pub struct TAGEPredictor {
    /// Base component
    pub base: TAGEBaseComponent,

    /// Tagged components
    pub core: TAGECore<Direction>,
}
impl TAGEPredictor {
    pub fn new(base: TAGEBaseConfig, cfg: TAGEConfig) -> Self {
        Self {
            base: TAGEBaseComponent::new(base),
            core: TAGECore::new(cfg),
        }
    }

    pub fn stat(&self) -> &TAGEStats { &self.core.stat }

    pub fn predict(&self, pc: usize, path: &PathHistory, class: bool) -> TAGEPrediction {
        let slots = self.core.compute_slots(pc, path);
        let (hit, alt) = self.core.find_matches(&slots);
        let base_idx = self.base.get_index(pc);

        let (alt_provider, alt_ctr) = match alt {
            Some(bank) => (TAGEProvider::Tagged(bank), &self.core.entry(bank, &slots).ctr),
            None => (TAGEProvider::Base, self.base.get_entry(base_idx)),
        };

        let mut res = TAGEPrediction {
            base_idx,
            hit,
            alt,
            provider: alt_provider,
            source: ProviderSource::Fallback,
            outcome: alt_ctr.predict(),
            longest_outcome: alt_ctr.predict(),
            alt_outcome: alt_ctr.predict(),
            pseudo_new: false,
            confidence: Confidence::of(alt_ctr),
            class,
            slots: Vec::new(),
        };

        if let Some(bank) = hit {
            let entry = self.core.entry(bank, &slots);
            res.longest_outcome = entry.ctr.predict();
            res.pseudo_new = entry.is_pseudo_new();
            if res.pseudo_new && self.core.prefers_alt(bank, class) {
                res.source = ProviderSource::AltMatch;
            } else {
                res.provider = TAGEProvider::Tagged(bank);
                res.source = ProviderSource::LongestMatch;
                res.outcome = res.longest_outcome;
                res.confidence = Confidence::of(&entry.ctr);
            }
        }
        res.slots = slots;
        res
    }

    fn train_fallback(&mut self, pred: &TAGEPrediction, outcome: Outcome) {
        match pred.alt {
            Some(bank) => self.core.entry_mut(bank, &pred.slots).ctr.update(outcome),
            None => self.base.get_entry_mut(pred.base_idx).update(outcome),
        }
    }

    /// Learn from a resolved branch.
    ///
    /// `final_outcome` is the prediction the pipeline acted on, which may
    /// come from a component layered on top of TAGE. New entries are only
    /// allocated when both TAGE and the final prediction were wrong.
    pub fn commit(&mut self,
        pred: &TAGEPrediction,
        outcome: Outcome,
        final_outcome: Outcome,
        skip: bool,
    )
    {
        let mispredicted = pred.outcome != outcome;
        self.core.stat.record(pred.source, pred.hit, !mispredicted);

        if let Some(bank) = pred.hit {
            if pred.pseudo_new && pred.longest_outcome != pred.alt_outcome {
                self.core.update_use_alt(bank, pred.class, pred.alt_outcome == outcome);
            }
        }

        // NOTE: A newly allocated entry that was right on its own is given
        // a chance to build confidence before anything longer is allocated.
        let new_entry_correct = pred.pseudo_new && pred.longest_outcome == outcome;
        if mispredicted && final_outcome != outcome && !new_entry_correct {
            let ctr = if outcome.is_taken() { 0 } else { -1 };
            self.core.allocate(&pred.slots, pred.hit, skip, Direction, ctr);
        }

        match pred.hit {
            Some(bank) => {
                let entry = self.core.entry_mut(bank, &pred.slots);
                let useless = entry.useful.value() == 0;
                entry.ctr.update(outcome);
                if useless {
                    self.train_fallback(pred, outcome);
                }
                if pred.longest_outcome != pred.alt_outcome {
                    self.core.update_usefulness(bank, &pred.slots,
                        pred.longest_outcome == outcome);
                }
            },
            None => {
                self.base.get_entry_mut(pred.base_idx).update(outcome);
            },
        }
        self.core.tick();
    }

    pub fn reset(&mut self) {
        self.base.reset();
        self.core.reset();
    }
}

impl FoldedHistory for TAGEPredictor {
    fn update_history(&mut self, ghr: &HistoryRegister) {
        self.core.update_history(ghr);
    }
    fn revert_history(&mut self, ghr: &HistoryRegister) {
        self.core.revert_history(ghr);
    }
}
