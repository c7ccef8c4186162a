//! TAGE with a loop predictor and a statistical corrector (TAGE-SC-L).
//!
//! See "TAGE-SC-L Branch Predictors Again" (Seznec, 2016).

use rand::Rng;
use serde::{ Deserialize, Serialize };

use crate::error::{ ConfigError, PredictorError };
use crate::history::*;
use crate::random::RandomState;
use crate::{ BranchKind, Outcome };
use crate::predictor::*;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TAGESCLConfig {
    pub base: TAGEBaseConfig,
    pub tage: TAGEConfig,

    /// Loop predictor (disabled when [None])
    pub loops: Option<LoopConfig>,

    /// Statistical corrector (disabled when [None])
    pub sc: Option<SCConfig>,

    /// Only taken branches insert history
    pub taken_only_history: bool,

    /// Seed for allocation decisions; drawn from entropy when [None]
    pub seed: Option<u64>,
}
impl Default for TAGESCLConfig {
    fn default() -> Self {
        Self {
            base: TAGEBaseConfig::default(),
            tage: TAGEConfig::default(),
            loops: Some(LoopConfig::default()),
            sc: Some(SCConfig::default()),
            taken_only_history: false,
            seed: None,
        }
    }
}
impl TAGESCLConfig {
    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// The longest history read by any component.
    pub fn longest_history(&self) -> usize {
        let sc = self.sc.as_ref().map_or(0, |sc| sc.longest_history());
        self.tage.longest_history().max(sc)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base.validate()?;
        self.tage.validate()?;
        if let Some(l) = &self.loops {
            l.validate()?;
        }
        if let Some(sc) = &self.sc {
            sc.validate()?;
        }
        self.tage.check_history_buffer(self.longest_history())
    }

    pub fn build(self) -> Result<TAGESCLPredictor, ConfigError> {
        self.validate()?;
        Ok(TAGESCLPredictor::new(self))
    }
}

/// Random draws a branch may need at commit, taken when it updates history.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Draws {
    /// Start allocation one component further out
    pub alloc_skip: bool,

    /// Allocate a loop entry if the branch was mispredicted
    pub loop_alloc: bool,

    /// First loop way considered for allocation
    pub loop_way: usize,
}

/// Per-branch record for [TAGESCLPredictor].
#[derive(Debug, Default)]
pub struct TAGESCLInfo {
    pub pc: usize,
    pub is_conditional: bool,
    pub state: RecordState,

    pub tage: TAGEPrediction,
    pub loop_lookup: LoopLookup,
    pub sc: SCLookup,

    /// Prediction before the corrector
    pub tage_or_loop: Outcome,

    /// Final prediction
    pub prediction: Outcome,

    /// Present while the branch's history contribution is applied
    pub spec: Option<SpeculativeUpdate>,
    pub draws: Draws,

    /// The loop predictor's speculative iteration count was advanced
    loop_applied: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TAGESCLStats {
    /// Committed conditional branches
    pub commits: usize,
    pub mispredicts: usize,

    /// Commits where the loop predictor replaced TAGE's prediction
    pub loop_overrides: usize,

    /// Commits where the corrector replaced the TAGE/loop prediction
    pub sc_overrides: usize,

    pub repairs: usize,
}

#[derive(Clone, Debug)]
pub struct TAGESCLPredictor {
    pub cfg: TAGESCLConfig,
    pub tage: TAGEPredictor,
    pub loops: Option<LoopPredictor>,
    pub sc: Option<StatisticalCorrector>,
    pub hist: SpeculativeHistory,
    pub rng: RandomState,
    pub stat: TAGESCLStats,
}

impl TAGESCLPredictor {
    fn new(cfg: TAGESCLConfig) -> Self {
        Self {
            tage: TAGEPredictor::new(cfg.base.clone(), cfg.tage.clone()),
            loops: cfg.loops.clone().map(LoopPredictor::new),
            sc: cfg.sc.clone().map(StatisticalCorrector::new),
            hist: SpeculativeHistory::new(
                cfg.tage.history_buffer_bits,
                cfg.tage.path_bits,
                cfg.longest_history(),
            ),
            rng: RandomState::from_seed_option(cfg.seed),
            stat: TAGESCLStats::default(),
            cfg,
        }
    }

    pub fn tage_stat(&self) -> &TAGEStats { self.tage.stat() }

    fn lookup(&self, pc: usize, is_conditional: bool) -> TAGESCLInfo {
        let path = &self.hist.path;
        let tage = self.tage.predict(pc, path, is_conditional);

        // The loop predictor overrides TAGE once it has proven itself
        let mut tage_or_loop = tage.outcome;
        let loop_lookup = match &self.loops {
            Some(lp) => {
                let l = lp.lookup(pc);
                if l.valid && lp.beneficial(pc) {
                    tage_or_loop = l.prediction;
                }
                l
            },
            None => LoopLookup::default(),
        };

        let sc = match &self.sc {
            Some(sc) => sc.predict(pc, &tage, tage_or_loop, path),
            None => SCLookup { prediction: tage_or_loop, ..Default::default() },
        };

        log::trace!("predict {:#x}: tage {:?} ({:?}) loop {:?} final {:?}",
            pc, tage.outcome, tage.provider, loop_lookup.valid, sc.prediction);

        TAGESCLInfo {
            pc,
            is_conditional,
            state: RecordState::Finalized,
            prediction: sc.prediction,
            tage,
            loop_lookup,
            sc,
            tage_or_loop,
            ..Default::default()
        }
    }

    /// Compute the prediction for a record created as a placeholder.
    fn finalize(&self, info: &mut TAGESCLInfo, pc: usize) {
        if info.state == RecordState::Provisional {
            *info = self.lookup(pc, info.is_conditional);
        }
    }

    fn draw(&mut self) -> Draws {
        let alloc_skip = self.cfg.tage.alloc_skip && self.rng.gen_ratio(1, 4);
        match &self.loops {
            Some(lp) => Draws {
                alloc_skip,
                loop_alloc: self.rng.gen_ratio(1, 4),
                loop_way: self.rng.gen_range(0..lp.cfg.ways),
            },
            None => Draws { alloc_skip, ..Default::default() },
        }
    }

    /// The bits a branch inserts into global history.
    fn history_bits(&self, taken: Outcome, pc: usize, target: usize) -> (u64, usize) {
        if !self.cfg.taken_only_history {
            (taken.is_taken() as u64, 1)
        } else if taken.is_taken() {
            ((((pc >> 2) ^ (target >> 2)) & 1) as u64, 1)
        } else {
            (0, 0)
        }
    }

    fn apply(&mut self,
        info: &mut TAGESCLInfo,
        pc: usize,
        kind: BranchKind,
        taken: Outcome,
        target: usize,
    ) -> Result<(), PredictorError>
    {
        let seed = self.rng;
        let draws = self.draw();
        let (hist, nbits) = self.history_bits(taken, pc, target);

        let mut folds: Vec<&mut dyn FoldedHistory> = vec![&mut self.tage];
        if let Some(sc) = self.sc.as_mut() {
            folds.push(sc);
        }
        let checkpoint = match report(self.hist.append(hist, nbits, pc, &mut folds)) {
            Ok(cp) => cp,
            Err(e) => {
                self.rng = seed;
                return Err(e);
            },
        };

        if kind.is_conditional() {
            if let Some(lp) = self.loops.as_mut() {
                lp.speculative_update(&info.loop_lookup, taken);
                info.loop_applied = true;
            }
        }
        info.draws = draws;
        info.spec = Some(SpeculativeUpdate { checkpoint, seed });
        Ok(())
    }

    fn undo(&mut self, info: &mut TAGESCLInfo) -> Result<(), PredictorError> {
        let Some(spec) = info.spec else { return Ok(()) };

        let mut folds: Vec<&mut dyn FoldedHistory> = vec![&mut self.tage];
        if let Some(sc) = self.sc.as_mut() {
            folds.push(sc);
        }
        report(self.hist.rollback(&spec.checkpoint, &mut folds))?;

        self.rng = spec.seed;
        if info.loop_applied {
            if let Some(lp) = self.loops.as_mut() {
                lp.restore(&info.loop_lookup);
            }
            info.loop_applied = false;
        }
        info.spec = None;
        Ok(())
    }

    fn train(&mut self, info: &TAGESCLInfo, pc: usize, outcome: Outcome) {
        let mispredicted = info.prediction != outcome;
        self.stat.commits += 1;
        if mispredicted {
            self.stat.mispredicts += 1;
        }
        if info.tage_or_loop != info.tage.outcome {
            self.stat.loop_overrides += 1;
        }
        if info.sc.overridden {
            self.stat.sc_overrides += 1;
        }

        if let Some(sc) = self.sc.as_mut() {
            sc.commit(&info.sc, outcome);
        }

        if let Some(lp) = self.loops.as_mut() {
            let l = &info.loop_lookup;
            if l.valid && l.prediction != info.prediction {
                lp.update_meta(pc, l.prediction == outcome);
            }
            lp.commit(l, outcome, info.tage.outcome, mispredicted,
                info.draws.loop_alloc, info.draws.loop_way);
        }

        self.tage.commit(&info.tage, outcome, info.prediction, info.draws.alloc_skip);
    }
}

impl SpeculativePredictor for TAGESCLPredictor {
    type Info = TAGESCLInfo;
    type Prediction = Outcome;

    fn name(&self) -> &'static str { "TAGE-SC-L" }

    fn predict(&self, pc: usize, is_conditional: bool) -> (Outcome, TAGESCLInfo) {
        let info = self.lookup(pc, is_conditional);
        (info.prediction, info)
    }

    fn placeholder(&self, pc: usize, is_conditional: bool) -> TAGESCLInfo {
        TAGESCLInfo { pc, is_conditional, ..Default::default() }
    }

    fn update_speculative_history(&mut self,
        info: &mut TAGESCLInfo,
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
        info: &mut TAGESCLInfo,
        pc: usize,
        kind: BranchKind,
        taken: Outcome,
        target: usize,
    ) -> Result<(), PredictorError>
    {
        log::debug!("repair {:#x}: predicted {:?}, resolved {:?}", pc, info.prediction, taken);
        self.stat.repairs += 1;
        self.update_speculative_history(info, pc, kind, taken, target)
    }

    fn commit(&mut self,
        mut info: TAGESCLInfo,
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
        if kind.is_conditional() {
            self.train(&info, pc, taken);
        }
        if let Some(spec) = &info.spec {
            self.hist.retire(&spec.checkpoint);
        }
        Ok(())
    }

    fn squash(&mut self, mut info: TAGESCLInfo) -> Result<(), PredictorError> {
        self.undo(&mut info)
    }

    fn reset(&mut self) {
        self.tage.reset();
        if let Some(lp) = self.loops.as_mut() {
            lp.reset();
        }
        if let Some(sc) = self.sc.as_mut() {
            sc.reset();
        }
        self.hist.clear();
        self.rng = RandomState::from_seed_option(self.cfg.seed);
        self.stat = TAGESCLStats::default();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ProtocolViolation;

    fn predictor() -> TAGESCLPredictor {
        let mut cfg = TAGESCLConfig::default();
        cfg.seed = Some(1);
        cfg.tage = TAGEConfig::geometric(4, 200, 6, 8, 9);
        cfg.tage.history_buffer_bits = 512;
        cfg.build().unwrap()
    }

    fn snapshot(p: &TAGESCLPredictor) -> (SpeculativeHistory, RandomState, Vec<usize>) {
        let mut folds: Vec<usize> = p.tage.core.comp.iter()
            .flat_map(|c| [c.csr_index.output_usize(), c.csr_tag[0].output_usize(),
                c.csr_tag[1].output_usize()])
            .collect();
        if let Some(sc) = &p.sc {
            folds.extend(sc.csr.iter().map(|c| c.output_usize()));
        }
        (p.hist.clone(), p.rng, folds)
    }

    fn run(p: &mut TAGESCLPredictor, pc: usize, outcome: Outcome) -> Outcome {
        let (pred, mut info) = p.predict(pc, true);
        p.update_speculative_history(&mut info, pc, BranchKind::DirectBranch, pred, pc + 4)
            .unwrap();
        if pred != outcome {
            p.repair(&mut info, pc, BranchKind::DirectBranch, outcome, pc + 4).unwrap();
        }
        p.commit(info, pc, BranchKind::DirectBranch, outcome, pc + 4).unwrap();
        pred
    }

    #[test]
    fn squash_restores_speculative_state() {
        let mut p = predictor();
        for i in 0..20 {
            run(&mut p, 0x1000 + (i % 3) * 8, Outcome::from_bool(i % 2 == 0));
        }
        let before = snapshot(&p);
        let (_, mut a) = p.predict(0x2000, true);
        p.update_speculative_history(&mut a, 0x2000, BranchKind::DirectBranch, Outcome::T, 0)
            .unwrap();
        let (_, mut b) = p.predict(0x2040, true);
        p.update_speculative_history(&mut b, 0x2040, BranchKind::DirectBranch, Outcome::N, 0)
            .unwrap();
        assert_ne!(snapshot(&p), before);
        p.squash(b).unwrap();
        p.squash(a).unwrap();
        assert_eq!(snapshot(&p), before);
    }

    #[test]
    fn squash_out_of_order_is_rejected() {
        let mut p = predictor();
        let (_, mut a) = p.predict(0x2000, true);
        p.update_speculative_history(&mut a, 0x2000, BranchKind::DirectBranch, Outcome::T, 0)
            .unwrap();
        let (_, mut b) = p.predict(0x2040, true);
        p.update_speculative_history(&mut b, 0x2040, BranchKind::DirectBranch, Outcome::T, 0)
            .unwrap();
        let err = p.squash(a).unwrap_err();
        assert!(matches!(err,
            PredictorError::Protocol(ProtocolViolation::OutOfOrderRollback { .. })));
    }

    #[test]
    fn placeholder_is_finalized_on_first_use() {
        let mut p = predictor();
        let mut info = p.placeholder(0x3000, false);
        assert_eq!(info.state, RecordState::Provisional);
        p.update_speculative_history(&mut info, 0x3000, BranchKind::DirectJump, Outcome::T, 0x3400)
            .unwrap();
        assert_eq!(info.state, RecordState::Finalized);
        assert!(info.spec.is_some());
        assert_eq!(p.hist.ghr.bit(0), true);

        // A placeholder committed directly applies its history first
        let info = p.placeholder(0x3100, true);
        p.commit(info, 0x3100, BranchKind::DirectBranch, Outcome::N, 0).unwrap();
        assert_eq!(p.hist.ghr.bit(0), false);
        assert_eq!(p.stat.commits, 1);
    }

    #[test]
    fn repair_reinserts_resolved_direction() {
        let mut p = predictor();
        let (_, mut info) = p.predict(0x4000, true);
        p.update_speculative_history(&mut info, 0x4000, BranchKind::DirectBranch, Outcome::T, 0)
            .unwrap();
        let ptr = p.hist.ghr.ptr();
        p.repair(&mut info, 0x4000, BranchKind::DirectBranch, Outcome::N, 0).unwrap();
        assert_eq!(p.hist.ghr.ptr(), ptr);
        assert_eq!(p.hist.ghr.bit(0), false);
        assert_eq!(p.hist.in_flight(), 1);
        p.commit(info, 0x4000, BranchKind::DirectBranch, Outcome::N, 0).unwrap();
        assert_eq!(p.hist.in_flight(), 0);
    }

    #[test]
    fn taken_only_history_skips_not_taken() {
        let mut cfg = TAGESCLConfig::default();
        cfg.seed = Some(3);
        cfg.taken_only_history = true;
        let mut p = cfg.build().unwrap();
        let ptr = p.hist.ghr.ptr();
        run(&mut p, 0x5000, Outcome::N);
        assert_eq!(p.hist.ghr.ptr(), ptr);
        run(&mut p, 0x5000, Outcome::T);
        assert_ne!(p.hist.ghr.ptr(), ptr);
    }

    #[test]
    fn learns_a_loop() {
        let mut p = predictor();
        let mut wrong = 0;
        for i in 0..2000 {
            let outcome = Outcome::from_bool(i % 7 != 6);
            let pred = run(&mut p, 0x6000, outcome);
            if i >= 1500 && pred != outcome {
                wrong += 1;
            }
        }
        assert!(wrong <= 10, "{} mispredictions", wrong);
    }

    #[test]
    fn learning_follows_the_final_prediction() {
        let mut p = predictor();
        let pc = 0x7000;
        let (_, mut info) = p.predict(pc, true);
        assert_eq!(info.tage.outcome, Outcome::N);
        assert_eq!(info.tage.provider, TAGEProvider::Base);

        // A confident loop entry overruled TAGE and was right
        info.loop_lookup = LoopLookup { valid: true, prediction: Outcome::T,
            ..Default::default() };
        info.tage_or_loop = Outcome::T;
        info.prediction = Outcome::T;
        p.update_speculative_history(&mut info, pc, BranchKind::DirectBranch, Outcome::T, 0)
            .unwrap();
        p.commit(info, pc, BranchKind::DirectBranch, Outcome::T, 0).unwrap();

        assert_eq!(p.stat.mispredicts, 0);
        assert_eq!(p.tage_stat().alcs, 0);
        let meta = &p.loops.as_ref().unwrap().meta;
        assert!(meta.iter().all(|c| c.value() == -1));
    }

    #[test]
    fn history_buffer_covers_in_flight_bits() {
        let mut cfg = TAGESCLConfig { sc: None, seed: Some(2), ..Default::default() };
        cfg.tage = TAGEConfig::with_lengths(&[4, 8], 6, 8);
        cfg.tage.history_buffer_bits = 9;
        assert!(matches!(cfg.clone().build(),
            Err(ConfigError::HistoryBufferTooSmall { len: 9, longest: 8, .. })));

        // Smallest accepted buffer: every allowed in-flight bit fits
        cfg.tage.history_buffer_bits = 8 + cfg.tage.max_in_flight_bits + 1;
        let mut p = cfg.build().unwrap();
        let mut inflight = Vec::new();
        for i in 0..p.cfg.tage.max_in_flight_bits {
            let pc = 0x100 + i * 4;
            let (pred, mut info) = p.predict(pc, true);
            p.update_speculative_history(&mut info, pc, BranchKind::DirectBranch, pred, 0)
                .unwrap();
            inflight.push(info);
        }
        while let Some(info) = inflight.pop() {
            p.squash(info).unwrap();
        }
        assert_eq!(p.hist.in_flight(), 0);
    }

    #[test]
    fn json_config() {
        let cfg = TAGESCLConfig::from_json(r#"{ "seed": 7, "loops": null }"#).unwrap();
        assert_eq!(cfg.seed, Some(7));
        assert!(cfg.loops.is_none());
        assert!(cfg.sc.is_some());
        let p = cfg.build().unwrap();
        assert!(p.loops.is_none());

        assert!(TAGESCLConfig::from_json("{ \"seed\": \"x\" }").is_err());
    }
}
