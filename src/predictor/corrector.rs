//! A statistical corrector.
//!
//! A handful of small tables of signed weights, indexed by the program
//! counter together with TAGE's prediction, slices of global history and
//! path history. The sum of the selected weights may override a TAGE
//! prediction that TAGE itself is not confident in.

use itertools::Itertools;
use serde::{ Deserialize, Serialize };

use crate::error::ConfigError;
use crate::history::*;
use crate::Outcome;
use crate::predictor::counter::*;
use crate::predictor::tage::*;
use crate::predictor::tage::config::check_width;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SCConfig {
    /// log2 of the number of entries in the bias table
    pub bias_log_size: u8,

    /// History lengths of the global history tables
    pub gehl_lengths: Vec<usize>,

    /// log2 of the number of entries in each global history table
    pub gehl_log_size: u8,

    /// log2 of the number of entries in the path history table
    pub path_log_size: u8,

    /// Width of each weight
    pub ctr_bits: u8,

    /// Initial training threshold
    pub threshold: i32,

    /// Width of the counter adapting the threshold
    pub threshold_ctr_bits: u8,

    /// Minimum |sum| needed to override a low-confidence TAGE prediction
    pub low_conf_margin: i32,

    /// Minimum |sum| needed to override a medium-confidence TAGE
    /// prediction. High-confidence predictions are never overridden.
    pub medium_conf_margin: i32,
}
impl Default for SCConfig {
    fn default() -> Self {
        Self {
            bias_log_size: 10,
            gehl_lengths: vec![4, 10, 16, 27],
            gehl_log_size: 9,
            path_log_size: 9,
            ctr_bits: 6,
            threshold: 24,
            threshold_ctr_bits: 6,
            low_conf_margin: 0,
            medium_conf_margin: 48,
        }
    }
}
impl SCConfig {
    pub fn longest_history(&self) -> usize {
        self.gehl_lengths.iter().copied().max().unwrap_or(0)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some((i, (a, b))) = self.gehl_lengths.iter().tuple_windows().enumerate()
            .find(|(_, (a, b))| b <= a)
        {
            return Err(ConfigError::NonIncreasingHistory { table: i + 1, prev: *a, len: *b });
        }
        for (what, log_size) in [
            ("corrector bias table", self.bias_log_size),
            ("corrector history table", self.gehl_log_size),
            ("corrector path table", self.path_log_size),
        ] {
            if log_size == 0 {
                return Err(ConfigError::ZeroSizedTable { what: what.into() });
            }
            if log_size >= 31 {
                return Err(ConfigError::Invalid(format!("{} is too large", what)));
            }
        }
        check_width("corrector weight", self.ctr_bits, SaturatingCounter::MAX_BITS)?;
        check_width("corrector threshold counter", self.threshold_ctr_bits,
            SaturatingCounter::MAX_BITS)?;
        if self.threshold < 1 {
            return Err(ConfigError::Invalid("corrector threshold must be positive".into()));
        }
        Ok(())
    }
}

/// Result of looking up the corrector.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SCLookup {
    pub bias_idx: usize,
    pub gehl_idx: Vec<usize>,
    pub path_idx: usize,

    /// Sum of all selected weights
    pub sum: i32,

    /// Direction given by the sign of `sum`
    pub sc_outcome: Outcome,

    /// Final prediction after (possibly) overriding
    pub prediction: Outcome,
    pub overridden: bool,
}

#[derive(Clone, Debug)]
pub struct StatisticalCorrector {
    pub cfg: SCConfig,
    pub bias: Vec<SaturatingCounter>,
    pub gehl: Vec<Vec<SaturatingCounter>>,
    pub path: Vec<SaturatingCounter>,

    /// Folded global history for each of the `gehl` tables
    pub csr: Vec<FoldedHistoryRegister>,

    /// Current training threshold
    pub threshold: i32,
    pub threshold_ctr: SaturatingCounter,
}
impl StatisticalCorrector {
    pub fn new(cfg: SCConfig) -> Self {
        let w = SaturatingCounter::signed(cfg.ctr_bits);
        Self {
            bias: vec![w; 1 << cfg.bias_log_size],
            gehl: vec![vec![w; 1 << cfg.gehl_log_size]; cfg.gehl_lengths.len()],
            path: vec![w; 1 << cfg.path_log_size],
            csr: cfg.gehl_lengths.iter()
                .map(|&len| FoldedHistoryRegister::new(cfg.gehl_log_size as usize, len))
                .collect(),
            threshold: cfg.threshold,
            threshold_ctr: SaturatingCounter::signed(cfg.threshold_ctr_bits),
            cfg,
        }
    }

    fn margin(&self, confidence: Confidence) -> i32 {
        match confidence {
            Confidence::Low => self.cfg.low_conf_margin,
            Confidence::Medium => self.cfg.medium_conf_margin,
            Confidence::High => i32::MAX,
        }
    }

    fn weights<'a>(&'a self, lookup: &'a SCLookup)
        -> impl Iterator<Item = &'a SaturatingCounter> + 'a
    {
        std::iter::once(&self.bias[lookup.bias_idx])
            .chain(self.gehl.iter().zip(&lookup.gehl_idx).map(|(t, &i)| &t[i]))
            .chain(std::iter::once(&self.path[lookup.path_idx]))
    }

    /// Decide whether to override `primary`, the TAGE (or loop)
    /// prediction, given what TAGE saw.
    pub fn predict(&self,
        pc: usize,
        tage: &TAGEPrediction,
        primary: Outcome,
        path: &PathHistory,
    ) -> SCLookup
    {
        let pc = pc >> 2;
        let bias_key = (pc << 3)
            | ((tage.outcome.is_taken() as usize) << 2)
            | tage.confidence as usize;
        let mut res = SCLookup {
            bias_idx: bias_key & (self.bias.len() - 1),
            gehl_idx: self.csr.iter()
                .map(|c| (pc ^ c.output_usize()) & ((1 << self.cfg.gehl_log_size) - 1))
                .collect(),
            path_idx: (pc ^ path.value() as usize) & (self.path.len() - 1),
            ..Default::default()
        };
        res.sum = self.weights(&res).map(|w| 2 * w.value() as i32 + 1).sum();
        res.sc_outcome = Outcome::from_bool(res.sum >= 0);
        res.overridden = res.sc_outcome != primary
            && res.sum.abs() >= self.margin(tage.confidence);
        res.prediction = if res.overridden { res.sc_outcome } else { primary };
        res
    }

    /// Train the weights and adapt the threshold.
    pub fn commit(&mut self, lookup: &SCLookup, outcome: Outcome) {
        let correct = lookup.sc_outcome == outcome;
        let weak = lookup.sum.abs() < self.threshold;
        if !correct || weak {
            let taken = outcome.is_taken();
            self.bias[lookup.bias_idx].step(taken);
            for (t, &i) in self.gehl.iter_mut().zip(&lookup.gehl_idx) {
                t[i].step(taken);
            }
            self.path[lookup.path_idx].step(taken);
        }

        if !correct {
            self.threshold_ctr.increment();
            if self.threshold_ctr.value() == self.threshold_ctr.max() {
                self.threshold += 1;
                self.threshold_ctr.set(0);
            }
        } else if weak {
            self.threshold_ctr.decrement();
            if self.threshold_ctr.value() == self.threshold_ctr.min() {
                self.threshold = (self.threshold - 1).max(1);
                self.threshold_ctr.set(0);
            }
        }
    }

    pub fn reset(&mut self) {
        let cfg = self.cfg.clone();
        *self = Self::new(cfg);
    }
}

impl FoldedHistory for StatisticalCorrector {
    fn update_history(&mut self, ghr: &HistoryRegister) {
        self.csr.iter_mut().for_each(|c| c.update(ghr));
    }
    fn revert_history(&mut self, ghr: &HistoryRegister) {
        self.csr.iter_mut().for_each(|c| c.revert(ghr));
    }
}
