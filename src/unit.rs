//! A predictor for each hardware thread.

use crate::error::{ ConfigError, PredictorError, ProtocolViolation };
use crate::predictor::{ report, SpeculativePredictor };
use crate::{ BranchKind, Outcome };

/// The pipeline's reference to an in-flight branch.
///
/// A handle is created by [PredictorUnit::predict] (or
/// [PredictorUnit::placeholder]) and destroyed by exactly one of
/// [PredictorUnit::commit] or [PredictorUnit::squash], which take it by
/// value.
#[derive(Debug)]
pub struct BranchHandle<I> {
    tid: usize,
    info: I,
}
impl<I> BranchHandle<I> {
    pub fn tid(&self) -> usize { self.tid }
    pub fn info(&self) -> &I { &self.info }
}

/// Independent predictor state for each hardware thread.
#[derive(Clone, Debug)]
pub struct PredictorUnit<P: SpeculativePredictor> {
    threads: Vec<P>,
}

impl<P: SpeculativePredictor> PredictorUnit<P> {
    /// Build `num_threads` predictors with `build`, which is given the
    /// thread id.
    pub fn build<F>(num_threads: usize, mut build: F) -> Result<Self, ConfigError>
        where F: FnMut(usize) -> Result<P, ConfigError>
    {
        if num_threads == 0 {
            return Err(ConfigError::Invalid("a predictor unit needs at least one thread".into()));
        }
        let threads = (0..num_threads).map(&mut build).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { threads })
    }

    pub fn num_threads(&self) -> usize { self.threads.len() }

    pub fn thread(&self, tid: usize) -> Option<&P> { self.threads.get(tid) }

    fn get(&self, tid: usize) -> Result<&P, PredictorError> {
        report(self.threads.get(tid).ok_or(ProtocolViolation::UnknownThread(tid)))
    }

    fn get_mut(&mut self, tid: usize) -> Result<&mut P, PredictorError> {
        report(self.threads.get_mut(tid).ok_or(ProtocolViolation::UnknownThread(tid)))
    }

    pub fn predict(&self, tid: usize, pc: usize, is_conditional: bool)
        -> Result<(P::Prediction, BranchHandle<P::Info>), PredictorError>
    {
        let (pred, info) = self.get(tid)?.predict(pc, is_conditional);
        Ok((pred, BranchHandle { tid, info }))
    }

    /// Create a handle for a branch that was never predicted.
    pub fn placeholder(&self, tid: usize, pc: usize, is_conditional: bool)
        -> Result<BranchHandle<P::Info>, PredictorError>
    {
        let info = self.get(tid)?.placeholder(pc, is_conditional);
        Ok(BranchHandle { tid, info })
    }

    pub fn update_speculative_history(&mut self,
        handle: &mut BranchHandle<P::Info>,
        pc: usize,
        kind: BranchKind,
        taken: Outcome,
        target: usize,
    ) -> Result<(), PredictorError>
    {
        self.get_mut(handle.tid)?
            .update_speculative_history(&mut handle.info, pc, kind, taken, target)
    }

    /// Rewind to just before this branch and re-insert its history with
    /// the resolved direction and target. The handle stays live.
    pub fn repair(&mut self,
        handle: &mut BranchHandle<P::Info>,
        pc: usize,
        kind: BranchKind,
        taken: Outcome,
        target: usize,
    ) -> Result<(), PredictorError>
    {
        self.get_mut(handle.tid)?.repair(&mut handle.info, pc, kind, taken, target)
    }

    pub fn commit(&mut self,
        handle: BranchHandle<P::Info>,
        pc: usize,
        kind: BranchKind,
        taken: Outcome,
        target: usize,
    ) -> Result<(), PredictorError>
    {
        let BranchHandle { tid, info } = handle;
        self.get_mut(tid)?.commit(info, pc, kind, taken, target)
    }

    pub fn squash(&mut self, handle: BranchHandle<P::Info>) -> Result<(), PredictorError> {
        let BranchHandle { tid, info } = handle;
        self.get_mut(tid)?.squash(info)
    }

    pub fn reset(&mut self) {
        self.threads.iter_mut().for_each(|p| p.reset());
    }
}
