pub mod counter;
pub mod table;
pub mod tage;
pub mod loops;
pub mod corrector;
pub mod tagescl;
pub mod ittage;

pub use counter::*;
pub use table::*;
pub use tage::*;
pub use loops::*;
pub use corrector::*;
pub use tagescl::*;
pub use ittage::*;

use crate::error::{ PredictorError, ProtocolViolation };
use crate::history::HistoryCheckpoint;
use crate::random::RandomState;
use crate::{ BranchKind, Outcome };

/// Interface to a simple predictor with no speculative state.
pub trait StatefulPredictor {
    fn name(&self) -> &'static str;
    fn reset(&mut self);
    fn predict(&self) -> Outcome;
    fn update(&mut self, outcome: Outcome);
}

/// Whether a per-branch record carries a real prediction yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecordState {
    /// Created for a branch that was never looked up. The prediction is
    /// computed the first time the record is used.
    #[default]
    Provisional,
    Finalized,
}

/// What a branch did to shared speculative state, and what it takes to
/// undo it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpeculativeUpdate {
    /// History state before the branch inserted its bits
    pub checkpoint: HistoryCheckpoint,

    /// Random state before the branch made its draws
    pub seed: RandomState,
}

/// Interface to a predictor driven by a speculative pipeline.
///
/// Each branch is predicted, then contributes to global history right
/// away; later it is either committed (and trains the tables) or squashed
/// (and its contribution is undone). Squashes must arrive youngest first.
pub trait SpeculativePredictor {
    /// The per-branch record
    type Info;

    /// What the predictor gives the pipeline
    type Prediction;

    fn name(&self) -> &'static str;

    /// Look up a branch. Table state is not modified.
    fn predict(&self, pc: usize, is_conditional: bool) -> (Self::Prediction, Self::Info);

    /// Create a record for a branch without looking it up.
    fn placeholder(&self, pc: usize, is_conditional: bool) -> Self::Info;

    /// Insert the branch's history bits. If the record has already done so,
    /// that contribution is undone first (it must be the youngest).
    fn update_speculative_history(&mut self,
        info: &mut Self::Info,
        pc: usize,
        kind: BranchKind,
        taken: Outcome,
        target: usize,
    ) -> Result<(), PredictorError>;

    /// The branch resolved differently than predicted: rewind to just
    /// before it and re-insert its history with the resolved direction and
    /// target. Younger branches must already be squashed.
    fn repair(&mut self,
        info: &mut Self::Info,
        pc: usize,
        kind: BranchKind,
        taken: Outcome,
        target: usize,
    ) -> Result<(), PredictorError>;

    /// Train on a resolved branch and retire its record.
    fn commit(&mut self,
        info: Self::Info,
        pc: usize,
        kind: BranchKind,
        taken: Outcome,
        target: usize,
    ) -> Result<(), PredictorError>;

    /// Undo everything the branch did to speculative state.
    fn squash(&mut self, info: Self::Info) -> Result<(), PredictorError>;

    /// Forget everything.
    fn reset(&mut self);
}

/// Log a protocol violation before handing it back to the caller.
pub(crate) fn report<T>(res: Result<T, ProtocolViolation>) -> Result<T, PredictorError> {
    res.map_err(|e| {
        log::error!("{}", e);
        PredictorError::from(e)
    })
}
