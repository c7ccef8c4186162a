//! Types for representing branches and branch outcomes.

use serde::{ Deserialize, Serialize };

/// A branch outcome.
#[repr(u32)]
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// Not taken
    #[default]
    N = 0,
    /// Taken
    T = 1
}

impl Outcome {
    pub fn from_bool(b: bool) -> Self {
        match b {
            true => Self::T,
            false => Self::N,
        }
    }

    pub fn is_taken(&self) -> bool {
        matches!(self, Self::T)
    }
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            Self::T => "t",
            Self::N => "n",
        };
        write!(f, "{}", s)
    }
}

impl std::ops::Not for Outcome {
    type Output = Self;
    fn not(self) -> Self {
        match self {
            Self::N => Self::T,
            Self::T => Self::N,
        }
    }
}

impl From<bool> for Outcome {
    fn from(x: bool) -> Self {
        Self::from_bool(x)
    }
}
impl From<Outcome> for bool {
    fn from(x: Outcome) -> Self {
        x.is_taken()
    }
}

/// Representing different kinds of branch/control-flow instructions.
///
/// The pipeline reports one of these at history-update and commit time;
/// it decides how many bits a branch contributes to global history and
/// whether the branch trains the direction or target tables.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BranchKind {
    /// A direct conditional branch instruction.
    DirectBranch,

    /// A direct unconditional jump instruction.
    DirectJump,

    /// An indirect unconditional jump instruction.
    IndirectJump,

    /// A direct procedure call instruction.
    DirectCall,

    /// An indirect procedure call instruction.
    IndirectCall,

    /// A return instruction.
    Return,
}
impl BranchKind {
    /// Returns 'true' if this is a conditional instruction.
    pub fn is_conditional(&self) -> bool {
        matches!(self, Self::DirectBranch)
    }

    /// Returns 'true' if this instruction indirectly specifies the target.
    pub fn is_indirect(&self) -> bool {
        matches!(self, Self::IndirectJump | Self::IndirectCall | Self::Return)
    }

    /// Indirect jumps and calls are predicted by the target predictor.
    /// Returns are left to a return-address stack.
    pub fn is_indirect_no_return(&self) -> bool {
        self.is_indirect() && *self != Self::Return
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn outcome_conversions() {
        assert_eq!(Outcome::from(true), Outcome::T);
        assert_eq!(!Outcome::T, Outcome::N);
        assert!(bool::from(Outcome::T));
        assert!(!bool::from(Outcome::N));
    }

    #[test]
    fn kind_classes() {
        assert!(BranchKind::DirectBranch.is_conditional());
        assert!(!BranchKind::DirectJump.is_indirect());
        assert!(BranchKind::Return.is_indirect());
        assert!(!BranchKind::Return.is_indirect_no_return());
        assert!(BranchKind::IndirectCall.is_indirect_no_return());
    }
}
