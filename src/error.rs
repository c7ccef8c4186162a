//! Error types.
//!
//! Configuration problems are rejected when a predictor is built. Protocol
//! violations are caller bugs in pipeline sequencing (e.g. squashing an old
//! branch before a younger one) and should be treated as fatal.
//! Counter saturation is never an error.

use thiserror::Error;

/// An invalid predictor configuration.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("history length ladder must be strictly increasing: table {table} has length {len} after {prev}")]
    NonIncreasingHistory { table: usize, prev: usize, len: usize },

    #[error("{what} has zero entries")]
    ZeroSizedTable { what: String },

    #[error("{what} has a counter width of zero")]
    ZeroCounterWidth { what: String },

    #[error("{what} has a counter width of {bits} bits (at most {max} supported)")]
    CounterTooWide { what: String, bits: u8, max: u8 },

    #[error("history buffer of {len} bits cannot hold the longest history ({longest} bits) and {in_flight} speculative bits")]
    HistoryBufferTooSmall { len: usize, longest: usize, in_flight: usize },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A violation of the predict/update/commit/squash protocol.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("history rollback out of order: expected write position {expected}, found {found}")]
    OutOfOrderRollback { expected: usize, found: usize },

    #[error("no predictor state for hardware thread {0}")]
    UnknownThread(usize),

    #[error("{in_flight} speculative history bits in flight exceed the {capacity}-bit buffer")]
    HistoryOverflow { in_flight: usize, capacity: usize },
}

/// Any error returned by a predictor operation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PredictorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn messages() {
        let e = ConfigError::NonIncreasingHistory { table: 2, prev: 8, len: 8 };
        assert_eq!(
            e.to_string(),
            "history length ladder must be strictly increasing: table 2 has length 8 after 8"
        );
        let e: PredictorError = ProtocolViolation::UnknownThread(3).into();
        assert_eq!(e.to_string(), "no predictor state for hardware thread 3");
    }
}
