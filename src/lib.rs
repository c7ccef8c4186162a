//! TAGE-family branch predictors with speculative history management.

pub mod branch;
pub mod error;
pub mod history;
pub mod predictor;
pub mod random;
pub mod unit;

pub use branch::*;
pub use error::*;
pub use history::*;
pub use predictor::*;
pub use random::*;
pub use unit::*;
