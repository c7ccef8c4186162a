//! Implementation of a saturating counter.

use crate::Outcome;
use crate::predictor::StatefulPredictor;

/// An N-bit saturating counter.
///
/// A signed counter covers `[-2^(N-1), 2^(N-1) - 1]` and predicts taken
/// when non-negative. An unsigned counter covers `[0, 2^N - 1]` and
/// predicts taken in its upper half.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SaturatingCounter {
    value: i16,
    bits: u8,
    signed: bool,
}
impl SaturatingCounter {
    /// Widest counter supported.
    pub const MAX_BITS: u8 = 15;

    pub fn signed(bits: u8) -> Self {
        assert!(bits > 0 && bits <= Self::MAX_BITS);
        Self { value: 0, bits, signed: true }
    }

    pub fn unsigned(bits: u8) -> Self {
        assert!(bits > 0 && bits <= Self::MAX_BITS);
        Self { value: 0, bits, signed: false }
    }

    /// Create a counter in some initial state (clamped to the range).
    pub fn with_value(mut self, value: i16) -> Self {
        self.set(value);
        self
    }

    pub fn value(&self) -> i16 { self.value }
    pub fn bits(&self) -> u8 { self.bits }

    pub fn min(&self) -> i16 {
        if self.signed { -(1 << (self.bits - 1)) } else { 0 }
    }

    pub fn max(&self) -> i16 {
        if self.signed { (1 << (self.bits - 1)) - 1 } else { ((1i32 << self.bits) - 1) as i16 }
    }

    pub fn set(&mut self, value: i16) {
        self.value = value.clamp(self.min(), self.max());
    }

    pub fn increment(&mut self) {
        if self.value < self.max() {
            self.value += 1;
        }
    }

    pub fn decrement(&mut self) {
        if self.value > self.min() {
            self.value -= 1;
        }
    }

    /// Move the counter up (`true`) or down (`false`).
    pub fn step(&mut self, up: bool) {
        if up { self.increment() } else { self.decrement() }
    }

    /// Halve the counter, used to age usefulness counters.
    pub fn halve(&mut self) {
        self.value >>= 1;
    }

    pub fn is_saturated(&self) -> bool {
        self.value == self.min() || self.value == self.max()
    }

    /// The counter sits next to the taken/not-taken boundary.
    pub fn is_weak(&self) -> bool {
        if self.signed {
            self.value == 0 || self.value == -1
        } else {
            let half = 1i16 << (self.bits - 1);
            self.value == half || self.value == half - 1
        }
    }
}

impl StatefulPredictor for SaturatingCounter {
    fn name(&self) -> &'static str { "SaturatingCounter" }

    fn predict(&self) -> Outcome {
        if self.signed {
            Outcome::from_bool(self.value >= 0)
        } else {
            Outcome::from_bool(self.value >= (1 << (self.bits - 1)))
        }
    }

    fn reset(&mut self) {
        self.value = 0;
    }

    fn update(&mut self, outcome: Outcome) {
        self.step(outcome.is_taken());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn signed_range() {
        let mut c = SaturatingCounter::signed(3);
        assert_eq!((c.min(), c.max()), (-4, 3));
        for _ in 0..10 { c.increment(); }
        assert_eq!(c.value(), 3);
        assert!(c.is_saturated());
        for _ in 0..10 { c.decrement(); }
        assert_eq!(c.value(), -4);
        assert_eq!(c.predict(), Outcome::N);
    }

    #[test]
    fn unsigned_base_counter() {
        let mut c = SaturatingCounter::unsigned(2);
        assert_eq!(c.predict(), Outcome::N);
        c.update(Outcome::T);
        assert_eq!(c.predict(), Outcome::N);
        c.update(Outcome::T);
        assert_eq!(c.predict(), Outcome::T);
        c.update(Outcome::T);
        c.update(Outcome::T);
        assert_eq!(c.value(), 3);
    }

    #[test]
    fn weakness() {
        let c = SaturatingCounter::signed(3);
        assert!(c.is_weak());
        assert!(!c.with_value(-4).is_weak());
        assert!(c.with_value(-1).is_weak());
        let u = SaturatingCounter::unsigned(2).with_value(1);
        assert!(u.is_weak());
        assert!(!u.with_value(3).is_weak());
    }

    #[test]
    fn halving() {
        let mut u = SaturatingCounter::unsigned(2).with_value(3);
        u.halve();
        assert_eq!(u.value(), 1);
        u.halve();
        assert_eq!(u.value(), 0);
    }
}
