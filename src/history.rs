//! Speculative global history.
//!
//! The raw history is a circular bit buffer: new bits are written at a
//! moving write position and speculative bits are removed again by moving
//! the position back. Every tagged table keeps "folded" views of the most
//! recent bits which are updated incrementally on each push, and reverted
//! incrementally on each pop.

use bitvec::prelude::*;
use serde::{ Deserialize, Serialize };

use crate::error::ProtocolViolation;

/// A circular global history register.
///
/// Bits are addressed by *age*: age 0 is the most recently inserted bit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryRegister {
    data: BitVec<usize, Lsb0>,
    ptr: usize,
}

// NOTE: This presents the bits in a format where the leftmost bit is the
// oldest and the rightmost bit is the newest (age 0).
impl std::fmt::Display for HistoryRegister {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let x: String = (0..self.len()).rev()
            .map(|age| if self.bit(age) { '1' } else { '0' })
            .collect();
        write!(f, "{}", x)
    }
}

impl HistoryRegister {
    /// Create a register with the specified length in bits.
    /// All bits in the register are initialized to zero.
    pub fn new(len: usize) -> Self {
        assert!(len > 0);
        Self {
            data: bitvec![usize, Lsb0; 0; len],
            ptr: 0,
        }
    }

    pub fn len(&self) -> usize { self.data.len() }

    /// The current write position.
    pub fn ptr(&self) -> usize { self.ptr }

    /// Return the bit inserted `age` insertions ago.
    pub fn bit(&self, age: usize) -> bool {
        self.data[(self.ptr + age) % self.len()]
    }

    /// Insert a new bit, returning the bit it overwrote.
    pub fn push(&mut self, bit: bool) -> bool {
        self.ptr = (self.ptr + self.len() - 1) % self.len();
        self.data.replace(self.ptr, bit)
    }

    /// Remove the newest bit. The storage is left untouched.
    pub fn pop(&mut self) -> bool {
        let bit = self.data[self.ptr];
        self.ptr = (self.ptr + 1) % self.len();
        bit
    }

    /// Remove the newest bit, writing back the bit its push replaced.
    pub fn unpush(&mut self, overwritten: bool) -> bool {
        let bit = self.data.replace(self.ptr, overwritten);
        self.ptr = (self.ptr + 1) % self.len();
        bit
    }

    pub fn clear(&mut self) {
        self.data.fill(false);
        self.ptr = 0;
    }

    /// Return the most recent `n` bits (index 0 is the newest).
    pub fn read(&self, n: usize) -> BitVec<usize, Lsb0> {
        (0..n).map(|age| self.bit(age)).collect()
    }

    /// Fold [with XOR] the most recent `hist_len` bits into `output_bits`.
    ///
    /// This reads every bit; a [FoldedHistoryRegister] maintains the same
    /// value incrementally.
    pub fn fold(&self, hist_len: usize, output_bits: usize) -> usize {
        if output_bits == 0 {
            return 0;
        }
        let bits = self.read(hist_len);
        bits.chunks(output_bits).fold(0, |res, x| res ^ x.load::<usize>())
    }
}

/// A circular shift register used to track folded history.
///
/// This folds the most recent `hist_len` bits of global history into
/// `output_size` bits, without reading all of the history bits: the bit of
/// age `i` lands at position `i % output_size`. On each insertion the
/// register rotates by one, the newest bit is XOR'ed into position 0 and
/// the bit leaving the window is XOR'ed out at `hist_len % output_size`.
/// The result is equivalent to [HistoryRegister::fold], and the operation
/// is exactly invertible.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FoldedHistoryRegister {
    value: usize,

    /// The size of the output [in bits].
    output_size: usize,

    /// The number of most recent history bits being folded.
    hist_len: usize,

    /// Position at which the outgoing bit is removed.
    out_point: usize,
}
impl FoldedHistoryRegister {
    pub fn new(output_size: usize, hist_len: usize) -> Self {
        assert!(output_size < usize::BITS as usize);
        let out_point = if output_size == 0 { 0 } else { hist_len % output_size };
        Self { value: 0, output_size, hist_len, out_point }
    }

    /// Return the folded history as a [usize].
    pub fn output_usize(&self) -> usize { self.value }

    pub fn hist_len(&self) -> usize { self.hist_len }
    pub fn output_size(&self) -> usize { self.output_size }

    fn mask(&self) -> usize { (1 << self.output_size) - 1 }

    fn rotl(&self, x: usize) -> usize {
        ((x << 1) | (x >> (self.output_size - 1))) & self.mask()
    }

    fn rotr(&self, x: usize) -> usize {
        ((x >> 1) | ((x & 1) << (self.output_size - 1))) & self.mask()
    }

    fn boundary_bits(&self, ghr: &HistoryRegister) -> usize {
        let newest = ghr.bit(0) as usize;
        let oldest = ghr.bit(self.hist_len) as usize;
        newest ^ (oldest << self.out_point)
    }

    /// Account for the bit that was just pushed into `ghr`.
    pub fn update(&mut self, ghr: &HistoryRegister) {
        if self.output_size == 0 || self.hist_len == 0 {
            return;
        }
        self.value = self.rotl(self.value) ^ self.boundary_bits(ghr);
    }

    /// Undo [FoldedHistoryRegister::update] for the newest bit in `ghr`.
    /// Must be called *before* that bit is popped.
    pub fn revert(&mut self, ghr: &HistoryRegister) {
        if self.output_size == 0 || self.hist_len == 0 {
            return;
        }
        self.value = self.rotr(self.value ^ self.boundary_bits(ghr));
    }

    pub fn clear(&mut self) { self.value = 0; }
}

/// A component keeping folded views of global history in lockstep with
/// the raw register.
pub trait FoldedHistory {
    /// Called after each bit is pushed.
    fn update_history(&mut self, ghr: &HistoryRegister);

    /// Called before each bit is popped.
    fn revert_history(&mut self, ghr: &HistoryRegister);
}

/// Path history: one address bit from each branch that inserts history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathHistory {
    value: u64,
    bits: u8,
}
impl PathHistory {
    pub fn new(bits: u8) -> Self {
        assert!(bits < 64);
        Self { value: 0, bits }
    }

    pub fn value(&self) -> u64 { self.value }
    pub fn bits(&self) -> u8 { self.bits }

    pub fn update(&mut self, pc: usize) {
        let mask = (1u64 << self.bits) - 1;
        self.value = ((self.value << 1) ^ ((pc as u64 >> 2) & 1)) & mask;
    }

    pub fn clear(&mut self) { self.value = 0; }
}

/// The history state recorded before a branch contributes its bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryCheckpoint {
    /// Write position before the update
    pub ptr: usize,

    /// Number of bits the branch inserted
    pub nbits: usize,

    /// Bits the update overwrote in the circular buffer, oldest write first
    pub overwritten: u64,

    /// Path history before the update
    pub path: PathHistory,
}

/// Global and path history for one hardware thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpeculativeHistory {
    pub ghr: HistoryRegister,
    pub path: PathHistory,

    /// Longest folded history length reading from `ghr`
    longest: usize,

    /// Bits inserted by branches that have not yet committed
    in_flight: usize,
}
impl SpeculativeHistory {
    pub fn new(len: usize, path_bits: u8, longest: usize) -> Self {
        assert!(longest < len);
        Self {
            ghr: HistoryRegister::new(len),
            path: PathHistory::new(path_bits),
            longest,
            in_flight: 0,
        }
    }

    pub fn in_flight(&self) -> usize { self.in_flight }

    /// Shift `nbits` bits of `hist` (least-significant first) into global
    /// history, updating every folded view. Returns the checkpoint needed
    /// to undo the update.
    pub fn append(&mut self,
        hist: u64,
        nbits: usize,
        pc: usize,
        folds: &mut [&mut dyn FoldedHistory],
    ) -> Result<HistoryCheckpoint, ProtocolViolation>
    {
        assert!(nbits <= 64);
        let in_flight = self.in_flight + nbits;
        if in_flight + self.longest >= self.ghr.len() {
            return Err(ProtocolViolation::HistoryOverflow {
                in_flight,
                capacity: self.ghr.len() - self.longest - 1,
            });
        }

        let mut cp = HistoryCheckpoint { ptr: self.ghr.ptr(), nbits, overwritten: 0,
            path: self.path };
        for i in 0..nbits {
            if self.ghr.push((hist >> i) & 1 == 1) {
                cp.overwritten |= 1 << i;
            }
            for f in folds.iter_mut() {
                f.update_history(&self.ghr);
            }
        }
        if nbits > 0 {
            self.path.update(pc);
        }
        self.in_flight = in_flight;
        log::trace!("append {} bits ({:#x}) ptr {} -> {}", nbits, hist, cp.ptr,
            self.ghr.ptr());
        Ok(cp)
    }

    /// Undo the update described by `cp`. This must be the most recent
    /// update still applied.
    pub fn rollback(&mut self,
        cp: &HistoryCheckpoint,
        folds: &mut [&mut dyn FoldedHistory],
    ) -> Result<(), ProtocolViolation>
    {
        let len = self.ghr.len();
        let expected = (cp.ptr + len - (cp.nbits % len)) % len;
        if self.ghr.ptr() != expected {
            return Err(ProtocolViolation::OutOfOrderRollback {
                expected,
                found: self.ghr.ptr(),
            });
        }

        for i in (0..cp.nbits).rev() {
            for f in folds.iter_mut() {
                f.revert_history(&self.ghr);
            }
            self.ghr.unpush((cp.overwritten >> i) & 1 == 1);
        }
        debug_assert_eq!(self.ghr.ptr(), cp.ptr);
        self.path = cp.path;
        self.in_flight = self.in_flight.saturating_sub(cp.nbits);
        log::trace!("rollback {} bits, ptr -> {}", cp.nbits, cp.ptr);
        Ok(())
    }

    /// The branch that made this update has committed; its bits are no
    /// longer speculative.
    pub fn retire(&mut self, cp: &HistoryCheckpoint) {
        self.in_flight = self.in_flight.saturating_sub(cp.nbits);
    }

    pub fn clear(&mut self) {
        self.ghr.clear();
        self.path.clear();
        self.in_flight = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Folds(Vec<FoldedHistoryRegister>);
    impl FoldedHistory for Folds {
        fn update_history(&mut self, ghr: &HistoryRegister) {
            self.0.iter_mut().for_each(|f| f.update(ghr));
        }
        fn revert_history(&mut self, ghr: &HistoryRegister) {
            self.0.iter_mut().for_each(|f| f.revert(ghr));
        }
    }

    #[test]
    fn push_pop_by_age() {
        let mut ghr = HistoryRegister::new(8);
        ghr.push(true);
        ghr.push(false);
        ghr.push(true);
        assert_eq!(ghr.to_string(), "00000101");
        assert!(ghr.bit(0));
        assert!(!ghr.bit(1));
        assert!(ghr.pop());
        assert!(!ghr.bit(0));
        assert!(ghr.bit(1));
    }

    #[test]
    fn folded_matches_reference_fold() {
        let mut ghr = HistoryRegister::new(64);
        let mut f = FoldedHistoryRegister::new(5, 13);
        let pattern = [1, 0, 0, 1, 1, 1, 0, 1, 0, 0, 0, 1];
        for i in 0..40 {
            ghr.push(pattern[i % pattern.len()] == 1);
            f.update(&ghr);
            assert_eq!(f.output_usize(), ghr.fold(13, 5));
        }
        for _ in 0..17 {
            f.revert(&ghr);
            ghr.pop();
            assert_eq!(f.output_usize(), ghr.fold(13, 5));
        }
    }

    #[test]
    fn append_then_rollback_restores_everything() {
        let mut h = SpeculativeHistory::new(64, 16, 20);
        let mut folds = Folds(vec![
            FoldedHistoryRegister::new(7, 20),
            FoldedHistoryRegister::new(4, 3),
        ]);
        h.append(0b1011, 4, 0x1000, &mut [&mut folds]).unwrap();
        let before = (h.clone(), folds.0.clone());

        let cp = h.append(0b11, 2, 0x2004, &mut [&mut folds]).unwrap();
        assert_ne!(h.ghr.ptr(), before.0.ghr.ptr());
        h.rollback(&cp, &mut [&mut folds]).unwrap();
        assert_eq!(h, before.0);
        assert_eq!(folds.0, before.1);
    }

    #[test]
    fn rollback_restores_wrapped_bits() {
        let mut h = SpeculativeHistory::new(16, 8, 4);
        let mut folds = Folds(vec![FoldedHistoryRegister::new(3, 4)]);
        for _ in 0..4 {
            let cp = h.append(0b111, 3, 0x40, &mut [&mut folds]).unwrap();
            h.retire(&cp);
        }
        let before = (h.clone(), folds.0.clone());

        // These bits land on slots still holding older history
        let cp = h.append(0b0000_0000, 8, 0x44, &mut [&mut folds]).unwrap();
        assert_eq!(cp.overwritten.count_ones(), 4);
        h.rollback(&cp, &mut [&mut folds]).unwrap();
        assert_eq!(h, before.0);
        assert_eq!(folds.0, before.1);
        assert_eq!(h.ghr.to_string(), "0000111111111111");
    }

    #[test]
    fn rollback_out_of_order_is_rejected() {
        let mut h = SpeculativeHistory::new(64, 16, 8);
        let mut folds = Folds(vec![FoldedHistoryRegister::new(3, 8)]);
        let older = h.append(1, 1, 0x10, &mut [&mut folds]).unwrap();
        let _younger = h.append(1, 1, 0x14, &mut [&mut folds]).unwrap();
        let err = h.rollback(&older, &mut [&mut folds]).unwrap_err();
        assert!(matches!(err, ProtocolViolation::OutOfOrderRollback { .. }));
    }

    #[test]
    fn overflow_is_reported() {
        let mut h = SpeculativeHistory::new(16, 8, 10);
        let mut folds = Folds(vec![]);
        h.append(0, 5, 0, &mut [&mut folds]).unwrap();
        let err = h.append(0, 1, 0, &mut [&mut folds]).unwrap_err();
        assert!(matches!(err, ProtocolViolation::HistoryOverflow { .. }));
    }
}
