
/// Which source supplied a final prediction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ProviderSource {
    /// The longest matching tagged component
    LongestMatch,
    /// The alternate (next-longest) matching tagged component
    AltMatch,
    /// No tagged component hit: the base counter, or the host's target
    /// buffer for indirect branches
    #[default]
    Fallback,
}

/// Container for TAGE runtime stats.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TAGEStats {
    /// Successful allocations
    pub alcs: usize,

    /// Failed allocations
    pub failed_alcs: usize,

    /// Number of 'useful' counter agings
    pub resets: usize,

    /// Number of committed updates
    pub clk: u64,

    /// Number of times a target entry was overwritten after losing all
    /// confidence
    pub target_replacements: usize,

    /// Correct/incorrect predictions per provider source, indexed like
    /// [ProviderSource]
    pub provider_correct: [usize; 3],
    pub provider_wrong: [usize; 3],

    /// Mispredictions per tagged component when it was the longest match
    pub comp_miss: Vec<usize>,
}
impl TAGEStats {
    pub fn new(num_comp: usize) -> Self {
        Self { comp_miss: vec![0; num_comp], ..Default::default() }
    }

    /// Record the outcome of a committed prediction.
    pub fn record(&mut self, source: ProviderSource, hit: Option<usize>, correct: bool) {
        let idx = source as usize;
        if correct {
            self.provider_correct[idx] += 1;
        } else {
            self.provider_wrong[idx] += 1;
            if let Some(bank) = hit {
                if let Some(m) = self.comp_miss.get_mut(bank) {
                    *m += 1;
                }
            }
        }
    }

    pub fn correct(&self) -> usize { self.provider_correct.iter().sum() }
    pub fn wrong(&self) -> usize { self.provider_wrong.iter().sum() }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn record_by_source() {
        let mut s = TAGEStats::new(2);
        s.record(ProviderSource::LongestMatch, Some(1), false);
        s.record(ProviderSource::Fallback, None, true);
        s.record(ProviderSource::AltMatch, Some(1), true);
        assert_eq!(s.comp_miss, vec![0, 1]);
        assert_eq!(s.correct(), 2);
        assert_eq!(s.wrong(), 1);
        assert_eq!(s.provider_wrong[ProviderSource::LongestMatch as usize], 1);
    }
}
