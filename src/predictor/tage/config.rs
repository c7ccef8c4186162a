
use itertools::Itertools;
use serde::{ Deserialize, Serialize };

use crate::error::ConfigError;
use crate::predictor::counter::SaturatingCounter;

/// Configuration for the base (bimodal) component of a direction predictor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TAGEBaseConfig {
    /// log2 of the number of entries
    pub log_size: u8,

    /// Width of the (unsigned) saturating counters
    pub ctr_bits: u8,
}
impl Default for TAGEBaseConfig {
    fn default() -> Self {
        Self { log_size: 13, ctr_bits: 2 }
    }
}
impl TAGEBaseConfig {
    pub fn size(&self) -> usize { 1 << self.log_size }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_size == 0 {
            return Err(ConfigError::ZeroSizedTable { what: "base component".into() });
        }
        if self.log_size >= 31 {
            return Err(ConfigError::Invalid("base component is too large".into()));
        }
        check_width("base counter", self.ctr_bits, SaturatingCounter::MAX_BITS)
    }

    /// Get the [approximate] number of storage bits.
    pub fn storage_bits(&self) -> usize {
        self.ctr_bits as usize * self.size()
    }
}

/// Configuration for one tagged component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TAGEComponentConfig {
    /// Number of most recent global history bits hashed into index and tag
    pub history_len: usize,

    /// log2 of the number of entries
    pub log_size: u8,

    /// Number of tag bits
    pub tag_bits: u8,
}

/// Configuration for the tagged tables shared by the direction and target
/// predictors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TAGEConfig {
    /// Tagged components, ordered from shortest to longest history
    pub comp: Vec<TAGEComponentConfig>,

    /// Width of the confidence counter in each tagged entry
    pub ctr_bits: u8,

    /// Width of the 'useful' counter in each tagged entry
    pub useful_bits: u8,

    /// Number of history-length buckets keying the use-alt-on-new table
    pub use_alt_buckets: usize,

    /// Width of the use-alt-on-new counters
    pub use_alt_bits: u8,

    /// Number of commits between halvings of all 'useful' counters
    pub useful_reset_period: u64,

    /// Maximum number of tables visited when allocating on a misprediction
    pub max_alloc_scan: usize,

    /// Randomly start the allocation scan one table further out
    pub alloc_skip: bool,

    /// Number of path history bits mixed into indices
    pub path_bits: u8,

    /// Length of the circular global history buffer
    pub history_buffer_bits: usize,

    /// History bits that may be inserted by branches that have not yet
    /// committed. The buffer must hold these on top of the longest history.
    pub max_in_flight_bits: usize,
}
impl Default for TAGEConfig {
    fn default() -> Self {
        Self::geometric(4, 640, 12, 10, 11)
    }
}
impl TAGEConfig {
    /// Build a configuration whose history lengths grow geometrically from
    /// `min` to `max` over `n` tables. Tags widen from `tag_bits` by one bit
    /// for every third table.
    pub fn geometric(min: usize, max: usize, n: usize, log_size: u8, tag_bits: u8)
        -> Self
    {
        Self {
            comp: geometric_lengths(min, max, n).into_iter().enumerate()
                .map(|(i, history_len)| TAGEComponentConfig {
                    history_len,
                    log_size,
                    tag_bits: tag_bits + (i / 3) as u8,
                })
                .collect(),
            ctr_bits: 3,
            useful_bits: 2,
            use_alt_buckets: 4,
            use_alt_bits: 4,
            useful_reset_period: 1 << 18,
            max_alloc_scan: 3,
            alloc_skip: true,
            path_bits: 27,
            history_buffer_bits: 4096,
            max_in_flight_bits: 256,
        }
    }

    /// Build a configuration from explicit history lengths, with every
    /// table the same size.
    pub fn with_lengths(lengths: &[usize], log_size: u8, tag_bits: u8) -> Self {
        let mut cfg = Self::geometric(1, 2, 1, log_size, tag_bits);
        cfg.comp = lengths.iter()
            .map(|&history_len| TAGEComponentConfig { history_len, log_size, tag_bits })
            .collect();
        cfg
    }

    pub fn num_tables(&self) -> usize { self.comp.len() }

    /// The longest history length of any component.
    pub fn longest_history(&self) -> usize {
        self.comp.iter().map(|c| c.history_len).max().unwrap_or(0)
    }

    pub fn total_entries(&self) -> usize {
        self.comp.iter().map(|c| 1usize << c.log_size).sum()
    }

    /// Get the [approximate] number of storage bits.
    pub fn storage_bits(&self) -> usize {
        self.comp.iter()
            .map(|c| (1usize << c.log_size)
                * (self.ctr_bits + self.useful_bits + c.tag_bits) as usize)
            .sum()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.comp.is_empty() {
            return Err(ConfigError::ZeroSizedTable { what: "tagged table ladder".into() });
        }
        if let Some((i, (a, b))) = self.comp.iter().tuple_windows().enumerate()
            .find(|(_, (a, b))| b.history_len <= a.history_len)
        {
            return Err(ConfigError::NonIncreasingHistory {
                table: i + 1, prev: a.history_len, len: b.history_len,
            });
        }
        if self.comp[0].history_len == 0 {
            return Err(ConfigError::Invalid(
                "tagged tables need a non-zero history length".into()
            ));
        }
        for (i, c) in self.comp.iter().enumerate() {
            if c.log_size == 0 {
                return Err(ConfigError::ZeroSizedTable { what: format!("tagged table {}", i) });
            }
            if c.log_size >= 31 {
                return Err(ConfigError::Invalid(format!("tagged table {} is too large", i)));
            }
            check_width(&format!("tag of table {}", i), c.tag_bits, 31)?;
        }
        check_width("tagged confidence counter", self.ctr_bits, SaturatingCounter::MAX_BITS)?;
        check_width("usefulness counter", self.useful_bits, SaturatingCounter::MAX_BITS)?;
        check_width("use-alt-on-new counter", self.use_alt_bits, SaturatingCounter::MAX_BITS)?;
        if self.use_alt_buckets == 0 {
            return Err(ConfigError::ZeroSizedTable { what: "use-alt-on-new table".into() });
        }
        if self.useful_reset_period == 0 {
            return Err(ConfigError::Invalid("useful reset period must be non-zero".into()));
        }
        if self.max_alloc_scan == 0 {
            return Err(ConfigError::Invalid("allocation scan bound must be non-zero".into()));
        }
        if self.path_bits >= 64 {
            return Err(ConfigError::Invalid("path history is limited to 63 bits".into()));
        }
        self.check_history_buffer(self.longest_history())
    }

    /// Reject a history buffer that cannot hold `longest` bits of history
    /// together with the speculative bits allowed in flight.
    pub fn check_history_buffer(&self, longest: usize) -> Result<(), ConfigError> {
        if self.max_in_flight_bits == 0 {
            return Err(ConfigError::Invalid("in-flight history bound must be non-zero".into()));
        }
        if self.history_buffer_bits <= longest + self.max_in_flight_bits {
            return Err(ConfigError::HistoryBufferTooSmall {
                len: self.history_buffer_bits,
                longest,
                in_flight: self.max_in_flight_bits,
            });
        }
        Ok(())
    }
}

/// Reject a zero-width or too-wide counter.
pub(crate) fn check_width(what: &str, bits: u8, max: u8) -> Result<(), ConfigError> {
    if bits == 0 {
        return Err(ConfigError::ZeroCounterWidth { what: what.into() });
    }
    if bits > max {
        return Err(ConfigError::CounterTooWide { what: what.into(), bits, max });
    }
    Ok(())
}

/// History lengths growing geometrically from `min` to `max`, rounded and
/// forced to be strictly increasing.
pub fn geometric_lengths(min: usize, max: usize, n: usize) -> Vec<usize> {
    if n == 1 {
        return vec![min];
    }
    let ratio = (max as f64 / min as f64).powf(1.0 / (n - 1) as f64);
    let mut res: Vec<usize> = Vec::with_capacity(n);
    for i in 0..n {
        let len = (min as f64 * ratio.powi(i as i32) + 0.5) as usize;
        let len = match res.last() {
            Some(&prev) if len <= prev => prev + 1,
            _ => len,
        };
        res.push(len);
    }
    res
}
