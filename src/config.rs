//! Engine-wide configuration.
//!
//! `EngineConfig` is a plain in-memory struct, not a reader for the
//! project's own file format (that loader lives outside this crate). It
//! is deserialisable behind the crate's default `serde` feature so an
//! embedding application can populate it from whatever configuration
//! surface it prefers.

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineConfig {
    /// Number of worker threads used to evaluate a bag's output and
    /// transition phases. `0` means the serial fallback: no thread
    /// objects are created and `run` never leaves the calling thread.
    pub workers: usize,
    /// Simulators per block handed to a worker at a time.
    pub block_size: usize,
    /// Optional terminal time bound; `run` stops once it is reached even
    /// if the schedule is not empty.
    pub terminal_time: Option<crate::time::Time>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            workers: 0,
            block_size: 8,
            terminal_time: None,
        }
    }
}

impl EngineConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        assert!(block_size >= 1, "block_size must be at least 1");
        self.block_size = block_size;
        self
    }

    pub fn with_terminal_time(mut self, t: crate::time::Time) -> Self {
        self.terminal_time = Some(t);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.workers, 0);
        assert_eq!(cfg.block_size, 8);
        assert_eq!(cfg.terminal_time, None);
    }

    #[test]
    fn builder_chains() {
        let cfg = EngineConfig::default()
            .with_workers(4)
            .with_block_size(16)
            .with_terminal_time(crate::time::Time::new(100.0));
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.block_size, 16);
        assert_eq!(cfg.terminal_time, Some(crate::time::Time::new(100.0)));
    }

    #[test]
    #[should_panic(expected = "block_size must be at least 1")]
    fn rejects_zero_block_size() {
        EngineConfig::default().with_block_size(0);
    }
}
