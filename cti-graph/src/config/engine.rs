//! Tunables shared by the graph components.

/// Default cap on consecutive rounds without frontier growth.
pub const DEFAULT_MAX_STALLED_ROUNDS: u32 = 3;

/// Default maximum number of hits per backend search.
pub const DEFAULT_SEARCH_SIZE: usize = 10_000;

/// Engine-wide limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// A non-pivot expansion that fails to grow for more than this many
    /// consecutive rounds, with core rules still unmatched, fails.
    pub max_stalled_rounds: u32,
    /// Maximum number of hits requested from the backend per search.
    pub search_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_stalled_rounds: DEFAULT_MAX_STALLED_ROUNDS,
            search_size: DEFAULT_SEARCH_SIZE,
        }
    }
}

impl EngineConfig {
    pub fn new(max_stalled_rounds: u32, search_size: usize) -> Self {
        Self {
            max_stalled_rounds,
            search_size,
        }
    }

    pub fn with_max_stalled_rounds(mut self, rounds: u32) -> Self {
        self.max_stalled_rounds = rounds;
        self
    }

    pub fn with_search_size(mut self, size: usize) -> Self {
        self.search_size = size;
        self
    }
}
