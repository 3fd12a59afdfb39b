use serde::{Deserialize, Serialize};

/// Statistics for one reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassStats {
    /// Sources reported by all providers this pass.
    pub discovered: usize,

    /// Records created for newly discovered sources.
    pub added: usize,

    /// Records dropped because discovery stopped reporting them.
    pub removed: usize,

    /// Whether any record was added, removed, or mutated by refresh.
    pub changed: bool,

    /// Isolated provider failures and skipped entries.
    pub errors: Vec<String>,

    /// Pass duration in milliseconds.
    pub time_ms: u64,
}

impl PassStats {
    #[must_use]
    pub fn new() -> Self {
        Self {
            discovered: 0,
            added: 0,
            removed: 0,
            changed: false,
            errors: Vec::new(),
            time_ms: 0,
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }
}

impl Default for PassStats {
    fn default() -> Self {
        Self::new()
    }
}
