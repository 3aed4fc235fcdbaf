use std::collections::VecDeque;

// --- Constants ---
pub const DEFAULT_CAPACITY: usize = 12;

/// Bounded memo of recent evaluations, keyed by the format-rendered natural
/// parameter vector.
///
/// Keys use each parameter's fixed display precision, so two candidate points
/// that round to the same rendered string are treated as identical. That is
/// intended: the optimizer frequently revisits points closer together than
/// the simulator can distinguish, and each miss costs a full simulator run.
/// Eviction is oldest-first; lookup is exact string equality.
#[derive(Debug)]
pub struct EvalCache {
    entries: VecDeque<(String, f64)>,
    capacity: usize,
}

impl EvalCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn lookup(&self, key: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|&(_, v)| v)
    }

    pub fn record(&mut self, key: String, value: f64) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((key, value));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EvalCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
