use std::time::Instant;

/// Per-peer counters for the current sync round.
#[derive(Debug, Clone)]
pub struct SyncStats {
    headers_count: u64,
    blocks_count: u64,
    updated_at: Instant,
}

impl Default for SyncStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStats {
    pub fn new() -> Self {
        Self {
            headers_count: 0,
            blocks_count: 0,
            updated_at: Instant::now(),
        }
    }

    /// Clear counters; called on entering a retrieving state.
    pub fn reset(&mut self) {
        self.headers_count = 0;
        self.blocks_count = 0;
        self.updated_at = Instant::now();
    }

    pub fn add_headers(&mut self, count: u64) {
        self.headers_count += count;
        self.updated_at = Instant::now();
    }

    pub fn add_blocks(&mut self, count: u64) {
        self.blocks_count += count;
        self.updated_at = Instant::now();
    }

    pub fn headers_count(&self) -> u64 {
        self.headers_count
    }

    pub fn blocks_count(&self) -> u64 {
        self.blocks_count
    }

    pub fn secs_since_last_update(&self) -> u64 {
        self.updated_at.elapsed().as_secs()
    }
}
