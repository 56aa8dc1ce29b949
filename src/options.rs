/// Minimum compressed size, in bytes, at which deflate entries get
/// checkpointing machinery. Smaller entries re-extract faster than they
/// checkpoint.
pub const DEFAULT_FLATE_THRESHOLD: u64 = 1024 * 1024;

#[derive(Clone, Copy, Debug)]
pub struct ExtractOptions {
    pub flate_threshold: u64,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            flate_threshold: DEFAULT_FLATE_THRESHOLD,
        }
    }
}

impl ExtractOptions {
    pub fn flate_threshold(mut self, bytes: u64) -> Self {
        self.flate_threshold = bytes;
        self
    }
}
