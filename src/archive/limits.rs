/// Ceiling on bytes an archive may expand to, declared or actual (100 MiB)
pub const MAX_DECOMPRESSED_SIZE: u64 = 100 * 1024 * 1024;

/// Largest uncompressed:compressed ratio tolerated for a single entry
pub const MAX_COMPRESSION_RATIO: u64 = 100;

/// Zip bomb thresholds applied during extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionLimits {
    /// Cap on the running total of uncompressed bytes
    pub max_total_size: u64,
    /// Cap on uncompressed / compressed for any one entry
    pub max_ratio: u64,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            max_total_size: MAX_DECOMPRESSED_SIZE,
            max_ratio: MAX_COMPRESSION_RATIO,
        }
    }
}

impl ExtractionLimits {
    /// Whether an entry's declared sizes exceed the ratio limit.
    ///
    /// An entry claiming to expand from zero bytes into something is
    /// treated as an infinite ratio.
    pub fn ratio_exceeded(&self, compressed: u64, uncompressed: u64) -> bool {
        if uncompressed == 0 {
            return false;
        }
        if compressed == 0 {
            return true;
        }
        uncompressed > compressed.saturating_mul(self.max_ratio)
    }
}
