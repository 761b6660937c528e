/// Limits applied while ingesting a subprocess's line-oriented output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestLimits {
    /// Lines longer than this many bytes are dropped rather than buffered
    /// in full; ingestion continues with the next line.
    pub max_line_bytes: usize,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: 64 * 1024,
        }
    }
}
