use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum LineRecordError {
    #[error("I/O error while reading subprocess output")]
    Io,
    #[error("invalid UTF-8 in subprocess output")]
    InvalidUtf8,
    #[error("line too long (observed_bytes={observed_bytes}, max_line_bytes={max_line_bytes})")]
    LineTooLong {
        observed_bytes: usize,
        max_line_bytes: usize,
    },
    #[error("line parser failed: {summary}")]
    Parser { summary: String },
}

/// One ingested line: its 1-based line number, the decoded raw text, and
/// the parser's outcome.
///
/// The raw text is always retained — neither consumer here needs a
/// raw-capture budget separate from the line-length bound already enforced
/// by [`crate::IngestLimits`] — so callers can fall back to it, e.g. the
/// workflow runner adapter's "last non-empty raw line" error fallback.
#[derive(Debug, Clone)]
pub struct IngestedLine<T> {
    pub line_number: usize,
    pub raw: String,
    pub outcome: Result<Option<T>, LineRecordError>,
}
