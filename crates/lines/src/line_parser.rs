use std::error::Error;

/// Parses one already-decoded text line into zero or one typed event.
///
/// Implementations must never fail for input they simply don't recognize —
/// `Ok(None)` means "not an event of mine, keep going" and `Err` is reserved
/// for a line the parser *tried and failed* to interpret. The envelope
/// codec and the workflow runner's line grammar both only ever return
/// `Ok(_)`; the error path exists for parsers more particular than theirs.
pub trait LineParser {
    type Event;
    type Error: ClassifiedParserError;

    fn reset(&mut self);
    fn parse_line(&mut self, line: &str) -> Result<Option<Self::Event>, Self::Error>;
}

/// A parser error that can summarize itself for logging without assuming
/// the caller wants the full line content surfaced.
pub trait ClassifiedParserError: Error {
    fn redacted_summary(&self) -> String;
}

impl ClassifiedParserError for std::convert::Infallible {
    fn redacted_summary(&self) -> String {
        unreachable!("Infallible is never constructed")
    }
}
