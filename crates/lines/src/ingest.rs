use tokio::io::AsyncRead;

use crate::config::IngestLimits;
use crate::error::{IngestedLine, LineRecordError};
use crate::line_parser::LineParser;
use crate::reader::{AsyncBoundedLineReader, BoundedLine};

/// Drives an [`AsyncBoundedLineReader`] and a [`LineParser`] together,
/// producing one [`IngestedLine`] per line of subprocess output.
///
/// This is the thing both the protocol client's stdout reader and the
/// workflow runner's combined-output reader actually construct; neither
/// one touches the reader or the parser trait directly.
pub struct AsyncLineIngestor<R, P>
where
    R: AsyncRead + Unpin,
    P: LineParser,
{
    reader: AsyncBoundedLineReader<R>,
    parser: P,
}

impl<R, P> AsyncLineIngestor<R, P>
where
    R: AsyncRead + Unpin,
    P: LineParser,
{
    pub fn new(source: R, limits: IngestLimits, parser: P) -> Self {
        Self {
            reader: AsyncBoundedLineReader::new(source, limits.max_line_bytes),
            parser,
        }
    }

    /// Returns the next ingested line, or `None` once the source is
    /// exhausted. A malformed or oversized line is reported as an
    /// `IngestedLine` whose `outcome` is `Err` — it is never silently
    /// skipped, and ingestion always continues with the next line.
    pub async fn next_line(&mut self) -> Option<IngestedLine<P::Event>> {
        let bounded = self.reader.next_line().await?;

        match bounded {
            BoundedLine::Line { line_number, bytes } => {
                let raw = match String::from_utf8(bytes) {
                    Ok(raw) => raw,
                    Err(_) => {
                        return Some(IngestedLine {
                            line_number,
                            raw: String::new(),
                            outcome: Err(LineRecordError::InvalidUtf8),
                        })
                    }
                };

                self.parser.reset();
                let outcome = self
                    .parser
                    .parse_line(&raw)
                    .map_err(|err| LineRecordError::Parser {
                        summary: err.redacted_summary(),
                    });

                Some(IngestedLine {
                    line_number,
                    raw,
                    outcome,
                })
            }
            BoundedLine::LineTooLong {
                line_number,
                observed_bytes,
                max_line_bytes,
            } => Some(IngestedLine {
                line_number,
                raw: String::new(),
                outcome: Err(LineRecordError::LineTooLong {
                    observed_bytes,
                    max_line_bytes,
                }),
            }),
            BoundedLine::IoError { line_number } => Some(IngestedLine {
                line_number,
                raw: String::new(),
                outcome: Err(LineRecordError::Io),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_parser::ClassifiedParserError;
    use std::convert::Infallible;
    use std::fmt;

    #[derive(Debug)]
    struct EchoParser;

    impl LineParser for EchoParser {
        type Event = String;
        type Error = Infallible;

        fn reset(&mut self) {}

        fn parse_line(&mut self, line: &str) -> Result<Option<String>, Infallible> {
            Ok(Some(line.to_owned()))
        }
    }

    #[derive(Debug)]
    struct AlwaysFails;

    impl fmt::Display for AlwaysFails {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "always fails")
        }
    }
    impl std::error::Error for AlwaysFails {}
    impl ClassifiedParserError for AlwaysFails {
        fn redacted_summary(&self) -> String {
            "always fails".to_owned()
        }
    }

    struct RejectingParser;
    impl LineParser for RejectingParser {
        type Event = ();
        type Error = AlwaysFails;

        fn reset(&mut self) {}

        fn parse_line(&mut self, _line: &str) -> Result<Option<()>, AlwaysFails> {
            Err(AlwaysFails)
        }
    }

    #[tokio::test]
    async fn oversized_line_is_dropped_and_iteration_continues() {
        let mut payload = Vec::new();
        payload.extend_from_slice(b"short\n");
        payload.extend_from_slice(&vec![b'x'; 100]);
        payload.extend_from_slice(b"\nalso short\n");

        let mut ingestor = AsyncLineIngestor::new(
            std::io::Cursor::new(payload),
            IngestLimits { max_line_bytes: 10 },
            EchoParser,
        );

        let first = ingestor.next_line().await.unwrap();
        assert_eq!(first.outcome.unwrap().unwrap(), "short");

        let second = ingestor.next_line().await.unwrap();
        assert!(matches!(
            second.outcome,
            Err(LineRecordError::LineTooLong { .. })
        ));

        let third = ingestor.next_line().await.unwrap();
        assert_eq!(third.outcome.unwrap().unwrap(), "also short");

        assert!(ingestor.next_line().await.is_none());
    }

    #[tokio::test]
    async fn parser_error_is_reported_with_redacted_summary() {
        let mut ingestor = AsyncLineIngestor::new(
            std::io::Cursor::new(b"anything\n".to_vec()),
            IngestLimits::default(),
            RejectingParser,
        );

        let line = ingestor.next_line().await.unwrap();
        assert_eq!(line.raw, "anything");
        match line.outcome {
            Err(LineRecordError::Parser { summary }) => assert_eq!(summary, "always fails"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
