use std::convert::Infallible;

use agent_relay_lines::LineParser;
use agent_relay_protocol::{decode_envelope, Envelope};

/// Adapts the envelope codec (C1) to the shared line-ingestion trait (C8).
///
/// Never errors: a line that isn't a well-formed envelope simply decodes
/// to `None`, matching §4.1's "never throw, only drop" contract.
#[derive(Debug, Default)]
pub struct EnvelopeLineParser;

impl LineParser for EnvelopeLineParser {
    type Event = Envelope;
    type Error = Infallible;

    fn reset(&mut self) {}

    fn parse_line(&mut self, line: &str) -> Result<Option<Envelope>, Infallible> {
        Ok(decode_envelope(line))
    }
}

/// Trivial parser for the broker's stderr stream: every line is kept
/// verbatim as an event. Stderr carries free-form diagnostic text, not
/// protocol envelopes (§4.4 "Both the stdout and stderr readers are built
/// atop the shared line-ingestion layer").
#[derive(Debug, Default)]
pub struct PlainTextLineParser;

impl LineParser for PlainTextLineParser {
    type Event = String;
    type Error = Infallible;

    fn reset(&mut self) {}

    fn parse_line(&mut self, line: &str) -> Result<Option<String>, Infallible> {
        Ok(Some(line.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_line() {
        let mut parser = EnvelopeLineParser;
        let line = r#"{"v":1,"type":"hello_ack","payload":{}}"#;
        let envelope = parser.parse_line(line).unwrap();
        assert_eq!(envelope.unwrap().kind, "hello_ack");
    }

    #[test]
    fn garbage_line_decodes_to_none() {
        let mut parser = EnvelopeLineParser;
        assert!(parser.parse_line("broker booting...").unwrap().is_none());
    }

    #[test]
    fn plain_text_parser_keeps_every_line() {
        let mut parser = PlainTextLineParser;
        assert_eq!(
            parser.parse_line("warning: slow startup").unwrap().unwrap(),
            "warning: slow startup"
        );
    }
}
