use std::convert::Infallible;

use agent_relay_lines::LineParser;

/// Status a `[run]` line may report (§4.7 "Line grammar").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Started,
    Completed,
    Failed,
    Cancelled,
}

/// Status a `[step]` line may report (§4.7 "Line grammar").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Started,
    Completed,
    Failed,
    Skipped,
    Retrying,
    Nudged,
    ForceReleased,
}

/// One line of runner output, classified against the `[run]`/`[step]`
/// grammar (§4.7). Lines matching neither are `None` — kept as raw log
/// text by the caller, but they never become an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerLine {
    Run {
        status: RunStatus,
        detail: Option<String>,
    },
    Step {
        name: String,
        status: StepStatus,
        detail: Option<String>,
    },
}

fn parse_run_status(text: &str) -> Option<RunStatus> {
    match text {
        "started" => Some(RunStatus::Started),
        "completed" => Some(RunStatus::Completed),
        "failed" => Some(RunStatus::Failed),
        "cancelled" => Some(RunStatus::Cancelled),
        _ => None,
    }
}

fn parse_step_status(text: &str) -> Option<StepStatus> {
    match text {
        "started" => Some(StepStatus::Started),
        "completed" => Some(StepStatus::Completed),
        "failed" => Some(StepStatus::Failed),
        "skipped" => Some(StepStatus::Skipped),
        "retrying" => Some(StepStatus::Retrying),
        "nudged" => Some(StepStatus::Nudged),
        "force-released" => Some(StepStatus::ForceReleased),
        _ => None,
    }
}

/// Splits `"<status>: <detail>"` or bare `"<status>"` into its parts.
fn split_status_detail(rest: &str) -> (&str, Option<&str>) {
    match rest.split_once(':') {
        Some((status, detail)) => (status.trim(), Some(detail.trim())),
        None => (rest.trim(), None),
    }
}

/// Adapts the `[run]`/`[step]` line grammar to the shared line-ingestion
/// trait (C8), the same way [`crate::WorkflowRunner`]'s combined-output
/// reader consumes it.
#[derive(Debug, Default)]
pub struct RunnerLineParser;

impl LineParser for RunnerLineParser {
    type Event = RunnerLine;
    type Error = Infallible;

    fn reset(&mut self) {}

    fn parse_line(&mut self, line: &str) -> Result<Option<RunnerLine>, Infallible> {
        let line = line.trim_end();

        if let Some(rest) = line.strip_prefix("[run]") {
            let (status_text, detail) = split_status_detail(rest.trim_start());
            return Ok(parse_run_status(status_text).map(|status| RunnerLine::Run {
                status,
                detail: detail.map(str::to_string),
            }));
        }

        if let Some(rest) = line.strip_prefix("[step]") {
            let rest = rest.trim_start();
            let Some((name, remainder)) = rest.split_once(' ') else {
                return Ok(None);
            };
            let (status_text, detail) = split_status_detail(remainder.trim_start());
            return Ok(parse_step_status(status_text).map(|status| RunnerLine::Step {
                name: name.to_string(),
                status,
                detail: detail.map(str::to_string),
            }));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_line_with_detail() {
        let mut parser = RunnerLineParser;
        let parsed = parser.parse_line("[run] failed: one step failed").unwrap().unwrap();
        assert_eq!(
            parsed,
            RunnerLine::Run {
                status: RunStatus::Failed,
                detail: Some("one step failed".to_string()),
            }
        );
    }

    #[test]
    fn parses_step_line_without_detail() {
        let mut parser = RunnerLineParser;
        let parsed = parser.parse_line("[step] build started").unwrap().unwrap();
        assert_eq!(
            parsed,
            RunnerLine::Step {
                name: "build".to_string(),
                status: StepStatus::Started,
                detail: None,
            }
        );
    }

    #[test]
    fn parses_step_line_with_detail() {
        let mut parser = RunnerLineParser;
        let parsed = parser.parse_line("[step] test failed: timeout").unwrap().unwrap();
        assert_eq!(
            parsed,
            RunnerLine::Step {
                name: "test".to_string(),
                status: StepStatus::Failed,
                detail: Some("timeout".to_string()),
            }
        );
    }

    #[test]
    fn unrelated_log_line_produces_no_event() {
        let mut parser = RunnerLineParser;
        assert!(parser.parse_line("starting broker...").unwrap().is_none());
    }
}
