//! Newline-delimited JSON streaming for the Ollama dialect.
//!
//! The NDJSON sibling of [`crate::sse`]: buffer chunks, split on `\n`,
//! feed each complete line to a parser closure.  Ollama terminates the
//! stream with a record carrying `done: true`, so the fallback `step_end`
//! only fires when the connection drops early.

use crate::util::from_reqwest;
use fm_domain::error::Result;
use fm_domain::stream::{BoxStream, StopReason, StreamEvent, Usage};

/// Extract complete lines from an NDJSON buffer, draining in place.
pub(crate) fn drain_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();

    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..pos).collect();
        buffer.drain(..1); // remove the \n delimiter
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }

    lines
}

/// Build a [`BoxStream`] from an NDJSON `reqwest::Response` and a parser
/// closure invoked per complete line.
pub(crate) fn ndjson_response_stream<F>(
    response: reqwest::Response,
    mut parse_line: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut end_emitted = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));

                    for line in drain_lines(&mut buffer) {
                        for event in parse_line(&line) {
                            if matches!(&event, Ok(StreamEvent::StepEnd { .. })) {
                                end_emitted = true;
                            }
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    // Flush a trailing line without a final newline.
                    let tail = buffer.trim().to_string();
                    if !tail.is_empty() {
                        for event in parse_line(&tail) {
                            if matches!(&event, Ok(StreamEvent::StepEnd { .. })) {
                                end_emitted = true;
                            }
                            yield event;
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }

        if !end_emitted {
            yield Ok(StreamEvent::StepEnd {
                stop_reason: StopReason::EndTurn,
                usage: Usage::default(),
                error: None,
            });
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_complete_lines() {
        let mut buf = String::from("{\"a\":1}\n{\"b\":2}\n");
        let lines = drain_lines(&mut buf);
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_partial_line_stays() {
        let mut buf = String::from("{\"a\":1}\n{\"b\":");
        let lines = drain_lines(&mut buf);
        assert_eq!(lines, vec!["{\"a\":1}"]);
        assert_eq!(buf, "{\"b\":");
    }

    #[test]
    fn drain_skips_blank_lines() {
        let mut buf = String::from("\n\n{\"a\":1}\n\n");
        let lines = drain_lines(&mut buf);
        assert_eq!(lines, vec!["{\"a\":1}"]);
    }
}
