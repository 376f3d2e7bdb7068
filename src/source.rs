//! Ingestion sources.
//!
//! A source hands the pipeline a lazy, possibly endless stream of timestamped messages for a
//! topic. Delivery is at-least-once; duplicates are passed through as they come.

use crate::config::RetryPolicy;
use crate::error::SourceError;
use crate::message::Message;
use crate::metrics::PipelineMetrics;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::thread;
use tracing::{info, warn};

pub type MessageStream = Box<dyn Iterator<Item = Result<Message, SourceError>> + Send>;

/// Something that can be subscribed to for messages.
pub trait IngestionSource: Send {
    fn subscribe(&mut self, topic: &str) -> Result<MessageStream, SourceError>;
}

/// Subscribes to `topic`, retrying with exponential backoff.
pub fn subscribe_with_retry(
    source: &mut dyn IngestionSource,
    topic: &str,
    retry: &RetryPolicy,
    metrics: &PipelineMetrics,
) -> Result<MessageStream, SourceError> {
    let mut attempt = 1;
    loop {
        match source.subscribe(topic) {
            Ok(stream) => {
                info!(topic, attempt, "subscribed");
                return Ok(stream);
            }
            Err(e) if attempt >= retry.max_attempts => {
                return Err(SourceError::Exhausted {
                    topic: topic.to_string(),
                    attempts: attempt,
                    last: e.to_string(),
                });
            }
            Err(e) => {
                let delay = retry.backoff(attempt);
                warn!(topic, attempt, delay_ms = delay.as_millis() as u64, error = %e, "subscribe failed, backing off");
                metrics.record_source_reconnect();
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

/// Reads one message per line from standard input (`-`) or a local file.
///
/// Lines shaped `<timestamp>\t<text>` carry their own event time, either epoch milliseconds or
/// RFC 3339. Any other line is stamped with the wall-clock time it was read.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineSource;

impl LineSource {
    pub fn new() -> Self {
        Self
    }
}

impl IngestionSource for LineSource {
    fn subscribe(&mut self, topic: &str) -> Result<MessageStream, SourceError> {
        let reader: Box<dyn BufRead + Send> = if topic == "-" {
            Box::new(BufReader::new(std::io::stdin()))
        } else {
            let file = File::open(topic).map_err(|e| SourceError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
            Box::new(BufReader::new(file))
        };
        Ok(Box::new(LineStream {
            reader,
            buf: Vec::new(),
        }))
    }
}

struct LineStream {
    reader: Box<dyn BufRead + Send>,
    buf: Vec<u8>,
}

impl Iterator for LineStream {
    type Item = Result<Message, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                let line = trim_line_ending(&self.buf);
                Some(Ok(parse_line(line, Utc::now().timestamp_millis())))
            }
            Err(e) => Some(Err(SourceError::Io(e))),
        }
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Parses one input line; lines without a recognizable timestamp prefix get `now`.
pub fn parse_line(line: &[u8], now: i64) -> Message {
    if let Some(tab) = line.iter().position(|b| *b == b'\t') {
        if let Some(timestamp) = std::str::from_utf8(&line[..tab])
            .ok()
            .and_then(parse_timestamp)
        {
            return Message::from_bytes(&line[tab + 1..], timestamp);
        }
    }
    Message::from_bytes(line, now)
}

fn parse_timestamp(field: &str) -> Option<i64> {
    let field = field.trim();
    field.parse::<i64>().ok().or_else(|| {
        DateTime::parse_from_rfc3339(field)
            .ok()
            .map(|instant| instant.timestamp_millis())
    })
}

/// In-memory source, mainly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySource {
    messages: VecDeque<Message>,
    subscribe_failures: u32,
    fail_after: Option<usize>,
}

impl MemorySource {
    pub fn new(messages: impl IntoIterator<Item = Message>) -> Self {
        Self {
            messages: messages.into_iter().collect(),
            subscribe_failures: 0,
            fail_after: None,
        }
    }

    /// Makes the next `failures` subscribe calls fail.
    pub fn with_subscribe_failures(mut self, failures: u32) -> Self {
        self.subscribe_failures = failures;
        self
    }

    /// Breaks the first stream after `count` messages; the rest arrive after resubscribing.
    pub fn with_stream_error_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }
}

impl IngestionSource for MemorySource {
    fn subscribe(&mut self, topic: &str) -> Result<MessageStream, SourceError> {
        if self.subscribe_failures > 0 {
            self.subscribe_failures -= 1;
            return Err(SourceError::Subscribe {
                topic: topic.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        match self.fail_after.take() {
            Some(count) => {
                let count = count.min(self.messages.len());
                let delivered: Vec<Result<Message, SourceError>> =
                    self.messages.drain(..count).map(Ok).collect();
                let broken = std::iter::once(Err(SourceError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                ))));
                Ok(Box::new(delivered.into_iter().chain(broken)))
            }
            None => {
                let messages: Vec<_> = self.messages.drain(..).collect();
                Ok(Box::new(messages.into_iter().map(Ok::<_, SourceError>)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_parse_line_with_millis_and_rfc3339() {
        let message = parse_line(b"61000\tthe cat", 5);
        assert_eq!(message, Message::new("the cat", 61_000));

        let message = parse_line(b"2024-01-01T12:00:30Z\tsat", 5);
        assert_eq!(message.event_timestamp, 1_704_110_430_000);
        assert_eq!(message.text, "sat");
    }

    #[test]
    fn test_parse_line_without_timestamp_uses_now() {
        assert_eq!(parse_line(b"the cat sat", 7), Message::new("the cat sat", 7));
        assert_eq!(parse_line(b"not a time\tcat", 7), Message::new("not a time\tcat", 7));
        assert_eq!(parse_line(b"", 7), Message::new("", 7));
    }

    #[test]
    fn test_line_source_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "1000\tthe cat sat\r\n\n2000\tthe cat ran").unwrap();

        let mut source = LineSource::new();
        let messages: Vec<Message> = source
            .subscribe(file.path().to_str().unwrap())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], Message::new("the cat sat", 1000));
        assert!(messages[1].text.is_empty());
        assert_eq!(messages[2], Message::new("the cat ran", 2000));
    }

    #[test]
    fn test_line_source_missing_file() {
        let mut source = LineSource::new();
        assert!(matches!(
            source.subscribe("/definitely/not/here.txt"),
            Err(SourceError::Subscribe { .. })
        ));
    }

    #[test]
    fn test_subscribe_with_retry_recovers() {
        let retry = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        };
        let metrics = PipelineMetrics::new();

        let mut source = MemorySource::new([Message::new("a", 1)]).with_subscribe_failures(2);
        let stream = subscribe_with_retry(&mut source, "t", &retry, &metrics).unwrap();
        assert_eq!(stream.count(), 1);
        assert_eq!(metrics.snapshot().source_reconnects, 2);

        let mut source = MemorySource::new([]).with_subscribe_failures(3);
        assert!(matches!(
            subscribe_with_retry(&mut source, "t", &retry, &metrics),
            Err(SourceError::Exhausted { attempts: 3, .. })
        ));
    }

    #[test]
    fn test_memory_source_stream_error_then_resume() {
        let mut source = MemorySource::new([
            Message::new("a", 1),
            Message::new("b", 2),
            Message::new("c", 3),
        ])
        .with_stream_error_after(1);

        let first: Vec<_> = source.subscribe("t").unwrap().collect();
        assert_eq!(first.len(), 2);
        assert!(first[1].is_err());

        let second: Vec<_> = source.subscribe("t").unwrap().collect();
        assert_eq!(second.len(), 2);
    }
}
