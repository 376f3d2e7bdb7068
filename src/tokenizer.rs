use crate::message::{Message, WordEvent};
use crate::metrics::PipelineMetrics;
use regex::Regex;
use std::sync::Arc;
use tracing::trace;

/// Runs of anything that is not a letter, a digit or an apostrophe separate words.
pub const TOKENIZER_PATTERN: &str = r"[^\p{L}\p{N}']+";

/// Splits message text into words.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    separator: Regex,
    metrics: Arc<PipelineMetrics>,
}

impl Tokenizer {
    pub fn new(metrics: Arc<PipelineMetrics>) -> Self {
        let separator = Regex::new(TOKENIZER_PATTERN).expect("tokenizer pattern is valid");
        Self { separator, metrics }
    }

    /// Returns the nonempty words of `text`. Blank input counts as an empty line.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            self.metrics.record_empty_line();
            return Vec::new();
        }

        self.separator
            .split(text)
            .filter(|word| !word.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Tokenizes a message into word events stamped with the message timestamp.
    pub fn word_events(&self, message: &Message) -> Vec<WordEvent> {
        trace!(
            element = %message.text,
            timestamp = message.event_timestamp,
            "tokenizing message"
        );
        self.tokenize(&message.text)
            .into_iter()
            .map(|word| WordEvent::new(word, message.event_timestamp))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer() -> (Tokenizer, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::new());
        (Tokenizer::new(metrics.clone()), metrics)
    }

    #[test]
    fn test_splits_on_non_word_runs() {
        let (tokenizer, metrics) = tokenizer();
        assert_eq!(
            tokenizer.tokenize("  The cat, sat -- on the mat!"),
            vec!["The", "cat", "sat", "on", "the", "mat"]
        );
        assert_eq!(metrics.empty_lines(), 0);
    }

    #[test]
    fn test_keeps_apostrophes_digits_and_unicode() {
        let (tokenizer, _) = tokenizer();
        assert_eq!(
            tokenizer.tokenize("don't stop 4ever, café"),
            vec!["don't", "stop", "4ever", "café"]
        );
    }

    #[test]
    fn test_blank_input_counts_empty_line() {
        let (tokenizer, metrics) = tokenizer();
        assert!(tokenizer.tokenize("").is_empty());
        assert!(tokenizer.tokenize(" \t \n").is_empty());
        assert_eq!(metrics.empty_lines(), 2);
    }

    #[test]
    fn test_punctuation_only_is_not_an_empty_line() {
        let (tokenizer, metrics) = tokenizer();
        assert!(tokenizer.tokenize("?!...").is_empty());
        assert_eq!(metrics.empty_lines(), 0);
    }

    #[test]
    fn test_word_events_carry_message_timestamp() {
        let (tokenizer, _) = tokenizer();
        let events = tokenizer.word_events(&Message::new("the cat", 42));
        assert_eq!(
            events,
            vec![WordEvent::new("the", 42), WordEvent::new("cat", 42)]
        );
    }
}
