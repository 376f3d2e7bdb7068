use std::fmt;

/// A finalized count for one word in one closed window.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OutputRecord {
    pub word: String,
    pub count: u64,
}

impl OutputRecord {
    pub fn new(word: impl Into<String>, count: u64) -> Self {
        Self {
            word: word.into(),
            count,
        }
    }
}

impl fmt::Display for OutputRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.word, self.count)
    }
}

/// Renders a word count as `"<word>: <count>"`.
pub fn format_word_count(word: &str, count: u64) -> String {
    format!("{}: {}", word, count)
}
