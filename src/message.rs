use tracing::warn;

// Representing a raw text message delivered by the ingestion source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    pub event_timestamp: i64,
}

impl Message {
    pub fn new(text: impl Into<String>, event_timestamp: i64) -> Self {
        Self {
            text: text.into(),
            event_timestamp,
        }
    }

    /// Decodes a payload; invalid UTF-8 becomes an empty message instead of an error.
    pub fn from_bytes(payload: &[u8], event_timestamp: i64) -> Self {
        let text = match std::str::from_utf8(payload) {
            Ok(text) => text.to_string(),
            Err(e) => {
                warn!(event_timestamp, error = %e, "message is not valid UTF-8, treating as empty");
                String::new()
            }
        };
        Self {
            text,
            event_timestamp,
        }
    }
}

// A single word carrying the timestamp of the message it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WordEvent {
    pub word: String,
    pub event_timestamp: i64,
}

impl WordEvent {
    pub fn new(word: impl Into<String>, event_timestamp: i64) -> Self {
        Self {
            word: word.into(),
            event_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_from_bytes() {
        let message = Message::from_bytes("the cat sat".as_bytes(), 1000);
        assert_eq!(message.text, "the cat sat");
        assert_eq!(message.event_timestamp, 1000);

        let malformed = Message::from_bytes(&[0x66, 0xff, 0xfe, 0x6f], 2000);
        assert!(malformed.text.is_empty());
        assert_eq!(malformed.event_timestamp, 2000);
    }
}
