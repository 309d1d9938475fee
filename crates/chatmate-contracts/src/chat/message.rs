use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::Classification;

/// Which participant a bubble belongs to. Left bubbles hug the left canvas
/// edge, right bubbles the right edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    pub fn is_right(self) -> bool {
        matches!(self, Side::Right)
    }
}

/// One classified chat message, immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub username: String,
    pub content: String,
    pub side: Side,
    pub classification: Option<Classification>,
}

/// Ordered sequence of messages; insertion order is display order, oldest
/// first. Construction enforces the renderer precondition that no message has
/// empty content.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(messages: Vec<Message>) -> Result<Self> {
        for (index, message) in messages.iter().enumerate() {
            if message.content.trim().is_empty() {
                bail!("message {index} has empty content");
            }
        }
        Ok(Self { messages })
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Conversation, Message, Side};
    use crate::chat::Classification;

    fn message(content: &str, side: Side) -> Message {
        Message {
            username: "Al".to_string(),
            content: content.to_string(),
            side,
            classification: Some(Classification::Good),
        }
    }

    #[test]
    fn preserves_insertion_order() {
        let conversation = Conversation::new(vec![
            message("first", Side::Left),
            message("second", Side::Right),
            message("third", Side::Left),
        ])
        .unwrap();

        let contents: Vec<&str> = conversation
            .messages()
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn rejects_empty_content() {
        assert!(Conversation::new(vec![message("", Side::Left)]).is_err());
        assert!(Conversation::new(vec![message("   ", Side::Right)]).is_err());
    }

    #[test]
    fn side_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Side::Left).unwrap(), "\"left\"");
        assert_eq!(
            serde_json::from_str::<Side>("\"right\"").unwrap(),
            Side::Right
        );
    }
}
