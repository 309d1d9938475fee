use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::chat::{Classification, Conversation, Message, Side};
use crate::color::{Rgb, RenderTheme, DEFAULT_BUBBLE_COLOR, DEFAULT_TEXT_COLOR};

/// Wire contract produced by the analysis model: classified messages plus the
/// review metadata (ratings, opponents, theme colors, commentary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub messages: Vec<AnalysisMessage>,
    #[serde(default)]
    pub elo: EloEstimate,
    #[serde(default)]
    pub opponents: OpponentNames,
    #[serde(default)]
    pub color: ColorTheme,
    #[serde(default)]
    pub opening_name: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_target: Option<Side>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMessage {
    pub side: Side,
    pub content: String,
    #[serde(default)]
    pub classification: String,
}

impl AnalysisMessage {
    pub fn classification(&self) -> Option<Classification> {
        let trimmed = self.classification.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Classification::parse(trimmed))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EloEstimate {
    #[serde(default)]
    pub left: Option<i64>,
    #[serde(default)]
    pub right: Option<i64>,
}

impl EloEstimate {
    pub fn for_side(&self, side: Side) -> Option<i64> {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpponentNames {
    #[serde(default)]
    pub left: Option<String>,
    #[serde(default)]
    pub right: Option<String>,
}

impl OpponentNames {
    /// Display name for a side; sides without a detected opponent fall back
    /// to a positional name so avatar initials stay meaningful.
    pub fn for_side(&self, side: Side) -> &str {
        let name = match side {
            Side::Left => self.left.as_deref(),
            Side::Right => self.right.as_deref(),
        };
        name.filter(|value| !value.trim().is_empty())
            .unwrap_or(match side {
                Side::Left => "Left",
                Side::Right => "Right",
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideColor {
    #[serde(default)]
    pub label: String,
    pub bubble_hex: String,
    pub text_hex: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColorTheme {
    #[serde(default)]
    pub left: Option<SideColor>,
    #[serde(default)]
    pub right: Option<SideColor>,
    #[serde(default)]
    pub background_hex: Option<String>,
}

impl Analysis {
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).context("analysis JSON did not match the expected shape")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("analysis serialization failed")
    }

    /// Builds the renderer input. Messages the model returned with empty
    /// content are dropped here; the renderer treats them as a precondition
    /// violation.
    pub fn conversation(&self) -> Result<Conversation> {
        let messages = self
            .messages
            .iter()
            .filter(|message| !message.content.trim().is_empty())
            .map(|message| Message {
                username: self.opponents.for_side(message.side).to_string(),
                content: message.content.clone(),
                side: message.side,
                classification: message.classification(),
            })
            .collect();
        Conversation::new(messages)
    }

    /// Resolves the per-side theme, applying the documented gray/white
    /// fallbacks for absent colors. Malformed hex is an error, not a guess.
    pub fn theme(&self) -> Result<RenderTheme> {
        let parse = |value: Option<&str>, fallback: Rgb, what: &str| -> Result<Rgb> {
            match value {
                Some(hex) => {
                    Rgb::from_hex(hex).with_context(|| format!("invalid {what} color"))
                }
                None => Ok(fallback),
            }
        };
        Ok(RenderTheme {
            bubble_left: parse(
                self.color.left.as_ref().map(|c| c.bubble_hex.as_str()),
                DEFAULT_BUBBLE_COLOR,
                "left bubble",
            )?,
            bubble_right: parse(
                self.color.right.as_ref().map(|c| c.bubble_hex.as_str()),
                DEFAULT_BUBBLE_COLOR,
                "right bubble",
            )?,
            text_left: parse(
                self.color.left.as_ref().map(|c| c.text_hex.as_str()),
                DEFAULT_TEXT_COLOR,
                "left text",
            )?,
            text_right: parse(
                self.color.right.as_ref().map(|c| c.text_hex.as_str()),
                DEFAULT_TEXT_COLOR,
                "right text",
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::Analysis;
    use crate::chat::{Classification, Side};
    use crate::color::Rgb;

    fn sample() -> Analysis {
        let payload = json!({
            "opening_name": "White Knight Opening: Self-Aware Cringe Variation",
            "comment": "A bold, if suicidal, strategy.",
            "messages": [
                {"side": "right", "content": "Me when I see God", "classification": "Good"},
                {"side": "left", "content": "What lol", "classification": "Good"},
                {"side": "right", "content": "*tips fedora*", "classification": "Megablunder"}
            ],
            "elo": {"left": 1400, "right": 250},
            "opponents": {"left": "Alice", "right": "Bob"},
            "color": {
                "right": {"label": "Blue", "bubble_hex": "#1982fc", "text_hex": "#ffffff"},
                "background_hex": "#18181b"
            }
        });
        Analysis::from_json(&payload.to_string()).unwrap()
    }

    #[test]
    fn roundtrips_through_json() {
        let analysis = sample();
        let reparsed = Analysis::from_json(&analysis.to_json().unwrap()).unwrap();
        assert_eq!(reparsed.messages.len(), 3);
        assert_eq!(reparsed.elo.right, Some(250));
        assert_eq!(reparsed.opponents.left.as_deref(), Some("Alice"));
    }

    #[test]
    fn conversation_maps_usernames_and_classifications() {
        let conversation = sample().conversation().unwrap();
        let messages = conversation.messages();
        assert_eq!(messages[0].username, "Bob");
        assert_eq!(messages[0].side, Side::Right);
        assert_eq!(messages[1].username, "Alice");
        assert_eq!(
            messages[2].classification,
            Some(Classification::Megablunder)
        );
    }

    #[test]
    fn conversation_drops_empty_content() {
        let mut analysis = sample();
        analysis.messages[1].content = "   ".to_string();
        let conversation = analysis.conversation().unwrap();
        assert_eq!(conversation.len(), 2);
    }

    #[test]
    fn missing_opponents_fall_back_to_positional_names() {
        let mut analysis = sample();
        analysis.opponents.left = None;
        let conversation = analysis.conversation().unwrap();
        assert_eq!(conversation.messages()[1].username, "Left");
    }

    #[test]
    fn theme_applies_defaults_per_side() {
        let theme = sample().theme().unwrap();
        assert_eq!(theme.bubble_right, Rgb::from_hex("#1982fc").unwrap());
        assert_eq!(theme.text_right, Rgb::new(0xff, 0xff, 0xff));
        assert_eq!(theme.bubble_left, Rgb::new(0x80, 0x80, 0x80));
        assert_eq!(theme.text_left, Rgb::new(0xff, 0xff, 0xff));
    }

    #[test]
    fn theme_rejects_malformed_hex() {
        let mut analysis = sample();
        analysis.color.right.as_mut().unwrap().bubble_hex = "#nothex".to_string();
        assert!(analysis.theme().is_err());
    }

    #[test]
    fn unknown_classification_is_unrecognized_not_an_error() {
        let mut analysis = sample();
        analysis.messages[0].classification = "Galaxybrain".to_string();
        let conversation = analysis.conversation().unwrap();
        assert_eq!(
            conversation.messages()[0].classification,
            Some(Classification::Unrecognized)
        );
    }
}
