use chrono::Weekday;

use super::Side;

/// Closed catalog of move-quality tags, chess-review style. The analysis
/// model emits these as strings; lenient parsing maps anything outside the
/// catalog to `Unrecognized`, which never places a badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Superbrilliant,
    Brilliant,
    Great,
    Best,
    Excellent,
    Good,
    Book,
    Inaccuracy,
    Mistake,
    Miss,
    Blunder,
    Megablunder,
    Forced,
    Interesting,
    Abandon,
    Checkmated,
    Draw,
    Resign,
    Timeout,
    Winner,
    Unrecognized,
}

/// Accuracy contribution of a classification: a base percentage plus a
/// jitter radius applied per scored message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccuracyProfile {
    pub base: f64,
    pub radius: f64,
}

impl Classification {
    /// Catalog order; also the display order for tally rows.
    pub const ALL: [Classification; 20] = [
        Classification::Superbrilliant,
        Classification::Brilliant,
        Classification::Great,
        Classification::Best,
        Classification::Excellent,
        Classification::Good,
        Classification::Book,
        Classification::Interesting,
        Classification::Inaccuracy,
        Classification::Mistake,
        Classification::Miss,
        Classification::Blunder,
        Classification::Megablunder,
        Classification::Forced,
        Classification::Abandon,
        Classification::Checkmated,
        Classification::Draw,
        Classification::Resign,
        Classification::Timeout,
        Classification::Winner,
    ];

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "superbrilliant" => Classification::Superbrilliant,
            "brilliant" => Classification::Brilliant,
            "great" => Classification::Great,
            "best" => Classification::Best,
            "excellent" => Classification::Excellent,
            "good" => Classification::Good,
            "book" => Classification::Book,
            "inaccuracy" => Classification::Inaccuracy,
            "mistake" => Classification::Mistake,
            "miss" => Classification::Miss,
            "blunder" => Classification::Blunder,
            "megablunder" => Classification::Megablunder,
            "forced" => Classification::Forced,
            "interesting" => Classification::Interesting,
            "abandon" => Classification::Abandon,
            "checkmated" => Classification::Checkmated,
            "draw" => Classification::Draw,
            "resign" => Classification::Resign,
            "timeout" => Classification::Timeout,
            "winner" => Classification::Winner,
            _ => Classification::Unrecognized,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Classification::Superbrilliant => "Superbrilliant",
            Classification::Brilliant => "Brilliant",
            Classification::Great => "Great",
            Classification::Best => "Best",
            Classification::Excellent => "Excellent",
            Classification::Good => "Good",
            Classification::Book => "Book",
            Classification::Inaccuracy => "Inaccuracy",
            Classification::Mistake => "Mistake",
            Classification::Miss => "Miss",
            Classification::Blunder => "Blunder",
            Classification::Megablunder => "Megablunder",
            Classification::Forced => "Forced",
            Classification::Interesting => "Interesting",
            Classification::Abandon => "Abandon",
            Classification::Checkmated => "Checkmated",
            Classification::Draw => "Draw",
            Classification::Resign => "Resign",
            Classification::Timeout => "Timeout",
            Classification::Winner => "Winner",
            Classification::Unrecognized => "Unrecognized",
        }
    }

    /// Move and special classifications counted in the review tally; result
    /// classifications (and `Unrecognized`) are excluded.
    pub fn counts_in_tally(self) -> bool {
        matches!(
            self,
            Classification::Superbrilliant
                | Classification::Brilliant
                | Classification::Great
                | Classification::Best
                | Classification::Excellent
                | Classification::Good
                | Classification::Book
                | Classification::Interesting
                | Classification::Inaccuracy
                | Classification::Mistake
                | Classification::Miss
                | Classification::Blunder
                | Classification::Megablunder
                | Classification::Forced
        )
    }

    /// Punctuation suffix shown beside the tally label, chess annotation
    /// style.
    pub fn annotation(self) -> Option<&'static str> {
        match self {
            Classification::Superbrilliant => Some(" (!!!)"),
            Classification::Brilliant => Some(" (!!)"),
            Classification::Great => Some(" (!)"),
            Classification::Best => Some(" (\u{2605})"),
            Classification::Mistake => Some(" (?)"),
            Classification::Miss => Some(" (X)"),
            Classification::Blunder => Some(" (??)"),
            Classification::Megablunder => Some(" (???)"),
            _ => None,
        }
    }

    pub fn accuracy_profile(self) -> Option<AccuracyProfile> {
        let (base, radius) = match self {
            Classification::Superbrilliant => (100.0, 0.0),
            Classification::Brilliant => (100.0, 0.0),
            Classification::Great => (100.0, 0.0),
            Classification::Best => (100.0, 0.0),
            Classification::Excellent => (99.0, 1.0),
            Classification::Good => (96.5, 1.5),
            Classification::Book => (100.0, 2.0),
            Classification::Inaccuracy => (-7.5, 2.5),
            Classification::Mistake => (-15.0, 5.0),
            Classification::Miss => (-10.0, 3.0),
            Classification::Blunder => (-60.0, 40.0),
            Classification::Megablunder => (-100.0, 0.0),
            _ => return None,
        };
        Some(AccuracyProfile { base, radius })
    }

    /// Two classifications are reserved for specific days: `Megablunder` is a
    /// Monday tag and `Superbrilliant` a Saturday tag.
    pub fn allowed_on(self, weekday: Weekday) -> bool {
        match self {
            Classification::Megablunder => weekday == Weekday::Mon,
            Classification::Superbrilliant => weekday == Weekday::Sat,
            _ => true,
        }
    }

    /// Badge asset key for this classification on the given side, or `None`
    /// when the classification draws no badge. `Checkmated` is the one
    /// side-variant tag: the right participant gets the white piece, the left
    /// one the black piece.
    pub fn badge_key(self, side: Side) -> Option<String> {
        match self {
            Classification::Unrecognized => None,
            Classification::Checkmated => {
                let suffix = if side.is_right() { "white" } else { "black" };
                Some(format!("checkmated_{suffix}"))
            }
            other => Some(other.name().to_ascii_lowercase()),
        }
    }

    /// Every asset key the badge catalog is expected to provide, including
    /// both `checkmated` variants.
    pub fn badge_asset_keys() -> Vec<String> {
        let mut keys = Vec::new();
        for classification in Classification::ALL {
            match classification {
                Classification::Checkmated => {
                    keys.push("checkmated_white".to_string());
                    keys.push("checkmated_black".to_string());
                }
                other => keys.push(other.name().to_ascii_lowercase()),
            }
        }
        keys
    }
}
