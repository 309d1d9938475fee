use rand::Rng;

use crate::analysis::{Analysis, AnalysisMessage};
use crate::chat::{Classification, Side};

const OPPONENT_NAME_MAX_CHARS: usize = 15;

/// One line of the review tally: a labeled classification with per-side
/// counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyRow {
    pub label: String,
    pub left: u64,
    pub right: u64,
}

/// Counts classified messages per side in catalog order. Annotated
/// classifications always appear; unannotated ones are dropped when both
/// counts are zero. Result classifications never appear.
pub fn build_tally(messages: &[AnalysisMessage]) -> Vec<TallyRow> {
    let mut rows = Vec::new();
    for classification in Classification::ALL {
        if !classification.counts_in_tally() {
            continue;
        }
        let count = |side: Side| -> u64 {
            messages
                .iter()
                .filter(|message| {
                    message.side == side
                        && message.classification() == Some(classification)
                })
                .count() as u64
        };
        let left = count(Side::Left);
        let right = count(Side::Right);
        match classification.annotation() {
            Some(annotation) => rows.push(TallyRow {
                label: format!("{}{annotation}", classification.name()),
                left,
                right,
            }),
            None if left != 0 || right != 0 => rows.push(TallyRow {
                label: classification.name().to_string(),
                left,
                right,
            }),
            None => {}
        }
    }
    rows
}

/// Accuracy score of one classified message: the classification's base value
/// plus uniform jitter within its radius, capped at 100.
pub fn message_accuracy<R: Rng>(classification: Classification, rng: &mut R) -> Option<f64> {
    let profile = classification.accuracy_profile()?;
    let jitter = if profile.radius == 0.0 {
        0.0
    } else {
        rng.gen_range(-profile.radius..=profile.radius)
    };
    Some((profile.base + jitter).min(100.0))
}

/// Mean accuracy over a side's scored messages, clamped to [0, 100] and
/// formatted with one decimal. Sides with no scored messages read "0.0".
pub fn accuracy_string<R: Rng>(messages: &[AnalysisMessage], side: Side, rng: &mut R) -> String {
    let mut total = 0.0;
    let mut scored = 0u64;
    for message in messages.iter().filter(|message| message.side == side) {
        let Some(classification) = message.classification() else {
            continue;
        };
        if let Some(score) = message_accuracy(classification, rng) {
            total += score;
            scored += 1;
        }
    }
    if scored == 0 {
        return "0.0".to_string();
    }
    let mean = (total / scored as f64).clamp(0.0, 100.0);
    format!("{mean:.1}")
}

/// Formats the full review table: opponents header, accuracy row, tally
/// rows, and the game rating row, as an aligned monospace table with a
/// divider under the header. Numeric columns are right-aligned.
pub fn format_review_table<R: Rng>(analysis: &Analysis, rng: &mut R) -> String {
    let truncate = |name: &str| -> String {
        name.chars().take(OPPONENT_NAME_MAX_CHARS).collect()
    };
    let elo = |side: Side| -> String {
        analysis
            .elo
            .for_side(side)
            .map(|value| value.to_string())
            .unwrap_or_else(|| "0".to_string())
    };

    let mut rows: Vec<[String; 3]> = Vec::new();
    rows.push([
        " ".to_string(),
        truncate(analysis.opponents.for_side(Side::Left)),
        truncate(analysis.opponents.for_side(Side::Right)),
    ]);
    rows.push([
        "Accuracy".to_string(),
        accuracy_string(&analysis.messages, Side::Left, rng),
        accuracy_string(&analysis.messages, Side::Right, rng),
    ]);
    rows.push([" ".to_string(), " ".to_string(), " ".to_string()]);
    for tally in build_tally(&analysis.messages) {
        rows.push([tally.label, tally.left.to_string(), tally.right.to_string()]);
    }
    rows.push([" ".to_string(), " ".to_string(), " ".to_string()]);
    rows.push(["Game Rating".to_string(), elo(Side::Left), elo(Side::Right)]);

    let mut widths = [0usize; 3];
    for row in &rows {
        for (index, cell) in row.iter().enumerate() {
            widths[index] = widths[index].max(cell.chars().count());
        }
    }

    let mut table = String::new();
    for (row_index, row) in rows.iter().enumerate() {
        table.push_str("| ");
        for (col_index, cell) in row.iter().enumerate() {
            if col_index > 0 {
                table.push_str(" | ");
            }
            let width = widths[col_index];
            let padded = if col_index > 0 && row_index > 0 {
                format!("{cell:>width$}")
            } else {
                format!("{cell:<width$}")
            };
            table.push_str(&padded);
        }
        table.push_str(" |\n");

        if row_index == 0 {
            table.push_str("|-");
            for (col_index, width) in widths.iter().enumerate() {
                if col_index > 0 {
                    table.push_str("-|-");
                }
                table.push_str(&"-".repeat(*width));
            }
            table.push_str("-|\n");
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    use super::{accuracy_string, build_tally, format_review_table};
    use crate::analysis::{Analysis, AnalysisMessage};
    use crate::chat::Side;

    fn message(side: Side, classification: &str) -> AnalysisMessage {
        AnalysisMessage {
            side,
            content: "hello".to_string(),
            classification: classification.to_string(),
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn tally_counts_per_side_in_catalog_order() {
        let messages = vec![
            message(Side::Left, "Good"),
            message(Side::Left, "Good"),
            message(Side::Right, "Blunder"),
            message(Side::Right, "Checkmated"),
            message(Side::Left, "nonsense"),
        ];
        let rows = build_tally(&messages);

        let good = rows.iter().find(|row| row.label == "Good").unwrap();
        assert_eq!((good.left, good.right), (2, 0));

        let blunder = rows.iter().find(|row| row.label == "Blunder (??)").unwrap();
        assert_eq!((blunder.left, blunder.right), (0, 1));

        // Result tags and unrecognized strings never reach the tally.
        assert!(rows.iter().all(|row| row.label != "Checkmated"));
        assert!(rows.iter().all(|row| !row.label.contains("nonsense")));

        let labels: Vec<&str> = rows.iter().map(|row| row.label.as_str()).collect();
        let brilliant = labels.iter().position(|l| *l == "Brilliant (!!)").unwrap();
        let mega = labels.iter().position(|l| *l == "Megablunder (???)").unwrap();
        assert!(brilliant < mega);
    }

    #[test]
    fn annotated_rows_survive_at_zero_counts() {
        let rows = build_tally(&[]);
        assert!(rows.iter().any(|row| row.label == "Brilliant (!!)"));
        assert!(rows.iter().all(|row| row.label != "Good"));
    }

    #[test]
    fn accuracy_is_exact_for_zero_radius_classifications() {
        let messages = vec![
            message(Side::Left, "Best"),
            message(Side::Left, "Brilliant"),
        ];
        assert_eq!(accuracy_string(&messages, Side::Left, &mut rng()), "100.0");
    }

    #[test]
    fn accuracy_clamps_to_zero_floor() {
        let messages = vec![message(Side::Right, "Megablunder")];
        assert_eq!(accuracy_string(&messages, Side::Right, &mut rng()), "0.0");
    }

    #[test]
    fn accuracy_defaults_when_nothing_is_scored() {
        let messages = vec![message(Side::Left, "Forced")];
        assert_eq!(accuracy_string(&messages, Side::Left, &mut rng()), "0.0");
        assert_eq!(accuracy_string(&[], Side::Right, &mut rng()), "0.0");
    }

    #[test]
    fn accuracy_stays_in_bounds_under_jitter() {
        let messages = vec![
            message(Side::Left, "Excellent"),
            message(Side::Left, "Blunder"),
            message(Side::Left, "Good"),
        ];
        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            let value: f64 = accuracy_string(&messages, Side::Left, &mut rng)
                .parse()
                .unwrap();
            assert!((0.0..=100.0).contains(&value));
        }
    }

    #[test]
    fn table_has_header_divider_and_aligned_columns() {
        let analysis = Analysis::from_json(
            &json!({
                "opening_name": "Test Opening",
                "comment": "ok",
                "messages": [
                    {"side": "left", "content": "hi", "classification": "Best"},
                    {"side": "right", "content": "yo", "classification": "Blunder"}
                ],
                "elo": {"left": 1400, "right": 250},
                "opponents": {"left": "AliceWithAVeryLongName", "right": "Bob"}
            })
            .to_string(),
        )
        .unwrap();

        let table = format_review_table(&analysis, &mut rng());
        let lines: Vec<&str> = table.lines().collect();

        assert!(lines[1].starts_with("|-"));
        assert!(lines.iter().any(|line| line.contains("Accuracy")));
        assert!(lines.iter().any(|line| line.contains("Game Rating")));
        // Opponent names truncate to fifteen characters.
        assert!(table.contains("AliceWithAVeryL"));
        assert!(!table.contains("AliceWithAVeryLong"));
        // Every row renders at the same width.
        let width = lines[0].chars().count();
        assert!(lines.iter().all(|line| line.chars().count() == width));
    }
}
