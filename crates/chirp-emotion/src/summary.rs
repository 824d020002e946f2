//! Deterministic summary text for a daily report.

use chirp_types::EmotionLabel;
use std::collections::BTreeMap;

/// Builds the report's summary line from its label histogram.
///
/// The wording is a placeholder for a smarter collaborator-provided
/// summarizer; what matters here is that the same aggregate always yields
/// the same text, and that the dominant label is named.
pub fn summarize(label_counts: &BTreeMap<EmotionLabel, u32>, chat_count: u32) -> String {
    let dominant = label_counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(label, _)| *label);

    let Some(dominant) = dominant else {
        return "No classified chat activity today.".to_string();
    };

    let breakdown = label_counts
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(label, count)| format!("{label} {count}"))
        .collect::<Vec<_>>()
        .join(", ");

    let mood = match dominant {
        EmotionLabel::Happy => "mostly cheerful",
        EmotionLabel::Sad => "mostly downcast",
        EmotionLabel::Angry => "mostly frustrated",
        EmotionLabel::Neutral => "mostly calm",
    };

    format!("Across {chat_count} chat turns today, your child sounded {mood} ({breakdown}).")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_is_deterministic_and_names_the_dominant_label() {
        let mut counts = BTreeMap::new();
        counts.insert(EmotionLabel::Happy, 3);
        counts.insert(EmotionLabel::Sad, 1);

        let first = summarize(&counts, 4);
        let second = summarize(&counts, 4);
        assert_eq!(first, second);
        assert!(first.contains("cheerful"));
        assert!(first.contains("happy 3"));
        assert!(first.contains("sad 1"));
        assert!(first.contains('4'));
    }

    #[test]
    fn empty_histogram_has_a_fixed_summary() {
        assert_eq!(
            summarize(&BTreeMap::new(), 0),
            "No classified chat activity today."
        );
    }
}
