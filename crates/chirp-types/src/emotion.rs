//! Emotion domain types: signals, daily reports, and labels.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The fixed set of emotion labels produced by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionLabel {
    /// Positive affect.
    Happy,
    /// Negative affect, low arousal.
    Sad,
    /// Negative affect, high arousal.
    Angry,
    /// No clear affect.
    Neutral,
}

impl EmotionLabel {
    /// Returns the canonical string label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Neutral => "neutral",
        }
    }

    /// All labels, in canonical order.
    pub const ALL: [EmotionLabel; 4] = [Self::Happy, Self::Sad, Self::Angry, Self::Neutral];
}

impl std::fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmotionLabel {
    type Err = ParseEmotionLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "happy" => Ok(Self::Happy),
            "sad" => Ok(Self::Sad),
            "angry" => Ok(Self::Angry),
            "neutral" => Ok(Self::Neutral),
            _ => Err(ParseEmotionLabelError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown emotion label string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown emotion label: {0}")]
pub struct ParseEmotionLabelError(pub String);

/// One inferred emotion classification tied to one chat message.
///
/// Written by the emotion-inference collaborator; immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionSignal {
    /// Database row id (0 before insertion).
    pub id: i64,
    /// The user whose message was classified.
    pub user_id: String,
    /// The chat message the classification belongs to.
    pub message_id: String,
    /// The inferred label.
    pub label: EmotionLabel,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f64,
    /// When the signal was recorded.
    pub created_at: DateTime<Utc>,
}

/// One user's daily emotion rollup.
///
/// Created once per user per day by the report scheduler; `pushed_at` is
/// stamped exactly once after successful delivery and never cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionReport {
    /// Database row id (0 before insertion).
    pub id: i64,
    /// The user the report is about.
    pub user_id: String,
    /// The day the report covers.
    pub report_date: NaiveDate,
    /// Number of classified chat turns that day.
    pub chat_count: u32,
    /// Occurrence count per emotion label. Labels with zero occurrences
    /// are omitted.
    pub label_counts: BTreeMap<EmotionLabel, u32>,
    /// Free-text summary derived from the aggregate.
    pub summary: String,
    /// When the report was generated.
    pub created_at: DateTime<Utc>,
    /// When the report was pushed to the parent, if it has been.
    pub pushed_at: Option<DateTime<Utc>>,
}

impl EmotionReport {
    /// Returns the label with the highest occurrence count, ties broken by
    /// canonical label order. `None` for an empty report.
    pub fn dominant_label(&self) -> Option<EmotionLabel> {
        self.label_counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(label, _)| *label)
    }
}
