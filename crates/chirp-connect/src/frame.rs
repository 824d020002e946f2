//! Tagged push payloads delivered over a live connection.

use chirp_types::{EmotionReport, SynthesisResult};
use serde::{Deserialize, Serialize};

/// A message pushed to a connected client.
///
/// Serialized as JSON with a `type` tag; the transport framing (binary vs
/// text) is the connection layer's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushFrame {
    /// The synthesized reply for one voice task, sent to the child who spoke.
    VoiceResponse {
        /// The terminal pipeline envelope.
        payload: SynthesisResult,
    },
    /// A daily emotion report, sent to the linked parent.
    EmotionReport {
        /// The persisted report.
        payload: EmotionReport,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chirp_types::VoiceTask;

    #[test]
    fn voice_response_serializes_with_type_tag() {
        let task = VoiceTask::new("child-1", "session-1", vec![]);
        let frame = PushFrame::VoiceResponse {
            payload: SynthesisResult {
                task: task.spine(),
                audio: vec![1, 2, 3],
            },
        };

        let json = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(json["type"], "voice_response");
        assert_eq!(json["payload"]["user_id"], "child-1");
    }
}
