//! Voice task spine and per-stage envelope types.
//!
//! A [`VoiceTask`] identifies one voice interaction unit and enters the
//! pipeline carrying the raw audio frame. Each stage wraps the work in a
//! stage-specific envelope rather than mutating anything in place: the
//! identity fields travel as a [`TaskSpine`] carried forward unchanged,
//! and a later envelope is only ever constructed from a successfully
//! completed earlier one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One voice interaction unit submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceTask {
    /// Unique task id.
    pub task_id: String,
    /// The user who spoke.
    pub user_id: String,
    /// The chat session the utterance belongs to.
    pub session_id: String,
    /// Raw audio payload (16-bit little-endian PCM).
    pub audio: Vec<u8>,
    /// When the task entered the system.
    pub created_at: DateTime<Utc>,
    /// Delivery-retry counter, incremented by the broker on redelivery.
    pub retry_count: u32,
}

impl VoiceTask {
    /// Creates a new task with a generated id and the current time.
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>, audio: Vec<u8>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            audio,
            created_at: Utc::now(),
            retry_count: 0,
        }
    }

    /// The identity fields carried forward through every stage envelope.
    pub fn spine(&self) -> TaskSpine {
        TaskSpine {
            task_id: self.task_id.clone(),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            retry_count: self.retry_count,
        }
    }
}

/// The identity of a task, embedded in every stage envelope.
///
/// The raw audio frame stays behind in the [`VoiceTask`]; dragging it
/// through every downstream message would double their serialized size
/// for no reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpine {
    /// Unique task id.
    pub task_id: String,
    /// The user who spoke.
    pub user_id: String,
    /// The chat session the utterance belongs to.
    pub session_id: String,
    /// When the task entered the system.
    pub created_at: DateTime<Utc>,
    /// Delivery-retry counter at the time the task was segmented.
    pub retry_count: u32,
}

/// Output of the segmentation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationResult {
    /// The task spine.
    #[serde(flatten)]
    pub task: TaskSpine,
    /// Whether the audio contained speech at all.
    pub is_speech: bool,
    /// Start of the detected speech span, milliseconds from frame start.
    pub speech_start_ms: u64,
    /// End of the detected speech span, milliseconds from frame start.
    pub speech_end_ms: u64,
    /// The audio trimmed to the speech span.
    pub audio_segment: Vec<u8>,
}

/// Output of the recognition stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// The task spine.
    #[serde(flatten)]
    pub task: TaskSpine,
    /// Recognized text; empty when the recognition capability failed.
    pub text: String,
}

impl RecognitionResult {
    /// Builds a recognition envelope from a completed segmentation envelope.
    pub fn from_segmentation(seg: SegmentationResult, text: String) -> Self {
        Self {
            task: seg.task,
            text,
        }
    }
}

/// Output of the generation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// The task spine.
    #[serde(flatten)]
    pub task: TaskSpine,
    /// Generated reply text; empty when the generation capability failed.
    pub reply: String,
}

impl GenerationResult {
    /// Builds a generation envelope from a completed recognition envelope.
    pub fn from_recognition(rec: RecognitionResult, reply: String) -> Self {
        Self {
            task: rec.task,
            reply,
        }
    }
}

/// Output of the synthesis stage, pushed back to the originating client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResult {
    /// The task spine.
    #[serde(flatten)]
    pub task: TaskSpine,
    /// Synthesized audio; empty when the synthesis capability failed.
    pub audio: Vec<u8>,
}

impl SynthesisResult {
    /// Builds a synthesis envelope from a completed generation envelope.
    pub fn from_generation(gen: GenerationResult, audio: Vec<u8>) -> Self {
        Self {
            task: gen.task,
            audio,
        }
    }
}

/// Conceptual processing state of a task as it moves through stages.
///
/// Not persisted: the state is derivable from which topic currently holds
/// the task plus the broker's delivery-attempt counter. The enum exists so
/// logs and operator tooling share one vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Queued, no worker has picked it up yet.
    Pending,
    /// A stage handler is executing it.
    Running,
    /// The terminal stage finished (push attempted).
    Complete,
    /// Dead-lettered after exhausting delivery attempts.
    Failed,
    /// Nacked and awaiting redelivery.
    Retrying,
}

impl ProcessingStatus {
    /// Returns the canonical string label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
