//! The four stage processors.
//!
//! Each handler deserializes its input envelope, performs the stage's unit
//! of work, and republishes to the next topic (or pushes, for the terminal
//! stage). Deserialization failures nack the message back to the broker;
//! capability failures are absorbed into an empty-payload success so the
//! task keeps moving.

use chirp_connect::{ConnectionRegistry, PushFrame};
use chirp_mq::{Delivery, HandlerError, Transport};
use chirp_types::{
    topics, GenerationResult, RecognitionResult, SegmentationResult, SynthesisResult, VoiceTask,
};
use chirp_voice::{ReplyGenerator, Segmenter, SpeechRecognizer, SpeechSynthesizer};
use std::sync::Arc;

/// Everything a stage handler needs, shared across all four subscriptions.
pub(crate) struct StageContext {
    pub transport: Transport,
    pub registry: ConnectionRegistry,
    pub segmenter: Segmenter,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

fn decode<T: serde::de::DeserializeOwned>(delivery: &Delivery) -> Result<T, HandlerError> {
    serde_json::from_slice(&delivery.payload).map_err(|e| {
        tracing::warn!(
            topic = %delivery.topic,
            attempt = delivery.attempt,
            "malformed envelope, nacking for redelivery: {}",
            e
        );
        HandlerError::new(e)
    })
}

/// Segmentation: decide whether the frame contains speech and trim it.
///
/// Non-speech is a normal empty outcome: the task terminates silently
/// with an ack, producing neither output nor error.
pub(crate) async fn handle_segmentation(
    ctx: Arc<StageContext>,
    delivery: Delivery,
) -> Result<(), HandlerError> {
    let task: VoiceTask = decode(&delivery)?;

    let result = match segment(&ctx.segmenter, &task) {
        Some(result) => result,
        None => {
            tracing::debug!(
                task_id = %task.task_id,
                user_id = %task.user_id,
                "no speech detected, terminating task"
            );
            return Ok(());
        }
    };

    ctx.transport
        .publish(topics::VOICE_RECOGNITION, &result)
        .await
        .map_err(HandlerError::new)
}

/// Recognition: audio segment → text.
pub(crate) async fn handle_recognition(
    ctx: Arc<StageContext>,
    delivery: Delivery,
) -> Result<(), HandlerError> {
    let input: SegmentationResult = decode(&delivery)?;
    let result = recognize(ctx.recognizer.as_ref(), input).await;

    ctx.transport
        .publish(topics::VOICE_GENERATION, &result)
        .await
        .map_err(HandlerError::new)
}

/// Generation: recognized text → reply text.
pub(crate) async fn handle_generation(
    ctx: Arc<StageContext>,
    delivery: Delivery,
) -> Result<(), HandlerError> {
    let input: RecognitionResult = decode(&delivery)?;
    let result = generate(ctx.generator.as_ref(), input).await;

    ctx.transport
        .publish(topics::VOICE_SYNTHESIS, &result)
        .await
        .map_err(HandlerError::new)
}

/// Synthesis: reply text → audio, pushed straight to the originating user.
///
/// Terminal stage. Delivery is fire-and-forget: an absent connection drops
/// the result, and a push failure is absorbed. There is no retained
/// outbox; redelivering the whole task for a dead socket would
/// re-synthesize for nobody.
pub(crate) async fn handle_synthesis(
    ctx: Arc<StageContext>,
    delivery: Delivery,
) -> Result<(), HandlerError> {
    let input: GenerationResult = decode(&delivery)?;
    let result = synthesize(ctx.synthesizer.as_ref(), input).await;

    let user_id = result.task.user_id.clone();
    let task_id = result.task.task_id.clone();
    let frame = PushFrame::VoiceResponse { payload: result };

    if let Err(e) = ctx.registry.push(&user_id, &frame).await {
        tracing::warn!(
            task_id = %task_id,
            user_id = %user_id,
            "failed to push voice response: {}",
            e
        );
    }
    Ok(())
}

/// Runs the segmenter over a task's audio. `None` means no speech.
pub(crate) fn segment(segmenter: &Segmenter, task: &VoiceTask) -> Option<SegmentationResult> {
    let span = segmenter.detect(&task.audio)?;
    let audio_segment = segmenter.slice(&task.audio, span).to_vec();
    Some(SegmentationResult {
        task: task.spine(),
        is_speech: true,
        speech_start_ms: span.start_ms,
        speech_end_ms: span.end_ms,
        audio_segment,
    })
}

/// Invokes recognition, absorbing capability failure into empty text.
pub(crate) async fn recognize(
    recognizer: &dyn SpeechRecognizer,
    input: SegmentationResult,
) -> RecognitionResult {
    let text = match recognizer.recognize(&input.audio_segment).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(
                task_id = %input.task.task_id,
                "recognition failed, continuing with empty text: {}",
                e
            );
            String::new()
        }
    };
    RecognitionResult::from_segmentation(input, text)
}

/// Invokes reply generation, absorbing capability failure into an empty reply.
pub(crate) async fn generate(
    generator: &dyn ReplyGenerator,
    input: RecognitionResult,
) -> GenerationResult {
    let reply = match generator.generate(&input.text).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(
                task_id = %input.task.task_id,
                "generation failed, continuing with empty reply: {}",
                e
            );
            String::new()
        }
    };
    GenerationResult::from_recognition(input, reply)
}

/// Invokes synthesis, absorbing capability failure into empty audio.
pub(crate) async fn synthesize(
    synthesizer: &dyn SpeechSynthesizer,
    input: GenerationResult,
) -> SynthesisResult {
    let audio = match synthesizer.synthesize(&input.reply).await {
        Ok(audio) => audio,
        Err(e) => {
            tracing::warn!(
                task_id = %input.task.task_id,
                "synthesis failed, continuing with empty audio: {}",
                e
            );
            Vec::new()
        }
    };
    SynthesisResult::from_generation(input, audio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chirp_voice::{CapabilityError, SegmenterConfig};

    struct FailingRecognizer;

    #[async_trait::async_trait]
    impl SpeechRecognizer for FailingRecognizer {
        async fn recognize(&self, _audio: &[u8]) -> Result<String, CapabilityError> {
            Err(CapabilityError::Recognition("backend down".into()))
        }
    }

    fn speech_task() -> VoiceTask {
        // 500ms of constant-amplitude PCM at 16kHz, loud enough to count
        // as speech for the default segmenter.
        let mut audio = Vec::new();
        for _ in 0..8_000 {
            audio.extend_from_slice(&8_000i16.to_le_bytes());
        }
        VoiceTask::new("child-1", "session-1", audio)
    }

    #[test]
    fn silence_terminates_without_output() {
        let segmenter = Segmenter::new(SegmenterConfig::default());
        let task = VoiceTask::new("child-1", "session-1", vec![0; 16_000]);
        assert!(segment(&segmenter, &task).is_none());
    }

    #[test]
    fn segmentation_preserves_spine_and_trims_audio() {
        let segmenter = Segmenter::new(SegmenterConfig::default());
        let task = speech_task();
        let result = segment(&segmenter, &task).expect("speech should be found");

        assert!(result.is_speech);
        assert_eq!(result.task.task_id, task.task_id);
        assert_eq!(result.task.user_id, task.user_id);
        assert!(!result.audio_segment.is_empty());
    }

    #[tokio::test]
    async fn recognition_failure_becomes_empty_text() {
        let segmenter = Segmenter::new(SegmenterConfig::default());
        let task = speech_task();
        let seg = segment(&segmenter, &task).expect("speech should be found");

        let result = recognize(&FailingRecognizer, seg).await;
        assert_eq!(result.text, "");
        assert_eq!(result.task.task_id, task.task_id);
    }
}
