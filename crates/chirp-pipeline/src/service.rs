//! Pipeline lifecycle: a Stopped/Running state machine over the transport
//! and the four stage subscriptions.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::stages::{
    handle_generation, handle_recognition, handle_segmentation, handle_synthesis, StageContext,
};
use chirp_connect::ConnectionRegistry;
use chirp_mq::Transport;
use chirp_types::{topics, VoiceTask};
use chirp_voice::{ReplyGenerator, Segmenter, SpeechRecognizer, SpeechSynthesizer};
use std::sync::Arc;
use tokio::sync::Mutex;

/// The capability clients the stages call out to.
pub struct StageClients {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

/// Composes the queue transport and the four stages into one unit with a
/// start/stop lifecycle.
///
/// `submit` is fully asynchronous: it enqueues the task on the
/// segmentation topic and returns; the caller never waits for synthesis.
pub struct PipelineService {
    config: PipelineConfig,
    ctx: Arc<StageContext>,
    /// Guards the Stopped ↔ Running transition; held across the whole of
    /// `start`/`stop` so concurrent lifecycle calls serialize.
    running: Mutex<bool>,
}

impl PipelineService {
    pub fn new(
        config: PipelineConfig,
        transport: Transport,
        registry: ConnectionRegistry,
        clients: StageClients,
    ) -> Self {
        let ctx = Arc::new(StageContext {
            transport,
            registry,
            segmenter: Segmenter::new(config.segmenter),
            recognizer: clients.recognizer,
            generator: clients.generator,
            synthesizer: clients.synthesizer,
        });
        Self {
            config,
            ctx,
            running: Mutex::new(false),
        }
    }

    /// Subscribes the four stages in pipeline order and marks the service
    /// Running. Idempotent: a second `start` on a running service is Ok.
    pub async fn start(&self) -> Result<(), PipelineError> {
        let mut running = self.running.lock().await;
        if *running {
            return Ok(());
        }

        let ctx = Arc::clone(&self.ctx);
        self.ctx.transport.subscribe(
            topics::VOICE_SEGMENTATION,
            self.config.segmentation_workers,
            move |delivery| handle_segmentation(Arc::clone(&ctx), delivery),
        )?;

        let ctx = Arc::clone(&self.ctx);
        self.ctx.transport.subscribe(
            topics::VOICE_RECOGNITION,
            self.config.recognition_workers,
            move |delivery| handle_recognition(Arc::clone(&ctx), delivery),
        )?;

        let ctx = Arc::clone(&self.ctx);
        self.ctx.transport.subscribe(
            topics::VOICE_GENERATION,
            self.config.generation_workers,
            move |delivery| handle_generation(Arc::clone(&ctx), delivery),
        )?;

        let ctx = Arc::clone(&self.ctx);
        self.ctx.transport.subscribe(
            topics::VOICE_SYNTHESIS,
            self.config.synthesis_workers,
            move |delivery| handle_synthesis(Arc::clone(&ctx), delivery),
        )?;

        *running = true;
        tracing::info!(
            segmentation_workers = self.config.segmentation_workers,
            recognition_workers = self.config.recognition_workers,
            generation_workers = self.config.generation_workers,
            synthesis_workers = self.config.synthesis_workers,
            "voice pipeline started"
        );
        Ok(())
    }

    /// Stops the transport, draining in-flight stage handlers, and marks
    /// the service Stopped. Idempotent: a second `stop` is Ok.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        if !*running {
            return;
        }

        self.ctx.transport.shutdown().await;
        *running = false;
        tracing::info!("voice pipeline stopped");
    }

    /// Accepts a task for processing. Only valid while Running.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::NotRunning` when the service is stopped, or
    /// a transport error if the segmentation topic rejects the publish.
    pub async fn submit(&self, task: VoiceTask) -> Result<(), PipelineError> {
        if !*self.running.lock().await {
            return Err(PipelineError::NotRunning);
        }
        self.ctx
            .transport
            .publish(topics::VOICE_SEGMENTATION, &task)
            .await?;
        tracing::debug!(
            task_id = %task.task_id,
            user_id = %task.user_id,
            audio_bytes = task.audio.len(),
            "task submitted to pipeline"
        );
        Ok(())
    }
}
