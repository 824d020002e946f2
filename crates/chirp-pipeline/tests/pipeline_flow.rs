//! End-to-end pipeline tests over the in-process transport, with fake
//! capability clients and a recording push sink.

use async_trait::async_trait;
use chirp_connect::{Connection, ConnectionRegistry, PushFrame, PushSink, RegistryError};
use chirp_mq::{Transport, TransportConfig};
use chirp_pipeline::{PipelineConfig, PipelineError, PipelineService, StageClients};
use chirp_types::VoiceTask;
use chirp_voice::{CapabilityError, ReplyGenerator, SpeechRecognizer, SpeechSynthesizer};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct FakeRecognizer {
    calls: Arc<AtomicU32>,
    fail: bool,
}

#[async_trait]
impl SpeechRecognizer for FakeRecognizer {
    async fn recognize(&self, audio: &[u8]) -> Result<String, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CapabilityError::Recognition("backend down".into()));
        }
        assert!(!audio.is_empty(), "recognizer receives the trimmed segment");
        Ok("tell me a story".to_string())
    }
}

struct FakeGenerator {
    inputs: Arc<std::sync::Mutex<Vec<String>>>,
    delay: Option<Duration>,
    finished: Arc<AtomicBool>,
}

#[async_trait]
impl ReplyGenerator for FakeGenerator {
    async fn generate(&self, text: &str) -> Result<String, CapabilityError> {
        self.inputs.lock().expect("test lock").push(text.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.finished.store(true, Ordering::SeqCst);
        Ok(format!("once upon a time ({text})"))
    }
}

struct FakeSynthesizer {
    fail: bool,
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, CapabilityError> {
        if self.fail {
            return Err(CapabilityError::Synthesis("backend down".into()));
        }
        Ok(text.as_bytes().to_vec())
    }
}

/// Forwards every written frame to a test channel.
struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl PushSink for ChannelSink {
    async fn send(&mut self, frame: String) -> Result<(), RegistryError> {
        self.tx
            .send(frame)
            .map_err(|e| RegistryError::Write(e.to_string()))
    }
}

struct Harness {
    service: PipelineService,
    transport: Transport,
    registry: ConnectionRegistry,
    recognizer_calls: Arc<AtomicU32>,
    generator_inputs: Arc<std::sync::Mutex<Vec<String>>>,
    generator_finished: Arc<AtomicBool>,
}

struct HarnessOptions {
    recognizer_fails: bool,
    synthesizer_fails: bool,
    generator_delay: Option<Duration>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            recognizer_fails: false,
            synthesizer_fails: false,
            generator_delay: None,
        }
    }
}

fn harness(options: HarnessOptions) -> Harness {
    let transport = Transport::new(TransportConfig {
        max_payload_bytes: 4 * 1024 * 1024,
        max_delivery_attempts: 3,
        redelivery_delay: Duration::from_millis(20),
    });
    let registry = ConnectionRegistry::new();

    let recognizer_calls = Arc::new(AtomicU32::new(0));
    let generator_inputs = Arc::new(std::sync::Mutex::new(Vec::new()));
    let generator_finished = Arc::new(AtomicBool::new(false));

    let clients = StageClients {
        recognizer: Arc::new(FakeRecognizer {
            calls: Arc::clone(&recognizer_calls),
            fail: options.recognizer_fails,
        }),
        generator: Arc::new(FakeGenerator {
            inputs: Arc::clone(&generator_inputs),
            delay: options.generator_delay,
            finished: Arc::clone(&generator_finished),
        }),
        synthesizer: Arc::new(FakeSynthesizer {
            fail: options.synthesizer_fails,
        }),
    };

    let service = PipelineService::new(
        PipelineConfig::default(),
        transport.clone(),
        registry.clone(),
        clients,
    );

    Harness {
        service,
        transport,
        registry,
        recognizer_calls,
        generator_inputs,
        generator_finished,
    }
}

/// 500ms of constant-amplitude PCM at 16kHz, loud enough to count as
/// speech for the default segmenter.
fn speech_audio() -> Vec<u8> {
    let mut audio = Vec::with_capacity(16_000);
    for _ in 0..8_000 {
        audio.extend_from_slice(&8_000i16.to_le_bytes());
    }
    audio
}

async fn register_client(registry: &ConnectionRegistry, user_id: &str) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    registry
        .register(Connection::new(user_id, Box::new(ChannelSink { tx })))
        .await;
    rx
}

async fn expect_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> PushFrame {
    let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("push should arrive before the deadline")
        .expect("push channel should stay open");
    serde_json::from_str(&frame).expect("pushed frame should be valid JSON")
}

#[tokio::test]
async fn speech_task_flows_to_a_voice_response_push() {
    let h = harness(HarnessOptions::default());
    h.service.start().await.expect("start should succeed");
    let mut rx = register_client(&h.registry, "child-1").await;

    let task = VoiceTask::new("child-1", "session-7", speech_audio());
    let task_id = task.task_id.clone();
    let created_at = task.created_at;
    h.service.submit(task).await.expect("submit should succeed");

    let frame = expect_frame(&mut rx).await;
    let PushFrame::VoiceResponse { payload } = frame else {
        panic!("expected a voice_response frame");
    };

    // Spine fields survive every stage untouched.
    assert_eq!(payload.task.task_id, task_id);
    assert_eq!(payload.task.user_id, "child-1");
    assert_eq!(payload.task.session_id, "session-7");
    assert_eq!(payload.task.created_at, created_at);

    // The synthesized audio carries the generated reply through.
    let spoken = String::from_utf8(payload.audio).expect("fake audio is utf-8");
    assert_eq!(spoken, "once upon a time (tell me a story)");

    assert!(h.transport.dead_letters().is_empty());
    h.service.stop().await;
}

#[tokio::test]
async fn silent_task_terminates_without_reaching_recognition() {
    let h = harness(HarnessOptions::default());
    h.service.start().await.expect("start should succeed");
    let mut rx = register_client(&h.registry, "child-1").await;

    let task = VoiceTask::new("child-1", "session-7", vec![0u8; 16_000]);
    h.service.submit(task).await.expect("submit should succeed");

    // Give the pipeline ample time to misbehave before asserting silence.
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(
        h.recognizer_calls.load(Ordering::SeqCst),
        0,
        "nothing may reach the recognition stage"
    );
    assert!(rx.try_recv().is_err(), "no push for a silent task");
    assert!(h.transport.dead_letters().is_empty(), "silence is not an error");
    h.service.stop().await;
}

#[tokio::test]
async fn recognition_failure_still_reaches_the_terminal_push() {
    let h = harness(HarnessOptions {
        recognizer_fails: true,
        ..HarnessOptions::default()
    });
    h.service.start().await.expect("start should succeed");
    let mut rx = register_client(&h.registry, "child-1").await;

    h.service
        .submit(VoiceTask::new("child-1", "session-7", speech_audio()))
        .await
        .expect("submit should succeed");

    let frame = expect_frame(&mut rx).await;
    let PushFrame::VoiceResponse { payload } = frame else {
        panic!("expected a voice_response frame");
    };

    // The generator saw the substituted empty text, and the task completed.
    assert_eq!(
        h.generator_inputs.lock().expect("test lock").as_slice(),
        &[String::new()]
    );
    assert!(!payload.audio.is_empty());
    assert!(h.transport.dead_letters().is_empty());
    h.service.stop().await;
}

#[tokio::test]
async fn synthesis_failure_pushes_an_empty_audio_payload() {
    let h = harness(HarnessOptions {
        synthesizer_fails: true,
        ..HarnessOptions::default()
    });
    h.service.start().await.expect("start should succeed");
    let mut rx = register_client(&h.registry, "child-1").await;

    h.service
        .submit(VoiceTask::new("child-1", "session-7", speech_audio()))
        .await
        .expect("submit should succeed");

    let frame = expect_frame(&mut rx).await;
    let PushFrame::VoiceResponse { payload } = frame else {
        panic!("expected a voice_response frame");
    };
    assert!(
        payload.audio.is_empty(),
        "capability failure substitutes an empty payload"
    );
    h.service.stop().await;
}

#[tokio::test]
async fn result_for_an_offline_user_is_dropped_silently() {
    let h = harness(HarnessOptions::default());
    h.service.start().await.expect("start should succeed");

    h.service
        .submit(VoiceTask::new("ghost", "session-7", speech_audio()))
        .await
        .expect("submit should succeed");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        h.transport.dead_letters().is_empty(),
        "pushing to an absent connection is a no-op, not a failure"
    );
    h.service.stop().await;
}

#[tokio::test]
async fn submit_is_rejected_while_stopped() {
    let h = harness(HarnessOptions::default());
    let err = h
        .service
        .submit(VoiceTask::new("child-1", "session-7", speech_audio()))
        .await
        .expect_err("submit before start should fail");
    assert!(matches!(err, PipelineError::NotRunning));
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let h = harness(HarnessOptions::default());
    h.service.start().await.expect("first start should succeed");
    h.service
        .start()
        .await
        .expect("second start on a running service is a no-op");

    h.service.stop().await;
    h.service.stop().await;

    let err = h
        .service
        .submit(VoiceTask::new("child-1", "session-7", speech_audio()))
        .await
        .expect_err("submit after stop should fail");
    assert!(matches!(err, PipelineError::NotRunning));
}

#[tokio::test]
async fn stop_waits_for_the_in_flight_handler() {
    let h = harness(HarnessOptions {
        generator_delay: Some(Duration::from_millis(150)),
        ..HarnessOptions::default()
    });
    h.service.start().await.expect("start should succeed");

    h.service
        .submit(VoiceTask::new("child-1", "session-7", speech_audio()))
        .await
        .expect("submit should succeed");

    // Wait until the generation handler is mid-execution.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while h.generator_inputs.lock().expect("test lock").is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "generation handler should have started"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    h.service.stop().await;
    assert!(
        h.generator_finished.load(Ordering::SeqCst),
        "stop must not return while a stage handler is mid-execution"
    );
}
