//! Scripted collaborators for driving lanes and the interaction machine
//! under tokio's paused clock.

#![allow(dead_code)]

use async_trait::async_trait;
use lecture_agent::{
    audio_sink::{AudioError, AudioSink},
    capture::CaptureControl,
    llm::{DialogueEngine, DialogueEvent, LlmError},
    tts::{SpeechSynthesizer, SynthesisRequest, TtsError},
    types::{AudioBuffer, AudioFormat},
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

pub const SYNTH_TIME: Duration = Duration::from_millis(50);
pub const PLAY_TIME: Duration = Duration::from_millis(500);

/// Returns the request text as "audio". Texts containing `FAIL` fail.
pub struct ScriptedSynthesizer {
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSynthesizer {
    pub fn new() -> Self {
        Self::with_delay(SYNTH_TIME)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioBuffer, TtsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if request.text.contains("FAIL") {
            return Err(TtsError::ApiError {
                status: 500,
                message: "scripted failure".to_string(),
            });
        }
        Ok(AudioBuffer::new(
            request.text.as_bytes().to_vec(),
            AudioFormat::Mp3,
            24_000,
        ))
    }
}

/// Plays every buffer for a fixed time and remembers what finished
pub struct TestSink {
    duration: Duration,
    stopped: Notify,
    played: Mutex<Vec<String>>,
    stops: AtomicUsize,
}

impl TestSink {
    pub fn new() -> Self {
        Self::with_duration(PLAY_TIME)
    }

    pub fn with_duration(duration: Duration) -> Self {
        Self {
            duration,
            stopped: Notify::new(),
            played: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
        }
    }

    /// Texts whose playback ran to the end, in order
    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSink for TestSink {
    async fn play(&self, audio: AudioBuffer) -> Result<(), AudioError> {
        let text = String::from_utf8_lossy(audio.bytes()).to_string();
        tokio::select! {
            _ = tokio::time::sleep(self.duration) => {
                self.played.lock().unwrap().push(text);
                Ok(())
            }
            _ = self.stopped.notified() => Err(AudioError::Interrupted),
        }
    }

    async fn stop(&self) -> Result<(), AudioError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.stopped.notify_waiters();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    UserMessage(String),
    QuizAnswer { question: String, answer: String },
    Interjection { text: String, instruction: String },
    Cancel,
}

/// Records every command. Tests play the engine's part by pushing
/// [`DialogueEvent`]s through [`RecordingEngine::events`].
pub struct RecordingEngine {
    calls: Mutex<Vec<EngineCall>>,
    pub events: mpsc::UnboundedSender<DialogueEvent>,
    /// Make every send fail, as an unreachable API would
    pub fail_sends: AtomicBool,
}

impl RecordingEngine {
    pub fn new(events: mpsc::UnboundedSender<DialogueEvent>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            events,
            fail_sends: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Stream a whole AI turn: start, one delta per piece, completion
    pub fn speak(&self, run_id: &str, pieces: &[&str]) {
        self.events
            .send(DialogueEvent::RunStarted {
                run_id: run_id.to_string(),
            })
            .unwrap();
        for piece in pieces {
            self.events
                .send(DialogueEvent::TextDelta(piece.to_string()))
                .unwrap();
        }
        self.events.send(DialogueEvent::RunCompleted).unwrap();
    }

    fn record(&self, call: EngineCall) -> Result<(), LlmError> {
        self.calls.lock().unwrap().push(call);
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(LlmError::InvalidResponse("scripted send failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DialogueEngine for RecordingEngine {
    async fn send_user_message(&self, text: &str) -> Result<(), LlmError> {
        self.record(EngineCall::UserMessage(text.to_string()))
    }

    async fn send_quiz_answer(&self, question: &str, answer: &str) -> Result<(), LlmError> {
        self.record(EngineCall::QuizAnswer {
            question: question.to_string(),
            answer: answer.to_string(),
        })
    }

    async fn send_interjection(
        &self,
        text: &str,
        follow_up_instruction: &str,
    ) -> Result<(), LlmError> {
        self.record(EngineCall::Interjection {
            text: text.to_string(),
            instruction: follow_up_instruction.to_string(),
        })
    }

    async fn cancel_current_run(&self) -> Result<(), LlmError> {
        self.calls.lock().unwrap().push(EngineCall::Cancel);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingCapture {
    capture: Mutex<Vec<bool>>,
    raise_hand: Mutex<Vec<bool>>,
}

impl RecordingCapture {
    pub fn capture_enabled(&self) -> bool {
        self.capture.lock().unwrap().last().copied().unwrap_or(false)
    }

    pub fn raise_hand_enabled(&self) -> bool {
        self.raise_hand.lock().unwrap().last().copied().unwrap_or(false)
    }
}

impl CaptureControl for RecordingCapture {
    fn set_capture_enabled(&self, enabled: bool) {
        self.capture.lock().unwrap().push(enabled);
    }

    fn set_raise_hand_enabled(&self, enabled: bool) {
        self.raise_hand.lock().unwrap().push(enabled);
    }
}
