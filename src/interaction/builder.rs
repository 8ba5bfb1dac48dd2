use super::events::{InteractionEvent, InteractionHandle, UserCommand};
use super::tracker::LaneTracker;
use super::InteractionStateMachine;
use crate::audio_sink::AudioSink;
use crate::capture::{CaptureControl, LoggingCapture};
use crate::classifier::{ClassifierOptions, DialogueActClassifier};
use crate::config::SessionConfig;
use crate::error::{LectureError, Result};
use crate::language::LanguageConfig;
use crate::lane::{LaneEvent, LaneHandle};
use crate::llm::{DialogueEngine, DialogueEvent};
use crate::transcript::{InMemoryTranscript, TranscriptLog};
use crate::tts::SpeechSynthesizer;
use crate::types::{InteractionState, Lane};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

const EVENT_CAPACITY: usize = 256;

/// Wires collaborators into an [`InteractionStateMachine`].
///
/// The dialogue engine reports back through [`Self::dialogue_sender`], so
/// create the builder first, then the engine.
pub struct InteractionBuilder {
    session: SessionConfig,
    language: LanguageConfig,
    classifier_options: ClassifierOptions,
    engine: Option<Arc<dyn DialogueEngine>>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    lecture_sink: Option<Arc<dyn AudioSink>>,
    interjection_sink: Option<Arc<dyn AudioSink>>,
    capture: Arc<dyn CaptureControl>,
    transcript: Arc<dyn TranscriptLog>,
    dialogue_tx: mpsc::UnboundedSender<DialogueEvent>,
    dialogue_rx: mpsc::UnboundedReceiver<DialogueEvent>,
}

impl InteractionBuilder {
    pub fn new(session: SessionConfig, language: LanguageConfig) -> Self {
        let (dialogue_tx, dialogue_rx) = mpsc::unbounded_channel();
        Self {
            session,
            language,
            classifier_options: ClassifierOptions::default(),
            engine: None,
            synthesizer: None,
            lecture_sink: None,
            interjection_sink: None,
            capture: Arc::new(LoggingCapture),
            transcript: Arc::new(InMemoryTranscript::new()),
            dialogue_tx,
            dialogue_rx,
        }
    }

    /// Sender the dialogue engine must publish its events on
    pub fn dialogue_sender(&self) -> mpsc::UnboundedSender<DialogueEvent> {
        self.dialogue_tx.clone()
    }

    pub fn engine(mut self, engine: Arc<dyn DialogueEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn lecture_sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.lecture_sink = Some(sink);
        self
    }

    pub fn interjection_sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.interjection_sink = Some(sink);
        self
    }

    pub fn capture(mut self, capture: Arc<dyn CaptureControl>) -> Self {
        self.capture = capture;
        self
    }

    pub fn transcript(mut self, transcript: Arc<dyn TranscriptLog>) -> Self {
        self.transcript = transcript;
        self
    }

    pub fn classifier_options(mut self, options: ClassifierOptions) -> Self {
        self.classifier_options = options;
        self
    }

    /// Spawn both lanes and return the machine with its handle.
    ///
    /// Must be called inside a tokio runtime. Fails with
    /// [`LectureError::MissingCollaborator`] before spawning anything if a
    /// required collaborator was not supplied.
    pub fn build(self) -> Result<(InteractionStateMachine, InteractionHandle)> {
        let engine = self
            .engine
            .ok_or(LectureError::MissingCollaborator("dialogue engine"))?;
        let synthesizer = self
            .synthesizer
            .ok_or(LectureError::MissingCollaborator("speech synthesizer"))?;
        let lecture_sink = self
            .lecture_sink
            .ok_or(LectureError::MissingCollaborator("lecture audio sink"))?;
        let interjection_sink = self
            .interjection_sink
            .ok_or(LectureError::MissingCollaborator("interjection audio sink"))?;
        self.language.validate()?;

        let shutdown = CancellationToken::new();
        let (lane_tx, lane_rx) = mpsc::unbounded_channel::<LaneEvent>();
        let (lecture, lecture_task) = LaneHandle::spawn(
            Lane::Lecture,
            synthesizer.clone(),
            lecture_sink,
            &self.session,
            lane_tx.clone(),
            shutdown.child_token(),
        );
        let (interjection, interjection_task) = LaneHandle::spawn(
            Lane::Interjection,
            synthesizer,
            interjection_sink,
            &self.session,
            lane_tx,
            shutdown.child_token(),
        );

        let (commands_tx, commands_rx) = mpsc::unbounded_channel::<UserCommand>();
        let (events_tx, _) = broadcast::channel::<InteractionEvent>(EVENT_CAPACITY);
        let (state_tx, state_rx) = watch::channel(InteractionState::Idle);

        let machine = InteractionStateMachine {
            state: InteractionState::Idle,
            classifier: DialogueActClassifier::with_options(
                self.language,
                self.classifier_options,
            ),
            engine,
            transcript: self.transcript,
            capture: self.capture,
            lecture: LaneTracker::new(lecture),
            interjection: LaneTracker::new(interjection),
            quiz: Default::default(),
            raise_hand_requested: false,
            turn_utterances: 0,
            next_stream_lane: Lane::Lecture,
            stream: None,
            capture_arm: None,
            capture_enable_delay: self.session.capture_enable_delay(),
            prompt_playback_timeout: self.session.prompt_playback_timeout(),
            lane_events: lane_rx,
            dialogue_events: self.dialogue_rx,
            commands: commands_rx,
            events: events_tx.clone(),
            state_tx,
            shutdown: shutdown.clone(),
            lane_tasks: vec![lecture_task, interjection_task],
        };

        let handle = InteractionHandle {
            commands: commands_tx,
            events: events_tx,
            state: state_rx,
            shutdown,
        };

        Ok((machine, handle))
    }
}
