//! Turn-taking between the lecture, the dialogue engine and the listener.
//!
//! [`InteractionStateMachine`] owns the interaction state, both lanes'
//! segmenters and the quiz/raise-hand bookkeeping. It runs as a single task
//! reacting to lane events, dialogue-engine events, listener commands and its
//! own capture-arming timer, so none of that state is shared.

mod builder;
mod events;
mod tracker;

pub use builder::InteractionBuilder;
pub use events::{InteractionEvent, InteractionHandle, UserCommand};

use crate::capture::CaptureControl;
use crate::classifier::{AiTurnAct, DialogueAct, DialogueActClassifier};
use crate::error::{LectureError, Result};
use crate::lane::{LaneEvent, LaneEventKind};
use crate::llm::{DialogueEngine, DialogueEvent};
use crate::transcript::{Speaker, TranscriptLog};
use crate::types::{InteractionState, Lane, QuizContext, SentenceUnit};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracker::LaneTracker;

/// The AI run currently streaming text into a lane
#[derive(Debug, Clone, Copy)]
struct ActiveStream {
    lane: Lane,
    completed: bool,
}

/// Pending re-enable of speech capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureArm {
    /// Waiting for a spoken prompt to finish on the interjection lane
    AwaitingPlayback { until_index: u64, deadline: Instant },
    /// Prompt done (or none), waiting out the settle delay
    Delay { deadline: Instant },
}

impl CaptureArm {
    fn deadline(&self) -> Instant {
        match self {
            Self::AwaitingPlayback { deadline, .. } | Self::Delay { deadline } => *deadline,
        }
    }
}

pub struct InteractionStateMachine {
    state: InteractionState,
    classifier: DialogueActClassifier,
    engine: Arc<dyn DialogueEngine>,
    transcript: Arc<dyn TranscriptLog>,
    capture: Arc<dyn CaptureControl>,
    lecture: LaneTracker,
    interjection: LaneTracker,
    quiz: QuizContext,
    raise_hand_requested: bool,
    /// AI utterances spoken since the current run started
    turn_utterances: usize,
    /// Lane that the next started run streams into
    next_stream_lane: Lane,
    stream: Option<ActiveStream>,
    capture_arm: Option<CaptureArm>,
    capture_enable_delay: Duration,
    prompt_playback_timeout: Duration,

    lane_events: mpsc::UnboundedReceiver<LaneEvent>,
    dialogue_events: mpsc::UnboundedReceiver<DialogueEvent>,
    commands: mpsc::UnboundedReceiver<UserCommand>,
    events: broadcast::Sender<InteractionEvent>,
    state_tx: watch::Sender<InteractionState>,
    shutdown: CancellationToken,
    lane_tasks: Vec<JoinHandle<()>>,
}

impl InteractionStateMachine {
    pub fn state(&self) -> InteractionState {
        self.state
    }

    /// Process events until shutdown or until every input handle is dropped
    pub async fn run(mut self) {
        log::info!("🚦 Interaction loop started");
        self.enter_state_effects(self.state);

        loop {
            let capture_deadline = self.capture_arm.map(|arm| arm.deadline());
            let capture_timer = async move {
                match capture_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = self.lane_events.recv() => match event {
                    Some(event) => self.handle_lane_event(event),
                    None => break,
                },
                event = self.dialogue_events.recv() => match event {
                    Some(event) => self.handle_dialogue_event(event),
                    None => {
                        log::error!("Dialogue engine event channel closed");
                        break;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                _ = capture_timer => self.on_capture_timer(),
            }
        }

        self.shutdown.cancel();
        for task in self.lane_tasks.drain(..) {
            if let Err(e) = task.await {
                log::error!("Lane task failed: {}", e);
            }
        }
        log::info!("🚦 Interaction loop stopped");
    }

    async fn handle_command(&mut self, command: UserCommand) {
        match command {
            UserCommand::Start { opening } => {
                if let Err(e) = self.initialize(opening.as_deref()).await {
                    log::warn!("Start ignored: {}", e);
                }
            }
            UserCommand::Utterance(text) => self.handle_user_utterance(&text).await,
            UserCommand::RaiseHand => self.request_raise_hand(),
            UserCommand::HardReset => self.hard_reset().await,
        }
    }

    // --- state ---

    fn set_state(&mut self, next: InteractionState) {
        if self.state == next {
            return;
        }
        let previous = self.state;
        self.state = next;
        log::info!("🔄 State: {} -> {}", previous, next);
        self.enter_state_effects(next);
        self.state_tx.send_replace(next);
        self.publish(InteractionEvent::StateChanged {
            from: previous,
            to: next,
        });
    }

    fn enter_state_effects(&mut self, state: InteractionState) {
        match state {
            InteractionState::Idle => {
                self.capture.set_capture_enabled(false);
                self.capture.set_raise_hand_enabled(false);
            }
            InteractionState::Lecturing => {
                self.capture_arm = None;
                self.capture.set_capture_enabled(false);
                self.capture.set_raise_hand_enabled(!self.raise_hand_requested);
            }
            InteractionState::QuestionPending | InteractionState::ProcessingUserInput => {
                self.capture.set_capture_enabled(false);
                self.capture.set_raise_hand_enabled(false);
            }
            InteractionState::WaitingForUserInput => {
                // Capture is armed by the timer once the prompt has been heard
                self.capture.set_raise_hand_enabled(false);
            }
        }
    }

    fn publish(&self, event: InteractionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn tracker(&mut self, lane: Lane) -> &mut LaneTracker {
        match lane {
            Lane::Lecture => &mut self.lecture,
            Lane::Interjection => &mut self.interjection,
        }
    }

    // --- operations ---

    /// Leave `Idle` and start lecturing, optionally asking the engine for an
    /// opening turn.
    pub async fn initialize(&mut self, opening: Option<&str>) -> Result<()> {
        if self.state != InteractionState::Idle {
            return Err(LectureError::InvalidState {
                operation: "initialize",
                state: self.state,
            });
        }

        self.raise_hand_requested = false;
        self.set_state(InteractionState::Lecturing);

        if let Some(opening) = opening {
            self.next_stream_lane = Lane::Lecture;
            if let Err(e) = self.engine.send_user_message(opening).await {
                log::error!("❌ Failed to request the opening turn: {}", e);
                self.set_state(InteractionState::Idle);
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Flag that the listener wants to ask something at the next natural pause
    pub fn request_raise_hand(&mut self) {
        if self.state != InteractionState::Lecturing {
            log::warn!("Raise hand ignored in state {}", self.state);
            return;
        }
        if self.raise_hand_requested {
            log::debug!("Raise hand already pending");
            return;
        }
        self.raise_hand_requested = true;
        self.capture.set_raise_hand_enabled(false);
        log::info!("✋ Hand raised, will ask at the next pause");
    }

    /// Ingress for transcribed listener speech
    pub async fn handle_user_utterance(&mut self, text: &str) {
        if !matches!(
            self.state,
            InteractionState::QuestionPending | InteractionState::WaitingForUserInput
        ) {
            log::warn!("Utterance ignored in state {}: '{}'", self.state, text);
            return;
        }
        let text = text.trim();
        if text.is_empty() {
            log::debug!("Ignoring empty utterance");
            return;
        }

        self.capture_arm = None;
        self.set_state(InteractionState::ProcessingUserInput);
        self.transcript.append(Speaker::User, text);

        let act = self
            .classifier
            .classify_user_utterance(text, self.quiz.active);
        log::info!("🧭 Utterance classified as {:?}", act);

        let sent = match act {
            DialogueAct::QuizAnswer => {
                let question = std::mem::take(&mut self.quiz.question_text);
                self.quiz.clear();
                self.resume_lecture();
                self.next_stream_lane = Lane::Lecture;
                self.engine.send_quiz_answer(&question, text).await
            }
            DialogueAct::Continuation => {
                self.resume_lecture();
                self.next_stream_lane = Lane::Lecture;
                self.engine.send_user_message(text).await
            }
            DialogueAct::Question | DialogueAct::AmbiguousStatement => {
                self.interrupt_lecture().await;
                self.next_stream_lane = Lane::Interjection;
                let instruction = self
                    .classifier
                    .language()
                    .interruption_follow_up_instruction
                    .clone();
                self.engine.send_interjection(text, &instruction).await
            }
        };

        if let Err(e) = sent {
            log::error!("❌ Failed to send utterance to the dialogue engine: {}", e);
            self.set_state(InteractionState::Idle);
        }
    }

    /// Cancel everything and return to `Idle`
    pub async fn hard_reset(&mut self) {
        log::info!("🧹 Hard reset");
        if let Err(e) = self.engine.cancel_current_run().await {
            log::warn!("Failed to cancel run during reset: {}", e);
        }
        self.stream = None;
        self.lecture.reset();
        self.interjection.reset();
        self.quiz.clear();
        self.raise_hand_requested = false;
        self.turn_utterances = 0;
        self.capture_arm = None;
        self.next_stream_lane = Lane::Lecture;
        self.set_state(InteractionState::Idle);
    }

    // --- dialogue engine ---

    fn handle_dialogue_event(&mut self, event: DialogueEvent) {
        match event {
            DialogueEvent::RunStarted { run_id } => {
                if let Some(previous) = self.stream {
                    if !previous.completed {
                        log::debug!("New run replaces an unfinished one");
                        self.finish_stream(previous.lane);
                    }
                }
                let lane = self.next_stream_lane;
                log::info!("🤖 Run {} streaming into the {} lane", run_id, lane);
                self.stream = Some(ActiveStream {
                    lane,
                    completed: false,
                });
                self.tracker(lane).awaiting_drain = true;
                self.turn_utterances = 0;
                self.set_state(InteractionState::Lecturing);
            }
            DialogueEvent::TextDelta(delta) => {
                let Some(stream) = self.stream.filter(|s| !s.completed) else {
                    log::debug!("Dropping text from a finished run");
                    return;
                };
                let tracker = self.tracker(stream.lane);
                tracker.segmenter.append(&delta);
                let units: Vec<SentenceUnit> = tracker.segmenter.sentences().collect();
                self.speak_ai(stream.lane, units);
            }
            DialogueEvent::RunCompleted => {
                let Some(stream) = self.stream.filter(|s| !s.completed) else {
                    log::debug!("Completion for a run that is no longer tracked");
                    return;
                };
                log::info!("✅ Run completed");
                self.finish_stream(stream.lane);
                self.check_drain(stream.lane);
            }
            DialogueEvent::RunFailed(reason) => {
                let Some(stream) = self.stream.filter(|s| !s.completed) else {
                    log::warn!("Untracked run failed: {}", reason);
                    return;
                };
                log::error!("❌ Run failed, keeping what was said: {}", reason);
                self.finish_stream(stream.lane);
                self.check_drain(stream.lane);
            }
        }
    }

    /// Flush the stream's remaining text and mark its turn complete
    fn finish_stream(&mut self, lane: Lane) {
        let tail = self.tracker(lane).segmenter.flush();
        self.speak_ai(lane, tail.into_iter().collect());
        if let Some(stream) = self.stream.as_mut() {
            stream.completed = true;
        }
    }

    fn speak_ai(&mut self, lane: Lane, units: Vec<SentenceUnit>) {
        for unit in units {
            self.transcript.append(Speaker::Ai, &unit.text);
            self.turn_utterances += 1;
            self.tracker(lane).submit(unit);
        }
    }

    /// Speak a canned prompt on the interjection lane. Returns the last index used.
    fn speak_prompt(&mut self, text: &str) -> Option<u64> {
        self.transcript.append(Speaker::System, text);
        let tracker = &mut self.interjection;
        let mut units = tracker.segmenter.push(text);
        units.extend(tracker.segmenter.flush());

        let last = units.last().map(|unit| unit.index);
        for unit in units {
            tracker.submit(unit);
        }
        last
    }

    // --- lanes ---

    fn handle_lane_event(&mut self, event: LaneEvent) {
        if !self.tracker(event.lane).is_current(&event) {
            log::debug!("Dropping {:?} from before the last reset", event);
            return;
        }
        let LaneEvent { lane, kind, .. } = event;
        match kind {
            LaneEventKind::PlaybackStart(index) => {
                self.publish(InteractionEvent::PlaybackStart { lane, index });
            }
            LaneEventKind::PlaybackEnd(index) => {
                self.tracker(lane).played(index);
                if lane == Lane::Interjection {
                    self.prompt_settled(index);
                }
                self.publish(InteractionEvent::PlaybackEnd { lane, index });
            }
            LaneEventKind::SynthesisError { index, message } => {
                self.tracker(lane).settle(index);
                if lane == Lane::Interjection {
                    self.prompt_settled(index);
                }
                self.publish(InteractionEvent::SynthesisError {
                    lane,
                    index,
                    message,
                });
                self.check_drain(lane);
            }
            LaneEventKind::QueueCompleted => {
                self.publish(InteractionEvent::QueueCompleted { lane });
                self.check_drain(lane);
            }
        }
    }

    /// Whether the AI turn routed to `lane` is over: its text is final and
    /// everything submitted has been played or dropped. Consumes the turn.
    fn take_drained(&mut self, lane: Lane) -> bool {
        let stream_open = matches!(self.stream, Some(s) if s.lane == lane && !s.completed);
        let tracker = self.tracker(lane);
        if !tracker.awaiting_drain || !tracker.outstanding.is_empty() || tracker.paused {
            return false;
        }
        if stream_open {
            log::debug!("{} lane drained before its run completed, deferring", lane);
            return false;
        }

        tracker.awaiting_drain = false;
        if matches!(self.stream, Some(s) if s.lane == lane) {
            self.stream = None;
        }
        true
    }

    fn check_drain(&mut self, lane: Lane) {
        if !self.take_drained(lane) {
            return;
        }
        match lane {
            Lane::Lecture => self.finish_ai_turn(),
            Lane::Interjection => {
                log::info!("💬 Interjection answered, returning to the lecture");
                self.resume_lecture();
                if self.lecture.awaiting_drain {
                    // The interrupted lecture turn has to finish first
                    if self.take_drained(Lane::Lecture) {
                        self.finish_ai_turn();
                    }
                    return;
                }
                self.finish_ai_turn();
            }
        }
    }

    /// The AI stopped talking: honor a raised hand, or work out whether the
    /// listener is expected to reply.
    fn finish_ai_turn(&mut self) {
        if self.state != InteractionState::Lecturing {
            log::warn!("Turn finished in state {}, ignoring", self.state);
            return;
        }

        if self.raise_hand_requested {
            self.raise_hand_requested = false;
            log::info!("✋ Honoring raised hand");
            self.lecture.pause();
            let prompt = self.classifier.language().ask_question_prompt.clone();
            self.set_state(InteractionState::WaitingForUserInput);
            self.arm_capture_after_prompt(&prompt);
            return;
        }

        // Only this turn's utterances: an earlier quiz must not pair up
        // with a short reply like "Correct!"
        let last: Vec<String> = self
            .transcript
            .last_entries(Speaker::Ai, self.turn_utterances.min(2))
            .into_iter()
            .map(|entry| entry.text)
            .collect();
        let last: Vec<&str> = last.iter().map(String::as_str).collect();
        let act = self.classifier.classify_ai_turn(&last);
        log::info!("🧭 AI turn classified as {:?}", act);

        match act {
            AiTurnAct::TwoSentenceQuiz { question } | AiTurnAct::OneSentenceQuiz { question } => {
                self.quiz.activate(question);
                self.set_state(InteractionState::QuestionPending);
                self.arm_capture_after_delay();
            }
            AiTurnAct::GeneralInquiry | AiTurnAct::UnrecognizedQuestion => {
                self.set_state(InteractionState::QuestionPending);
                self.arm_capture_after_delay();
            }
            AiTurnAct::Statement => {
                let prompt = self.classifier.language().general_inquiry_prompt.clone();
                self.set_state(InteractionState::QuestionPending);
                self.arm_capture_after_prompt(&prompt);
            }
        }
    }

    fn resume_lecture(&mut self) {
        if !self.lecture.paused {
            return;
        }
        let from = self.lecture.resume_point();
        log::info!("⏯️ Resuming lecture from {:?}", from);
        self.lecture.resume(from);
    }

    /// Stop the lecture so the listener's interjection can be answered
    async fn interrupt_lecture(&mut self) {
        if let Some(stream) = self.stream.filter(|s| !s.completed) {
            if let Err(e) = self.engine.cancel_current_run().await {
                log::warn!("Failed to cancel the current run: {}", e);
            }
            self.finish_stream(stream.lane);
        }
        self.lecture.pause();
    }

    // --- capture arming ---

    fn arm_capture_after_prompt(&mut self, prompt: &str) {
        match self.speak_prompt(prompt) {
            Some(until_index) => {
                self.capture_arm = Some(CaptureArm::AwaitingPlayback {
                    until_index,
                    deadline: Instant::now() + self.prompt_playback_timeout,
                });
            }
            None => self.arm_capture_after_delay(),
        }
    }

    fn arm_capture_after_delay(&mut self) {
        self.capture_arm = Some(CaptureArm::Delay {
            deadline: Instant::now() + self.capture_enable_delay,
        });
    }

    /// An interjection-lane unit was played or dropped
    fn prompt_settled(&mut self, index: u64) {
        if let Some(CaptureArm::AwaitingPlayback { until_index, .. }) = self.capture_arm {
            if index >= until_index {
                self.arm_capture_after_delay();
            }
        }
    }

    fn on_capture_timer(&mut self) {
        match self.capture_arm.take() {
            Some(CaptureArm::AwaitingPlayback { until_index, .. }) => {
                log::warn!("Prompt #{} did not finish in time, arming anyway", until_index);
                self.arm_capture_after_delay();
            }
            Some(CaptureArm::Delay { .. }) => {
                if !matches!(
                    self.state,
                    InteractionState::QuestionPending | InteractionState::WaitingForUserInput
                ) {
                    log::debug!("Not arming capture in state {}", self.state);
                    return;
                }
                self.set_state(InteractionState::WaitingForUserInput);
                self.capture.set_capture_enabled(true);
                log::info!("🎤 Capture armed");
                self.publish(InteractionEvent::CaptureArmed);
            }
            None => {}
        }
    }
}
