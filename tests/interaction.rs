//! Turn-taking scenarios against the full machine: real lanes, scripted
//! synthesizer and sinks, and a recording dialogue engine whose streamed
//! turns the tests write by hand.

mod common;

use common::{EngineCall, RecordingCapture, RecordingEngine, ScriptedSynthesizer, TestSink};
use lecture_agent::{
    classifier::ClassifierOptions,
    config::SessionConfig,
    interaction::{InteractionBuilder, InteractionEvent, InteractionHandle},
    language::LanguageConfig,
    llm::DialogueEvent,
    transcript::{InMemoryTranscript, Speaker},
    types::{InteractionState, Lane},
    LectureError,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(60);

struct Harness {
    handle: InteractionHandle,
    engine: Arc<RecordingEngine>,
    capture: Arc<RecordingCapture>,
    transcript: Arc<InMemoryTranscript>,
    lecture: Arc<TestSink>,
    interjection: Arc<TestSink>,
    events: broadcast::Receiver<InteractionEvent>,
}

impl Harness {
    fn start() -> Self {
        Self::with_options(ClassifierOptions::default())
    }

    fn with_options(options: ClassifierOptions) -> Self {
        let builder = InteractionBuilder::new(SessionConfig::default(), LanguageConfig::english());
        let engine = Arc::new(RecordingEngine::new(builder.dialogue_sender()));
        let capture = Arc::new(RecordingCapture::default());
        let transcript = Arc::new(InMemoryTranscript::new());
        let lecture = Arc::new(TestSink::new());
        let interjection = Arc::new(TestSink::new());

        let (machine, handle) = builder
            .engine(engine.clone())
            .synthesizer(Arc::new(ScriptedSynthesizer::new()))
            .lecture_sink(lecture.clone())
            .interjection_sink(interjection.clone())
            .capture(capture.clone())
            .transcript(transcript.clone())
            .classifier_options(options)
            .build()
            .unwrap();
        let events = handle.subscribe();
        tokio::spawn(machine.run());

        Self {
            handle,
            engine,
            capture,
            transcript,
            lecture,
            interjection,
            events,
        }
    }

    async fn wait_for_state(&self, state: InteractionState) {
        let mut watch = self.handle.state_watch();
        tokio::time::timeout(WAIT, watch.wait_for(|current| *current == state))
            .await
            .unwrap_or_else(|_| panic!("never reached {}", state))
            .expect("interaction loop stopped");
    }

    async fn wait_for_event(&mut self, wanted: impl Fn(&InteractionEvent) -> bool) {
        tokio::time::timeout(WAIT, async {
            loop {
                match self.events.recv().await {
                    Ok(event) if wanted(&event) => return,
                    Ok(_) => {}
                    Err(e) => panic!("event stream broke: {}", e),
                }
            }
        })
        .await
        .expect("expected event never arrived");
    }

    async fn wait_for_capture(&mut self) {
        self.wait_for_event(|event| *event == InteractionEvent::CaptureArmed)
            .await;
        assert_eq!(self.handle.state(), InteractionState::WaitingForUserInput);
        assert!(self.capture.capture_enabled());
    }

    /// Start the session with an opening and stream the first lecture turn
    async fn lecture(&self, pieces: &[&str]) {
        self.handle.start(Some("Teach me about stars".to_string()));
        self.wait_for_state(InteractionState::Lecturing).await;
        self.engine.speak("run_1", pieces);
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_statement_turn_gets_fallback_inquiry() {
    let mut harness = Harness::start();
    harness
        .lecture(&["The sun is a star. ", "It is ", "very hot."])
        .await;

    harness.wait_for_capture().await;

    assert_eq!(
        harness.engine.calls(),
        vec![EngineCall::UserMessage("Teach me about stars".to_string())]
    );
    assert_eq!(
        harness.lecture.played(),
        vec!["The sun is a star.", "It is very hot."]
    );
    assert_eq!(
        harness.interjection.played(),
        vec!["Do you have any questions so far?"]
    );
    assert_eq!(
        harness.transcript.last_text(Speaker::System).as_deref(),
        Some("Do you have any questions so far?")
    );
    assert!(!harness.capture.raise_hand_enabled());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_raise_hand_is_honored_at_the_next_pause() {
    let mut harness = Harness::start();
    harness
        .lecture(&["First point. ", "Second point. ", "Third point."])
        .await;
    assert!(harness.capture.raise_hand_enabled());

    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.handle.raise_hand();
    harness.handle.raise_hand();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(harness.handle.state(), InteractionState::Lecturing);
    assert!(!harness.capture.raise_hand_enabled());

    harness.wait_for_capture().await;
    assert_eq!(harness.lecture.played().len(), 3);
    assert_eq!(harness.interjection.played(), vec!["What is your question?"]);

    // The question goes out as an interjection with the follow-up instruction
    harness.handle.user_utterance("Why is the sun yellow?");
    harness
        .wait_for_state(InteractionState::ProcessingUserInput)
        .await;
    let instruction = LanguageConfig::english().interruption_follow_up_instruction;
    assert_eq!(
        harness.engine.calls().last(),
        Some(&EngineCall::Interjection {
            text: "Why is the sun yellow?".to_string(),
            instruction,
        })
    );

    // Answer on the interjection lane, then the ordinary turn analysis runs.
    // The hand was consumed, so nobody asks for a question again.
    harness.engine.speak("run_2", &["Because of how light scatters."]);
    harness.wait_for_capture().await;

    assert_eq!(
        harness.interjection.played(),
        vec![
            "What is your question?",
            "Because of how light scatters.",
            "Do you have any questions so far?",
        ]
    );
    assert_eq!(harness.lecture.played().len(), 3);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_two_sentence_quiz_routes_answer_with_question() {
    let mut harness = Harness::with_options(ClassifierOptions {
        two_sentence_quiz: true,
    });
    harness
        .lecture(&["Stars fuse hydrogen. ", "Quick check. ", "What do stars fuse?"])
        .await;

    harness.wait_for_capture().await;
    assert!(harness.interjection.played().is_empty(), "no prompt for a quiz");

    harness.handle.user_utterance("Hydrogen");
    harness
        .wait_for_state(InteractionState::ProcessingUserInput)
        .await;

    assert_eq!(
        harness.engine.calls().last(),
        Some(&EngineCall::QuizAnswer {
            question: "Quick check. What do stars fuse?".to_string(),
            answer: "Hydrogen".to_string(),
        })
    );
    assert_eq!(
        harness.transcript.last_text(Speaker::User).as_deref(),
        Some("Hydrogen")
    );
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_quiz_answer_that_looks_like_a_question_is_still_an_answer() {
    let mut harness = Harness::start();
    harness.lecture(&["Quiz time: what is the closest star?"]).await;
    harness.wait_for_capture().await;

    harness.handle.user_utterance("Is it the sun?");
    harness
        .wait_for_state(InteractionState::ProcessingUserInput)
        .await;

    assert!(matches!(
        harness.engine.calls().last(),
        Some(EngineCall::QuizAnswer { answer, .. }) if answer == "Is it the sun?"
    ));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_quiz_feedback_turn_does_not_pose_a_new_quiz() {
    let mut harness = Harness::with_options(ClassifierOptions {
        two_sentence_quiz: true,
    });
    harness.lecture(&["Quick check: is the sun a star?"]).await;
    harness.wait_for_capture().await;

    harness.handle.user_utterance("Yes");
    harness
        .wait_for_state(InteractionState::ProcessingUserInput)
        .await;
    assert_eq!(
        harness.engine.calls().last(),
        Some(&EngineCall::QuizAnswer {
            question: "Quick check: is the sun a star?".to_string(),
            answer: "Yes".to_string(),
        })
    );

    // Feedback is a turn of its own and never pairs with the old quiz
    harness.engine.speak("run_2", &["Correct!"]);
    harness.wait_for_capture().await;

    harness.handle.user_utterance("Why is the sun so hot?");
    harness
        .wait_for_state(InteractionState::ProcessingUserInput)
        .await;
    assert_eq!(
        harness.engine.calls().last(),
        Some(&EngineCall::Interjection {
            text: "Why is the sun so hot?".to_string(),
            instruction: LanguageConfig::english().interruption_follow_up_instruction,
        })
    );
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_continuation_goes_back_to_the_lecture() {
    let mut harness = Harness::start();
    harness.lecture(&["Do you have any questions?"]).await;

    harness.wait_for_capture().await;
    assert!(
        harness.interjection.played().is_empty(),
        "the lecturer already asked"
    );

    harness.handle.user_utterance("No, please go on");
    harness
        .wait_for_state(InteractionState::ProcessingUserInput)
        .await;
    assert_eq!(
        harness.engine.calls().last(),
        Some(&EngineCall::UserMessage("No, please go on".to_string()))
    );

    harness.engine.speak("run_2", &["Next, planets."]);
    harness.wait_for_capture().await;
    assert_eq!(
        harness.lecture.played(),
        vec!["Do you have any questions?", "Next, planets."]
    );
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_queue_completed_waits_for_the_end_of_the_turn() {
    let mut harness = Harness::start();
    harness.handle.start(None);
    harness.wait_for_state(InteractionState::Lecturing).await;

    let events = harness.engine.events.clone();
    events
        .send(DialogueEvent::RunStarted {
            run_id: "run_1".to_string(),
        })
        .unwrap();
    events
        .send(DialogueEvent::TextDelta("Short. ".to_string()))
        .unwrap();

    harness
        .wait_for_event(|event| {
            *event == InteractionEvent::QueueCompleted { lane: Lane::Lecture }
        })
        .await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(harness.handle.state(), InteractionState::Lecturing);
    assert!(harness.interjection.played().is_empty());

    events
        .send(DialogueEvent::TextDelta("Then more.".to_string()))
        .unwrap();
    events.send(DialogueEvent::RunCompleted).unwrap();

    harness.wait_for_capture().await;
    assert_eq!(harness.lecture.played(), vec!["Short.", "Then more."]);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_failed_sentence_leaves_a_gap() {
    let mut harness = Harness::start();
    harness
        .lecture(&["Fine. ", "FAIL this one. ", "Last one."])
        .await;

    harness
        .wait_for_event(|event| {
            matches!(
                event,
                InteractionEvent::SynthesisError {
                    lane: Lane::Lecture,
                    index: 1,
                    ..
                }
            )
        })
        .await;
    harness.wait_for_capture().await;

    assert_eq!(harness.lecture.played(), vec!["Fine.", "Last one."]);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_utterance_outside_a_listening_state_is_ignored() {
    let harness = Harness::start();
    harness.handle.user_utterance("Hello?");
    harness.lecture(&["A long sentence about stars."]).await;
    harness.handle.user_utterance("Why?");
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(harness.handle.state(), InteractionState::Lecturing);
    assert_eq!(harness.engine.calls().len(), 1);
    assert!(harness.transcript.last_text(Speaker::User).is_none());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_failed_send_falls_back_to_idle() {
    let mut harness = Harness::start();
    harness.lecture(&["Quick check: what is a star?"]).await;
    harness.wait_for_capture().await;

    harness.engine.fail_sends.store(true, Ordering::SeqCst);
    harness.handle.user_utterance("A ball of gas");
    harness.wait_for_state(InteractionState::Idle).await;
    assert!(!harness.capture.capture_enabled());

    // Recoverable through a reset
    harness.engine.fail_sends.store(false, Ordering::SeqCst);
    harness.handle.hard_reset();
    harness.handle.start(Some("Again".to_string()));
    harness.wait_for_state(InteractionState::Lecturing).await;
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_hard_reset_silences_everything() {
    let harness = Harness::start();
    harness
        .lecture(&["One. ", "Two. ", "Three. ", "Four."])
        .await;
    tokio::time::sleep(Duration::from_millis(700)).await;

    harness.handle.hard_reset();
    harness.wait_for_state(InteractionState::Idle).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(harness.lecture.played(), vec!["One."]);
    assert!(harness.interjection.played().is_empty());
    assert!(harness.engine.calls().contains(&EngineCall::Cancel));
    assert!(!harness.capture.capture_enabled());
    assert!(!harness.capture.raise_hand_enabled());

    // The transcript survives a reset
    assert_eq!(harness.transcript.len(), 4);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_start_only_from_idle() {
    let harness = Harness::start();
    harness.lecture(&["Hello."]).await;
    harness.handle.start(Some("Second opening".to_string()));
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(harness.engine.calls().len(), 1);
}

#[tokio::test]
async fn test_missing_collaborator_is_reported() {
    let builder = InteractionBuilder::new(SessionConfig::default(), LanguageConfig::english());
    let result = builder
        .synthesizer(Arc::new(ScriptedSynthesizer::new()))
        .lecture_sink(Arc::new(TestSink::new()))
        .interjection_sink(Arc::new(TestSink::new()))
        .build();

    assert!(matches!(
        result,
        Err(LectureError::MissingCollaborator("dialogue engine"))
    ));
}

#[tokio::test]
async fn test_invalid_language_is_reported() {
    let mut language = LanguageConfig::english();
    language.ask_question_prompt = "  ".to_string();
    let builder = InteractionBuilder::new(SessionConfig::default(), language);
    let engine = Arc::new(RecordingEngine::new(builder.dialogue_sender()));
    let result = builder
        .engine(engine)
        .synthesizer(Arc::new(ScriptedSynthesizer::new()))
        .lecture_sink(Arc::new(TestSink::new()))
        .interjection_sink(Arc::new(TestSink::new()))
        .build();

    assert!(matches!(result, Err(LectureError::Language(_))));
}
