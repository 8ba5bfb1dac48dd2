use crate::types::{InteractionState, Lane};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

/// What the orchestrator publishes to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionEvent {
    PlaybackStart { lane: Lane, index: u64 },
    PlaybackEnd { lane: Lane, index: u64 },
    QueueCompleted { lane: Lane },
    SynthesisError { lane: Lane, index: u64, message: String },
    StateChanged { from: InteractionState, to: InteractionState },
    CaptureArmed,
}

/// Input delivered to the orchestrator from outside the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Start the session, optionally sending an opening message
    Start { opening: Option<String> },
    /// A transcribed listener utterance
    Utterance(String),
    RaiseHand,
    HardReset,
}

/// Cloneable front door to a running [`super::InteractionStateMachine`]
#[derive(Clone)]
pub struct InteractionHandle {
    pub(crate) commands: mpsc::UnboundedSender<UserCommand>,
    pub(crate) events: broadcast::Sender<InteractionEvent>,
    pub(crate) state: watch::Receiver<InteractionState>,
    pub(crate) shutdown: CancellationToken,
}

impl InteractionHandle {
    fn send(&self, command: UserCommand) {
        if self.commands.send(command).is_err() {
            log::warn!("Interaction loop has stopped, command dropped");
        }
    }

    pub fn start(&self, opening: Option<String>) {
        self.send(UserCommand::Start { opening });
    }

    /// Ingress for the transcription service
    pub fn user_utterance(&self, text: impl Into<String>) {
        self.send(UserCommand::Utterance(text.into()));
    }

    pub fn raise_hand(&self) {
        self.send(UserCommand::RaiseHand);
    }

    pub fn hard_reset(&self) {
        self.send(UserCommand::HardReset);
    }

    /// Observe outward events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<InteractionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> InteractionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn state_watch(&self) -> watch::Receiver<InteractionState> {
        self.state.clone()
    }

    /// Stop the interaction loop and both lanes
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
