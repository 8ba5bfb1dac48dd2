//! Synthesis + playback lanes.
//!
//! A lane is one tokio task owning a [`SynthesisPipeline`] and a
//! [`PlaybackSequencer`]. Nothing else touches its queues: the orchestrator
//! sends [`LaneCommand`]s through a [`LaneHandle`] and learns what happened
//! from [`LaneEvent`]s.

pub mod events;
pub mod pipeline;
pub mod sequencer;

pub use events::{LaneCommand, LaneEvent, LaneEventKind};
pub use pipeline::{SynthesisOutcome, SynthesisPipeline};
pub use sequencer::{FinishedPlayback, PlaybackResult, PlaybackSequencer};

use crate::audio_sink::AudioSink;
use crate::config::SessionConfig;
use crate::error::{LectureError, Result};
use crate::tts::SpeechSynthesizer;
use crate::types::{Lane, SentenceUnit};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cheap, cloneable command side of a running lane
#[derive(Debug, Clone)]
pub struct LaneHandle {
    lane: Lane,
    commands: mpsc::UnboundedSender<LaneCommand>,
}

impl LaneHandle {
    /// Start the lane task. It runs until `shutdown` fires or every handle is dropped.
    pub fn spawn(
        lane: Lane,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn AudioSink>,
        config: &SessionConfig,
        events: mpsc::UnboundedSender<LaneEvent>,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let worker = LaneWorker {
            lane,
            pipeline: SynthesisPipeline::new(
                lane,
                synthesizer,
                config.speech.clone(),
                config.synthesis_timeout(),
                config.max_playback_queue_size,
            ),
            sequencer: PlaybackSequencer::new(lane, sink, config.playback_timeout()),
            generation: 0,
            commands: commands_rx,
            events,
        };

        log::info!(
            "🎙️ {} lane started (queue bound {})",
            lane,
            config.max_playback_queue_size
        );
        let task = tokio::spawn(worker.run(shutdown));
        (
            Self {
                lane,
                commands: commands_tx,
            },
            task,
        )
    }

    fn send(&self, command: LaneCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| LectureError::LaneClosed(self.lane))
    }

    pub fn submit(&self, unit: SentenceUnit) -> Result<()> {
        self.send(LaneCommand::Submit(unit))
    }

    pub fn pause(&self) -> Result<()> {
        self.send(LaneCommand::Pause)
    }

    pub fn resume(&self, from_index: Option<u64>) -> Result<()> {
        self.send(LaneCommand::Resume { from_index })
    }

    pub fn reset(&self) -> Result<()> {
        self.send(LaneCommand::Reset)
    }

    /// A handle with no task behind it, for inspecting the commands it sends
    #[cfg(test)]
    pub(crate) fn detached(lane: Lane) -> (Self, mpsc::UnboundedReceiver<LaneCommand>) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        (Self { lane, commands }, commands_rx)
    }
}

struct LaneWorker {
    lane: Lane,
    pipeline: SynthesisPipeline,
    sequencer: PlaybackSequencer,
    generation: u64,
    commands: mpsc::UnboundedReceiver<LaneCommand>,
    events: mpsc::UnboundedSender<LaneEvent>,
}

impl LaneWorker {
    async fn run(mut self, shutdown: CancellationToken) {
        loop {
            self.pipeline.poll_start(self.sequencer.occupancy());
            if let Some(index) = self.sequencer.start_next() {
                self.emit(LaneEventKind::PlaybackStart(index));
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                outcome = self.pipeline.completed() => self.on_synthesized(outcome),
                finished = self.sequencer.next_finished() => self.on_finished(finished),
            }
        }

        self.pipeline.reset();
        self.sequencer.reset().await;
        log::info!("🔇 {} lane stopped", self.lane);
    }

    async fn handle_command(&mut self, command: LaneCommand) {
        match command {
            LaneCommand::Submit(unit) => {
                log::debug!("[{}] queued #{} for synthesis", self.lane, unit.index);
                self.pipeline.submit(unit);
            }
            LaneCommand::Pause => {
                self.sequencer.pause().await;
                log::info!("⏸️ {} lane paused", self.lane);
            }
            LaneCommand::Resume { from_index } => {
                if let Some(from) = from_index {
                    self.pipeline.discard_below(from);
                }
                self.sequencer.resume(from_index);
                log::info!("▶️ {} lane resumed", self.lane);
            }
            LaneCommand::Reset => {
                self.pipeline.reset();
                self.sequencer.reset().await;
                self.generation += 1;
                log::info!("🧹 {} lane reset (generation {})", self.lane, self.generation);
            }
        }
    }

    fn on_synthesized(&mut self, outcome: SynthesisOutcome) {
        match outcome {
            SynthesisOutcome::Ready(unit) => {
                self.sequencer.enqueue(unit);
            }
            SynthesisOutcome::Failed { index, error } => {
                log::error!(
                    "❌ [{}] synthesis of #{} failed, skipping it: {}",
                    self.lane,
                    index,
                    error
                );
                self.emit(LaneEventKind::SynthesisError {
                    index,
                    message: error.to_string(),
                });
                if self.is_drained() {
                    self.emit(LaneEventKind::QueueCompleted);
                }
            }
        }
    }

    fn on_finished(&mut self, finished: FinishedPlayback) {
        match &finished.result {
            PlaybackResult::Finished => {}
            PlaybackResult::Failed(e) => {
                log::error!(
                    "[{}] playback of #{} failed, treating it as finished: {}",
                    self.lane,
                    finished.index,
                    e
                );
            }
            PlaybackResult::TimedOut => {
                log::warn!(
                    "[{}] playback of #{} timed out, treating it as finished",
                    self.lane,
                    finished.index
                );
            }
        }

        self.emit(LaneEventKind::PlaybackEnd(finished.index));
        if self.is_drained() {
            self.emit(LaneEventKind::QueueCompleted);
        }
    }

    /// Nothing left to synthesize or play, and not paused
    fn is_drained(&self) -> bool {
        self.pipeline.is_idle() && self.sequencer.is_drained()
    }

    fn emit(&self, kind: LaneEventKind) {
        // The orchestrator may already be gone during shutdown
        let _ = self.events.send(LaneEvent::new(self.lane, self.generation, kind));
    }
}
