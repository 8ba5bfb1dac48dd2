use crate::types::Lane;

/// Something that happened on a lane, reported to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaneEventKind {
    PlaybackStart(u64),
    /// The unit finished playing. Not sent for paused or reset playback.
    PlaybackEnd(u64),
    /// Nothing left to synthesize or play on an unpaused lane. Follows the
    /// `PlaybackEnd` or `SynthesisError` of the last outstanding unit.
    QueueCompleted,
    /// The unit was dropped without being played
    SynthesisError { index: u64, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneEvent {
    pub lane: Lane,
    /// Number of resets the lane had processed when it sent this event
    pub generation: u64,
    pub kind: LaneEventKind,
}

impl LaneEvent {
    pub fn new(lane: Lane, generation: u64, kind: LaneEventKind) -> Self {
        Self {
            lane,
            generation,
            kind,
        }
    }
}

/// Commands accepted by a running lane
#[derive(Debug)]
pub enum LaneCommand {
    Submit(crate::types::SentenceUnit),
    Pause,
    /// Unpause, discarding queued units below `from_index` when given
    Resume { from_index: Option<u64> },
    /// Drop everything and start the next generation
    Reset,
}
