use crate::lane::{LaneEvent, LaneHandle};
use crate::segmenter::TextSegmenter;
use crate::types::SentenceUnit;
use std::collections::BTreeSet;

/// The orchestrator's view of one lane, built only from the commands it sent
/// and the events the lane reported back.
pub(crate) struct LaneTracker {
    pub handle: LaneHandle,
    pub segmenter: TextSegmenter,
    /// Submitted units not yet reported as played or dropped
    pub outstanding: BTreeSet<u64>,
    pub last_end: Option<u64>,
    pub paused: bool,
    /// An AI turn was routed here and its drain has not been handled yet
    pub awaiting_drain: bool,
    /// Resets sent to the lane so far. Matches the lane's own count once it
    /// has caught up with the commands.
    pub generation: u64,
}

impl LaneTracker {
    pub fn new(handle: LaneHandle) -> Self {
        Self {
            handle,
            segmenter: TextSegmenter::new(),
            outstanding: BTreeSet::new(),
            last_end: None,
            paused: false,
            awaiting_drain: false,
            generation: 0,
        }
    }

    /// Whether the lane sent `event` after our last reset. Anything older
    /// refers to units whose indices have since been reused.
    pub fn is_current(&self, event: &LaneEvent) -> bool {
        event.generation == self.generation
    }

    /// Hand a unit to the lane. A closed lane is logged; the unit is lost.
    pub fn submit(&mut self, unit: SentenceUnit) {
        let index = unit.index;
        match self.handle.submit(unit) {
            Ok(()) => {
                self.outstanding.insert(index);
            }
            Err(e) => log::error!("Dropping #{}: {}", index, e),
        }
    }

    /// Record that `index` will never be reported again
    pub fn settle(&mut self, index: u64) {
        self.outstanding.remove(&index);
    }

    pub fn played(&mut self, index: u64) {
        self.settle(index);
        self.last_end = Some(index);
    }

    pub fn pause(&mut self) {
        if self.paused {
            return;
        }
        if let Err(e) = self.handle.pause() {
            log::error!("{}", e);
        }
        self.paused = true;
    }

    /// Unpause, dropping everything below `from_index` from the books as the
    /// lane drops it from its queues.
    pub fn resume(&mut self, from_index: Option<u64>) {
        if let Err(e) = self.handle.resume(from_index) {
            log::error!("{}", e);
        }
        if let Some(from) = from_index {
            self.outstanding.retain(|index| *index >= from);
        }
        self.paused = false;
    }

    pub fn reset(&mut self) {
        if let Err(e) = self.handle.reset() {
            log::error!("{}", e);
        }
        self.segmenter.reset();
        self.outstanding.clear();
        self.last_end = None;
        self.paused = false;
        self.awaiting_drain = false;
        self.generation += 1;
    }

    /// First index that has not finished playing
    pub fn resume_point(&self) -> Option<u64> {
        self.last_end.map(|index| index + 1)
    }
}
