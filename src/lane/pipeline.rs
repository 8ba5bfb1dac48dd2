//! Per-lane speech synthesis with a single request in flight.
//!
//! Pending sentences are synthesized strictly one at a time in FIFO order, so
//! results come back in submission order without any reordering buffer. A new
//! request only starts when the lane's playback side has room for its result.

use crate::config::SpeechSettings;
use crate::tts::{SpeechSynthesizer, SynthesisRequest, TtsError};
use crate::types::{Lane, SentenceUnit};
use futures_util::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Result of one synthesis request
#[derive(Debug)]
pub enum SynthesisOutcome {
    /// The unit with its audio attached
    Ready(SentenceUnit),
    Failed { index: u64, error: TtsError },
}

struct InFlight {
    index: u64,
    future: BoxFuture<'static, SynthesisOutcome>,
}

pub struct SynthesisPipeline {
    lane: Lane,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    settings: SpeechSettings,
    timeout: Duration,
    capacity: usize,
    pending: VecDeque<SentenceUnit>,
    in_flight: Option<InFlight>,
}

impl SynthesisPipeline {
    pub fn new(
        lane: Lane,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        settings: SpeechSettings,
        timeout: Duration,
        capacity: usize,
    ) -> Self {
        Self {
            lane,
            synthesizer,
            settings,
            timeout,
            capacity: capacity.max(1),
            pending: VecDeque::new(),
            in_flight: None,
        }
    }

    pub fn submit(&mut self, unit: SentenceUnit) {
        self.pending.push_back(unit);
    }

    /// Start the next request if nothing is in flight and `occupancy` (units
    /// queued or playing downstream) leaves room for one more.
    pub fn poll_start(&mut self, occupancy: usize) -> bool {
        if self.in_flight.is_some() || occupancy >= self.capacity {
            return false;
        }
        let Some(unit) = self.pending.pop_front() else {
            return false;
        };

        log::debug!(
            "🗣️ [{}] synthesizing #{}: {}",
            self.lane,
            unit.index,
            unit.text
        );
        let index = unit.index;
        let synthesizer = Arc::clone(&self.synthesizer);
        let request = SynthesisRequest::new(unit.text.clone(), &self.settings);
        let timeout = self.timeout;

        let future = Box::pin(async move {
            match tokio::time::timeout(timeout, synthesizer.synthesize(&request)).await {
                Ok(Ok(audio)) => SynthesisOutcome::Ready(unit.with_audio(audio)),
                Ok(Err(error)) => SynthesisOutcome::Failed { index, error },
                Err(_) => SynthesisOutcome::Failed {
                    index,
                    error: TtsError::Timeout(timeout),
                },
            }
        });
        self.in_flight = Some(InFlight { index, future });
        true
    }

    /// Wait for the in-flight request. Never resolves while idle.
    ///
    /// Cancel safe: dropping the returned future leaves the request in flight.
    pub async fn completed(&mut self) -> SynthesisOutcome {
        let outcome = match self.in_flight.as_mut() {
            Some(in_flight) => in_flight.future.as_mut().await,
            None => std::future::pending().await,
        };
        self.in_flight = None;
        outcome
    }

    /// Drop pending units below `index` before they are ever synthesized
    pub fn discard_below(&mut self, index: u64) {
        let before = self.pending.len();
        self.pending.retain(|unit| unit.index >= index);
        let dropped = before - self.pending.len();
        if dropped > 0 {
            log::debug!("[{}] dropped {} pending units below #{}", self.lane, dropped, index);
        }
    }

    /// Abandon the in-flight request and all pending units
    pub fn reset(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            log::debug!("[{}] abandoning synthesis of #{}", self.lane, in_flight.index);
        }
        self.pending.clear();
    }

    pub fn in_flight_index(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|f| f.index)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.pending.is_empty()
    }
}
