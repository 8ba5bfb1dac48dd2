//! Ordered, interruptible playback of one lane's synthesized sentences.

use crate::audio_sink::{AudioError, AudioSink};
use crate::types::{Lane, SentenceUnit};
use futures_util::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub enum PlaybackResult {
    Finished,
    Failed(AudioError),
    TimedOut,
}

/// A unit that stopped playing on its own (not through pause or reset)
#[derive(Debug)]
pub struct FinishedPlayback {
    pub index: u64,
    pub result: PlaybackResult,
}

struct Playing {
    unit: SentenceUnit,
    future: BoxFuture<'static, FinishedPlayback>,
}

pub struct PlaybackSequencer {
    lane: Lane,
    sink: Arc<dyn AudioSink>,
    playback_timeout: Duration,
    queue: VecDeque<SentenceUnit>,
    current: Option<Playing>,
    paused: bool,
    /// Set by `resume(from)`; units below it are dropped on arrival
    skip_below: Option<u64>,
}

impl PlaybackSequencer {
    pub fn new(lane: Lane, sink: Arc<dyn AudioSink>, playback_timeout: Duration) -> Self {
        Self {
            lane,
            sink,
            playback_timeout,
            queue: VecDeque::new(),
            current: None,
            paused: false,
            skip_below: None,
        }
    }

    /// Queue a synthesized unit. Returns false if it falls below the resume point.
    pub fn enqueue(&mut self, unit: SentenceUnit) -> bool {
        if let Some(skip_below) = self.skip_below {
            if unit.index < skip_below {
                log::debug!(
                    "[{}] discarding late #{} below resume point #{}",
                    self.lane,
                    unit.index,
                    skip_below
                );
                return false;
            }
        }
        self.queue.push_back(unit);
        true
    }

    /// Begin playing the head of the queue if the lane is free and unpaused.
    /// Returns the index that started.
    pub fn start_next(&mut self) -> Option<u64> {
        if self.paused || self.current.is_some() {
            return None;
        }
        let (unit, audio) = loop {
            let unit = self.queue.pop_front()?;
            match unit.audio.clone() {
                Some(audio) => break (unit, audio),
                None => log::warn!("[{}] #{} has no audio, skipping", self.lane, unit.index),
            }
        };

        let index = unit.index;
        let sink = Arc::clone(&self.sink);
        let timeout = self.playback_timeout;
        let future = Box::pin(async move {
            let result = match tokio::time::timeout(timeout, sink.play(audio)).await {
                Ok(Ok(())) => PlaybackResult::Finished,
                Ok(Err(e)) => PlaybackResult::Failed(e),
                Err(_) => {
                    if let Err(e) = sink.stop().await {
                        log::warn!("Failed to stop timed out playback: {}", e);
                    }
                    PlaybackResult::TimedOut
                }
            };
            FinishedPlayback { index, result }
        });

        log::debug!("▶️ [{}] playing #{}: {}", self.lane, index, unit.text);
        self.current = Some(Playing { unit, future });
        Some(index)
    }

    /// Wait for the current unit to stop playing. Never resolves while idle.
    ///
    /// Cancel safe. The finished unit and its audio are released before this
    /// returns.
    pub async fn next_finished(&mut self) -> FinishedPlayback {
        let finished = match self.current.as_mut() {
            Some(playing) => playing.future.as_mut().await,
            None => std::future::pending().await,
        };
        self.current = None;
        finished
    }

    /// Whether a just-finished unit drained the lane
    pub fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.current.is_none() && !self.paused
    }

    /// Silence the lane. The interrupted unit goes back to the head of the
    /// queue so it replays in full on resume.
    pub async fn pause(&mut self) {
        self.paused = true;
        if let Some(playing) = self.current.take() {
            log::debug!("⏸️ [{}] paused during #{}", self.lane, playing.unit.index);
            self.queue.push_front(playing.unit);
            if let Err(e) = self.sink.stop().await {
                log::warn!("[{}] failed to stop audio: {}", self.lane, e);
            }
        }
    }

    /// Unpause. With `from_index`, queued and late units below it are dropped.
    pub fn resume(&mut self, from_index: Option<u64>) {
        self.paused = false;
        if let Some(from) = from_index {
            let before = self.queue.len();
            self.queue.retain(|unit| unit.index >= from);
            log::debug!(
                "⏯️ [{}] resuming from #{} ({} queued units discarded)",
                self.lane,
                from,
                before - self.queue.len()
            );
            self.skip_below = Some(from);
        }
    }

    /// Stop audio and drop everything queued
    pub async fn reset(&mut self) {
        let was_playing = self.current.take().is_some();
        self.queue.clear();
        self.paused = false;
        self.skip_below = None;
        if was_playing {
            if let Err(e) = self.sink.stop().await {
                log::warn!("[{}] failed to stop audio: {}", self.lane, e);
            }
        }
    }

    /// Units queued or playing
    pub fn occupancy(&self) -> usize {
        self.queue.len() + usize::from(self.current.is_some())
    }

    pub fn queued_indices(&self) -> Vec<u64> {
        self.queue.iter().map(|unit| unit.index).collect()
    }

    pub fn current_index(&self) -> Option<u64> {
        self.current.as_ref().map(|playing| playing.unit.index)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}
