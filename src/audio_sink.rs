use crate::types::{AudioBuffer, AudioFormat};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Error, Debug, Clone)]
pub enum AudioError {
    #[error("Playback interrupted")]
    Interrupted,

    #[error("Audio device error: {0}")]
    DeviceError(String),

    #[error("Audio stream error: {0}")]
    StreamError(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(AudioFormat),

    #[error("Audio sink is closed")]
    Closed,
}

/// Audio output channel for one lane.
///
/// `play` resolves once the buffer has been heard in full. Calling `stop`
/// silences the channel immediately and makes a pending `play` resolve with
/// [`AudioError::Interrupted`].
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, audio: AudioBuffer) -> Result<(), AudioError>;

    async fn stop(&self) -> Result<(), AudioError>;
}

/// Sink that only waits out the audio's duration. Used for headless runs.
pub struct SimulatedSink {
    stopped: Notify,
    fallback_duration: Duration,
}

impl SimulatedSink {
    pub fn new() -> Self {
        Self {
            stopped: Notify::new(),
            fallback_duration: Duration::from_secs(1),
        }
    }

    /// How long to "play" buffers whose duration is unknown (compressed audio)
    pub fn with_fallback_duration(mut self, duration: Duration) -> Self {
        self.fallback_duration = duration;
        self
    }
}

impl Default for SimulatedSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSink for SimulatedSink {
    async fn play(&self, audio: AudioBuffer) -> Result<(), AudioError> {
        let duration = audio.duration().unwrap_or(self.fallback_duration);
        log::debug!(
            "AudioSink: simulating {:?} of {} audio",
            duration,
            audio.format()
        );
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.stopped.notified() => Err(AudioError::Interrupted),
        }
    }

    async fn stop(&self) -> Result<(), AudioError> {
        self.stopped.notify_waiters();
        Ok(())
    }
}

#[cfg(feature = "cpal-sink")]
pub use cpal_backend::CpalSink;

#[cfg(feature = "cpal-sink")]
mod cpal_backend {
    use super::{AudioError, AudioSink};
    use crate::types::{AudioBuffer, AudioFormat};
    use async_trait::async_trait;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::sync::mpsc::{channel, Sender};
    use std::sync::{Arc, Mutex, MutexGuard};
    use std::thread;
    use tokio::sync::oneshot;

    /// The buffer currently audible, consumed by the output callback
    struct Playback {
        samples: Vec<f32>,
        /// Fractional read position into `samples`
        position: f64,
        /// Input samples advanced per output frame
        step: f64,
        done: Option<oneshot::Sender<()>>,
    }

    enum AudioCommand {
        Play(Playback),
        Stop,
        Shutdown,
    }

    type SharedPlayback = Arc<Mutex<Option<Playback>>>;

    fn lock(shared: &SharedPlayback) -> MutexGuard<'_, Option<Playback>> {
        shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Plays 16-bit PCM buffers on the default output device.
    ///
    /// The cpal stream lives on a dedicated thread; buffers are resampled to the
    /// device rate with linear interpolation inside the output callback.
    pub struct CpalSink {
        audio_sender: Sender<AudioCommand>,
        output_sample_rate: u32,
        audio_thread: Option<thread::JoinHandle<()>>,
    }

    impl CpalSink {
        pub fn new() -> Result<Self, AudioError> {
            let host = cpal::default_host();
            log::debug!("AudioSink: Using audio host: {:?}", host.id());

            let device = host
                .default_output_device()
                .ok_or_else(|| AudioError::DeviceError("No output device found".to_string()))?;
            log::debug!("AudioSink: Using output device: {:?}", device.name());

            let supported_config = device
                .default_output_config()
                .map_err(|e| AudioError::DeviceError(e.to_string()))?;
            let output_sample_rate = supported_config.sample_rate().0;
            let output_channels = supported_config.channels() as usize;

            let (audio_sender, audio_receiver) = channel();
            let (ready_tx, ready_rx) = channel::<Result<(), AudioError>>();
            let current: SharedPlayback = Arc::new(Mutex::new(None));
            let callback_current = Arc::clone(&current);

            let audio_thread = thread::spawn(move || {
                let stream = match device.build_output_stream(
                    &supported_config.config(),
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        fill_output(&callback_current, data, output_channels);
                    },
                    move |err| {
                        log::error!("AudioSink: Stream error: {}", err);
                    },
                    None,
                ) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while let Ok(command) = audio_receiver.recv() {
                    match command {
                        AudioCommand::Play(playback) => {
                            // Replacing an unfinished buffer drops its completion sender
                            *lock(&current) = Some(playback);
                        }
                        AudioCommand::Stop => {
                            lock(&current).take();
                        }
                        AudioCommand::Shutdown => break,
                    }
                }

                log::debug!("AudioSink: Audio thread exiting");
            });

            ready_rx
                .recv()
                .map_err(|_| AudioError::StreamError("audio thread exited".to_string()))??;

            log::info!(
                "🔈 Audio output ready ({} Hz, {} channels)",
                output_sample_rate,
                output_channels
            );
            Ok(Self {
                audio_sender,
                output_sample_rate,
                audio_thread: Some(audio_thread),
            })
        }
    }

    /// Output callback body: interpolate the current buffer into `data`
    fn fill_output(current: &SharedPlayback, data: &mut [f32], channels: usize) {
        let mut guard = lock(current);

        let Some(playback) = guard.as_mut() else {
            data.fill(0.0);
            return;
        };

        for frame in data.chunks_mut(channels) {
            let index = playback.position.floor() as usize;
            let fract = playback.position.fract() as f32;
            let first = playback.samples.get(index).copied().unwrap_or(0.0);
            let second = playback.samples.get(index + 1).copied().unwrap_or(0.0);
            let sample = first * (1.0 - fract) + second * fract;

            for channel in frame.iter_mut() {
                *channel = sample;
            }
            playback.position += playback.step;
        }

        if playback.position >= playback.samples.len() as f64 {
            if let Some(done) = playback.done.take() {
                let _ = done.send(());
            }
            guard.take();
        }
    }

    impl Drop for CpalSink {
        fn drop(&mut self) {
            if let Err(e) = self.audio_sender.send(AudioCommand::Shutdown) {
                log::error!("Failed to send shutdown command: {}", e);
            }
            if let Some(thread) = self.audio_thread.take() {
                if let Err(e) = thread.join() {
                    log::error!("Failed to join audio thread: {:?}", e);
                }
            }
        }
    }

    #[async_trait]
    impl AudioSink for CpalSink {
        async fn play(&self, audio: AudioBuffer) -> Result<(), AudioError> {
            if audio.format() != AudioFormat::Pcm {
                return Err(AudioError::UnsupportedFormat(audio.format()));
            }

            let (done_tx, done_rx) = oneshot::channel();
            let playback = Playback {
                samples: audio.pcm_samples(),
                position: 0.0,
                step: audio.sample_rate() as f64 / self.output_sample_rate as f64,
                done: Some(done_tx),
            };
            log::debug!(
                "AudioSink: playing {} samples at {} Hz",
                playback.samples.len(),
                audio.sample_rate()
            );

            self.audio_sender
                .send(AudioCommand::Play(playback))
                .map_err(|_| AudioError::Closed)?;

            // The sender is dropped without firing when playback is stopped
            done_rx.await.map_err(|_| AudioError::Interrupted)
        }

        async fn stop(&self) -> Result<(), AudioError> {
            self.audio_sender
                .send(AudioCommand::Stop)
                .map_err(|_| AudioError::Closed)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pcm(duration_ms: u64) -> AudioBuffer {
        let samples = 16 * duration_ms as usize;
        AudioBuffer::new(vec![0u8; samples * 2], AudioFormat::Pcm, 16_000)
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_sink_waits_for_duration() {
        let sink = SimulatedSink::new();
        let start = tokio::time::Instant::now();
        sink.play(pcm(250)).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_sink_stop_interrupts() {
        let sink = Arc::new(SimulatedSink::new());
        let playing = {
            let sink = Arc::clone(&sink);
            tokio::spawn(async move { sink.play(pcm(5_000)).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        sink.stop().await.unwrap();

        let result = playing.await.unwrap();
        assert!(matches!(result, Err(AudioError::Interrupted)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_sink_fallback_duration() {
        let sink = SimulatedSink::new().with_fallback_duration(Duration::from_millis(40));
        let start = tokio::time::Instant::now();
        sink.play(AudioBuffer::new(vec![1u8; 10], AudioFormat::Mp3, 24_000))
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(40));
    }
}
