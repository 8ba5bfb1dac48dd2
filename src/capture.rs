/// Listening affordances driven by the interaction state machine.
///
/// `set_capture_enabled` arms or disarms speech capture (the microphone or
/// push-to-talk control); `set_raise_hand_enabled` shows or hides the
/// "I have a question" control. The state machine is the only caller.
pub trait CaptureControl: Send + Sync {
    fn set_capture_enabled(&self, enabled: bool);

    fn set_raise_hand_enabled(&self, enabled: bool);
}

/// Capture control for terminals and headless runs: reports changes in the log
#[derive(Debug, Default)]
pub struct LoggingCapture;

impl CaptureControl for LoggingCapture {
    fn set_capture_enabled(&self, enabled: bool) {
        if enabled {
            log::info!("🎤 Listening, type your reply");
        } else {
            log::debug!("🎤 Capture disabled");
        }
    }

    fn set_raise_hand_enabled(&self, enabled: bool) {
        if enabled {
            log::debug!("✋ Raise hand available (/hand)");
        } else {
            log::debug!("✋ Raise hand unavailable");
        }
    }
}
