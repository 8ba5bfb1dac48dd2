//! Append-only record of who said what during a session.

use chrono::{DateTime, Local};
use std::sync::Mutex;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Speaker {
    #[strum(serialize = "AI")]
    Ai,
    User,
    /// Prompts spoken by the agent itself rather than the dialogue engine
    System,
}

#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Local>,
}

impl TranscriptEntry {
    /// `[HH:MM:SS] Speaker: text`
    pub fn formatted(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.speaker,
            self.text
        )
    }
}

/// Shared transcript sink. Implementations must be safe to call from any task.
pub trait TranscriptLog: Send + Sync {
    fn append(&self, speaker: Speaker, text: &str);

    /// The last `n` entries by `speaker`, oldest first
    fn last_entries(&self, speaker: Speaker, n: usize) -> Vec<TranscriptEntry>;

    fn clear(&self);
}

#[derive(Debug, Default)]
pub struct InMemoryTranscript {
    entries: Mutex<Vec<TranscriptEntry>>,
}

impl InMemoryTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Vec<TranscriptEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn last_text(&self, speaker: Speaker) -> Option<String> {
        self.entries()
            .iter()
            .rev()
            .find(|entry| entry.speaker == speaker)
            .map(|entry| entry.text.clone())
    }

    /// The whole transcript, one formatted line per entry
    pub fn formatted(&self) -> String {
        self.entries()
            .iter()
            .map(TranscriptEntry::formatted)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl TranscriptLog for InMemoryTranscript {
    fn append(&self, speaker: Speaker, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            log::warn!("Transcript: ignoring empty {} entry", speaker);
            return;
        }
        let entry = TranscriptEntry {
            speaker,
            text: text.to_string(),
            timestamp: Local::now(),
        };
        log::debug!("📝 {}", entry.formatted());
        self.entries().push(entry);
    }

    fn last_entries(&self, speaker: Speaker, n: usize) -> Vec<TranscriptEntry> {
        let entries = self.entries();
        let mut last: Vec<TranscriptEntry> = entries
            .iter()
            .rev()
            .filter(|entry| entry.speaker == speaker)
            .take(n)
            .cloned()
            .collect();
        last.reverse();
        last
    }

    fn clear(&self) {
        self.entries().clear();
    }
}
