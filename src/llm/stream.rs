//! Server-sent event decoding for streamed assistant runs.

use super::DialogueEvent;
use serde_json::Value;

/// One decoded SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, if the server sent one
    pub event_type: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
}

impl SseEvent {
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Incremental SSE decoder.
///
/// Bytes are buffered until a full line is available so multi-byte UTF-8
/// sequences split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    event_type: Option<String>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk, returning every event it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw[..newline]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Emit whatever is left when the connection closes
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.pending.is_empty() {
            let raw = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&raw).into_owned();
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.process_line(line) {
                return Some(event);
            }
        }
        self.take_event()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.take_event();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data_lines.push(value.to_string()),
            "event" => self.event_type = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        if self.data_lines.is_empty() {
            self.event_type = None;
            return None;
        }
        Some(SseEvent {
            event_type: self.event_type.take(),
            data: std::mem::take(&mut self.data_lines).join("\n"),
        })
    }
}

/// Map one assistant-run payload to a dialogue event.
///
/// The event name comes from the SSE `event:` field when present, otherwise
/// from an `event` or `object` member of the payload itself. Payloads that do
/// not matter to turn-taking (run steps, queued/in-progress updates) map to
/// `None`.
pub fn parse_stream_payload(event_type: Option<&str>, data: &str) -> Option<DialogueEvent> {
    let json: Value = match serde_json::from_str(data) {
        Ok(json) => json,
        Err(e) => {
            log::warn!("Ignoring malformed stream payload ({}): {}", e, data);
            return None;
        }
    };

    // Some proxies wrap the object as {"event": ..., "data": {...}}
    let body = json.get("data").filter(|d| d.is_object()).unwrap_or(&json);
    let name = event_type
        .or_else(|| json.get("event").and_then(Value::as_str))
        .or_else(|| body.get("object").and_then(Value::as_str))?;

    match name {
        "thread.message.delta" => {
            let text = message_delta_text(body);
            (!text.is_empty()).then_some(DialogueEvent::TextDelta(text))
        }
        "thread.run.created" => {
            let run_id = body.get("id").and_then(Value::as_str)?.to_string();
            Some(DialogueEvent::RunStarted { run_id })
        }
        "thread.run.completed" => Some(DialogueEvent::RunCompleted),
        "thread.run.failed" | "thread.run.expired" => {
            let reason = body
                .get("last_error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or(name)
                .to_string();
            Some(DialogueEvent::RunFailed(reason))
        }
        "thread.run.requires_action" => {
            log::warn!("Assistant run requires tool action, which is not supported");
            Some(DialogueEvent::RunFailed("run requires action".to_string()))
        }
        other => {
            log::trace!("Ignoring stream event {}", other);
            None
        }
    }
}

/// Concatenate the text parts of a `thread.message.delta` object
fn message_delta_text(body: &Value) -> String {
    body.pointer("/delta/content")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|part| part.pointer("/text/value").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}
