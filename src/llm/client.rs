use super::prompts::MessageTemplates;
use super::stream::{parse_stream_payload, SseDecoder};
use super::{DialogueEngine, DialogueEvent};
use crate::config::ApiConfig;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

type RunIdSlot = Arc<Mutex<Option<String>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The streamed run currently feeding the event channel
struct ActiveRun {
    cancel: CancellationToken,
    run_id: RunIdSlot,
    task: JoinHandle<()>,
}

/// Dialogue engine backed by an OpenAI assistant thread.
///
/// Every command posts a user message to the session's thread and starts a
/// streamed run. The run's events are decoded on a spawned task and forwarded
/// to the channel given at construction.
pub struct AssistantClient {
    http: Client,
    api_key: String,
    assistant_id: String,
    base_url: String,
    events: mpsc::UnboundedSender<DialogueEvent>,
    thread_id: tokio::sync::Mutex<Option<String>>,
    active_run: Mutex<Option<ActiveRun>>,
}

impl AssistantClient {
    pub fn new(
        config: &ApiConfig,
        events: mpsc::UnboundedSender<DialogueEvent>,
    ) -> Result<Self, LlmError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LlmError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key: config.api_key().to_string(),
            assistant_id: config.assistant_id().to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            events,
            thread_id: tokio::sync::Mutex::new(None),
            active_run: Mutex::new(None),
        })
    }

    /// Continue an existing conversation thread instead of creating one
    pub fn with_thread(self, thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: tokio::sync::Mutex::new(Some(thread_id.into())),
            ..self
        }
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value, LlmError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .request(self.http.post(&url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message: extract_error_message(&error_text),
            });
        }
        Ok(response.json().await?)
    }

    /// Thread id for this session, creating the thread on first use
    async fn thread_id(&self) -> Result<String, LlmError> {
        let mut thread_id = self.thread_id.lock().await;
        if let Some(id) = thread_id.as_ref() {
            return Ok(id.clone());
        }

        let created = self.post_json("threads", json!({})).await?;
        let id = created
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| LlmError::InvalidResponse("thread without id".to_string()))?
            .to_string();
        log::info!("🧵 Created assistant thread {}", id);
        *thread_id = Some(id.clone());
        Ok(id)
    }

    /// Cancel whatever is running, post `content` and stream a new run
    async fn send(&self, content: String) -> Result<(), LlmError> {
        if let Err(e) = self.cancel_current_run().await {
            log::warn!("Failed to cancel previous run: {}", e);
        }

        let thread_id = self.thread_id().await?;
        self.post_json(
            &format!("threads/{}/messages", thread_id),
            json!({ "role": "user", "content": content }),
        )
        .await?;
        self.start_run(&thread_id).await
    }

    async fn start_run(&self, thread_id: &str) -> Result<(), LlmError> {
        let url = format!("{}/threads/{}/runs", self.base_url, thread_id);
        let response = self
            .request(self.http.post(&url))
            .json(&json!({ "assistant_id": self.assistant_id, "stream": true }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message: extract_error_message(&error_text),
            });
        }

        let cancel = CancellationToken::new();
        let run_id: RunIdSlot = Arc::new(Mutex::new(None));
        let task = tokio::spawn(stream_run(
            response.bytes_stream(),
            self.events.clone(),
            cancel.clone(),
            Arc::clone(&run_id),
        ));

        *lock(&self.active_run) = Some(ActiveRun {
            cancel,
            run_id,
            task,
        });
        Ok(())
    }
}

#[async_trait]
impl DialogueEngine for AssistantClient {
    async fn send_user_message(&self, text: &str) -> Result<(), LlmError> {
        self.send(text.trim().to_string()).await
    }

    async fn send_quiz_answer(&self, question: &str, answer: &str) -> Result<(), LlmError> {
        self.send(MessageTemplates::quiz_answer(question, answer))
            .await
    }

    async fn send_interjection(
        &self,
        text: &str,
        follow_up_instruction: &str,
    ) -> Result<(), LlmError> {
        self.send(MessageTemplates::interjection(text, follow_up_instruction))
            .await
    }

    async fn cancel_current_run(&self) -> Result<(), LlmError> {
        let Some(active) = lock(&self.active_run).take() else {
            return Ok(());
        };

        let already_finished = active.task.is_finished();
        active.cancel.cancel();
        if already_finished {
            return Ok(());
        }

        let run_id = lock(&active.run_id).clone();
        let thread_id = self.thread_id.lock().await.clone();
        let (Some(run_id), Some(thread_id)) = (run_id, thread_id) else {
            log::debug!("Run cancelled before the server assigned an id");
            return Ok(());
        };

        log::info!("🛑 Cancelling assistant run {}", run_id);
        match self
            .post_json(
                &format!("threads/{}/runs/{}/cancel", thread_id, run_id),
                json!({}),
            )
            .await
        {
            Ok(_) => Ok(()),
            // The run may have completed between the check and the request
            Err(LlmError::ApiError { status: 400, message }) => {
                log::debug!("Run {} no longer cancellable: {}", run_id, message);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Decode a run's SSE body and forward dialogue events until the run ends,
/// the body closes or `cancel` fires.
async fn stream_run<S, B, E>(
    byte_stream: S,
    events: mpsc::UnboundedSender<DialogueEvent>,
    cancel: CancellationToken,
    run_id: RunIdSlot,
) where
    S: Stream<Item = Result<B, E>> + Send,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    let mut byte_stream = Box::pin(byte_stream);
    let mut decoder = SseDecoder::new();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                log::debug!("Run stream cancelled");
                return;
            }
            chunk = byte_stream.next() => chunk,
        };

        let decoded = match chunk {
            Some(Ok(bytes)) => decoder.push(bytes.as_ref()),
            Some(Err(e)) => {
                log::error!("Run stream read error: {}", e);
                let _ = events.send(DialogueEvent::RunFailed(format!("stream read error: {}", e)));
                return;
            }
            None => {
                let tail = decoder
                    .finish()
                    .filter(|sse| !sse.is_done())
                    .and_then(|sse| parse_stream_payload(sse.event_type.as_deref(), &sse.data));
                if let Some(event) = tail {
                    let terminal = is_terminal(&event);
                    let _ = events.send(event);
                    if terminal {
                        return;
                    }
                }
                log::warn!("Run stream closed before the run finished");
                let _ = events.send(DialogueEvent::RunFailed(
                    "stream closed before the run finished".to_string(),
                ));
                return;
            }
        };

        for sse in decoded {
            if sse.is_done() {
                // [DONE] follows the terminal run event
                return;
            }
            let Some(event) = parse_stream_payload(sse.event_type.as_deref(), &sse.data) else {
                continue;
            };
            if let DialogueEvent::RunStarted { run_id: id } = &event {
                log::info!("🤖 Assistant run {} started", id);
                *lock(&run_id) = Some(id.clone());
            }
            let terminal = is_terminal(&event);
            if events.send(event).is_err() || terminal {
                return;
            }
        }
    }
}

fn is_terminal(event: &DialogueEvent) -> bool {
    matches!(event, DialogueEvent::RunCompleted | DialogueEvent::RunFailed(_))
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretBox;

    fn config(base_url: &str) -> ApiConfig {
        ApiConfig {
            api_key: SecretBox::new(Box::new("sk-test".to_string())),
            assistant_id: SecretBox::new(Box::new("asst_test".to_string())),
            base_url: base_url.to_string(),
        }
    }

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Send {
        let parts: Vec<Result<Vec<u8>, std::io::Error>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        futures_util::stream::iter(parts)
    }

    async fn collect(
        stream: impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Send,
    ) -> (Vec<DialogueEvent>, Option<String>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let run_id: RunIdSlot = Arc::new(Mutex::new(None));
        stream_run(stream, tx, CancellationToken::new(), Arc::clone(&run_id)).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let id = lock(&run_id).clone();
        (events, id)
    }

    #[tokio::test]
    async fn test_stream_run_forwards_events_in_order() {
        let stream = chunks(&[
            "event: thread.run.created\ndata: {\"id\":\"run_1\"}\n\n",
            "event: thread.message.delta\ndata: {\"delta\":{\"content\":[{\"type\":\"text\",\"text\":{\"value\":\"Hi. \"}}]}}\n\n",
            "event: thread.message.delta\ndata: {\"delta\":{\"content\":[{\"type\":\"text\",",
            "\"text\":{\"value\":\"Bye.\"}}]}}\n\nevent: thread.run.completed\ndata: {\"id\":\"run_1\"}\n\n",
            "event: done\ndata: [DONE]\n\n",
        ]);

        let (events, run_id) = collect(stream).await;
        assert_eq!(
            events,
            vec![
                DialogueEvent::RunStarted {
                    run_id: "run_1".to_string()
                },
                DialogueEvent::TextDelta("Hi. ".to_string()),
                DialogueEvent::TextDelta("Bye.".to_string()),
                DialogueEvent::RunCompleted,
            ]
        );
        assert_eq!(run_id.as_deref(), Some("run_1"));
    }

    #[tokio::test]
    async fn test_stream_closed_early_reports_failure() {
        let stream = chunks(&["event: thread.run.created\ndata: {\"id\":\"run_2\"}\n\n"]);
        let (events, _) = collect(stream).await;
        assert!(matches!(events.last(), Some(DialogueEvent::RunFailed(_))));
    }

    #[tokio::test]
    async fn test_cancelled_stream_forwards_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        stream_run(
            futures_util::stream::pending::<Result<Vec<u8>, std::io::Error>>(),
            tx,
            cancel,
            Arc::new(Mutex::new(None)),
        )
        .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_without_active_run_is_ok() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = AssistantClient::new(&config("http://localhost:1/v1"), tx).unwrap();
        assert!(client.cancel_current_run().await.is_ok());
    }

    #[tokio::test]
    async fn test_send_to_unreachable_server_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = AssistantClient::new(&config("http://localhost:1/v1"), tx)
            .unwrap()
            .with_thread("thread_abc");
        let result = client.send_user_message("Hello").await;
        assert!(matches!(result, Err(LlmError::Request(_))));
    }

    #[test]
    fn test_extract_error_message() {
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"bad key"}}"#),
            "bad key"
        );
        assert_eq!(extract_error_message("plain"), "plain");
    }
}
