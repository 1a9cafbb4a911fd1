//! Streaming support: a generic SSE parser and the fragment stream
//! handed to callers.
//!
//! Both OpenAI and DeepSeek deliver streamed completions as Server-Sent
//! Events. The parser is line-based and works with any reqwest response
//! stream; the [`FragmentStream`] decouples fragment iteration from
//! history mutation: it accumulates the full text internally and fires a
//! single on-complete hook exactly once when the stream is exhausted.

use futures_util::StreamExt;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

use crate::LlmError;

/// A single SSE event parsed from the stream.
#[derive(Debug, Clone)]
pub struct SseEvent {
    /// The event type, when the stream uses `event:` lines.
    pub event: Option<String>,
    /// The event data (JSON string, or `[DONE]` on OpenAI-style streams).
    pub data: String,
}

/// Parse an SSE stream from a reqwest response, calling `on_event` for
/// each event.
pub async fn parse_sse_stream(
    response: reqwest::Response,
    mut on_event: impl FnMut(SseEvent),
) -> Result<(), LlmError> {
    let byte_stream = response
        .bytes_stream()
        .map(|result| result.map_err(std::io::Error::other));
    let reader = tokio::io::BufReader::new(StreamReader::new(byte_stream));
    let mut lines = reader.lines();

    let mut current_event: Option<String> = None;
    let mut current_data = String::new();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| LlmError::Network(e.to_string()))?
    {
        if line.is_empty() {
            // Empty line = end of event
            if !current_data.is_empty() {
                on_event(SseEvent {
                    event: current_event.take(),
                    data: std::mem::take(&mut current_data),
                });
            }
            current_event = None;
            continue;
        }

        if let Some(event_type) = line.strip_prefix("event: ") {
            current_event = Some(event_type.to_string());
        } else if let Some(data) = line.strip_prefix("data: ") {
            if !current_data.is_empty() {
                current_data.push('\n');
            }
            current_data.push_str(data);
        }
        // Ignore other fields (id:, retry:, comments)
    }

    // Flush any remaining event
    if !current_data.is_empty() {
        on_event(SseEvent {
            event: current_event,
            data: current_data,
        });
    }

    Ok(())
}

/// Hook fired once with the accumulated text when the stream ends cleanly.
pub type OnComplete = Box<dyn FnOnce(&str) + Send>;

/// A lazy, finite, single-pass sequence of completion text fragments.
///
/// Fragments arrive over a channel fed by the backend adapter. The stream
/// accumulates everything it yields, so the full assistant text is
/// available after exhaustion even if the caller only consumed fragments.
pub struct FragmentStream {
    rx: mpsc::UnboundedReceiver<Result<String, LlmError>>,
    collected: String,
    finished: bool,
    on_complete: Option<OnComplete>,
}

impl FragmentStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Result<String, LlmError>>) -> Self {
        Self {
            rx,
            collected: String::new(),
            finished: false,
            on_complete: None,
        }
    }

    /// Build a stream plus its sending half. Adapters spawn a task that
    /// feeds the sender and drop it to end the stream.
    pub(crate) fn channel() -> (
        mpsc::UnboundedSender<Result<String, LlmError>>,
        FragmentStream,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, FragmentStream::new(rx))
    }

    /// Set the hook fired exactly once, with the full accumulated text,
    /// when the stream is exhausted. Not fired on mid-stream error.
    pub fn set_on_complete(&mut self, hook: impl FnOnce(&str) + Send + 'static) {
        self.on_complete = Some(Box::new(hook));
    }

    /// Next fragment, or `None` once the stream is exhausted.
    ///
    /// A mid-stream error finishes the stream; subsequent calls return
    /// `None`.
    pub async fn next_fragment(&mut self) -> Option<Result<String, LlmError>> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(Ok(fragment)) => {
                self.collected.push_str(&fragment);
                Some(Ok(fragment))
            }
            Some(Err(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            None => {
                self.finished = true;
                if let Some(hook) = self.on_complete.take() {
                    hook(&self.collected);
                }
                None
            }
        }
    }

    /// Text accumulated so far (the full response once exhausted).
    pub fn text(&self) -> &str {
        &self.collected
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consume the stream, returning the accumulated text.
    pub fn into_text(self) -> String {
        self.collected
    }
}
