//! Model gateway: the single boundary between the server and the hosted
//! language-model provider.
//!
//! Provider failures never cross this boundary as errors.  The non-streaming
//! call maps any failure to a user-safe fallback string, and the streaming
//! call degrades to emitting exactly one fallback fragment and then ending
//! the stream — it never raises after partial output.  Callers therefore
//! treat every gateway result as renderable text.
//!
//! The gateway is constructed once at the composition root and injected via
//! [`crate::state::AppState`]; tests swap in a scripted fake.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use genai::chat::{ChatMessage, ChatOptions, ChatRequest, ChatStreamEvent};
use tracing::warn;

/// Fallback shown when the provider call itself fails.
pub const FAILURE_FALLBACK: &str =
    "I'm experiencing technical difficulties right now. Please try again in a moment.";

/// Fallback shown when the provider succeeds but returns no text.
pub const EMPTY_FALLBACK: &str =
    "I apologize, but I'm unable to generate a response at the moment. Please try again.";

/// Default chat title when nothing better can be derived.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Maximum chat title length in characters.
pub const TITLE_MAX_CHARS: usize = 50;

const SYSTEM_INSTRUCTION: &str = "You are Parley, a helpful assistant.";

/// One prior turn handed to the model as context.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub content: String,
    pub is_user: bool,
}

/// One incremental piece of generated text.
///
/// `fallback` marks the synthetic apology fragment injected on mid-stream
/// provider failure; the session controller forwards it to the client but
/// keeps it out of the persisted transcript.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub content: String,
    pub fallback: bool,
}

impl Fragment {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), fallback: false }
    }

    pub fn fallback() -> Self {
        Self { content: FAILURE_FALLBACK.to_owned(), fallback: true }
    }
}

/// Finite, non-restartable sequence of generated fragments.
pub type FragmentStream = BoxStream<'static, Fragment>;

/// Interface to the hosted language model.
///
/// History is bounded by the caller; the gateway holds no conversation
/// state between calls — the full context is resent every time.
#[async_trait]
pub trait ModelGateway: Send + Sync + 'static {
    /// Stream a response to `prompt` grounded in `history`.
    async fn generate_streaming(&self, prompt: &str, history: &[HistoryEntry]) -> FragmentStream;

    /// Generate a complete response in one call.
    async fn generate(&self, prompt: &str, history: &[HistoryEntry]) -> String;

    /// Generate a short chat title (≤ [`TITLE_MAX_CHARS`] chars) from the
    /// first message of a conversation.
    async fn generate_title(&self, seed: &str) -> String;
}

/// [`ModelGateway`] backed by the Gemini API via the `genai` client.
///
/// The API key is read by the client from `GEMINI_API_KEY`.
pub struct GeminiGateway {
    client: genai::Client,
    model: String,
}

impl GeminiGateway {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: genai::Client::default(),
            model: model.into(),
        }
    }

    fn chat_request(&self, prompt: &str, history: &[HistoryEntry]) -> ChatRequest {
        let mut messages = vec![ChatMessage::system(SYSTEM_INSTRUCTION)];
        for entry in history {
            messages.push(if entry.is_user {
                ChatMessage::user(entry.content.as_str())
            } else {
                ChatMessage::assistant(entry.content.as_str())
            });
        }
        messages.push(ChatMessage::user(prompt));
        ChatRequest::new(messages)
    }

    fn chat_options() -> ChatOptions {
        ChatOptions::default()
            .with_temperature(0.7)
            .with_max_tokens(8000)
            .with_top_p(0.5)
    }
}

#[async_trait]
impl ModelGateway for GeminiGateway {
    async fn generate_streaming(&self, prompt: &str, history: &[HistoryEntry]) -> FragmentStream {
        let request = self.chat_request(prompt, history);
        let options = Self::chat_options();

        let response = self
            .client
            .exec_chat_stream(&self.model, request, Some(&options))
            .await;

        let inner = match response {
            Ok(res) => res.stream,
            Err(e) => {
                warn!(error = %e, "provider stream failed to start");
                return stream::iter([Fragment::fallback()]).boxed();
            }
        };

        // Map provider events onto fragments.  A mid-stream error yields a
        // single fallback fragment and then terminates the sequence.
        stream::unfold((inner, false), |(mut inner, done)| async move {
            if done {
                return None;
            }
            loop {
                match inner.next().await {
                    Some(Ok(ChatStreamEvent::Chunk(chunk))) => {
                        if chunk.content.is_empty() {
                            continue;
                        }
                        return Some((Fragment::text(chunk.content), (inner, false)));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "provider error mid-stream");
                        return Some((Fragment::fallback(), (inner, true)));
                    }
                    None => return None,
                }
            }
        })
        .boxed()
    }

    async fn generate(&self, prompt: &str, history: &[HistoryEntry]) -> String {
        let request = self.chat_request(prompt, history);
        let options = Self::chat_options();

        match self.client.exec_chat(&self.model, request, Some(&options)).await {
            Ok(res) => match res.into_first_text() {
                Some(text) if !text.is_empty() => text,
                _ => EMPTY_FALLBACK.to_owned(),
            },
            Err(e) => {
                warn!(error = %e, "provider error");
                FAILURE_FALLBACK.to_owned()
            }
        }
    }

    async fn generate_title(&self, seed: &str) -> String {
        let prompt = format!(
            "Generate a short, descriptive title (max 5 words) for a chat \
             that starts with: '{}'",
            truncate_chars(seed, 100),
        );
        let request = ChatRequest::new(vec![ChatMessage::user(prompt)]);
        let options = ChatOptions::default().with_temperature(0.3).with_max_tokens(20);

        match self.client.exec_chat(&self.model, request, Some(&options)).await {
            Ok(res) => match res.into_first_text() {
                Some(text) => sanitize_title(&text),
                None => DEFAULT_TITLE.to_owned(),
            },
            Err(e) => {
                warn!(error = %e, "title generation error");
                DEFAULT_TITLE.to_owned()
            }
        }
    }
}

/// Clamp a generated title: trim, strip surrounding quotes, cap length.
pub fn sanitize_title(raw: &str) -> String {
    let title = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    if title.is_empty() {
        DEFAULT_TITLE.to_owned()
    } else {
        truncate_chars(title, TITLE_MAX_CHARS)
    }
}

/// Derive a provisional chat title from the first user message.
pub fn title_preview(first_message: &str) -> String {
    let preview = truncate_chars(first_message.trim(), TITLE_MAX_CHARS);
    let preview = preview.trim();
    if preview.is_empty() {
        DEFAULT_TITLE.to_owned()
    } else {
        preview.to_owned()
    }
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ── Tests ──────────────────────────────────────────────────────────────────────
