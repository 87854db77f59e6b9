//! Conversation turn pipeline.
//!
//! One turn moves through: resolve chat → load context → persist user
//! message → stream fragments → commit assistant message → terminal event.
//! The streaming phase runs as a producer task feeding a bounded channel of
//! [`StreamEvent`]s; the SSE transport consumes the other end, so the
//! transport's read pace backpressures the gateway read loop.
//!
//! Known race, kept from the source design: two concurrent turns on the
//! same chat are not mutually excluded and may interleave message order.
//! Each phase commits its own short-lived transaction, so individual rows
//! stay consistent either way.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::entities::{ChatStore, Message, MessageStore, SqliteStore};
use crate::error::ServerError;
use crate::gateway::{title_preview, HistoryEntry, ModelGateway};

/// Number of prior messages sent to the model as context.
pub const CONTEXT_WINDOW: usize = 10;

/// Capacity of the event channel between pipeline and transport.
pub const STREAM_CHANNEL_CAPACITY: usize = 32;

/// Server-push events emitted over the wire, in order: one `Start`, zero or
/// more `Chunk`s, one `End`.  `End` is emitted regardless of outcome so the
/// client always knows the stream finished.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Start { chat_id: i64 },
    Chunk { content: String },
    End,
}

impl StreamEvent {
    /// JSON payload for one SSE `data:` line.
    pub fn to_json(&self) -> String {
        match self {
            StreamEvent::Start { chat_id } => json!({ "type": "start", "chat_id": chat_id }),
            StreamEvent::Chunk { content } => json!({ "type": "chunk", "content": content }),
            StreamEvent::End => json!({ "type": "end" }),
        }
        .to_string()
    }
}

/// Everything the streaming phase needs, captured by [`begin_turn`].
#[derive(Debug)]
pub struct TurnContext {
    pub chat_id: i64,
    prompt: String,
    history: Vec<HistoryEntry>,
}

/// Phases 1–3 of a turn: resolve (or create) the chat, capture the bounded
/// context, and durably persist the user message.
///
/// The context snapshot is taken *before* the user message is persisted so
/// the model never sees the new prompt duplicated in history.  Any failure
/// here aborts the turn before a stream is started.
pub async fn begin_turn(
    store: &SqliteStore,
    user_id: i64,
    chat_id: Option<i64>,
    text: &str,
) -> Result<TurnContext, ServerError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ServerError::Validation("Message cannot be empty".into()));
    }

    let chat = match chat_id {
        Some(id) => store
            .get_chat(id, user_id)
            .await?
            .ok_or_else(|| ServerError::NotFound("Chat not found".into()))?,
        None => store.create_chat(user_id, &title_preview(text)).await?,
    };

    let history = tail_history(&store.list_messages(chat.id).await?);
    store.append_message(chat.id, text, true).await?;

    Ok(TurnContext {
        chat_id: chat.id,
        prompt: text.to_owned(),
        history,
    })
}

/// Phases 4–6 of a turn: drive the gateway stream, forwarding every
/// fragment to `tx` in order while accumulating the response text, then
/// commit the assistant message and emit the terminal event.
///
/// Fallback fragments (injected by the gateway on provider failure) are
/// forwarded but excluded from the persisted transcript.  If the client
/// disconnects, forwarding stops but whatever was produced up to that
/// point is still committed.
pub async fn run_stream(
    store: SqliteStore,
    gateway: Arc<dyn ModelGateway>,
    turn: TurnContext,
    tx: mpsc::Sender<StreamEvent>,
) {
    let chat_id = turn.chat_id;
    if tx.send(StreamEvent::Start { chat_id }).await.is_err() {
        // Client went away before the first byte; nothing was produced.
        return;
    }

    let mut full_response = String::new();
    let mut stream = gateway.generate_streaming(&turn.prompt, &turn.history).await;

    while let Some(fragment) = stream.next().await {
        if fragment.content.is_empty() {
            continue;
        }
        if !fragment.fallback {
            full_response.push_str(&fragment.content);
        }
        let event = StreamEvent::Chunk { content: fragment.content };
        if tx.send(event).await.is_err() {
            info!(chat_id, "client disconnected mid-stream");
            break;
        }
    }

    if !full_response.is_empty() {
        if let Err(e) = store.append_message(chat_id, &full_response, false).await {
            error!(chat_id, error = %e, "failed to persist assistant message");
        }
    }

    let _ = tx.send(StreamEvent::End).await;
}

/// Retry/edit path: regenerate the response to a prior user turn.
///
/// The anchor is the *most recent* user message whose trimmed content
/// equals `anchor_text`.  With `truncate`, every message strictly after the
/// anchor is deleted; the deletions, the regenerated assistant message, and
/// the chat timestamp bump commit as one transaction.  This path does not
/// stream — it is a correction flow, not the low-latency path.
pub async fn retry_from_anchor(
    store: &SqliteStore,
    gateway: &dyn ModelGateway,
    user_id: i64,
    chat_id: i64,
    anchor_text: &str,
    truncate: bool,
) -> Result<Message, ServerError> {
    let anchor_text = anchor_text.trim();
    if anchor_text.is_empty() {
        return Err(ServerError::Validation("anchor_user_text is required".into()));
    }

    store
        .get_chat(chat_id, user_id)
        .await?
        .ok_or_else(|| ServerError::NotFound("Chat not found".into()))?;

    let messages = store.list_messages(chat_id).await?;
    let anchor_index = messages
        .iter()
        .rposition(|m| m.is_user && m.content.trim() == anchor_text)
        .ok_or_else(|| ServerError::NotFound("Anchor user message not found".into()))?;

    // Context is everything strictly before the anchor, so the anchor text
    // itself is not duplicated in history.
    let history = tail_history(&messages[..anchor_index]);
    let reply = gateway.generate(anchor_text, &history).await;

    let truncate_after = truncate.then(|| messages[anchor_index].id);
    let assistant = store
        .truncate_after_and_append(chat_id, truncate_after, &reply)
        .await?;
    Ok(assistant)
}

fn tail_history(messages: &[Message]) -> Vec<HistoryEntry> {
    let skip = messages.len().saturating_sub(CONTEXT_WINDOW);
    messages[skip..]
        .iter()
        .map(|m| HistoryEntry { content: m.content.clone(), is_user: m.is_user })
        .collect()
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;
    use crate::entities::UserStore;
    use crate::gateway::{Fragment, FragmentStream, FAILURE_FALLBACK};
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::Mutex;

    /// Scripted gateway: yields canned fragments / replies and records the
    /// history it was handed.
    struct FakeGateway {
        fragments: Vec<Fragment>,
        reply: String,
        seen_history: Mutex<Vec<HistoryEntry>>,
    }

    impl FakeGateway {
        fn streaming(fragments: Vec<Fragment>) -> Self {
            Self { fragments, reply: String::new(), seen_history: Mutex::new(Vec::new()) }
        }

        fn complete(reply: &str) -> Self {
            Self {
                fragments: Vec::new(),
                reply: reply.to_owned(),
                seen_history: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelGateway for FakeGateway {
        async fn generate_streaming(
            &self,
            _prompt: &str,
            history: &[HistoryEntry],
        ) -> FragmentStream {
            *self.seen_history.lock().unwrap() = history.to_vec();
            stream::iter(self.fragments.clone()).boxed()
        }

        async fn generate(&self, _prompt: &str, history: &[HistoryEntry]) -> String {
            *self.seen_history.lock().unwrap() = history.to_vec();
            self.reply.clone()
        }

        async fn generate_title(&self, seed: &str) -> String {
            title_preview(seed)
        }
    }

    async fn test_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.expect("in-memory store")
    }

    async fn test_user(store: &SqliteStore) -> i64 {
        store
            .create_user(crate::entities::user::NewUser {
                username: "ada".into(),
                email: "ada@example.com".into(),
                password_hash: None,
                display_name: None,
            })
            .await
            .expect("create user")
            .id
    }

    async fn drain(
        store: SqliteStore,
        gateway: Arc<dyn ModelGateway>,
        turn: TurnContext,
    ) -> Vec<StreamEvent> {
        let (tx, mut rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let producer = tokio::spawn(run_stream(store, gateway, turn, tx));
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        producer.await.expect("producer task");
        events
    }

    #[tokio::test]
    async fn streamed_reply_persists_exact_fragment_concatenation() {
        let store = test_store().await;
        let user_id = test_user(&store).await;
        let gateway = Arc::new(FakeGateway::streaming(vec![
            Fragment::text("Hel"),
            Fragment::text("lo "),
            Fragment::text("world"),
        ]));

        let turn = begin_turn(&store, user_id, None, "Hello").await.expect("begin");
        let chat_id = turn.chat_id;
        let events = drain(store.clone(), gateway, turn).await;

        assert_eq!(events.first(), Some(&StreamEvent::Start { chat_id }));
        assert_eq!(events.last(), Some(&StreamEvent::End));
        let chunks: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk { content } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, vec!["Hel", "lo ", "world"]);

        let messages = store.list_messages(chat_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].is_user);
        assert_eq!(messages[0].content, "Hello");
        assert!(!messages[1].is_user);
        assert_eq!(messages[1].content, "Hello world");

        // New-chat title derives from the first user message.
        let chat = store.get_chat(chat_id, user_id).await.unwrap().unwrap();
        assert_eq!(chat.title, "Hello");
    }

    #[tokio::test]
    async fn zero_fragments_persists_no_assistant_message_but_ends_stream() {
        let store = test_store().await;
        let user_id = test_user(&store).await;
        let gateway = Arc::new(FakeGateway::streaming(Vec::new()));

        let turn = begin_turn(&store, user_id, None, "anyone there?").await.unwrap();
        let chat_id = turn.chat_id;
        let events = drain(store.clone(), gateway, turn).await;

        assert_eq!(events, vec![StreamEvent::Start { chat_id }, StreamEvent::End]);
        let messages = store.list_messages(chat_id).await.unwrap();
        assert_eq!(messages.len(), 1, "only the user message is persisted");
    }

    #[tokio::test]
    async fn mid_stream_failure_forwards_fallback_but_does_not_persist_it() {
        let store = test_store().await;
        let user_id = test_user(&store).await;
        let gateway = Arc::new(FakeGateway::streaming(vec![
            Fragment::text("part one, "),
            Fragment::text("part two"),
            Fragment::fallback(),
        ]));

        let turn = begin_turn(&store, user_id, None, "go").await.unwrap();
        let chat_id = turn.chat_id;
        let events = drain(store.clone(), gateway, turn).await;

        let chunks: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk { content } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, vec!["part one, ", "part two", FAILURE_FALLBACK]);
        assert_eq!(events.last(), Some(&StreamEvent::End));

        let messages = store.list_messages(chat_id).await.unwrap();
        assert_eq!(messages[1].content, "part one, part two");
    }

    #[tokio::test]
    async fn empty_message_is_rejected_before_any_write() {
        let store = test_store().await;
        let user_id = test_user(&store).await;

        let err = begin_turn(&store, user_id, None, "   ").await.unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
        assert!(store.list_chats(user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn context_is_captured_before_the_new_user_message() {
        let store = test_store().await;
        let user_id = test_user(&store).await;
        let gateway = Arc::new(FakeGateway::streaming(vec![Fragment::text("second")]));

        let chat = store.create_chat(user_id, "t").await.unwrap();
        store.append_message(chat.id, "first question", true).await.unwrap();
        store.append_message(chat.id, "first answer", false).await.unwrap();

        let turn = begin_turn(&store, user_id, Some(chat.id), "second question")
            .await
            .unwrap();
        drain(store.clone(), gateway.clone(), turn).await;

        let seen = gateway.seen_history.lock().unwrap().clone();
        assert_eq!(seen.len(), 2, "history must not include the new prompt");
        assert_eq!(seen[0].content, "first question");
        assert_eq!(seen[1].content, "first answer");
    }

    #[tokio::test]
    async fn history_is_bounded_to_the_context_window() {
        let store = test_store().await;
        let user_id = test_user(&store).await;
        let gateway = Arc::new(FakeGateway::streaming(vec![Fragment::text("ok")]));

        let chat = store.create_chat(user_id, "t").await.unwrap();
        for i in 0..15 {
            store.append_message(chat.id, &format!("m{i}"), i % 2 == 0).await.unwrap();
        }

        let turn = begin_turn(&store, user_id, Some(chat.id), "latest").await.unwrap();
        drain(store.clone(), gateway.clone(), turn).await;

        let seen = gateway.seen_history.lock().unwrap().clone();
        assert_eq!(seen.len(), CONTEXT_WINDOW);
        assert_eq!(seen[0].content, "m5");
        assert_eq!(seen.last().unwrap().content, "m14");
    }

    #[tokio::test]
    async fn sending_into_a_foreign_chat_is_not_found() {
        let store = test_store().await;
        let owner = test_user(&store).await;
        let intruder = store
            .create_user(crate::entities::user::NewUser {
                username: "mallory".into(),
                email: "mallory@example.com".into(),
                password_hash: None,
                display_name: None,
            })
            .await
            .unwrap()
            .id;
        let chat = store.create_chat(owner, "private").await.unwrap();

        let err = begin_turn(&store, intruder, Some(chat.id), "hi").await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn disconnect_mid_stream_still_commits_produced_text() {
        let store = test_store().await;
        let user_id = test_user(&store).await;
        let gateway = Arc::new(FakeGateway::streaming(vec![
            Fragment::text("A"),
            Fragment::text("B"),
        ]));

        let turn = begin_turn(&store, user_id, None, "hello").await.unwrap();
        let chat_id = turn.chat_id;
        let (tx, mut rx) = mpsc::channel(1);
        let producer = tokio::spawn(run_stream(store.clone(), gateway, turn, tx));

        // Take the start event and the first chunk, then hang up.
        assert_eq!(rx.recv().await, Some(StreamEvent::Start { chat_id }));
        assert_eq!(rx.recv().await, Some(StreamEvent::Chunk { content: "A".into() }));
        drop(rx);
        producer.await.unwrap();

        let messages = store.list_messages(chat_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "AB");
    }

    // ── Retry/edit ────────────────────────────────────────────────────────────

    async fn seeded_chat(store: &SqliteStore, user_id: i64, pairs: &[(&str, &str)]) -> i64 {
        let chat = store.create_chat(user_id, "seeded").await.unwrap();
        for (user_msg, assistant_msg) in pairs {
            store.append_message(chat.id, user_msg, true).await.unwrap();
            store.append_message(chat.id, assistant_msg, false).await.unwrap();
        }
        chat.id
    }

    #[tokio::test]
    async fn retry_truncates_after_anchor_and_appends_fresh_reply() {
        let store = test_store().await;
        let user_id = test_user(&store).await;
        let chat_id =
            seeded_chat(&store, user_id, &[("u1", "a1"), ("u2", "a2"), ("u3", "a3")]).await;
        let gateway = FakeGateway::complete("fresh answer");

        let assistant = retry_from_anchor(&store, &gateway, user_id, chat_id, "u2", true)
            .await
            .unwrap();
        assert_eq!(assistant.content, "fresh answer");
        assert!(!assistant.is_user);

        let contents: Vec<_> = store
            .list_messages(chat_id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["u1", "a1", "u2", "fresh answer"]);

        // Context handed to the model stops strictly before the anchor.
        let seen = gateway.seen_history.lock().unwrap().clone();
        let seen_contents: Vec<_> = seen.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(seen_contents, vec!["u1", "a1"]);
    }

    #[tokio::test]
    async fn retry_matches_the_most_recent_duplicate_anchor() {
        let store = test_store().await;
        let user_id = test_user(&store).await;
        let chat_id =
            seeded_chat(&store, user_id, &[("same", "first reply"), ("same", "second reply")])
                .await;
        let gateway = FakeGateway::complete("third reply");

        retry_from_anchor(&store, &gateway, user_id, chat_id, "same", true)
            .await
            .unwrap();

        let contents: Vec<_> = store
            .list_messages(chat_id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        // The later "same" is the anchor; the earlier pair survives intact.
        assert_eq!(contents, vec!["same", "first reply", "same", "third reply"]);
    }

    #[tokio::test]
    async fn retry_without_truncate_keeps_later_messages() {
        let store = test_store().await;
        let user_id = test_user(&store).await;
        let chat_id = seeded_chat(&store, user_id, &[("u1", "a1"), ("u2", "a2")]).await;
        let gateway = FakeGateway::complete("redo");

        retry_from_anchor(&store, &gateway, user_id, chat_id, "u1", false)
            .await
            .unwrap();

        let contents: Vec<_> = store
            .list_messages(chat_id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["u1", "a1", "u2", "a2", "redo"]);
    }

    #[tokio::test]
    async fn retrying_in_a_foreign_chat_is_not_found_and_changes_nothing() {
        let store = test_store().await;
        let owner = test_user(&store).await;
        let chat_id = seeded_chat(&store, owner, &[("u1", "a1")]).await;
        let intruder = store
            .create_user(crate::entities::user::NewUser {
                username: "mallory".into(),
                email: "mallory@example.com".into(),
                password_hash: None,
                display_name: None,
            })
            .await
            .unwrap()
            .id;
        let gateway = FakeGateway::complete("unused");

        let err = retry_from_anchor(&store, &gateway, intruder, chat_id, "u1", true)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));

        let contents: Vec<_> = store
            .list_messages(chat_id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["u1", "a1"]);
    }

    #[tokio::test]
    async fn retry_with_unknown_anchor_is_not_found() {
        let store = test_store().await;
        let user_id = test_user(&store).await;
        let chat_id = seeded_chat(&store, user_id, &[("u1", "a1")]).await;
        let gateway = FakeGateway::complete("unused");

        let err = retry_from_anchor(&store, &gateway, user_id, chat_id, "never sent", true)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));

        // Assistant replies are never anchors.
        let err = retry_from_anchor(&store, &gateway, user_id, chat_id, "a1", true)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }
}
