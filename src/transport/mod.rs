mod grammers_feed;
mod teloxide_send;

pub use grammers_feed::GrammersSourceFeed;
pub use teloxide_send::TeloxideSendApi;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Entity, MediaType};

/// A single ingested change on a source chat, the unit `Dispatcher`
/// consumes from a `SourceFeed`.
///
/// Grounded on `original_source/bot_manager.py`'s three event handlers
/// (`_handle_new_message`, `_handle_message_edited`,
/// `_handle_message_deleted`).
#[derive(Debug, Clone)]
pub enum SourceEvent {
    NewMessage {
        chat_id: i64,
        message_id: i64,
        text: String,
        entities: Vec<Entity>,
        media_type: Option<MediaType>,
        is_reply: bool,
        reply_to_msg_id: Option<i64>,
    },
    MessageEdited {
        chat_id: i64,
        message_id: i64,
        text: String,
        entities: Vec<Entity>,
        media_type: Option<MediaType>,
    },
    MessagesDeleted {
        chat_id: i64,
        message_ids: Vec<i64>,
    },
}

/// Source of ingested chat events. Object-safe so the worker/dispatcher
/// can be tested against an in-memory fake instead of a live Telegram
/// user session.
///
/// Grounded on `Klok-e-telegram-llm-rewriter/src/telegram.rs`'s update
/// stream loop.
#[async_trait]
pub trait SourceFeed: Send {
    async fn next_event(&mut self) -> anyhow::Result<SourceEvent>;
}

/// Classified failure from a `BotSendAPI` call, the taxonomy the
/// `WorkerPool`'s retry/terminal/swallow switch interprets.
///
/// Grounded on `original_source/message_processor.py`'s `_send_message`
/// error handling (flood wait, forbidden, bad request, not-modified) and
/// the teacher's `telegram::retry_handler`'s classification of
/// `teloxide::RequestError`.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("flood wait: retry after {0}s")]
    FloodWait(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("bot forbidden from this chat")]
    Forbidden,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("no destination message mapping found")]
    MappingNotFound,

    #[error("message not modified")]
    MessageNotModified,

    #[error("other: {0}")]
    Other(String),
}

impl SendError {
    /// Whether the `WorkerPool` should retry this send after a backoff,
    /// as opposed to treating it as terminal or silently swallowing it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::Network(_) | SendError::Timeout)
    }

    /// Failures the worker logs and moves on from without retrying or
    /// counting as a hard failure — the destination state already
    /// matches what the caller wanted.
    pub fn is_benign(&self) -> bool {
        matches!(self, SendError::MessageNotModified | SendError::MappingNotFound)
    }
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message_id: i64,
}

/// Outbound send/edit/delete surface, backed by one bot identity.
///
/// Grounded on the teacher's `telegram::bot` (teloxide `Bot` usage) and
/// `message_processor.py`'s `_send_message` dispatch-by-media-type.
/// Object-safe so tests can run against a scriptable fake.
#[async_trait]
pub trait BotSendAPI: Send + Sync {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        entities: &[Entity],
        reply_to_message_id: Option<i64>,
    ) -> Result<SentMessage, SendError>;

    async fn send_media(
        &self,
        chat_id: i64,
        media_type: MediaType,
        media_bytes: &[u8],
        caption: &str,
        entities: &[Entity],
        reply_to_message_id: Option<i64>,
    ) -> Result<SentMessage, SendError>;

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        entities: &[Entity],
    ) -> Result<(), SendError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), SendError>;

    async fn get_me(&self) -> Result<String, SendError>;
}
