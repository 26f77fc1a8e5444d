use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::MediaType;

/// Records which destination message a source message was replicated to,
/// so later edits/deletes on the source can be propagated.
///
/// `(source_message_id, pair_id)` is the uniqueness invariant the
/// `MappingStore` trait enforces on insert — grounded on
/// `message_processor.py`'s `MessageMapping` construction in
/// `process_new_message`, which keys lookups the same way. The reply and
/// bot-index fields are carried so a reply chain can be reconstructed on
/// the destination side and so health/metrics can attribute a copy to
/// the bot identity that performed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMapping {
    pub pair_id: i64,
    pub source_message_id: i64,
    pub dest_message_id: i64,
    pub source_chat_id: i64,
    pub dest_chat_id: i64,
    pub bot_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    pub is_reply: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_source_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_dest_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl MessageMapping {
    /// Minimal constructor for the common case of a plain-text copy with
    /// no reply thread; callers that need the fuller shape build the
    /// struct directly or use [`MessageMapping::with_reply`].
    pub fn new(pair_id: i64, source_message_id: i64, dest_message_id: i64) -> Self {
        Self {
            pair_id,
            source_message_id,
            dest_message_id,
            source_chat_id: 0,
            dest_chat_id: 0,
            bot_index: 0,
            media_type: None,
            is_reply: false,
            reply_to_source_id: None,
            reply_to_dest_id: None,
            created_at: Utc::now(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_reply(
        pair_id: i64,
        source_message_id: i64,
        dest_message_id: i64,
        source_chat_id: i64,
        dest_chat_id: i64,
        bot_index: usize,
        media_type: Option<MediaType>,
        reply_to_source_id: Option<i64>,
        reply_to_dest_id: Option<i64>,
    ) -> Self {
        Self {
            pair_id,
            source_message_id,
            dest_message_id,
            source_chat_id,
            dest_chat_id,
            bot_index,
            media_type,
            is_reply: reply_to_source_id.is_some(),
            reply_to_source_id,
            reply_to_dest_id,
            created_at: Utc::now(),
        }
    }
}
