use serde::{Deserialize, Serialize};

/// Telegram message-entity kind, restricted to the subset
/// `ContentTransformer` actually revalidates and re-emits.
///
/// Grounded on `message_processor.py`'s `_convert_entities_for_telegram`
/// mapping table (Telethon entity class name -> Bot API entity type
/// string).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Code,
    Pre,
    TextLink,
    Mention,
    /// Destination-side `TEXT_MENTION`: a mention of a user with no
    /// `@username`, addressed by user id instead (source `MentionName`).
    TextMention,
    CustomEmoji,
    Hashtag,
    Cashtag,
    BotCommand,
    Url,
    Email,
    PhoneNumber,
    Spoiler,
}

/// A formatting span over a message's text.
///
/// `offset` and `length` are UTF-16 code-unit counts, matching the
/// Telegram Bot API's entity addressing scheme — *not* UTF-8 byte
/// offsets and *not* Rust `char` counts. `ContentTransformer` is the only
/// place these are recomputed after text is rewritten; every other
/// component treats them as opaque.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityType,
    pub offset: usize,
    pub length: usize,
    /// Present only for `EntityType::TextLink`; dropped during
    /// revalidation if empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Present only for `EntityType::Pre`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Present only for `EntityType::TextMention`; dropped during
    /// revalidation if missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    /// Present only for `EntityType::CustomEmoji`; dropped during
    /// revalidation if missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_emoji_id: Option<String>,
}

impl Default for EntityType {
    fn default() -> Self {
        EntityType::Bold
    }
}

impl Entity {
    pub fn new(kind: EntityType, offset: usize, length: usize) -> Self {
        Self {
            kind,
            offset,
            length,
            url: None,
            language: None,
            user_id: None,
            custom_emoji_id: None,
        }
    }
}

/// Coarse media classification used for `allowed_media_types` gating and
/// `BotSendAPI` dispatch-by-kind.
///
/// Grounded on `message_processor.py`'s `_get_media_type`, which
/// classifies by Telethon media class in a fixed priority order
/// (photo > video > document > audio > voice > sticker > animation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Photo,
    Video,
    VideoNote,
    Document,
    Audio,
    Voice,
    Sticker,
    Animation,
    Webpage,
}
