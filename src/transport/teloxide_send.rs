use async_trait::async_trait;
use teloxide::payloads::*;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile, MessageEntity, MessageEntityKind, MessageId, ReplyParameters};
use teloxide::ApiError;
use teloxide::RequestError;
use tracing::debug;

use crate::model::{Entity, EntityType, MediaType};

use super::{BotSendAPI, SendError, SentMessage};

/// Converts the engine's own `Entity` list (already UTF-16-revalidated by
/// `ContentTransformer`) into teloxide's `MessageEntity` wire type.
///
/// `TextMention` is dropped rather than sent: the Bot API's `text_mention`
/// entity carries a full `User` object, not just an id, and this crate
/// only ever has the source user id to carry forward (see
/// `message_processor.py`'s `_convert_entities_for_telegram`, which has
/// the same limitation against the Bot API). Dropping a formatting span
/// we cannot faithfully reconstruct is the same policy
/// `ContentTransformer::revalidate_entities` already applies to entities
/// with missing required payload.
fn to_teloxide_entities(entities: &[Entity]) -> Vec<MessageEntity> {
    entities
        .iter()
        .filter_map(|e| {
            let kind = match e.kind {
                EntityType::Bold => MessageEntityKind::Bold,
                EntityType::Italic => MessageEntityKind::Italic,
                EntityType::Underline => MessageEntityKind::Underline,
                EntityType::Strikethrough => MessageEntityKind::Strikethrough,
                EntityType::Spoiler => MessageEntityKind::Spoiler,
                EntityType::Code => MessageEntityKind::Code,
                EntityType::Pre => MessageEntityKind::Pre {
                    language: e.language.clone(),
                },
                EntityType::Url => MessageEntityKind::Url,
                EntityType::TextLink => {
                    let url = e.url.as_deref().unwrap_or("");
                    match url.parse() {
                        Ok(url) => MessageEntityKind::TextLink { url },
                        Err(_) => {
                            debug!(url, "dropping text_link entity with an unparsable url");
                            return None;
                        }
                    }
                }
                EntityType::Mention => MessageEntityKind::Mention,
                EntityType::TextMention => {
                    debug!(user_id = e.user_id, "dropping text_mention entity: no full User available");
                    return None;
                }
                EntityType::CustomEmoji => MessageEntityKind::CustomEmoji {
                    custom_emoji_id: e.custom_emoji_id.clone()?,
                },
                EntityType::Hashtag => MessageEntityKind::Hashtag,
                EntityType::Cashtag => MessageEntityKind::Cashtag,
                EntityType::BotCommand => MessageEntityKind::BotCommand,
                EntityType::Email => MessageEntityKind::Email,
                EntityType::PhoneNumber => MessageEntityKind::PhoneNumber,
            };
            Some(MessageEntity {
                kind,
                offset: e.offset,
                length: e.length,
            })
        })
        .collect()
}

/// `BotSendAPI` adapter over a `teloxide::Bot`.
///
/// Grounded on the teacher's `telegram::bot::TelegramBot` (teloxide
/// `Bot` usage, `send_message`/`ParseMode` builder pattern) and
/// `original_source/message_processor.py`'s `_send_message`
/// (dispatch-by-media-type, degraded text-only fallback when a media
/// send comes back `BadRequest`).
pub struct TeloxideSendApi {
    bot: Bot,
}

impl TeloxideSendApi {
    pub fn new(token: String) -> Self {
        Self { bot: Bot::new(token) }
    }
}

#[async_trait]
impl BotSendAPI for TeloxideSendApi {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        entities: &[Entity],
        reply_to_message_id: Option<i64>,
    ) -> Result<SentMessage, SendError> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);
        if !entities.is_empty() {
            request = request.entities(to_teloxide_entities(entities));
        }
        if let Some(reply_id) = reply_to_message_id {
            request = request.reply_parameters(ReplyParameters::new(MessageId(reply_id as i32)));
        }
        match request.await {
            Ok(message) => Ok(SentMessage {
                message_id: message.id.0 as i64,
            }),
            // Degraded fallback: plain text with no entities, mirroring
            // `_send_message`'s "final fallback: plain text without
            // entities" branch.
            Err(RequestError::Api(ApiError::Unknown(_))) if !entities.is_empty() => {
                debug!("bad request sending text with entities, retrying without entities");
                self.send_text(chat_id, text, &[], reply_to_message_id).await
            }
            Err(err) => Err(classify_error(err)),
        }
    }

    async fn send_media(
        &self,
        chat_id: i64,
        media_type: MediaType,
        media_bytes: &[u8],
        caption: &str,
        entities: &[Entity],
        reply_to_message_id: Option<i64>,
    ) -> Result<SentMessage, SendError> {
        let file = InputFile::memory(media_bytes.to_vec());
        let reply = reply_to_message_id.map(|id| ReplyParameters::new(MessageId(id as i32)));
        let caption_entities = to_teloxide_entities(entities);
        let sent = match media_type {
            MediaType::Photo => {
                let mut r = self.bot.send_photo(ChatId(chat_id), file).caption(caption);
                if !caption_entities.is_empty() {
                    r = r.caption_entities(caption_entities.clone());
                }
                if let Some(reply) = reply.clone() {
                    r = r.reply_parameters(reply);
                }
                r.await
            }
            MediaType::Video => {
                let mut r = self.bot.send_video(ChatId(chat_id), file).caption(caption);
                if !caption_entities.is_empty() {
                    r = r.caption_entities(caption_entities.clone());
                }
                if let Some(reply) = reply.clone() {
                    r = r.reply_parameters(reply);
                }
                r.await
            }
            MediaType::VideoNote => {
                let mut r = self.bot.send_video_note(ChatId(chat_id), file);
                if let Some(reply) = reply.clone() {
                    r = r.reply_parameters(reply);
                }
                return r
                    .await
                    .map(|m| SentMessage { message_id: m.id.0 as i64 })
                    .or_else(|err| match err {
                        RequestError::Api(ApiError::Unknown(_)) => {
                            self.send_text(chat_id, caption, entities, reply_to_message_id)
                        }
                        _ => Err(classify_error(err)),
                    });
            }
            MediaType::Document => {
                let mut r = self.bot.send_document(ChatId(chat_id), file).caption(caption);
                if !caption_entities.is_empty() {
                    r = r.caption_entities(caption_entities.clone());
                }
                if let Some(reply) = reply.clone() {
                    r = r.reply_parameters(reply);
                }
                r.await
            }
            MediaType::Audio => {
                let mut r = self.bot.send_audio(ChatId(chat_id), file).caption(caption);
                if !caption_entities.is_empty() {
                    r = r.caption_entities(caption_entities.clone());
                }
                if let Some(reply) = reply.clone() {
                    r = r.reply_parameters(reply);
                }
                r.await
            }
            MediaType::Voice => {
                let mut r = self.bot.send_voice(ChatId(chat_id), file).caption(caption);
                if !caption_entities.is_empty() {
                    r = r.caption_entities(caption_entities.clone());
                }
                if let Some(reply) = reply.clone() {
                    r = r.reply_parameters(reply);
                }
                r.await
            }
            MediaType::Animation => {
                let mut r = self.bot.send_animation(ChatId(chat_id), file).caption(caption);
                if !caption_entities.is_empty() {
                    r = r.caption_entities(caption_entities.clone());
                }
                if let Some(reply) = reply.clone() {
                    r = r.reply_parameters(reply);
                }
                r.await
            }
            MediaType::Sticker => {
                let mut r = self.bot.send_sticker(ChatId(chat_id), file);
                if let Some(reply) = reply.clone() {
                    r = r.reply_parameters(reply);
                }
                r.await
            }
            MediaType::Webpage => {
                // Webpage previews have no media bytes of their own;
                // degrade to plain text the way the original falls back
                // on an unsupported media kind.
                return self.send_text(chat_id, caption, entities, reply_to_message_id).await;
            }
        };

        match sent {
            Ok(message) => Ok(SentMessage {
                message_id: message.id.0 as i64,
            }),
            // A media send rejected as a bad request degrades to a
            // text-only message rather than failing the whole item,
            // mirroring `_send_message`'s fallback path.
            Err(RequestError::Api(ApiError::Unknown(_))) => {
                self.send_text(chat_id, caption, entities, reply_to_message_id).await
            }
            Err(err) => Err(classify_error(err)),
        }
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        entities: &[Entity],
    ) -> Result<(), SendError> {
        let mut request = self
            .bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id as i32), text);
        if !entities.is_empty() {
            request = request.entities(to_teloxide_entities(entities));
        }
        request.await.map_err(classify_error)?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), SendError> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id as i32))
            .await
            .map_err(classify_error)?;
        Ok(())
    }

    async fn get_me(&self) -> Result<String, SendError> {
        let me = self.bot.get_me().await.map_err(classify_error)?;
        Ok(me.user.username.unwrap_or_else(|| me.user.first_name.clone()))
    }
}

/// Maps `teloxide::RequestError` onto the crate's own `SendError`
/// taxonomy, the same classification the teacher's retry handler
/// performs before deciding whether to back off and retry.
fn classify_error(err: RequestError) -> SendError {
    match err {
        RequestError::RetryAfter(duration) => SendError::FloodWait(duration.seconds()),
        RequestError::Network(e) => SendError::Network(e.to_string()),
        RequestError::Io(e) => SendError::Network(e.to_string()),
        RequestError::Api(ApiError::BotBlocked) | RequestError::Api(ApiError::ChatNotFound) => {
            SendError::Forbidden
        }
        RequestError::Api(ApiError::MessageNotModified) => SendError::MessageNotModified,
        RequestError::Api(ApiError::MessageToDeleteNotFound) => SendError::MappingNotFound,
        RequestError::Api(ApiError::Unknown(msg)) => SendError::BadRequest(msg),
        other => SendError::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_plain_formatting_entities_one_to_one() {
        let entities = vec![Entity::new(EntityType::Bold, 0, 5), Entity::new(EntityType::Italic, 6, 3)];
        let converted = to_teloxide_entities(&entities);
        assert_eq!(converted.len(), 2);
        assert!(matches!(converted[0].kind, MessageEntityKind::Bold));
        assert_eq!(converted[0].offset, 0);
        assert_eq!(converted[0].length, 5);
    }

    #[test]
    fn drops_text_mention_for_lack_of_a_full_user_object() {
        let mut entity = Entity::new(EntityType::TextMention, 0, 4);
        entity.user_id = Some(42);
        assert!(to_teloxide_entities(&[entity]).is_empty());
    }

    #[test]
    fn drops_custom_emoji_with_no_id_and_keeps_one_with_an_id() {
        let without_id = Entity::new(EntityType::CustomEmoji, 0, 2);
        let mut with_id = Entity::new(EntityType::CustomEmoji, 0, 2);
        with_id.custom_emoji_id = Some("123".to_string());

        assert!(to_teloxide_entities(&[without_id]).is_empty());
        let converted = to_teloxide_entities(&[with_id]);
        assert_eq!(converted.len(), 1);
    }

    #[test]
    fn carries_the_language_tag_on_pre_entities() {
        let mut entity = Entity::new(EntityType::Pre, 0, 10);
        entity.language = Some("rust".to_string());
        let converted = to_teloxide_entities(&[entity]);
        match &converted[0].kind {
            MessageEntityKind::Pre { language } => assert_eq!(language.as_deref(), Some("rust")),
            other => panic!("expected Pre, got {other:?}"),
        }
    }
}
