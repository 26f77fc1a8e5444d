use async_trait::async_trait;

use crate::model::{FilterConfig, MediaType};

/// External collaborator that decides whether a piece of media has
/// already been forwarded, so the pipeline can skip re-downloading and
/// re-sending it.
///
/// Grounded on `original_source/message_processor.py`'s dedup hook
/// around `_process_media` (image hash lookup before download);
/// deliberately left as a trait rather than an in-crate hasher, since
/// spec.md frames content-dedup as an external collaborator (see
/// DESIGN.md's dependency notes on why `sha2`/`ring` were dropped).
#[async_trait]
pub trait ImageDedupPredicate: Send + Sync {
    async fn is_duplicate(&self, media_bytes: &[u8]) -> bool;
}

/// A dedup predicate that never considers anything a duplicate, used
/// when no external dedup collaborator is configured.
pub struct NoDedup;

#[async_trait]
impl ImageDedupPredicate for NoDedup {
    async fn is_duplicate(&self, _media_bytes: &[u8]) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct MediaAttributes {
    pub media_type: MediaType,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: u64,
}

/// The raw, pre-classification shape a `SourceFeed` observes for an
/// attached piece of media: the attribute flags `classify` inspects to
/// pick a [`MediaType`], before anything has been downloaded.
///
/// Grounded on `original_source/message_processor.py`'s `_get_media_type`,
/// which switches on Telethon's `MessageMediaPhoto` /
/// `MessageMediaDocument` types and that document's `attributes` list
/// (`DocumentAttributeAnimated`, `DocumentAttributeVideo.round_message`,
/// `DocumentAttributeAudio.voice`, `DocumentAttributeSticker`) rather
/// than MIME type alone.
#[derive(Debug, Clone, Default)]
pub struct RawMediaDescriptor {
    /// Telethon `MessageMediaPhoto` (a first-class photo, not a document).
    pub is_photo: bool,
    /// A link preview carried alongside text, not a downloadable file.
    pub is_webpage_preview: bool,
    pub mime_type: Option<String>,
    /// `DocumentAttributeAnimated`, or MIME `image/gif`.
    pub is_animated: bool,
    /// `DocumentAttributeVideo.round_message`.
    pub is_round_message: bool,
    /// `DocumentAttributeAudio.voice`.
    pub is_voice: bool,
    /// `DocumentAttributeSticker`.
    pub is_sticker: bool,
}

/// Classifies a raw media descriptor into a [`MediaType`], per spec.md
/// §4.6 step 1's fixed priority order: explicit photo, then webpage
/// preview, then animation (MIME `image/gif` or an animated attribute),
/// then MIME `image/*`, then MIME `video/*` (round-message vs. plain
/// video), then a voice-flagged audio attribute vs. MIME `audio/*`,
/// then a sticker attribute, falling back to a generic document.
pub fn classify_media_type(desc: &RawMediaDescriptor) -> MediaType {
    if desc.is_photo {
        return MediaType::Photo;
    }
    if desc.is_webpage_preview {
        return MediaType::Webpage;
    }

    let mime = desc.mime_type.as_deref().unwrap_or("").to_ascii_lowercase();

    if desc.is_animated || mime == "image/gif" {
        return MediaType::Animation;
    }
    if mime.starts_with("image/") {
        return MediaType::Photo;
    }
    if mime.starts_with("video/") {
        return if desc.is_round_message {
            MediaType::VideoNote
        } else {
            MediaType::Video
        };
    }
    if desc.is_voice {
        return MediaType::Voice;
    }
    if mime.starts_with("audio/") {
        return MediaType::Audio;
    }
    if desc.is_sticker {
        return MediaType::Sticker;
    }

    MediaType::Document
}

#[derive(Debug, Clone)]
pub enum MediaDecision {
    /// Forward as-is; `attributes` describes what will be sent.
    Forward(MediaAttributes),
    /// Skip: type not in `allowed_media_types`, or a duplicate.
    Skip(&'static str),
}

/// Classifies media, applies a pair's `allowed_media_types` gate, and
/// consults an `ImageDedupPredicate` before a message is allowed through
/// to the worker's send step.
///
/// Grounded on `message_processor.py`'s `_process_media` /
/// `_get_media_type` (fixed classification priority: photo > video >
/// document > audio > voice > sticker > animation) and `_download_media`
/// (download-with-retry before handing bytes to the bot API).
pub struct MediaPipeline<D: ImageDedupPredicate = NoDedup> {
    dedup: D,
}

impl MediaPipeline<NoDedup> {
    pub fn new() -> Self {
        Self { dedup: NoDedup }
    }
}

impl Default for MediaPipeline<NoDedup> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: ImageDedupPredicate> MediaPipeline<D> {
    pub fn with_dedup(dedup: D) -> Self {
        Self { dedup }
    }

    pub async fn evaluate(
        &self,
        filters: &FilterConfig,
        attributes: MediaAttributes,
        media_bytes: Option<&[u8]>,
    ) -> MediaDecision {
        if let Some(allowed) = &filters.allowed_media_types {
            if !allowed.contains(&attributes.media_type) {
                return MediaDecision::Skip("media type not allowed for this pair");
            }
        }

        if matches!(attributes.media_type, MediaType::Photo | MediaType::Animation) {
            if let Some(bytes) = media_bytes {
                if self.dedup.is_duplicate(bytes).await {
                    return MediaDecision::Skip("duplicate image");
                }
            }
        }

        MediaDecision::Forward(attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(media_type: MediaType) -> MediaAttributes {
        MediaAttributes {
            media_type,
            file_name: None,
            mime_type: None,
            size_bytes: 1024,
        }
    }

    #[tokio::test]
    async fn forwards_media_of_an_allowed_type() {
        let pipeline = MediaPipeline::new();
        let filters = FilterConfig {
            allowed_media_types: Some(vec![MediaType::Photo]),
            ..Default::default()
        };
        let decision = pipeline.evaluate(&filters, attrs(MediaType::Photo), None).await;
        assert!(matches!(decision, MediaDecision::Forward(_)));
    }

    #[tokio::test]
    async fn skips_media_of_a_disallowed_type() {
        let pipeline = MediaPipeline::new();
        let filters = FilterConfig {
            allowed_media_types: Some(vec![MediaType::Photo]),
            ..Default::default()
        };
        let decision = pipeline.evaluate(&filters, attrs(MediaType::Video), None).await;
        assert!(matches!(decision, MediaDecision::Skip(_)));
    }

    struct AlwaysDuplicate;

    #[async_trait]
    impl ImageDedupPredicate for AlwaysDuplicate {
        async fn is_duplicate(&self, _media_bytes: &[u8]) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn skips_duplicate_photos() {
        let pipeline = MediaPipeline::with_dedup(AlwaysDuplicate);
        let filters = FilterConfig::default();
        let decision = pipeline
            .evaluate(&filters, attrs(MediaType::Photo), Some(&[1, 2, 3]))
            .await;
        assert!(matches!(decision, MediaDecision::Skip(_)));
    }

    fn desc() -> RawMediaDescriptor {
        RawMediaDescriptor::default()
    }

    #[test]
    fn classifies_explicit_photo_before_anything_else() {
        let mut d = desc();
        d.is_photo = true;
        d.mime_type = Some("video/mp4".to_string());
        assert_eq!(classify_media_type(&d), MediaType::Photo);
    }

    #[test]
    fn classifies_webpage_preview() {
        let mut d = desc();
        d.is_webpage_preview = true;
        assert_eq!(classify_media_type(&d), MediaType::Webpage);
    }

    #[test]
    fn classifies_gif_mime_as_animation() {
        let mut d = desc();
        d.mime_type = Some("image/gif".to_string());
        assert_eq!(classify_media_type(&d), MediaType::Animation);
    }

    #[test]
    fn classifies_animated_attribute_as_animation_even_with_other_mime() {
        let mut d = desc();
        d.is_animated = true;
        d.mime_type = Some("video/mp4".to_string());
        assert_eq!(classify_media_type(&d), MediaType::Animation);
    }

    #[test]
    fn classifies_plain_image_mime_as_photo() {
        let mut d = desc();
        d.mime_type = Some("image/jpeg".to_string());
        assert_eq!(classify_media_type(&d), MediaType::Photo);
    }

    #[test]
    fn classifies_round_message_video_as_video_note() {
        let mut d = desc();
        d.mime_type = Some("video/mp4".to_string());
        d.is_round_message = true;
        assert_eq!(classify_media_type(&d), MediaType::VideoNote);
    }

    #[test]
    fn classifies_plain_video_mime_as_video() {
        let mut d = desc();
        d.mime_type = Some("video/mp4".to_string());
        assert_eq!(classify_media_type(&d), MediaType::Video);
    }

    #[test]
    fn classifies_voice_flagged_audio_as_voice_even_without_audio_mime() {
        let mut d = desc();
        d.is_voice = true;
        assert_eq!(classify_media_type(&d), MediaType::Voice);
    }

    #[test]
    fn classifies_plain_audio_mime_as_audio() {
        let mut d = desc();
        d.mime_type = Some("audio/mpeg".to_string());
        assert_eq!(classify_media_type(&d), MediaType::Audio);
    }

    #[test]
    fn classifies_sticker_attribute() {
        let mut d = desc();
        d.is_sticker = true;
        assert_eq!(classify_media_type(&d), MediaType::Sticker);
    }

    #[test]
    fn falls_back_to_document_when_nothing_matches() {
        let d = desc();
        assert_eq!(classify_media_type(&d), MediaType::Document);
    }

    #[test]
    fn falls_back_to_document_for_unrecognized_mime() {
        let mut d = desc();
        d.mime_type = Some("application/zip".to_string());
        assert_eq!(classify_media_type(&d), MediaType::Document);
    }
}
