use regex::Regex;

use crate::model::{Entity, EntityType, FilterConfig, MessageContent};

/// Outcome of running a message through the transformer.
#[derive(Debug, Clone)]
pub enum TransformOutcome {
    /// The message survived filtering and is ready for media processing
    /// and dispatch.
    Pass(MessageContent),
    /// The message was dropped by a filter rule (length, keyword, ...).
    /// Carries the reason for the `messages_filtered` counter and debug
    /// log.
    Filtered(&'static str),
}

/// Default header-line patterns, applied when a pair configures none of
/// its own. Matches a leading "channel banner" line such as `Source:
/// ...` or a line opening with a call-to-action emoji.
const DEFAULT_HEADER_PATTERNS: &[&str] = &[r"(?m)^.*?[:｜：].*?\n", r"(?m)^.*?[➜👉📢].*?\n"];

/// Default footer-line patterns: a trailing `@username` credit, a
/// `t.me/...` link line, or a line carrying a "forward this" emoji.
const DEFAULT_FOOTER_PATTERNS: &[&str] = &[r"(?m)\n.*?@\w+.*?$", r"(?m)\n.*?t\.me/.*?$", r"(?m)\n.*?[📨📱💌].*?$"];

const TRUNCATION_SUFFIX: &str = "…";

/// Applies a pair's `FilterConfig` to a message's text and entities:
/// header/footer regex stripping, `@mention`/`tg://user?id=` removal,
/// keyword blocking, length bounds, and UTF-16-safe entity
/// revalidation.
///
/// Grounded on `original_source/message_processor.py`'s
/// `_process_message_content`, `_remove_headers`, `_remove_footers`,
/// `_remove_mentions`, and `_validate_and_convert_entities`.
pub struct ContentTransformer {
    mention_pattern: Regex,
    tg_user_mention_pattern: Regex,
    default_header_patterns: Vec<Regex>,
    default_footer_patterns: Vec<Regex>,
}

impl Default for ContentTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentTransformer {
    pub fn new() -> Self {
        Self {
            // Matches `@username`-style mentions; mirrors the original's
            // `_MENTION_RE = re.compile(r"@\w+")`.
            mention_pattern: Regex::new(r"@\w+").expect("static mention pattern is valid"),
            tg_user_mention_pattern: Regex::new(r"tg://user\?id=\d+")
                .expect("static tg:// mention pattern is valid"),
            default_header_patterns: DEFAULT_HEADER_PATTERNS
                .iter()
                .map(|p| Regex::new(p).expect("static default header pattern is valid"))
                .collect(),
            default_footer_patterns: DEFAULT_FOOTER_PATTERNS
                .iter()
                .map(|p| Regex::new(p).expect("static default footer pattern is valid"))
                .collect(),
        }
    }

    pub fn transform(&self, filters: &FilterConfig, mut content: MessageContent) -> TransformOutcome {
        if let Some(reason) = self.blocked_by_keyword(filters, &content.text) {
            return TransformOutcome::Filtered(reason);
        }

        content.text = self.strip_headers(filters, &content.text);
        content.text = self.strip_footers(filters, &content.text);

        if filters.strip_mentions {
            content.text = self.strip_mentions(&content.text, &filters.mention_placeholder);
        }

        if let Some(min) = filters.min_length {
            if min > 0 && utf16_len(&content.text) < min {
                return TransformOutcome::Filtered("below minimum length");
            }
        }

        let mut entity_bound = utf16_len(&content.text);
        if let Some(max) = filters.max_length {
            if max > 0 && utf16_len(&content.text) > max {
                entity_bound = max;
                content.text = format!("{}{}", truncate_utf16(&content.text, max), TRUNCATION_SUFFIX);
            }
        }

        content.entities = revalidate_entities(entity_bound, content.entities);

        TransformOutcome::Pass(content)
    }

    fn blocked_by_keyword(&self, filters: &FilterConfig, text: &str) -> Option<&'static str> {
        let lower = text.to_lowercase();
        for keyword in &filters.blocked_keywords {
            if lower.contains(&keyword.to_lowercase()) {
                return Some("matched a blocked keyword");
            }
        }
        None
    }

    /// Strips lines matching the pair's configured header patterns, or
    /// the built-in defaults when the pair configures none.
    fn strip_headers(&self, filters: &FilterConfig, text: &str) -> String {
        self.strip_with_patterns(&filters.header_patterns, &self.default_header_patterns, text)
    }

    fn strip_footers(&self, filters: &FilterConfig, text: &str) -> String {
        self.strip_with_patterns(&filters.footer_patterns, &self.default_footer_patterns, text)
    }

    fn strip_with_patterns(&self, configured: &[String], defaults: &[Regex], text: &str) -> String {
        let mut out = text.to_string();
        if configured.is_empty() {
            for pattern in defaults {
                out = pattern.replace_all(&out, "").to_string();
            }
        } else {
            for pattern in configured {
                if let Ok(re) = Regex::new(&format!("(?m){pattern}")) {
                    out = re.replace_all(&out, "").to_string();
                }
            }
        }
        out
    }

    fn strip_mentions(&self, text: &str, placeholder: &str) -> String {
        let text = self.mention_pattern.replace_all(text, placeholder);
        self.tg_user_mention_pattern.replace_all(&text, placeholder).to_string()
    }
}

/// Length of `s` in UTF-16 code units, matching the Telegram Bot API's
/// entity-offset addressing scheme.
fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Truncates `s` to at most `max` UTF-16 code units, respecting `char`
/// boundaries (never splits a surrogate pair).
fn truncate_utf16(s: &str, max: usize) -> String {
    let mut units = 0usize;
    let mut byte_end = s.len();
    for (idx, ch) in s.char_indices() {
        let ch_units = ch.len_utf16();
        if units + ch_units > max {
            byte_end = idx;
            break;
        }
        units += ch_units;
    }
    s[..byte_end].to_string()
}

/// Revalidates entities against a (possibly shortened) text, per
/// spec.md §4.5:
///
/// - drop any entity whose `length` is zero or whose `offset` is at or
///   past `text_length_u16`;
/// - truncate `length` down to fit when it overruns the text;
/// - drop entities whose payload is required but missing (`TextLink`
///   with no/empty `url`, `TextMention` with no `user_id`,
///   `CustomEmoji` with no `custom_emoji_id`);
/// - sort survivors by `offset` ascending.
///
/// This crate never attempts to re-derive shifted offsets for entities
/// whose underlying span was edited out from under them by header/
/// footer/mention stripping — a stripped header entity has no
/// well-defined new position, so the safe behavior is to drop it rather
/// than emit a corrupted span.
fn revalidate_entities(text_length_u16: usize, entities: Vec<Entity>) -> Vec<Entity> {
    let mut survivors: Vec<Entity> = entities
        .into_iter()
        .filter(|e| e.length > 0 && e.offset < text_length_u16)
        .filter(|e| !has_missing_required_payload(e))
        .map(|mut e| {
            let max_length = text_length_u16 - e.offset;
            if e.length > max_length {
                e.length = max_length;
            }
            e
        })
        .collect();
    survivors.sort_by_key(|e| e.offset);
    survivors
}

fn has_missing_required_payload(entity: &Entity) -> bool {
    match entity.kind {
        EntityType::TextLink => entity.url.as_deref().unwrap_or("").is_empty(),
        EntityType::TextMention => entity.user_id.is_none(),
        EntityType::CustomEmoji => entity.custom_emoji_id.is_none(),
        _ => false,
    }
}
