//! Map grammers tl types to domain entities.

use crate::domain::{CaptionEntity, MediaAttrs, MessageDescriptor, MessageKind, CanonicalKey};
use grammers_client::tl;

/// Classify a message's media into the domain's tagged [`MessageKind`] union.
pub fn message_kind(msg: &tl::types::Message) -> MessageKind {
    let Some(media) = msg.media.as_ref() else {
        return MessageKind::Text;
    };
    match media {
        tl::enums::MessageMedia::Photo(_) => MessageKind::Photo,
        tl::enums::MessageMedia::Document(d) => match d.document.as_ref() {
            Some(tl::enums::Document::Document(doc)) => {
                let is_round_or_voice = doc
                    .attributes
                    .iter()
                    .any(|a| matches!(a, tl::enums::DocumentAttribute::Audio(audio) if audio.voice));
                let is_animated = doc
                    .attributes
                    .iter()
                    .any(|a| matches!(a, tl::enums::DocumentAttribute::Animated));
                let is_sticker = doc.mime_type == "application/x-tgsticker";
                if is_sticker {
                    MessageKind::Sticker
                } else if is_round_or_voice {
                    MessageKind::Voice
                } else if is_animated {
                    MessageKind::Animation
                } else if doc.mime_type.starts_with("video/") {
                    MessageKind::Video
                } else if doc.mime_type.starts_with("audio/") {
                    MessageKind::Audio
                } else {
                    MessageKind::Document
                }
            }
            _ => MessageKind::Document,
        },
        _ => MessageKind::Document,
    }
}

fn media_attrs(msg: &tl::types::Message) -> MediaAttrs {
    let Some(media) = msg.media.as_ref() else {
        return MediaAttrs::default();
    };
    match media {
        tl::enums::MessageMedia::Photo(p) => {
            let size = match &p.photo {
                Some(tl::enums::Photo::Photo(photo)) => photo
                    .sizes
                    .iter()
                    .filter_map(|s| match s {
                        tl::enums::PhotoSize::Size(sz) => Some(sz.size as u64),
                        _ => None,
                    })
                    .max(),
                _ => None,
            };
            MediaAttrs {
                size,
                ..Default::default()
            }
        }
        tl::enums::MessageMedia::Document(d) => match d.document.as_ref() {
            Some(tl::enums::Document::Document(doc)) => {
                let mut attrs = MediaAttrs {
                    size: Some(doc.size as u64),
                    mime_type: Some(doc.mime_type.clone()),
                    ..Default::default()
                };
                for a in &doc.attributes {
                    match a {
                        tl::enums::DocumentAttribute::Video(v) => {
                            attrs.width = Some(v.w as u32);
                            attrs.height = Some(v.h as u32);
                            attrs.duration = Some(v.duration as u32);
                        }
                        tl::enums::DocumentAttribute::Audio(a) => {
                            attrs.duration = Some(a.duration as u32);
                        }
                        tl::enums::DocumentAttribute::Filename(f) => {
                            attrs.file_name = Some(f.file_name.clone());
                        }
                        _ => {}
                    }
                }
                attrs
            }
            _ => MediaAttrs::default(),
        },
        _ => MediaAttrs::default(),
    }
}

fn caption_entities(msg: &tl::types::Message) -> Vec<CaptionEntity> {
    msg.entities
        .as_ref()
        .map(|entities| {
            entities
                .iter()
                .filter_map(entity_to_domain)
                .collect()
        })
        .unwrap_or_default()
}

fn entity_to_domain(entity: &tl::enums::MessageEntity) -> Option<CaptionEntity> {
    use tl::enums::MessageEntity as E;
    let (kind, offset, length) = match entity {
        E::Bold(e) => ("bold", e.offset, e.length),
        E::Italic(e) => ("italic", e.offset, e.length),
        E::Code(e) => ("code", e.offset, e.length),
        E::Pre(e) => ("pre", e.offset, e.length),
        E::TextUrl(e) => ("text_url", e.offset, e.length),
        E::Url(e) => ("url", e.offset, e.length),
        E::Mention(e) => ("mention", e.offset, e.length),
        E::Strike(e) => ("strikethrough", e.offset, e.length),
        E::Underline(e) => ("underline", e.offset, e.length),
        E::Spoiler(e) => ("spoiler", e.offset, e.length),
        _ => return None,
    };
    Some(CaptionEntity {
        kind: kind.to_string(),
        offset,
        length,
    })
}

/// Map a raw grammers message into the domain's [`MessageDescriptor`].
/// Returns `None` for service/deleted placeholder messages.
pub fn message_to_descriptor(
    msg: &tl::enums::Message,
    source: CanonicalKey,
) -> Option<MessageDescriptor> {
    match msg {
        tl::enums::Message::Empty(_) => None,
        tl::enums::Message::Service(_) => None,
        tl::enums::Message::Message(m) => {
            let album_key = m.grouped_id;
            Some(MessageDescriptor {
                source,
                message_id: m.id,
                kind: message_kind(m),
                album_key,
                caption: m.message.clone(),
                caption_entities: caption_entities(m),
                date: m.date as i64,
                attrs: media_attrs(m),
            })
        }
    }
}
