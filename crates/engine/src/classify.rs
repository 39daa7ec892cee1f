use albumrelay_common::types::{MediaDescriptor, Message};

/// Whether a message carries relayable image media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Image,
    NotImage,
}

/// A photo always qualifies; a document only when its declared MIME type is
/// `image/*`.
#[must_use]
pub fn classify(message: &Message) -> Classification {
    match &message.media {
        Some(MediaDescriptor::Photo { .. }) => Classification::Image,
        Some(MediaDescriptor::Document {
            mime_type: Some(mime),
            ..
        }) if is_image_mime(mime) => Classification::Image,
        _ => Classification::NotImage,
    }
}

fn is_image_mime(mime: &str) -> bool {
    mime.trim()
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
}
