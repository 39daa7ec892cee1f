//! Bot API update payloads, reduced to what the relay reads.

use {
    albumrelay_common::types::{GroupId, MediaDescriptor, Message},
    serde::Deserialize,
};

use crate::error::Result;

/// One webhook delivery. Channels deliver `channel_post`; groups and private
/// chats deliver `message`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub update_id: i64,
    #[serde(default)]
    pub channel_post: Option<BotMessage>,
    #[serde(default)]
    pub message: Option<BotMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotMessage {
    pub message_id: i64,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub media_group_id: Option<String>,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
    #[serde(default)]
    pub document: Option<Document>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

impl Update {
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// The update's message, channel posts first.
    pub fn into_message(self) -> Option<Message> {
        self.channel_post.or(self.message).map(BotMessage::into_message)
    }
}

impl BotMessage {
    /// Largest photo variant by declared size. Later entries win ties, so a
    /// list without sizes picks the last (largest) variant.
    fn best_photo(&self) -> Option<&PhotoSize> {
        self.photo
            .iter()
            .max_by_key(|p| p.file_size.unwrap_or_default())
    }

    pub fn into_message(self) -> Message {
        let media = match (self.best_photo(), &self.document) {
            (Some(best), _) => Some(MediaDescriptor::Photo {
                file_ref: best.file_id.clone(),
                file_size: best.file_size,
            }),
            (None, Some(doc)) => Some(MediaDescriptor::Document {
                file_ref: doc.file_id.clone(),
                mime_type: doc.mime_type.clone(),
                file_name: doc.file_name.clone(),
                file_size: doc.file_size,
            }),
            (None, None) => None,
        };
        Message {
            id: self.message_id,
            date: self.date,
            caption: self.caption,
            media,
            group_id: self.media_group_id.map(GroupId::from),
        }
    }
}
