use std::fmt;

use serde::{Deserialize, Serialize};

/// Platform message identifier. Monotonically increasing within one channel.
pub type MessageId = i64;

/// Platform-assigned album token shared by every message of one logical post.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe form: every char outside `[0-9A-Za-z_-]` becomes `_`.
    pub fn sanitized(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for GroupId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Media attached to a message, as described by the source platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaDescriptor {
    Photo {
        file_ref: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_size: Option<u64>,
    },
    Document {
        file_ref: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_size: Option<u64>,
    },
}

impl MediaDescriptor {
    /// Opaque handle the platform resolves into a byte stream.
    pub fn file_ref(&self) -> &str {
        match self {
            Self::Photo { file_ref, .. } | Self::Document { file_ref, .. } => file_ref,
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Self::Photo { .. } => None,
            Self::Document { mime_type, .. } => mime_type.as_deref(),
        }
    }

    /// Name to give the materialised file when the platform offers none.
    pub fn file_name_or(&self, fallback: impl FnOnce() -> String) -> String {
        match self {
            Self::Document {
                file_name: Some(name),
                ..
            } if !name.is_empty() => name.clone(),
            _ => fallback(),
        }
    }
}

/// A message as read from the source channel. Read-only for the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Unix seconds. Zero when the platform did not report one.
    #[serde(default)]
    pub date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
}

impl Message {
    /// Caption text, empty when absent.
    pub fn caption_text(&self) -> &str {
        self.caption.as_deref().unwrap_or_default()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("13512345678901234", "13512345678901234")]
    #[case("a/b\\c", "a_b_c")]
    #[case("../etc", "___etc")]
    #[case("group-1_x", "group-1_x")]
    fn sanitized_group_id(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(GroupId::new(raw).sanitized(), expected);
    }

    #[test]
    fn message_deserializes_with_defaults() {
        let msg: Message = serde_json::from_str(
            r#"{"id": 42, "media": {"type": "document", "file_ref": "abc", "mime_type": "image/png"}}"#,
        )
        .unwrap();
        assert_eq!(msg.id, 42);
        assert_eq!(msg.date, 0);
        assert_eq!(msg.caption_text(), "");
        assert!(msg.group_id.is_none());
        assert_eq!(msg.media.unwrap().mime_type(), Some("image/png"));
    }

    #[test]
    fn document_file_name_falls_back() {
        let doc = MediaDescriptor::Document {
            file_ref: "x".into(),
            mime_type: None,
            file_name: Some(String::new()),
            file_size: None,
        };
        assert_eq!(doc.file_name_or(|| "7.jpg".into()), "7.jpg");

        let named = MediaDescriptor::Document {
            file_ref: "x".into(),
            mime_type: None,
            file_name: Some("cat.webp".into()),
            file_size: None,
        };
        assert_eq!(named.file_name_or(|| "7.jpg".into()), "cat.webp");
    }
}
