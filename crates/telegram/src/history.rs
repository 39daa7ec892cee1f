//! Channel history over an HTTP history bridge.
//!
//! Reading a channel's past messages needs a user session, which the Bot API
//! cannot provide. A bridge service holding that session exposes:
//!
//! - `GET /history?peer=<channel>&min_id=<id>&limit=<n>` → `{"messages": [...]}`
//! - `GET /history?peer=<channel>&offset_id=<id>&limit=<n>` → newest first
//! - `GET /media?peer=<channel>&id=<message id>` → raw bytes
//!
//! Messages use the shared [`Message`] JSON shape.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use {
    albumrelay_common::{
        Result as CommonResult,
        source::MessageSource,
        types::{Message, MessageId},
    },
    async_trait::async_trait,
    serde::Deserialize,
    tracing::debug,
    url::Url,
};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct HistoryPage {
    #[serde(default)]
    messages: Vec<Message>,
}

pub struct HistoryBridgeSource {
    client: reqwest::Client,
    base: Url,
    peer: String,
}

impl HistoryBridgeSource {
    pub fn new(base: &str, peer: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base,
            peer: peer.into(),
        })
    }

    fn endpoint(&self, name: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::message("history bridge url cannot be a base"))?
            .pop_if_empty()
            .push(name);
        Ok(url)
    }

    async fn history(&self, cursor: (&str, MessageId), limit: usize) -> Result<Vec<Message>> {
        let response = self
            .client
            .get(self.endpoint("history")?)
            .query(&[
                ("peer", self.peer.clone()),
                (cursor.0, cursor.1.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Status {
                endpoint: "history",
                status: response.status(),
            });
        }
        let page: HistoryPage = response.json().await?;
        debug!(
            peer = %self.peer,
            cursor = cursor.0,
            at = cursor.1,
            count = page.messages.len(),
            "history page"
        );
        Ok(page.messages)
    }

    async fn media(&self, message: &Message, dest_dir: &Path) -> Result<PathBuf> {
        let response = self
            .client
            .get(self.endpoint("media")?)
            .query(&[("peer", self.peer.clone()), ("id", message.id.to_string())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Status {
                endpoint: "media",
                status: response.status(),
            });
        }
        let bytes = response.bytes().await?;

        let name = message
            .media
            .as_ref()
            .map(|m| m.file_name_or(|| format!("{}.jpg", message.id)))
            .unwrap_or_else(|| format!("{}.jpg", message.id));
        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(format!("{}_{}", message.id, sanitize_file_name(&name)));
        tokio::fs::write(&path, &bytes).await?;
        Ok(path)
    }
}

/// Keep a platform-supplied name from escaping the destination directory.
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "file".into()
    } else {
        cleaned
    }
}

#[async_trait]
impl MessageSource for HistoryBridgeSource {
    async fn fetch_after(&self, min_id: MessageId, limit: usize) -> CommonResult<Vec<Message>> {
        Ok(self.history(("min_id", min_id), limit).await?)
    }

    async fn fetch_before(&self, offset_id: MessageId, limit: usize) -> CommonResult<Vec<Message>> {
        Ok(self.history(("offset_id", offset_id), limit).await?)
    }

    async fn download(&self, message: &Message, dest_dir: &Path) -> CommonResult<PathBuf> {
        Ok(self.media(message, dest_dir).await?)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        albumrelay_common::types::{GroupId, MediaDescriptor},
        mockito::Matcher,
        rstest::rstest,
    };

    fn source(server: &mockito::Server) -> HistoryBridgeSource {
        HistoryBridgeSource::new(&server.url(), "@example", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn fetch_after_sends_floor_and_parses_messages() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/history")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("peer".into(), "@example".into()),
                Matcher::UrlEncoded("min_id".into(), "41".into()),
                Matcher::UrlEncoded("limit".into(), "100".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "messages": [
                        {"id": 43, "date": 1700000043, "group_id": "g1",
                         "media": {"type": "photo", "file_ref": "p43"}},
                        {"id": 42, "date": 1700000042, "caption": "hello"}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let messages = source(&server).fetch_after(41, 100).await.unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].group_id, Some(GroupId::from("g1")));
        assert_eq!(messages[1].caption_text(), "hello");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_before_uses_offset() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/history")
            .match_query(Matcher::UrlEncoded("offset_id".into(), "0".into()))
            .with_status(200)
            .with_body(r#"{"messages": []}"#)
            .create_async()
            .await;

        assert!(source(&server).fetch_before(0, 50).await.unwrap().is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn bridge_error_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/history")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let err = source(&server).fetch_after(0, 10).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn download_writes_into_destination() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/media")
            .match_query(Matcher::UrlEncoded("id".into(), "7".into()))
            .with_status(200)
            .with_body("png-bytes")
            .create_async()
            .await;
        let tmp = tempfile::tempdir().unwrap();
        let message = Message {
            id: 7,
            date: 0,
            caption: None,
            media: Some(MediaDescriptor::Document {
                file_ref: "d7".into(),
                mime_type: Some("image/png".into()),
                file_name: Some("../scan.png".into()),
                file_size: None,
            }),
            group_id: None,
        };

        let path = source(&server).download(&message, tmp.path()).await.unwrap();

        assert_eq!(path, tmp.path().join("7_.._scan.png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"png-bytes");
    }

    #[rstest]
    #[case("cat.jpg", "cat.jpg")]
    #[case("a/b.jpg", "a_b.jpg")]
    #[case("..", "file")]
    fn file_names_are_confined(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize_file_name(raw), expected);
    }
}
