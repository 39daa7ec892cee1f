use std::time::Duration;

use {
    albumrelay_common::{
        Result as CommonResult,
        sink::{MAX_UNIT_FILES, RelaySink, UnitFile},
    },
    async_trait::async_trait,
    reqwest::multipart::{Form, Part},
    secrecy::{ExposeSecret, Secret},
    tracing::debug,
};

use crate::error::{Error, Result};

/// Characters of the response body kept in an error.
const ERROR_BODY_LIMIT: usize = 512;

/// Posts relay units to a Discord webhook.
///
/// The request carries a `payload_json` field with the caption note and one
/// `file<i>` part per image, in unit order.
pub struct DiscordWebhook {
    client: reqwest::Client,
    url: Secret<String>,
    caption_prefix: String,
}

impl std::fmt::Debug for DiscordWebhook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordWebhook")
            .field("url", &"[REDACTED]")
            .field("caption_prefix", &self.caption_prefix)
            .finish()
    }
}

impl DiscordWebhook {
    pub fn new(url: Secret<String>, caption_prefix: impl Into<String>, timeout: Duration) -> Result<Self> {
        if url.expose_secret().trim().is_empty() {
            return Err(Error::Message("discord webhook url is empty".into()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            caption_prefix: caption_prefix.into(),
        })
    }

    /// Message content for a caption; `None` leaves the post without text.
    /// The caption is passed through verbatim.
    pub fn render_content(&self, caption: &str) -> Option<String> {
        (!caption.is_empty()).then(|| format!("{}{caption}", self.caption_prefix))
    }

    async fn build_form(&self, files: &[UnitFile], caption: &str) -> Result<Form> {
        let payload = serde_json::json!({ "content": self.render_content(caption) });
        let mut form = Form::new().text("payload_json", payload.to_string());
        for (i, file) in files.iter().enumerate() {
            let bytes = tokio::fs::read(&file.path).await?;
            let part = Part::bytes(bytes).file_name(file.file_name.clone());
            form = form.part(format!("file{i}"), part);
        }
        Ok(form)
    }

    pub async fn send(&self, files: &[UnitFile], caption: &str) -> Result<()> {
        if files.is_empty() || files.len() > MAX_UNIT_FILES {
            return Err(Error::Message(format!(
                "a unit carries 1 to {MAX_UNIT_FILES} files, got {}",
                files.len()
            )));
        }
        let form = self.build_form(files, caption).await?;
        let response = self
            .client
            .post(self.url.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;

        let status = response.status();
        if !status.is_success() {
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(ERROR_BODY_LIMIT)
                .collect();
            return Err(Error::Status { status, body });
        }
        debug!(files = files.len(), status = status.as_u16(), "webhook accepted unit");
        Ok(())
    }
}

#[async_trait]
impl RelaySink for DiscordWebhook {
    async fn send_unit(&self, files: &[UnitFile], caption: &str) -> CommonResult<()> {
        Ok(self.send(files, caption).await?)
    }
}
