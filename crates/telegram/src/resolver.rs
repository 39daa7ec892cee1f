use std::time::Duration;

use {
    albumrelay_common::{
        Result as CommonResult,
        source::{FileResolver, ResolvedFile},
    },
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    teloxide::{Bot, prelude::Requester},
    tracing::debug,
    url::Url,
};

use crate::error::{Error, Result};

/// Two-step Bot API retrieval: `getFile` for the path, then a plain GET on
/// `<api>/file/bot<token>/<path>`.
pub struct BotFileResolver {
    bot: Bot,
    client: reqwest::Client,
    api_url: Url,
    token: Secret<String>,
}

impl BotFileResolver {
    pub fn new(token: Secret<String>, api_url: &str, timeout: Duration) -> Result<Self> {
        let api_url = Url::parse(api_url.trim_end_matches('/'))?;
        let bot = Bot::new(token.expose_secret()).set_api_url(api_url.clone());
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            bot,
            client,
            api_url,
            token,
        })
    }

    async fn file_path(&self, file_ref: &str) -> Result<String> {
        let file = self.bot.get_file(file_ref).await?;
        if file.path.is_empty() {
            return Err(Error::message(format!("getFile returned no path for {file_ref}")));
        }
        Ok(file.path)
    }

    async fn download(&self, file_path: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/file/bot{}/{}",
            self.api_url.as_str().trim_end_matches('/'),
            self.token.expose_secret(),
            file_path
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;
        if !response.status().is_success() {
            return Err(Error::Status {
                endpoint: "file download",
                status: response.status(),
            });
        }
        let bytes = response.bytes().await.map_err(reqwest::Error::without_url)?;
        debug!(file_path, bytes = bytes.len(), "downloaded telegram file");
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl FileResolver for BotFileResolver {
    async fn resolve(&self, file_ref: &str) -> CommonResult<ResolvedFile> {
        let file_path = self.file_path(file_ref).await?;
        Ok(ResolvedFile { file_path })
    }

    async fn fetch(&self, file: &ResolvedFile) -> CommonResult<Vec<u8>> {
        Ok(self.download(&file.file_path).await?)
    }
}
