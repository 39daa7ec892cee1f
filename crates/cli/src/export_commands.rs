use std::{path::PathBuf, time::Duration};

use {
    albumrelay_config::{Mode, RelayConfig},
    albumrelay_discord::DiscordWebhook,
    albumrelay_engine::{CheckpointStore, ExportOptions, Exporter},
    albumrelay_telegram::HistoryBridgeSource,
    chrono::{DateTime, NaiveDate},
    clap::Args,
    tokio_util::sync::CancellationToken,
};

#[derive(Args)]
pub struct ExportArgs {
    /// Channel to export, e.g. `@example` (overrides config value).
    #[arg(long)]
    pub channel: Option<String>,

    /// Only relay messages from this moment on: unix seconds, RFC 3339, or YYYY-MM-DD.
    #[arg(long, value_parser = parse_since)]
    pub since: Option<i64>,

    /// Stop after this many relay units (0 = no limit).
    #[arg(long, default_value_t = 0)]
    pub limit: usize,

    /// Resume after this message identifier instead of the checkpoint.
    #[arg(long)]
    pub start_id: Option<i64>,

    /// Checkpoint file (overrides `<data_dir>/checkpoint.txt`).
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
}

pub async fn handle_export(
    mut config: RelayConfig,
    args: ExportArgs,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    if let Some(channel) = args.channel {
        config.telegram.channel = Some(channel);
    }
    if let Some(path) = args.checkpoint {
        config.storage.checkpoint_path = Some(path);
    }
    config.validate_for(Mode::Export)?;
    let config = config;

    let timeout = Duration::from_secs(config.discord.timeout_secs);
    let source = HistoryBridgeSource::new(
        config.telegram.history_url.as_deref().unwrap_or_default(),
        config.telegram.channel.clone().unwrap_or_default(),
        timeout,
    )?;
    let sink = DiscordWebhook::new(
        config.discord.webhook_url.clone(),
        config.discord.caption_prefix.clone(),
        timeout,
    )?;
    let checkpoint = CheckpointStore::new(config.storage.checkpoint_path());

    let opts = ExportOptions {
        since: args.since,
        unit_limit: args.limit,
        start_id: args.start_id,
    };
    let summary = Exporter::new(&config, &source, &sink, &checkpoint, cancel)
        .run(&opts)
        .await?;

    println!(
        "Stopped ({}): {} units sent, {} failed, {} files, {} messages skipped. Checkpoint: {}",
        summary.stop,
        summary.units_sent,
        summary.units_failed,
        summary.files_sent,
        summary.skipped,
        summary.last_checkpoint,
    );
    Ok(())
}

/// Parse `--since` as unix seconds, an RFC 3339 timestamp, or a UTC date.
fn parse_since(raw: &str) -> Result<i64, String> {
    let raw = raw.trim();
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.parse::<i64>().map_err(|e| e.to_string());
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.timestamp());
    }
    if let Some(midnight) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc().timestamp());
    }
    Err(format!(
        "invalid --since '{raw}': expected unix seconds, RFC 3339, or YYYY-MM-DD"
    ))
}
