use std::{sync::Arc, time::Duration};

use {
    albumrelay_config::{Mode, RelayConfig},
    albumrelay_discord::DiscordWebhook,
    albumrelay_engine::{GroupStore, PushRelay, RelayThrottle, SharedThrottle},
    albumrelay_gateway::AppState,
    albumrelay_telegram::BotFileResolver,
    tokio_util::sync::CancellationToken,
    tracing::info,
};

fn throttle(config: &RelayConfig, cancel: CancellationToken) -> SharedThrottle {
    RelayThrottle::new(
        config.relay.max_units_per_window,
        config.relay.window(),
        cancel,
    )
    .shared()
}

fn sink(config: &RelayConfig) -> anyhow::Result<DiscordWebhook> {
    Ok(DiscordWebhook::new(
        config.discord.webhook_url.clone(),
        config.discord.caption_prefix.clone(),
        Duration::from_secs(config.discord.timeout_secs),
    )?)
}

pub async fn handle_serve(
    mut config: RelayConfig,
    bind: Option<String>,
    port: Option<u16>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config.validate_for(Mode::Serve)?;
    let config = config;

    let resolver = BotFileResolver::new(
        config.telegram.bot_token.clone(),
        &config.telegram.api_url,
        Duration::from_secs(config.discord.timeout_secs),
    )?;
    let relay = PushRelay::new(
        &config,
        Arc::new(resolver),
        Arc::new(sink(&config)?),
        throttle(&config, cancel.clone()),
    );
    let state = AppState::new(&config, Arc::new(relay));
    albumrelay_gateway::start_server(&config, state, cancel).await
}

/// One idle sweep over the push-mode group records, for cron-style hosts.
pub async fn handle_sweep(config: RelayConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    config.validate_for(Mode::Sweep)?;

    let sink = sink(&config)?;
    let groups = GroupStore::new(config.storage.groups_dir());
    let report = groups
        .sweep(
            &sink,
            &throttle(&config, cancel),
            config.relay.group_idle(),
            chrono::Utc::now().timestamp(),
        )
        .await;

    info!(?report, "sweep finished");
    println!(
        "Flushed {} groups ({} failed), {} still open, {} busy, {} corrupt removed.",
        report.flushed, report.failed, report.still_open, report.busy, report.corrupt
    );
    Ok(())
}
