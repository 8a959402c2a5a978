use anyhow::{Context, Result};
use axum::http::Method;
use pagerduty_relay::app::{AppState, router};
use pagerduty_relay::chat::{ChatPlatform, MattermostChat};
use pagerduty_relay::client::PagerDutyClient;
use pagerduty_relay::config::{Config, ConfigHandle};
use pagerduty_relay::metrics::Metrics;
use pagerduty_relay::store::{NotificationStore, RedbKvStore};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();

    let config = Config::from_env().context("load relay config")?;
    let timeout = Duration::from_secs(config.pagerduty_http_timeout_seconds);

    let kv = RedbKvStore::open(Path::new(&config.store_path)).context("open notification store")?;
    let store = NotificationStore::new(Arc::new(kv));

    let incidents = PagerDutyClient::new(&config.pagerduty_api_url, &config.pagerduty_api_key, timeout)
        .context("initialize pagerduty client")?;
    let chat = MattermostChat::new(&config.mattermost_url, &config.mattermost_bot_token, timeout)
        .context("initialize mattermost client")?;

    let channel_id = chat
        .resolve_channel(&config.mattermost_channel)
        .await
        .with_context(|| format!("resolve mattermost channel {}", config.mattermost_channel))?;
    info!(
        channel = %config.mattermost_channel,
        channel_id = %channel_id,
        "resolved notification channel"
    );

    let bind_addr = config.bind_addr.clone();
    let mut governor_builder = GovernorConfigBuilder::default().key_extractor(SmartIpKeyExtractor);
    governor_builder
        .per_millisecond(ip_refill_period_ms(config.ip_limit_per_minute))
        .burst_size(config.ip_limit_per_minute.max(1))
        .methods(vec![Method::POST]);
    let governor_config = Arc::new(
        governor_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("build governor config"))?,
    );
    let handle = ConfigHandle::new(config);

    #[cfg(unix)]
    spawn_reload_on_sighup(handle.clone()).context("install config reload handler")?;

    let state = Arc::new(AppState::new(
        handle,
        channel_id,
        Arc::new(incidents),
        Arc::new(chat),
        store,
        Metrics::new().context("initialize metrics")?,
    ));

    let app = router(state).layer(GovernorLayer::new(governor_config));

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr}"))?;

    info!(bind = %bind_addr, "pagerduty relay listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .context("serve pagerduty relay")?;

    Ok(())
}

#[cfg(unix)]
fn spawn_reload_on_sighup(handle: ConfigHandle) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    use tracing::warn;

    let mut hangups = signal(SignalKind::hangup()).context("listen for SIGHUP")?;
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            let next = match Config::from_env() {
                Ok(next) => next,
                Err(error) => {
                    warn!(error = %error, "config reload failed; keeping current configuration");
                    continue;
                }
            };

            let ignored = handle.current().restart_required_changes(&next);
            if !ignored.is_empty() {
                warn!(settings = ?ignored, "changed settings take effect after restart");
            }
            handle.replace(next);
            info!("configuration reloaded");
        }
    });
    Ok(())
}

fn ip_refill_period_ms(limit_per_minute: u32) -> u64 {
    if limit_per_minute == 0 {
        return 1;
    }

    let period = 60_000u64 / u64::from(limit_per_minute);
    period.max(1)
}

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
