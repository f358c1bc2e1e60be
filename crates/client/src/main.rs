use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};

use farmtrack_client::api::FarmTrackApi;
use farmtrack_client::auth::FileTokenStore;
use farmtrack_client::config::Config;
use farmtrack_client::logging::init_logging;
use farmtrack_client::rest::RestClient;
use farmtrack_client::session::{SessionContext, SessionStatus};
use farmtrack_client::tracker::{spawn_tracker, TrackerEvent, TrackerSettings};
use farmtrack_client::transport::HttpTransport;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load()?;
    init_logging(&config.logging);

    info!("Starting FarmTrack client v{}", env!("CARGO_PKG_VERSION"));

    // Optional deep link: `farmtrack <device_id>`
    let deep_link = std::env::args().nth(1);

    let transport = HttpTransport::new(
        &config.api.base_url,
        config.request_timeout(),
        config.connect_timeout(),
    )?;
    let store = Arc::new(FileTokenStore::new(config.auth.storage_path.clone()));
    let session = Arc::new(SessionContext::new(store, config.auth.leeway_secs));
    let rest = RestClient::new(Arc::new(transport), Arc::clone(&session));

    if session.init().await? != SessionStatus::Active {
        let (Some(username), Some(password)) = (&config.auth.username, &config.auth.password)
        else {
            bail!("No stored session; set FT__AUTH__USERNAME and FT__AUTH__PASSWORD to log in");
        };
        rest.login(username, password)
            .await
            .context("Login failed")?;
    }

    let (tracker, mut events, task) =
        spawn_tracker(FarmTrackApi::new(rest), TrackerSettings::from(&config));
    let generation = tracker.mount(deep_link).await?;
    info!(generation, "Tracking started, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Some(TrackerEvent::SessionExpired) => {
                    error!("Session expired, log in again");
                    break;
                }
                Some(TrackerEvent::ConnectivityDegraded { failures }) => {
                    warn!(failures, "Backend unreachable, showing last known positions");
                }
                Some(TrackerEvent::AlertRaised(alert)) => {
                    warn!(device_id = %alert.device_id, alert_type = %alert.alert_type, "{}", alert.message);
                }
                Some(TrackerEvent::Notification(notification)) => {
                    info!(level = ?notification.level, "{}", notification.message);
                }
                Some(TrackerEvent::DevicesUpdated(devices)) => {
                    info!(devices = devices.len(), "Positions updated");
                }
                Some(other) => info!(event = ?other, "Tracker event"),
                None => break,
            }
        }
    }

    tracker.shutdown().await;
    if let Err(e) = task.await {
        warn!("Tracker task ended abnormally: {}", e);
    }
    session.teardown().await?;
    info!("FarmTrack client stopped");

    Ok(())
}
