//! JS8 recorder utility

use std::time::Duration;

use js8_recorder::{
    config::AppConfig,
    errors::RecorderError,
    models::{ClientEvent, DisconnectReason},
    session::Session,
};
use tokio::signal;
use tracing::{error, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), RecorderError> {
    #[cfg(feature = "dotenvy")]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load configuration, preferring environment variables and config files
    let config = AppConfig::load()?;
    config.client.validate()?;

    let mut session = Session::open(config).await?;
    info!(
        "Database holds {} messages and {} grids",
        session.store().count_messages().await?,
        session.store().list_mappings().await?.len()
    );

    tokio::select! {
        result = run_recorder(&mut session) => {
            info!("JS8 recorder completed: {:?}", result);
        }
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    session.close().await
}

/// Record until the user interrupts, reconnecting after connection loss
async fn run_recorder(session: &mut Session) -> Result<(), RecorderError> {
    loop {
        let mut events = match session.start().await {
            Ok(events) => events,
            Err(e) => {
                error!("Could not start recording: {}", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Message(message) => {
                    let grid = session.lookup_grid(&message.sender).await;
                    info!(
                        "{} -> {} [{}] snr={:?} their_snr={:?}: {}",
                        message.sender,
                        message.recipient,
                        grid.as_ref().map_or("no grid", |g| g.as_str()),
                        message.snr,
                        message.their_snr,
                        message.text
                    );
                }
                ClientEvent::Mapping(mapping) => {
                    let (lat, lon) = mapping.grid.center();
                    info!(
                        "{} located in {} ({:.2}, {:.2})",
                        mapping.callsign, mapping.grid, lat, lon
                    );
                }
                ClientEvent::Disconnected(DisconnectReason::Stopped) => return Ok(()),
                ClientEvent::Disconnected(reason) => {
                    warn!("Disconnected from JS8Call: {}", reason);
                    break;
                }
            }
        }

        session.stop().await?;
        info!(
            "Reconnecting to {} in {:?}",
            session.config().client.address(),
            RECONNECT_DELAY
        );
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}
