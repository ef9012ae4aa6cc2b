//! Recorder session
//!
//! Owns the configuration, the store and the running client. Events flow from
//! the client's read loop into an ingest task that writes them to the store
//! before forwarding them to the presentation side, which therefore never
//! performs a database write itself.

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    database::Database,
    errors::RecorderError,
    grid::Locator,
    js8::Js8Client,
    models::{Callsign, ClientEvent},
};

pub struct Session {
    config: AppConfig,
    store: Database,
    client: Option<Js8Client>,
    ingest: Option<JoinHandle<()>>,
}

impl Session {
    /// Open the store; the client is not connected until [`Session::start`]
    pub async fn open(config: AppConfig) -> Result<Self, RecorderError> {
        let store = Database::open(&config.database).await?;
        Ok(Self {
            config,
            store,
            client: None,
            ingest: None,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Read access to the store for queries
    pub fn store(&self) -> &Database {
        &self.store
    }

    /// Connect to JS8Call and start recording.
    ///
    /// Returns the receiver of events that have already been written to the
    /// store. A previous run is stopped first.
    pub async fn start(&mut self) -> Result<mpsc::Receiver<ClientEvent>, RecorderError> {
        self.stop().await?;

        let capacity = self.config.client.channel_capacity;
        let (client_tx, client_rx) = mpsc::channel(capacity);
        let (ui_tx, ui_rx) = mpsc::channel(capacity);

        let mut client = Js8Client::connect(&self.config.client).await?;
        client.start(client_tx)?;

        self.ingest = Some(tokio::spawn(Self::ingest(
            self.store.clone(),
            client_rx,
            ui_tx,
        )));
        self.client = Some(client);
        Ok(ui_rx)
    }

    /// Stop the client and wait until every received event has been stored
    pub async fn stop(&mut self) -> Result<(), RecorderError> {
        if let Some(mut client) = self.client.take() {
            client.stop().await?;
        }
        if let Some(ingest) = self.ingest.take() {
            ingest.await?;
        }
        Ok(())
    }

    /// Last known grid of `callsign` for display.
    ///
    /// Store failures are logged and read as unknown.
    pub async fn lookup_grid(&self, callsign: &Callsign) -> Option<Locator> {
        match self.store.query_grid(callsign).await {
            Ok(grid) => grid,
            Err(e) => {
                warn!("Grid lookup for {} failed: {}", callsign, e);
                None
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.client.as_ref().is_some_and(Js8Client::is_running)
    }

    /// Stop recording and close the store
    pub async fn close(mut self) -> Result<(), RecorderError> {
        self.stop().await?;
        self.store.close().await;
        Ok(())
    }

    async fn ingest(
        store: Database,
        mut events: mpsc::Receiver<ClientEvent>,
        ui: mpsc::Sender<ClientEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if let Err(e) = store.record(&event).await {
                warn!("Dropping event after store failure: {}: {:?}", e, event);
                continue;
            }
            // Stored already; a lagging or closed presentation only misses the refresh
            if let Err(TrySendError::Full(event)) = ui.try_send(event) {
                warn!("Presentation lagging, skipped notification for {:?}", event);
            }
        }
        info!("Ingest finished");
    }
}
