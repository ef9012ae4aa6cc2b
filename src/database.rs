// src/database.rs
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Sqlite};
use tracing::{debug, info};

use crate::{
    config::DatabaseConfig,
    errors::RecorderError,
    grid::Locator,
    models::{Callsign, CallsignGridMapping, ClientEvent, DirectedMessage, MessageFilter},
};

mod models;

use models::{to_millis, GridRow, MessageRow};

const MESSAGE_COLUMNS: &str = "timestamp, sender, recipient, text, snr, their_snr, freq";

/// SQLite store for directed messages and callsign grid locations
///
/// The pool holds a single connection, so every statement is serialized and
/// holds the database only for its own duration.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create the database file, then create the schema
    pub async fn open(config: &DatabaseConfig) -> Result<Self, RecorderError> {
        config.validate()?;
        info!(
            "Opening database at {}, busy_timeout={:?}",
            config.path.display(),
            config.busy_timeout
        );

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| RecorderError::DatabaseOpenError {
                path: config.path.clone(),
                origin: e.to_string(),
            })?;

        Self::new(pool).await
    }

    /// Wrap an existing pool, creating the schema if needed
    pub async fn new(pool: SqlitePool) -> Result<Self, RecorderError> {
        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Create tables `messages` and `grids` with their indices.
    ///
    /// Safe to run against an existing database.
    pub async fn init_schema(&self) -> Result<(), RecorderError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                sender TEXT NOT NULL,
                recipient TEXT NOT NULL,
                text TEXT NOT NULL,
                snr INTEGER,
                their_snr INTEGER,
                freq INTEGER
            )",
            "CREATE TABLE IF NOT EXISTS grids (
                callsign TEXT PRIMARY KEY,
                grid TEXT NOT NULL,
                last_seen INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Write a decoded client event; disconnects are not stored
    pub async fn record(&self, event: &ClientEvent) -> Result<(), RecorderError> {
        match event {
            ClientEvent::Message(message) => self.insert_message(message).await,
            ClientEvent::Mapping(mapping) => {
                self.upsert_mapping(&mapping.callsign, &mapping.grid, mapping.last_seen)
                    .await
            }
            ClientEvent::Disconnected(_) => Ok(()),
        }
    }

    /// Append a directed message. Repeated messages are stored again.
    pub async fn insert_message(&self, message: &DirectedMessage) -> Result<(), RecorderError> {
        debug!("Storing message from {}", message.sender);
        sqlx::query(
            "INSERT INTO messages (timestamp, sender, recipient, text, snr, their_snr, freq)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(to_millis(&message.timestamp))
        .bind(message.sender.as_str())
        .bind(message.recipient.as_str())
        .bind(message.text.as_str())
        .bind(message.snr)
        .bind(message.their_snr)
        .bind(message.freq)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or overwrite the grid of `callsign`
    pub async fn upsert_mapping(
        &self,
        callsign: &Callsign,
        grid: &Locator,
        last_seen: DateTime<Utc>,
    ) -> Result<(), RecorderError> {
        debug!("Storing grid {} for {}", grid, callsign);
        sqlx::query(
            "INSERT INTO grids (callsign, grid, last_seen) VALUES (?1, ?2, ?3)
            ON CONFLICT(callsign) DO UPDATE SET grid = excluded.grid, last_seen = excluded.last_seen",
        )
        .bind(callsign.as_str())
        .bind(grid.as_str())
        .bind(to_millis(&last_seen))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Messages matching `filter`, oldest first
    pub async fn query_messages(
        &self,
        filter: &MessageFilter,
    ) -> Result<Vec<DirectedMessage>, RecorderError> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT ");
        query.push(MESSAGE_COLUMNS);
        query.push(" FROM messages WHERE 1 = 1");
        if let Some(sender) = &filter.sender {
            query.push(" AND sender = ").push_bind(sender.as_str().to_string());
        }
        if let Some(since) = &filter.since {
            query.push(" AND timestamp >= ").push_bind(to_millis(since));
        }
        if let Some(until) = &filter.until {
            query.push(" AND timestamp < ").push_bind(to_millis(until));
        }
        query.push(" ORDER BY timestamp ASC, id ASC");

        let rows: Vec<MessageRow> = query.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(DirectedMessage::try_from).collect()
    }

    pub async fn count_messages(&self) -> Result<i64, RecorderError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Last known grid of `callsign`
    pub async fn query_grid(&self, callsign: &Callsign) -> Result<Option<Locator>, RecorderError> {
        let grid = sqlx::query_scalar::<_, String>("SELECT grid FROM grids WHERE callsign = ?1")
            .bind(callsign.as_str())
            .fetch_optional(&self.pool)
            .await?;
        grid.as_deref().map(Locator::try_from).transpose()
    }

    /// Grid cells adjacent to `grid`, at the same precision
    pub fn query_adjacent(&self, grid: &Locator) -> BTreeSet<Locator> {
        grid.neighbors()
    }

    /// Stations located in `grid` or one of its adjacent cells.
    ///
    /// Stored grids are compared at the precision of `grid`; stations known
    /// only to a coarser precision are not returned.
    pub async fn query_nearby(
        &self,
        grid: &Locator,
    ) -> Result<Vec<CallsignGridMapping>, RecorderError> {
        let mut cells = self.query_adjacent(grid);
        cells.insert(grid.clone());
        let prefix_len = grid.as_str().len() as i64;

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT callsign, grid, last_seen FROM grids WHERE substr(grid, 1, ",
        );
        query.push_bind(prefix_len).push(") IN (");
        {
            let mut separated = query.separated(", ");
            for cell in &cells {
                separated.push_bind(cell.as_str().to_string());
            }
        }
        query.push(") ORDER BY callsign ASC");

        let rows: Vec<GridRow> = query.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(CallsignGridMapping::try_from).collect()
    }

    /// All known grids, ordered by callsign
    pub async fn list_mappings(&self) -> Result<Vec<CallsignGridMapping>, RecorderError> {
        let rows: Vec<GridRow> =
            sqlx::query_as("SELECT callsign, grid, last_seen FROM grids ORDER BY callsign ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(CallsignGridMapping::try_from).collect()
    }

    /// Close the connection, checkpointing the WAL
    pub async fn close(&self) {
        info!("Closing database");
        self.pool.close().await;
    }
}
