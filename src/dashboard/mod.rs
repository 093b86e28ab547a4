//! Read-model server: JSON API + server-sent events over the store.
//!
//! A single 2-second ticker snapshots the feature list and broadcasts a
//! `features` event whenever the serialized snapshot changed. The ticker
//! never blocks: when a writer holds the store lock the tick is skipped
//! and the next one retries. Explicit `feature-updated` events are emitted
//! by the PATCH handler.

pub mod api;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

use crate::store::{Db, DbHandle};

/// One event on the SSE fan-out. Clients reconcile `features` snapshots
/// and apply `feature-updated` deltas.
#[derive(Debug, Clone)]
pub struct SseMessage {
    pub event: &'static str,
    pub data: String,
}

pub struct AppState {
    pub db: DbHandle,
    pub tx: broadcast::Sender<SseMessage>,
}

pub type SharedState = Arc<AppState>;

pub struct ServerConfig {
    pub port: u16,
    pub root: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4400,
            root: PathBuf::from("."),
        }
    }
}

/// Snapshot ticker: broadcast the full feature list whenever it changes.
async fn snapshot_ticker(db: DbHandle, tx: broadcast::Sender<SseMessage>) {
    let mut interval = tokio::time::interval(Duration::from_secs(2));
    let mut last: Option<String> = None;
    loop {
        interval.tick().await;
        // A held write lock means a mutation is in flight; skip the tick.
        let snapshot = match db.try_lock_sync() {
            Some(store) => match store.list_features(None, None) {
                Ok(features) => serde_json::to_string(&features).ok(),
                Err(_) => None,
            },
            None => None,
        };
        let json = match snapshot {
            Some(json) => json,
            None => continue,
        };
        if last.as_deref() != Some(json.as_str()) {
            let _ = tx.send(SseMessage {
                event: "features",
                data: json.clone(),
            });
            last = Some(json);
        }
    }
}

/// Start the server on loopback and run until killed.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let db = Db::open(&config.root).context("Failed to open store for dashboard")?;
    let handle = DbHandle::new(db);
    let (tx, _rx) = broadcast::channel::<SseMessage>(256);

    tokio::spawn(snapshot_ticker(handle.clone(), tx.clone()));

    let state: SharedState = Arc::new(AppState {
        db: handle,
        tx,
    });
    let app = api::api_router()
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("127.0.0.1:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    println!("Dashboard API listening on http://{}", addr);
    axum::serve(listener, app)
        .await
        .context("Dashboard server failed")?;
    Ok(())
}
