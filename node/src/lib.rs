//! PharmaChain tracker node.
//!
//! Wires the ledger, the document mirror and the optional RFID reader behind
//! an axum router. `main` only parses flags and serves.

pub mod config;
pub mod http;
pub mod ledger;
pub mod scanner;
pub mod store;
pub mod tracker;

use std::sync::Arc;

use pharmachain_common::TrackerError;
use tracing::info;

use crate::config::{LedgerConfig, NodeConfig, ScannerSource};
use crate::http::AppState;
use crate::ledger::{FreenetLedger, LedgerBackend, MemoryLedger};
use crate::scanner::DeviceScanner;
use crate::store::{MemoryStore, PgStore, StoreBackend};
use crate::tracker::Tracker;

/// Connect every backend named in `config`.
pub async fn build_state(config: &NodeConfig) -> Result<Arc<AppState>, TrackerError> {
    let ledger = match &config.ledger {
        LedgerConfig::Memory { confirmation_delay } => {
            info!(?confirmation_delay, "using in-memory ledger");
            LedgerBackend::Memory(MemoryLedger::new(*confirmation_delay))
        }
        LedgerConfig::Freenet {
            node_url,
            contract_wasm,
            network,
        } => {
            info!(%node_url, %network, "connecting to freenet ledger");
            LedgerBackend::Freenet(FreenetLedger::connect(node_url, contract_wasm, network).await?)
        }
    };

    let store = match &config.database_url {
        Some(url) => StoreBackend::Postgres(PgStore::connect(url).await?),
        None => {
            info!("using in-memory document store");
            StoreBackend::Memory(MemoryStore::new())
        }
    };

    let scanner = match &config.scanner {
        Some(ScannerSource::Path(path)) => {
            Some(DeviceScanner::open_path(path, config.poll_interval).await?)
        }
        Some(ScannerSource::Tcp(addr)) => {
            Some(DeviceScanner::connect(addr, config.poll_interval).await?)
        }
        None => None,
    };

    Ok(Arc::new(AppState {
        tracker: Tracker::new(
            ledger,
            store,
            config.confirmation_timeout,
            config.max_submit_retries,
        ),
        scanner,
        scan_timeout: config.scan_timeout,
    }))
}
