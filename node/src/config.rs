use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "pharmachain-node", about = "PharmaChain supply-chain tracker node")]
pub struct Cli {
    /// HTTP port to listen on.
    #[arg(long, default_value_t = 3100)]
    pub port: u16,

    /// WebSocket URL of the Freenet node hosting the ledger contract
    /// (e.g. "ws://localhost:3001/v1/contract/command?encodingProtocol=native").
    /// Without it the node keeps the ledger in memory.
    #[arg(long)]
    pub node_url: Option<String>,

    /// Compiled ledger contract.
    #[arg(
        long,
        default_value = "target/wasm32-unknown-unknown/release/pharmachain_ledger_contract.wasm"
    )]
    pub contract_wasm: PathBuf,

    /// Ledger instance name; different names give different contract keys.
    #[arg(long, default_value = "pharmachain")]
    pub network: String,

    /// Postgres URL for the document mirror. In-memory mirror if absent.
    #[arg(long)]
    pub database_url: Option<String>,

    /// Serial device of an attached RFID reader (e.g. /dev/ttyUSB0).
    #[arg(long, conflicts_with = "scanner_addr")]
    pub scanner_path: Option<PathBuf>,

    /// host:port of a serial-over-TCP bridge in front of the reader.
    #[arg(long)]
    pub scanner_addr: Option<String>,

    /// Reader poll interval in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Default scan timeout in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    pub scan_timeout_ms: u64,

    /// How long to wait for the ledger to confirm a submission.
    #[arg(long, default_value_t = 10_000)]
    pub confirmation_timeout_ms: u64,

    /// Resubmissions after a ledger timeout or transport failure.
    #[arg(long, default_value_t = 2)]
    pub max_submit_retries: u32,

    /// Artificial confirmation latency of the in-memory ledger.
    #[arg(long, default_value_t = 0)]
    pub memory_confirmation_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerConfig {
    Memory {
        confirmation_delay: Duration,
    },
    Freenet {
        node_url: String,
        contract_wasm: PathBuf,
        network: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannerSource {
    Path(PathBuf),
    Tcp(String),
}

/// Runtime settings, independent of how they were supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub port: u16,
    pub ledger: LedgerConfig,
    pub database_url: Option<String>,
    pub scanner: Option<ScannerSource>,
    pub poll_interval: Duration,
    pub scan_timeout: Duration,
    pub confirmation_timeout: Duration,
    pub max_submit_retries: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: 3100,
            ledger: LedgerConfig::Memory {
                confirmation_delay: Duration::ZERO,
            },
            database_url: None,
            scanner: None,
            poll_interval: Duration::from_secs(1),
            scan_timeout: Duration::from_secs(30),
            confirmation_timeout: Duration::from_secs(10),
            max_submit_retries: 2,
        }
    }
}

impl From<Cli> for NodeConfig {
    fn from(cli: Cli) -> Self {
        let ledger = match cli.node_url {
            Some(node_url) => LedgerConfig::Freenet {
                node_url,
                contract_wasm: cli.contract_wasm,
                network: cli.network,
            },
            None => LedgerConfig::Memory {
                confirmation_delay: Duration::from_millis(cli.memory_confirmation_delay_ms),
            },
        };
        let scanner = match (cli.scanner_path, cli.scanner_addr) {
            (Some(path), _) => Some(ScannerSource::Path(path)),
            (None, Some(addr)) => Some(ScannerSource::Tcp(addr)),
            (None, None) => None,
        };
        Self {
            port: cli.port,
            ledger,
            database_url: cli.database_url,
            scanner,
            poll_interval: Duration::from_millis(cli.poll_interval_ms),
            scan_timeout: Duration::from_millis(cli.scan_timeout_ms),
            confirmation_timeout: Duration::from_millis(cli.confirmation_timeout_ms),
            max_submit_retries: cli.max_submit_retries,
        }
    }
}
