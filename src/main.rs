//! `port42d`: the reality-compiler daemon entrypoint.
//!
//! Parses a small set of startup flags, builds a `Config`, warms up the
//! derived SQLite indices in parallel, and starts the RPC server.

use clap::Parser;
use port42::core::config::Config;
use port42::core::error::PortError;
use port42::core::metadata::MetadataIndex;
use port42::core::relation::RelationStore;
use port42::core::session::{SessionState, SessionStore};
use port42::core::store::ObjectStore;
use port42::server::Server;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(
    name = "port42",
    version = env!("CARGO_PKG_VERSION"),
    about = "Port 42 is the local-first reality compiler: a content-addressed object store, a virtual filesystem of named views over it, and a rule engine that lets materialized tools spawn their own documentation and tests.",
    disable_version_flag = true
)]
struct Cli {
    /// Storage root (defaults to $PORT42_ROOT_OVERRIDE or ~/.port42).
    #[clap(long)]
    root_dir: Option<PathBuf>,
    /// Primary listening port.
    #[clap(long)]
    port: Option<u16>,
    /// Secondary port attempted once if the primary fails to bind.
    #[clap(long)]
    fallback_port: Option<u16>,
    /// Log verbosity passed to `tracing_subscriber`'s env filter.
    #[clap(long)]
    log_level: Option<String>,
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();
}

/// Warms up every derived SQLite index against the object store in
/// parallel, so the first RPC request never pays a cold rebuild.
fn warm_indices(config: &Config) -> Result<(), PortError> {
    let store = ObjectStore::new(config.root_dir.clone());
    let index = MetadataIndex::new(&config.root_dir);
    let relations = RelationStore::new(&config.root_dir);
    let sessions = SessionStore::new(
        store.clone(),
        index.clone(),
        &config.root_dir,
        Duration::from_secs(config.session_idle_after_secs),
    );

    let init_errors: Mutex<Vec<PortError>> = Mutex::new(Vec::new());
    rayon::scope(|s| {
        let errs = &init_errors;
        s.spawn(|_| {
            if let Err(e) = index.rebuild(&store) {
                errs.lock().unwrap().push(e);
            }
        });
        s.spawn(|_| {
            if let Err(e) = relations.list() {
                errs.lock().unwrap().push(e);
            }
        });
        s.spawn(|_| {
            if let Err(e) = sessions.list_by_state(SessionState::Active) {
                errs.lock().unwrap().push(e);
            }
        });
    });

    let errs = init_errors.into_inner().unwrap();
    if let Some(e) = errs.into_iter().next() {
        return Err(e);
    }
    Ok(())
}

fn main() -> Result<(), PortError> {
    let cli = Cli::parse();

    let mut config = Config::default();
    if let Some(root_dir) = cli.root_dir {
        config.root_dir = root_dir;
    }
    if let Some(port) = cli.port {
        config.tcp_port = port;
    }
    if let Some(fallback_port) = cli.fallback_port {
        config.fallback_port = fallback_port;
    }
    if let Some(log_level) = cli.log_level {
        config.log_level = log_level;
    }

    init_tracing(&config.log_level);
    std::fs::create_dir_all(&config.root_dir)?;
    warm_indices(&config)?;

    tracing::info!(root = %config.root_dir.display(), port = config.tcp_port, "port42d starting");
    let server = Arc::new(Server::new(config)?);
    server.run()
}
