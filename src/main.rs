//! minpad-daemon: background process owning the keypad hook
//!
//! Wires the hook engine, dispatch worker and control server together and
//! runs until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use minpad::actions::{ActionDispatcher, BindingTable, DispatchQueue, DispatchWorker, SystemLauncher};
use minpad::config::Config;
use minpad::events::ActionEvent;
use minpad::hotkey::{HookEngine, RepeatScheduler};
use minpad::input::{self, ComboSynthesizer};
use minpad::ipc::{Server, ServerContext};
use minpad::lifecycle::{InstanceLock, ShutdownSignal};
use minpad::store::{BindingStore, JsonFileStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "minpad-daemon starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(data_dir = %config.data_dir.display(), "configuration loaded");

    let _instance = InstanceLock::acquire(&config.lock_path)?;

    let shutdown = ShutdownSignal::new();

    // Bindings: saved file, or the default set on first run
    let store = Arc::new(JsonFileStore::new(&config.bindings_path));
    let table = match store.load_bindings() {
        Ok(Some(table)) => table,
        Ok(None) => {
            let table = BindingTable::defaults();
            if let Err(e) = store.save_bindings(&table) {
                warn!(error = %format!("{e:#}"), "failed to save default bindings");
            }
            table
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "failed to load bindings, using defaults");
            BindingTable::defaults()
        }
    };

    // Outcome events: logged here, pushed to subscribed control clients
    let (event_tx, _) = broadcast::channel::<ActionEvent>(64);

    let combos = Arc::new(ComboSynthesizer::new(
        input::platform_injector(),
        config.timing.key_step,
    ));

    let dispatcher = Arc::new(ActionDispatcher::new(
        table,
        Arc::new(SystemLauncher),
        combos,
        Some(Arc::clone(&store) as Arc<dyn BindingStore>),
        event_tx.clone(),
    ));

    // Hook thread -> dispatch worker
    let (queue, receiver) = DispatchQueue::new();
    let queue = Arc::new(queue);
    let worker = DispatchWorker::spawn(Arc::clone(&dispatcher), receiver)
        .context("failed to start dispatch worker")?;

    let engine = Arc::new(HookEngine::new(
        queue.clone(),
        RepeatScheduler::new(Handle::current()),
        config.timing,
        event_tx.clone(),
    ));

    match engine.start() {
        Ok(()) => {
            info!("keypad hook started");
        }
        Err(e) => {
            error!(?e, "failed to start keypad hook");
            warn!("continuing without keypad capture, slots can still be triggered over IPC");
        }
    }

    let server = Server::bind(
        &config.ipc_endpoint,
        Arc::new(ServerContext {
            dispatcher,
            sink: queue.clone(),
            engine: Arc::clone(&engine),
            store: Some(store),
            events: event_tx.clone(),
            start_time: Instant::now(),
        }),
    )?;

    let mut event_rx = event_tx.subscribe();

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Log outcome events
        _ = async {
            loop {
                match event_rx.recv().await {
                    Ok(event) => debug!(%event, "action event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event log lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("event log exited");
        }

        // Wait for shutdown signal
        result = shutdown.wait() => {
            match result {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(?e, "failed to listen for shutdown signals"),
            }
        }
    }

    // Cleanup
    info!("shutting down...");

    let hook = Arc::clone(&engine);
    if let Err(e) = tokio::task::spawn_blocking(move || hook.stop()).await {
        warn!(?e, "hook shutdown failed");
    }

    // Drain what is already queued, then let the worker exit
    queue.shutdown();
    if let Err(e) = tokio::task::spawn_blocking(move || worker.join()).await {
        warn!(?e, "dispatch worker shutdown failed");
    }

    server.shutdown().await;

    info!("minpad-daemon stopped");

    Ok(())
}
