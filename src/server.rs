//! Server Lifecycle
//!
//! Binds the listener (TCP or Unix domain socket), accepts clients onto the
//! single-threaded runtime, runs the maintenance cron, and tears everything
//! down on SIGTERM / Ctrl-C.
//!
//! ## Single-threaded cooperative model
//!
//! Everything — the store, the client tasks, the cron — runs on one
//! current-thread runtime inside a `LocalSet`. Shared state is
//! `Rc<RefCell<..>>`; a borrow is taken between `.await` points and never
//! across one, so a request or a cron tick is atomic with respect to every
//! other task. There are no locks and no cross-thread mutation.
//!
//! ## The cron
//!
//! A timer task ticks every `cron_period` ms and gates its sub-tasks on the
//! tick counter:
//!
//! - every 15 s: sweep items whose TTL elapsed
//! - every 5 s: when over the memory budget, evict items untouched for
//!   `gc_ratio` seconds
//! - every 15 s: log the one-line status summary
//!
//! Dropping the [`Cron`] handle stops the task (a watch channel carries the
//! shutdown flag), which is how `run` shuts the maintenance down before it
//! returns.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::commands::CommandHandler;
use crate::config::Config;
use crate::connection::{handle_connection, ConnectionStats};
use crate::error::Result;
use crate::storage::{available_memory, Store};
use crate::unix_time_ms;

/// The server: configuration, the shared store, and the accept machinery.
pub struct Server {
    config: Config,
    store: Rc<RefCell<Store>>,
    stats: Rc<ConnectionStats>,
    next_client_id: Cell<u64>,
}

/// The bound listening socket, either transport.
enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Server {
    /// Builds a server from its configuration. When the configured memory
    /// budget exceeds what the machine actually has available, it is
    /// clamped to half the available memory.
    pub fn new(mut config: Config) -> Self {
        if let Some(avail) = available_memory() {
            if config.max_memory > avail {
                let clamped = avail / 2;
                warn!(
                    "max_memory setting is higher than total available memory, dropping to {}",
                    format_mem(clamped)
                );
                config.max_memory = clamped;
            }
        }

        let store = Rc::new(RefCell::new(Store::new(&config, unix_time_ms())));
        Self {
            config,
            store,
            stats: Rc::new(ConnectionStats::new()),
            next_client_id: Cell::new(0),
        }
    }

    /// The shared store, mainly for tests and tooling.
    pub fn store(&self) -> Rc<RefCell<Store>> {
        Rc::clone(&self.store)
    }

    /// Connection-layer counters.
    pub fn connection_stats(&self) -> Rc<ConnectionStats> {
        Rc::clone(&self.stats)
    }

    /// Runs the server until SIGTERM or Ctrl-C. Must be called from within
    /// a `LocalSet` on a current-thread runtime.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.log_startup(&listener);

        let cron = Cron::start(Rc::clone(&self.store), self.config.clone());

        let result = tokio::select! {
            r = self.accept_loop(&listener) => r,
            _ = shutdown_signal() => {
                info!("Shutdown signal received, stopping server...");
                Ok(())
            }
        };

        drop(cron);
        drop(listener);
        if let Some(path) = &self.config.unix_socket {
            let _ = std::fs::remove_file(path);
        }

        let store = self.store.borrow();
        info!(
            items = store.len(),
            mem = %format_mem(store.memory().used()),
            requests = store.stats().requests,
            "Server shutdown complete"
        );

        result
    }

    async fn bind(&self) -> Result<Listener> {
        if let Some(path) = &self.config.unix_socket {
            info!("Creating unix server socket on {} ...", path.display());
            // a stale socket file from a previous run would fail the bind
            let _ = std::fs::remove_file(path);
            let listener = UnixListener::bind(path)?;
            let permissions = {
                use std::os::unix::fs::PermissionsExt;
                std::fs::Permissions::from_mode(0o777)
            };
            std::fs::set_permissions(path, permissions)?;
            Ok(Listener::Unix(listener))
        } else {
            let address = self.config.bind_address();
            info!("Creating tcp server socket on {} ...", address);
            Ok(Listener::Tcp(TcpListener::bind(address).await?))
        }
    }

    fn log_startup(&self, listener: &Listener) {
        let config = &self.config;
        info!("Server starting ...");
        match listener {
            Listener::Tcp(l) => {
                if let Ok(addr) = l.local_addr() {
                    info!("Listening on       : {}", addr);
                }
            }
            Listener::Unix(_) => {
                if let Some(path) = &config.unix_socket {
                    info!("Listening on       : {}", path.display());
                }
            }
        }
        info!("Max idle time      : {}s", config.max_idletime);
        info!("Max clients        : {}", config.max_clients);
        info!("Max request size   : {}", format_mem(config.max_request_size));
        info!("Max response size  : {}", format_mem(config.max_response_size));
        info!("Max memory         : {}", format_mem(config.max_memory));
        info!("GC ratio           : {}s", config.gc_ratio);
        info!("Max key size       : {}", format_mem(config.max_key_size));
        info!("Max value size     : {}", format_mem(config.max_value_size));
        info!("Data LZF compr.    : {}", format_mem(config.compression));
        info!("Cron period        : {}ms", config.cron_period);
    }

    async fn accept_loop(&self, listener: &Listener) -> Result<()> {
        loop {
            match listener {
                Listener::Tcp(l) => {
                    let (stream, addr) = l.accept().await?;
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(error = %e, "Failed to set TCP_NODELAY");
                    }
                    self.admit(stream, addr.to_string());
                }
                Listener::Unix(l) => {
                    let (stream, _) = l.accept().await?;
                    self.admit(stream, "unix".to_string());
                }
            }
        }
    }

    /// Registers an accepted client, refusing it outright when the client
    /// cap is reached.
    fn admit<S>(&self, stream: S, peer: String)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + 'static,
    {
        let nclients = self.store.borrow().stats().nclients;
        if nclients >= self.config.max_clients {
            warn!(
                current = nclients,
                max = self.config.max_clients,
                peer = %peer,
                "Dropping connection, client limit reached"
            );
            return;
        }

        let id = self.next_client_id.get() + 1;
        self.next_client_id.set(id);
        self.store.borrow_mut().stats_mut().nclients += 1;

        let store = Rc::clone(&self.store);
        let command_handler = CommandHandler::new(Rc::clone(&self.store));
        let config = self.config.clone();
        let stats = Rc::clone(&self.stats);

        tokio::task::spawn_local(async move {
            handle_connection(stream, id, peer, command_handler, &config, stats).await;
            store.borrow_mut().stats_mut().nclients -= 1;
        });
    }
}

/// Resolves when the process is asked to stop (SIGTERM or Ctrl-C).
async fn shutdown_signal() {
    use tokio::signal;

    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("Failed to install SIGTERM handler");

    tokio::select! {
        _ = signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

/// A handle to the running maintenance cron.
///
/// Dropping the handle stops the cron task.
#[derive(Debug)]
pub struct Cron {
    shutdown_tx: watch::Sender<bool>,
}

impl Cron {
    /// Starts the cron as a task on the current `LocalSet`.
    pub fn start(store: Rc<RefCell<Store>>, config: Config) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::task::spawn_local(cron_loop(store, config, shutdown_rx));
        debug!("Maintenance cron started");
        Self { shutdown_tx }
    }

    /// Stops the cron. Called automatically on drop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for Cron {
    fn drop(&mut self) {
        self.stop();
    }
}

/// True on the ticks where a sub-task with the given interval should fire.
fn cron_every(ticks: u64, interval_ms: u64, period_ms: u64) -> bool {
    let every = (interval_ms / period_ms.max(1)).max(1);
    ticks % every == 0
}

async fn cron_loop(store: Rc<RefCell<Store>>, config: Config, mut shutdown_rx: watch::Receiver<bool>) {
    let period = Duration::from_millis(config.cron_period.max(1));
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Maintenance cron stopped");
                    return;
                }
            }
        }

        ticks += 1;
        let now = unix_time_ms();
        let mut store = store.borrow_mut();
        store.stats_mut().crondone = ticks;

        // TTL sweep
        if cron_every(ticks, 15_000, config.cron_period) {
            let (count, bytes) = store.expire_sweep(now);
            if count > 0 {
                info!(
                    "Freed {} of expired data, left {} items.",
                    format_mem(bytes),
                    store.len()
                );
            }
        }

        // pressure eviction
        if cron_every(ticks, 5_000, config.cron_period) && store.memory().over_budget() {
            warn!(
                "Max memory exhausted, trying to free data that was accessed not in the last {}s.",
                config.gc_ratio
            );
            let (_, bytes) = store.evict_idle(now);
            info!("Freed {}, left {} items.", format_mem(bytes), store.len());
        }

        // status summary
        if cron_every(ticks, 15_000, config.cron_period) {
            let stats = store.stats();
            let uptime = now.saturating_sub(stats.started) / 1000;
            info!(
                "MEM {}/{} - CLIENTS {} - OBJECTS {} ( {} COMPRESSED ) - AVERAGE SIZE {} - UPTIME {}s",
                format_mem(store.memory().used()),
                format_mem(store.memory().limit()),
                stats.nclients,
                store.len(),
                stats.ncompressed,
                format_mem(store.avg_item_size()),
                uptime
            );
        }
    }
}

/// Renders a byte count with a binary-magnitude suffix, `123.4MB` style.
pub fn format_mem(bytes: usize) -> String {
    const SUFFIXES: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut i = 0;
    while i < SUFFIXES.len() - 1 && value >= 1024.0 {
        value /= 1024.0;
        i += 1;
    }
    if i == 0 {
        format!("{}{}", bytes, SUFFIXES[i])
    } else {
        format!("{:.1}{}", value, SUFFIXES[i])
    }
}
