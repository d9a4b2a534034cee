use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

/// Where the worker opens its connection.
#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

impl Location {
    fn open(&self) -> Result<Connection> {
        let conn = match self {
            Location::File(path) => Connection::open(path)
                .with_context(|| format!("failed to open SQLite database {}", path.display()))?,
            Location::Memory => {
                Connection::open_in_memory().context("failed to open in-memory SQLite database")?
            }
        };
        Ok(conn)
    }
}

fn configure(conn: &Connection, location: &Location) {
    if matches!(location, Location::File(_)) {
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            warn!("Failed to enable WAL mode: {err}");
        }
    }
    // concurrent readers of a WAL file may briefly hold the write lock
    if let Err(err) = conn.pragma_update(None, "busy_timeout", 5_000) {
        warn!("Failed to set busy timeout: {err}");
    }
}

/// Owns the connection until a `Shutdown` arrives or every sender is gone.
fn serve(location: Location, commands: mpsc::Receiver<DbCommand>, ready: mpsc::Sender<Result<()>>) {
    let mut conn = match location.open() {
        Ok(conn) => conn,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    configure(&conn, &location);

    let migrated = run_migrations(&mut conn).context("failed to run database migrations");
    let failed = migrated.is_err();
    if ready.send(migrated).is_err() || failed {
        return;
    }

    while let Ok(command) = commands.recv() {
        match command {
            DbCommand::Execute(task) => task(&mut conn),
            DbCommand::Shutdown => break,
        }
    }
    info!("Database worker stopped");
}

struct Worker {
    sender: mpsc::Sender<DbCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };

        // a worker that failed to start has already dropped its receiver
        let _ = self.sender.send(DbCommand::Shutdown);
        if let Err(join_err) = handle.join() {
            error!("Database worker panicked: {join_err:?}");
        }
    }
}

/// SQLite handle. One dedicated thread owns the connection; async callers
/// hand it closures through `execute` and await the reply. Clones share
/// the worker, which stops when the last clone drops.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    location: Arc<Location>,
}

impl Database {
    /// Open (creating if needed) the database file and bring its schema up to date.
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
        let database = Self::start(Location::File(db_path.clone()))?;
        info!("Database initialized at {}", db_path.display());
        Ok(database)
    }

    /// Private database that lives as long as the handle.
    pub fn in_memory() -> Result<Self> {
        Self::start(Location::Memory)
    }

    fn start(location: Location) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let for_thread = location.clone();

        let handle = thread::Builder::new()
            .name("timeline-db".into())
            .spawn(move || serve(for_thread, command_rx, ready_tx))
            .context("failed to spawn database worker thread")?;

        let worker = Worker {
            sender: command_tx,
            handle: Mutex::new(Some(handle)),
        };
        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        Ok(Self {
            worker: Arc::new(worker),
            location: Arc::new(location),
        })
    }

    /// File backing the database; `None` for an in-memory one.
    pub fn path(&self) -> Option<&Path> {
        match self.location.as_ref() {
            Location::File(path) => Some(path.as_path()),
            Location::Memory => None,
        }
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = DbCommand::Execute(Box::new(move |conn| {
            // the caller may have given up waiting; nothing to report then
            let _ = reply_tx.send(task(conn));
        }));

        self.worker
            .sender
            .send(command)
            .map_err(|_| anyhow!("database worker is no longer running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database worker dropped the request"))?
    }
}
