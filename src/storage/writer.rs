//! Dedicated SQLite thread fed by an mpsc channel.
//!
//! The connection never leaves this thread. Each message carries a job that
//! runs against the connection and answers through its own one-shot reply, so
//! jobs execute strictly one at a time in submission order.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use rusqlite::Connection;
use tokio::sync::oneshot;
use tracing::{error, info};

use super::schema::create_tables;
use super::StoreError;

/// A unit of work executed on the writer thread.
pub type StoreJob = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Messages sent to the storage writer thread.
pub enum StoreMessage {
    Job(StoreJob),
    /// Graceful shutdown
    Shutdown,
}

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbTarget {
    File(PathBuf),
    Memory,
}

impl std::fmt::Display for DbTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbTarget::File(path) => write!(f, "{}", path.display()),
            DbTarget::Memory => write!(f, ":memory:"),
        }
    }
}

/// Channel handle for submitting jobs to the writer thread.
#[derive(Clone)]
pub struct StoreChannel {
    tx: Sender<StoreMessage>,
}

impl StoreChannel {
    /// Run `f` on the writer thread and await its result.
    pub async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: StoreJob = Box::new(move |conn| {
            let _ = reply_tx.send(f(conn));
        });

        self.tx
            .send(StoreMessage::Job(job))
            .map_err(|_| StoreError::WriterClosed)?;

        reply_rx.await.map_err(|_| StoreError::WriterClosed)?
    }

    /// Request graceful shutdown. Jobs queued before this still run; later
    /// ones are dropped and their callers see `WriterClosed`.
    pub fn shutdown(&self) {
        let _ = self.tx.send(StoreMessage::Shutdown);
    }
}

/// Open the database on a new thread and return a channel to it once the
/// schema is in place. Open or schema failures are returned to the caller.
pub async fn spawn_writer(target: DbTarget) -> Result<StoreChannel, StoreError> {
    let (tx, rx) = mpsc::channel();
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), StoreError>>();

    thread::Builder::new()
        .name("kiosk-store".to_string())
        .spawn(move || {
            let conn = match open_connection(&target) {
                Ok(conn) => {
                    info!("[STORE] Database initialized at {}", target);
                    let _ = ready_tx.send(Ok(()));
                    conn
                }
                Err(e) => {
                    error!("[STORE] Failed to open database at {}: {}", target, e);
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            store_writer_loop(rx, conn);
        })
        .map_err(|_| StoreError::WriterClosed)?;

    ready_rx.await.map_err(|_| StoreError::WriterClosed)??;

    Ok(StoreChannel { tx })
}

fn open_connection(target: &DbTarget) -> Result<Connection, StoreError> {
    let conn = match target {
        DbTarget::File(path) => Connection::open(path)?,
        DbTarget::Memory => Connection::open_in_memory()?,
    };
    create_tables(&conn)?;
    Ok(conn)
}

/// Main loop running on the dedicated thread.
fn store_writer_loop(rx: Receiver<StoreMessage>, mut conn: Connection) {
    loop {
        match rx.recv() {
            Ok(StoreMessage::Job(job)) => job(&mut conn),
            Ok(StoreMessage::Shutdown) => {
                info!("[STORE] Writer shutdown complete");
                break;
            }
            Err(_) => {
                info!("[STORE] Channel disconnected, writer exiting");
                break;
            }
        }
    }
}
