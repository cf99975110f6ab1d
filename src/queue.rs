// Durable retry queue
// One SQLite database holds a FIFO of pending scrobbles per service name

use crate::scrobbler::Scrobble;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is empty")]
    Empty,

    #[error("queue storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("queue record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The stored record at `id` can't be read back
    #[error("unreadable queue record {id}: {source}")]
    Corrupt {
        id: i64,
        source: serde_json::Error,
    },

    #[error("queue directory error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Queue entry as stored, with the id needed to remove it after delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: i64,
    pub scrobble: Scrobble,
}

/// Process-wide store holding every named queue
pub struct QueueStore {
    conn: Arc<Mutex<Connection>>,
}

impl QueueStore {
    /// Open (or create) the store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Self::init(Connection::open(path)?)
    }

    /// Open a store that lives only as long as the process
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA synchronous = FULL;")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS queue (
                backend TEXT NOT NULL,
                seq INTEGER NOT NULL,
                record TEXT NOT NULL,
                PRIMARY KEY (backend, seq)
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Handle on the queue for one service
    pub fn queue(&self, name: &str) -> Queue {
        Queue {
            name: name.to_string(),
            conn: Arc::clone(&self.conn),
        }
    }

    /// Close the database. Queue handles still alive keep it open until dropped.
    pub fn close(self) -> Result<()> {
        match Arc::try_unwrap(self.conn) {
            Ok(mutex) => {
                let conn = mutex.into_inner().unwrap_or_else(PoisonError::into_inner);
                conn.close().map_err(|(_, e)| QueueError::Storage(e))
            }
            Err(_) => {
                log::warn!("Queue store still in use at close, leaving it to the last handle");
                Ok(())
            }
        }
    }
}

/// FIFO of pending scrobbles for one service
#[derive(Clone)]
pub struct Queue {
    name: String,
    conn: Arc<Mutex<Connection>>,
}

impl Queue {
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a record at the tail
    pub fn enqueue(&self, scrobble: &Scrobble) -> Result<()> {
        let record = serde_json::to_string(scrobble)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO queue (backend, seq, record)
             VALUES (?1, COALESCE((SELECT MAX(seq) FROM queue WHERE backend = ?1), 0) + 1, ?2)",
            params![self.name, record],
        )?;
        Ok(())
    }

    /// Remove and return the head record.
    /// An unreadable head is removed too and reported as [`QueueError::Corrupt`].
    pub fn dequeue(&self) -> Result<Scrobble> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let head: Option<(i64, String)> = tx
            .query_row(
                "SELECT seq, record FROM queue WHERE backend = ?1 ORDER BY seq ASC LIMIT 1",
                params![self.name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (seq, record) = head.ok_or(QueueError::Empty)?;

        tx.execute(
            "DELETE FROM queue WHERE backend = ?1 AND seq = ?2",
            params![self.name, seq],
        )?;
        tx.commit()?;

        serde_json::from_str(&record).map_err(|source| QueueError::Corrupt { id: seq, source })
    }

    /// Look at the head record without removing it
    pub fn front(&self) -> Result<Option<Entry>> {
        let conn = self.lock();
        let head: Option<(i64, String)> = conn
            .query_row(
                "SELECT seq, record FROM queue WHERE backend = ?1 ORDER BY seq ASC LIMIT 1",
                params![self.name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match head {
            Some((id, record)) => match serde_json::from_str(&record) {
                Ok(scrobble) => Ok(Some(Entry { id, scrobble })),
                Err(source) => Err(QueueError::Corrupt { id, source }),
            },
            None => Ok(None),
        }
    }

    /// Remove an entry previously returned by [`Queue::front`]
    pub fn remove(&self, id: i64) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM queue WHERE backend = ?1 AND seq = ?2",
            params![self.name, id],
        )?;
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue WHERE backend = ?1",
            params![self.name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
