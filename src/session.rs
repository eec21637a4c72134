//! Persistence sessions handed to job actions.

use crate::error::QueueError;

/// Opens one session per dispatched job. The session is dropped as soon as
/// the job's executor returns.
///
/// Any `Fn() -> Result<S, QueueError>` closure is a session maker.
pub trait SessionMaker: Send + Sync + 'static {
    type Session: Send + 'static;

    fn open(&self) -> Result<Self::Session, QueueError>;
}

impl<F, S> SessionMaker for F
where
    F: Fn() -> Result<S, QueueError> + Send + Sync + 'static,
    S: Send + 'static,
{
    type Session = S;

    fn open(&self) -> Result<S, QueueError> {
        self()
    }
}

#[cfg(feature = "sqlite")]
pub use self::sqlite::SqliteSessionMaker;

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::SessionMaker;
    use crate::error::QueueError;
    use rusqlite::Connection;
    use std::path::{Path, PathBuf};

    /// Opens a fresh SQLite connection for every job.
    ///
    /// With no path each session gets its own private in-memory database.
    #[derive(Debug, Clone, Default)]
    pub struct SqliteSessionMaker {
        path: Option<PathBuf>,
    }

    impl SqliteSessionMaker {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self {
                path: Some(path.into()),
            }
        }

        pub fn in_memory() -> Self {
            Self { path: None }
        }

        pub fn path(&self) -> Option<&Path> {
            self.path.as_deref()
        }
    }

    impl SessionMaker for SqliteSessionMaker {
        type Session = Connection;

        fn open(&self) -> Result<Connection, QueueError> {
            open_connection(self.path())
        }
    }

    fn open_connection(path: Option<&Path>) -> Result<Connection, QueueError> {
        let conn = match path {
            Some(p) => Connection::open(p).inspect_err(|e| {
                tracing::error!(path = %p.display(), "Failed to open session database: {}", e)
            })?,
            None => Connection::open_in_memory()?,
        };

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;

        Ok(conn)
    }
}
