use crate::infrastructure::error::InfraError;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Shared database handle. The connection is opened on first use and kept
/// for the lifetime of the owning state.
#[derive(Debug)]
pub struct Database {
    path: Option<PathBuf>,
    connection: Mutex<Option<Connection>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            connection: Mutex::new(None),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            connection: Mutex::new(None),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn with_connection<T, F>(&self, operation: F) -> Result<T, InfraError>
    where
        F: FnOnce(&Connection) -> Result<T, InfraError>,
    {
        let mut guard = self
            .connection
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("database lock poisoned: {error}")))?;
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        let Some(connection) = guard.as_ref() else {
            return Err(InfraError::InvalidConfig(
                "database connection unavailable".to_string(),
            ));
        };
        operation(connection)
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        let connection = match &self.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        connection.execute_batch(SCHEMA_SQL)?;
        tracing::debug!(path = ?self.path, "opened database connection");
        Ok(connection)
    }
}
