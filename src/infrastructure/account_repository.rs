use crate::domain::models::SourceAccount;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::Database;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SqliteAccountRepository {
    database: Arc<Database>,
}

impl SqliteAccountRepository {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    pub fn list(&self) -> Result<Vec<SourceAccount>, InfraError> {
        self.database.with_connection(|connection| {
            let mut statement = connection.prepare(
                "SELECT email, last_email_ts, created_at FROM source_accounts ORDER BY created_at, email",
            )?;
            let accounts = statement
                .query_map([], account_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(accounts)
        })
    }

    pub fn get(&self, email: &str) -> Result<Option<SourceAccount>, InfraError> {
        self.database.with_connection(|connection| {
            Ok(connection
                .query_row(
                    "SELECT email, last_email_ts, created_at FROM source_accounts WHERE email = ?1",
                    params![email],
                    account_from_row,
                )
                .optional()?)
        })
    }

    /// Registers `email` unless it is already known. Returns whether a new
    /// row was created.
    pub fn insert_if_missing(&self, email: &str, now: DateTime<Utc>) -> Result<bool, InfraError> {
        self.database.with_connection(|connection| {
            let changed = connection.execute(
                "INSERT OR IGNORE INTO source_accounts (email, last_email_ts, created_at)
                 VALUES (?1, NULL, ?2)",
                params![email, now],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn set_last_email_ts(&self, email: &str, last_email_ts: Option<&str>) -> Result<bool, InfraError> {
        self.database.with_connection(|connection| {
            let changed = connection.execute(
                "UPDATE source_accounts SET last_email_ts = ?2 WHERE email = ?1",
                params![email, last_email_ts],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn delete(&self, email: &str) -> Result<bool, InfraError> {
        self.database.with_connection(|connection| {
            let changed =
                connection.execute("DELETE FROM source_accounts WHERE email = ?1", params![email])?;
            Ok(changed > 0)
        })
    }
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<SourceAccount> {
    Ok(SourceAccount {
        email: row.get(0)?,
        last_email_ts: row.get(1)?,
        created_at: row.get(2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_if_missing_keeps_existing_state() {
        let repository = SqliteAccountRepository::new(Arc::new(Database::in_memory()));
        let now = Utc::now();

        assert!(repository.insert_if_missing("a@x.com", now).expect("insert"));
        assert!(
            repository
                .set_last_email_ts("a@x.com", Some("2024-01-01T10:00:00"))
                .expect("update")
        );
        assert!(!repository.insert_if_missing("a@x.com", now).expect("second insert"));

        let stored = repository.get("a@x.com").expect("get").expect("exists");
        assert_eq!(stored.last_email_ts.as_deref(), Some("2024-01-01T10:00:00"));
        assert_eq!(repository.list().expect("list").len(), 1);
    }

    #[test]
    fn update_and_delete_report_missing_rows() {
        let repository = SqliteAccountRepository::new(Arc::new(Database::in_memory()));
        assert!(!repository.set_last_email_ts("nobody@x.com", None).expect("update"));
        assert!(!repository.delete("nobody@x.com").expect("delete"));
    }
}
