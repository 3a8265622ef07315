use crate::domain::models::ExtractedTask;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_lookup::RecordLookup;
use crate::infrastructure::storage::Database;
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Params, Row};
use std::sync::Arc;

const EXTRACTED_COLUMNS: &str = "id, title, description, date, time, source_subject, source_from, \
     confidence, source_account, source_email_ts, added_to_calendar, created_at";

#[derive(Debug, Clone)]
pub struct SqliteExtractedTaskRepository {
    database: Arc<Database>,
}

impl SqliteExtractedTaskRepository {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Newest first, optionally restricted to one source account.
    pub fn list(&self, source_account: Option<&str>) -> Result<Vec<ExtractedTask>, InfraError> {
        self.database.with_connection(|connection| {
            let mut statement = connection.prepare(&format!(
                "SELECT {EXTRACTED_COLUMNS} FROM extracted_tasks
                 WHERE ?1 IS NULL OR source_account = ?1
                 ORDER BY created_at DESC, rowid DESC"
            ))?;
            let tasks = statement
                .query_map(params![source_account], extracted_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    /// Records with a `date` in the inclusive range that have not been
    /// moved onto the calendar yet.
    pub fn list_pending_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ExtractedTask>, InfraError> {
        self.database.with_connection(|connection| {
            let mut statement = connection.prepare(&format!(
                "SELECT {EXTRACTED_COLUMNS} FROM extracted_tasks
                 WHERE added_to_calendar = 0 AND date >= ?1 AND date <= ?2
                 ORDER BY date, time, rowid"
            ))?;
            let tasks = statement
                .query_map(params![start.to_string(), end.to_string()], extracted_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<ExtractedTask>, InfraError> {
        self.query_one("id = ?1", params![id])
    }

    /// The analyzer's secondary de-duplication key, used when an item has no
    /// source timestamp.
    pub fn find_by_subject_key(
        &self,
        source_account: Option<&str>,
        title: &str,
        source_subject: Option<&str>,
    ) -> Result<Option<ExtractedTask>, InfraError> {
        self.query_one(
            "source_account IS ?1 AND title = ?2 AND source_subject IS ?3",
            params![source_account, title, source_subject],
        )
    }

    pub fn insert(&self, task: &ExtractedTask) -> Result<(), InfraError> {
        self.database.with_connection(|connection| {
            connection.execute(
                &format!(
                    "INSERT INTO extracted_tasks ({EXTRACTED_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    task.id,
                    task.title,
                    task.description,
                    task.date,
                    task.time,
                    task.source_subject,
                    task.source_from,
                    task.confidence,
                    task.source_account,
                    task.source_email_ts,
                    task.added_to_calendar,
                    task.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn update(&self, task: &ExtractedTask) -> Result<bool, InfraError> {
        self.database.with_connection(|connection| {
            let changed = connection.execute(
                "UPDATE extracted_tasks SET
                   title = ?2, description = ?3, date = ?4, time = ?5,
                   source_subject = ?6, source_from = ?7, confidence = ?8,
                   source_account = ?9, source_email_ts = ?10, added_to_calendar = ?11
                 WHERE id = ?1",
                params![
                    task.id,
                    task.title,
                    task.description,
                    task.date,
                    task.time,
                    task.source_subject,
                    task.source_from,
                    task.confidence,
                    task.source_account,
                    task.source_email_ts,
                    task.added_to_calendar,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn delete(&self, id: &str) -> Result<bool, InfraError> {
        self.database.with_connection(|connection| {
            let changed =
                connection.execute("DELETE FROM extracted_tasks WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
    }

    fn query_one<P: Params>(
        &self,
        condition: &str,
        params: P,
    ) -> Result<Option<ExtractedTask>, InfraError> {
        self.database.with_connection(|connection| {
            Ok(connection
                .query_row(
                    &format!(
                        "SELECT {EXTRACTED_COLUMNS} FROM extracted_tasks
                         WHERE {condition}
                         ORDER BY rowid LIMIT 1"
                    ),
                    params,
                    extracted_from_row,
                )
                .optional()?)
        })
    }
}

impl RecordLookup for SqliteExtractedTaskRepository {
    type Record = ExtractedTask;

    fn find_by_id(&self, id: &str) -> Result<Option<ExtractedTask>, InfraError> {
        self.get(id)
    }

    fn find_by_title_fragment(&self, fragment: &str) -> Result<Option<ExtractedTask>, InfraError> {
        let needle = fragment.to_lowercase();
        self.database.with_connection(|connection| {
            let mut statement = connection.prepare(&format!(
                "SELECT {EXTRACTED_COLUMNS} FROM extracted_tasks ORDER BY rowid"
            ))?;
            let mut rows = statement.query_map([], extracted_from_row)?;
            rows.find_map(|row| match row {
                Ok(task) if task.title.to_lowercase().contains(&needle) => Some(Ok(task)),
                Ok(_) => None,
                Err(error) => Some(Err(error)),
            })
            .transpose()
            .map_err(InfraError::from)
        })
    }

    fn supports_source_lookup(&self) -> bool {
        true
    }

    fn find_by_source(
        &self,
        source_account: &str,
        source_email_ts: &str,
    ) -> Result<Option<ExtractedTask>, InfraError> {
        self.query_one(
            "source_account = ?1 AND source_email_ts = ?2",
            params![source_account, source_email_ts],
        )
    }

    fn find_by_source_email_ts(
        &self,
        source_email_ts: &str,
    ) -> Result<Option<ExtractedTask>, InfraError> {
        self.query_one("source_email_ts = ?1", params![source_email_ts])
    }

    fn find_by_source_account(
        &self,
        source_account: &str,
    ) -> Result<Option<ExtractedTask>, InfraError> {
        self.query_one("source_account = ?1", params![source_account])
    }
}

fn extracted_from_row(row: &Row<'_>) -> rusqlite::Result<ExtractedTask> {
    Ok(ExtractedTask {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        date: row.get(3)?,
        time: row.get(4)?,
        source_subject: row.get(5)?,
        source_from: row.get(6)?,
        confidence: row.get(7)?,
        source_account: row.get(8)?,
        source_email_ts: row.get(9)?,
        added_to_calendar: row.get(10)?,
        created_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn repository() -> SqliteExtractedTaskRepository {
        SqliteExtractedTaskRepository::new(Arc::new(Database::in_memory()))
    }

    fn extracted(id: &str, account: Option<&str>, ts: Option<&str>) -> ExtractedTask {
        ExtractedTask {
            id: id.to_string(),
            title: format!("Item {id}"),
            description: None,
            date: Some("2024-01-10".to_string()),
            time: None,
            source_subject: Some("Subject".to_string()),
            source_from: None,
            confidence: Some(0.9),
            source_account: account.map(ToOwned::to_owned),
            source_email_ts: ts.map(ToOwned::to_owned),
            added_to_calendar: false,
            created_at: DateTime::parse_from_rfc3339("2024-01-01T10:00:00Z")
                .expect("valid time")
                .with_timezone(&Utc),
        }
    }

    #[test]
    fn source_lookups_match_expected_columns() {
        let repository = repository();
        repository
            .insert(&extracted("e1", Some("foo@bar.com"), Some("2024-01-01T10:00:00")))
            .expect("insert");
        repository
            .insert(&extracted("e2", Some("a@x.com"), None))
            .expect("insert");

        let by_pair = repository
            .find_by_source("foo@bar.com", "2024-01-01T10:00:00")
            .expect("pair lookup");
        assert_eq!(by_pair.map(|task| task.id), Some("e1".to_string()));

        let by_ts = repository
            .find_by_source_email_ts("2024-01-01T10:00:00")
            .expect("ts lookup");
        assert_eq!(by_ts.map(|task| task.id), Some("e1".to_string()));

        let by_account = repository
            .find_by_source_account("a@x.com")
            .expect("account lookup");
        assert_eq!(by_account.map(|task| task.id), Some("e2".to_string()));

        assert_eq!(
            repository
                .find_by_source("foo@bar.com", "2099-01-01T00:00:00")
                .expect("miss"),
            None
        );
    }

    #[test]
    fn subject_key_matches_null_columns() {
        let repository = repository();
        let mut item = extracted("e1", None, None);
        item.source_subject = None;
        repository.insert(&item).expect("insert");

        let found = repository
            .find_by_subject_key(None, "Item e1", None)
            .expect("lookup");
        assert_eq!(found.map(|task| task.id), Some("e1".to_string()));
        assert_eq!(
            repository
                .find_by_subject_key(Some("a@x.com"), "Item e1", None)
                .expect("lookup"),
            None
        );
    }

    #[test]
    fn list_filters_by_account() {
        let repository = repository();
        repository.insert(&extracted("e1", Some("a@x.com"), None)).expect("insert");
        repository.insert(&extracted("e2", Some("b@y.com"), None)).expect("insert");

        assert_eq!(repository.list(None).expect("list").len(), 2);
        let only_a = repository.list(Some("a@x.com")).expect("list");
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].id, "e1");
    }

    #[test]
    fn pending_range_skips_calendar_items() {
        let repository = repository();
        repository.insert(&extracted("e1", None, None)).expect("insert");
        let mut added = extracted("e2", None, None);
        added.added_to_calendar = true;
        repository.insert(&added).expect("insert");

        let start = NaiveDate::from_ymd_opt(2024, 1, 1).expect("date");
        let end = NaiveDate::from_ymd_opt(2024, 1, 31).expect("date");
        let pending = repository.list_pending_between(start, end).expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "e1");
    }

    #[test]
    fn title_fragment_lookup_folds_non_ascii_case() {
        let repository = repository();
        let mut first = extracted("e1", None, None);
        first.title = "Straße räumen".to_string();
        repository.insert(&first).expect("insert");
        let mut second = extracted("e2", None, None);
        second.title = "Ärztin anrufen".to_string();
        repository.insert(&second).expect("insert");

        let found = repository.find_by_title_fragment("ÄRZTIN").expect("lookup");
        assert_eq!(found.map(|task| task.id), Some("e2".to_string()));
        let found = repository.find_by_title_fragment("RÄUMEN").expect("lookup");
        assert_eq!(found.map(|task| task.id), Some("e1".to_string()));
    }
}
