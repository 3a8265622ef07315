use crate::domain::models::Task;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_lookup::RecordLookup;
use crate::infrastructure::storage::Database;
use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use std::sync::Arc;

const CARRY_OVER_BATCH: usize = 500;

const TASK_COLUMNS: &str =
    "id, text, description, due, date, color, completed, carry_over, created_at";

#[derive(Debug, Clone)]
pub struct SqliteTaskRepository {
    database: Arc<Database>,
}

impl SqliteTaskRepository {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    pub fn list_all(&self) -> Result<Vec<Task>, InfraError> {
        self.database.with_connection(|connection| {
            let mut statement = connection
                .prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY rowid"))?;
            let tasks = statement
                .query_map([], task_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    /// Tasks whose `date` lies in the inclusive range, ordered by day and
    /// time of day.
    pub fn list_dated_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Task>, InfraError> {
        self.database.with_connection(|connection| {
            let mut statement = connection.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE date >= ?1 AND date <= ?2
                 ORDER BY date, due, rowid"
            ))?;
            let tasks = statement
                .query_map(params![start.to_string(), end.to_string()], task_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<Task>, InfraError> {
        self.database.with_connection(|connection| {
            Ok(connection
                .query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                    params![id],
                    task_from_row,
                )
                .optional()?)
        })
    }

    pub fn insert(&self, task: &Task) -> Result<(), InfraError> {
        self.database.with_connection(|connection| {
            connection.execute(
                &format!(
                    "INSERT INTO tasks ({TASK_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    task.id,
                    task.text,
                    task.description,
                    task.due,
                    task.date,
                    task.color,
                    task.completed,
                    task.carry_over,
                    task.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn update(&self, task: &Task) -> Result<bool, InfraError> {
        self.database.with_connection(|connection| {
            let changed = connection.execute(
                "UPDATE tasks SET
                   text = ?2, description = ?3, due = ?4, date = ?5, color = ?6,
                   completed = ?7, carry_over = ?8
                 WHERE id = ?1",
                params![
                    task.id,
                    task.text,
                    task.description,
                    task.due,
                    task.date,
                    task.color,
                    task.completed,
                    task.carry_over,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn delete(&self, id: &str) -> Result<bool, InfraError> {
        self.database.with_connection(|connection| {
            let changed = connection.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
    }

    /// Sets the carry-over flag on the given incomplete tasks. Ids are bound
    /// in batches inside one transaction; rows already flagged are left
    /// alone, so repeating the call changes nothing.
    pub fn mark_carried_over(&self, ids: &[String]) -> Result<usize, InfraError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.database.with_connection(|connection| {
            let transaction = connection.unchecked_transaction()?;
            let mut changed = 0;
            for batch in ids.chunks(CARRY_OVER_BATCH) {
                let placeholders = (1..=batch.len())
                    .map(|index| format!("?{index}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                changed += transaction.execute(
                    &format!(
                        "UPDATE tasks SET carry_over = 1
                         WHERE completed = 0 AND carry_over = 0 AND id IN ({placeholders})"
                    ),
                    params_from_iter(batch.iter()),
                )?;
            }
            transaction.commit()?;
            Ok(changed)
        })
    }
}

impl RecordLookup for SqliteTaskRepository {
    type Record = Task;

    fn find_by_id(&self, id: &str) -> Result<Option<Task>, InfraError> {
        self.get(id)
    }

    fn find_by_title_fragment(&self, fragment: &str) -> Result<Option<Task>, InfraError> {
        let needle = fragment.to_lowercase();
        Ok(self
            .list_all()?
            .into_iter()
            .find(|task| task.text.to_lowercase().contains(&needle)))
    }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        text: row.get(1)?,
        description: row.get(2)?,
        due: row.get(3)?,
        date: row.get(4)?,
        color: row.get(5)?,
        completed: row.get(6)?,
        carry_over: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn repository() -> SqliteTaskRepository {
        SqliteTaskRepository::new(Arc::new(Database::in_memory()))
    }

    fn task(id: &str, text: &str, date: Option<&str>) -> Task {
        Task {
            id: id.to_string(),
            text: text.to_string(),
            description: None,
            due: None,
            date: date.map(ToOwned::to_owned),
            color: None,
            completed: false,
            carry_over: false,
            created_at: DateTime::parse_from_rfc3339("2024-01-01T08:00:00Z")
                .expect("valid time")
                .with_timezone(&Utc),
        }
    }

    #[test]
    fn insert_get_update_delete_roundtrip() {
        let repository = repository();
        let mut created = task("t1", "Pay rent", Some("2024-01-01"));
        repository.insert(&created).expect("insert");

        assert_eq!(repository.get("t1").expect("get"), Some(created.clone()));

        created.completed = true;
        created.due = Some("09:00".to_string());
        assert!(repository.update(&created).expect("update"));
        assert_eq!(repository.get("t1").expect("get"), Some(created));

        assert!(repository.delete("t1").expect("delete"));
        assert!(!repository.delete("t1").expect("second delete"));
        assert_eq!(repository.get("t1").expect("get"), None);
    }

    #[test]
    fn mark_carried_over_is_idempotent_and_skips_completed() {
        let repository = repository();
        repository.insert(&task("open", "Open", Some("2024-01-01"))).expect("insert");
        let mut done = task("done", "Done", Some("2024-01-01"));
        done.completed = true;
        repository.insert(&done).expect("insert");

        let ids = vec!["open".to_string(), "done".to_string()];
        assert_eq!(repository.mark_carried_over(&ids).expect("first sweep"), 1);
        assert_eq!(repository.mark_carried_over(&ids).expect("second sweep"), 0);
        assert_eq!(repository.mark_carried_over(&[]).expect("empty sweep"), 0);

        let stored = repository.get("open").expect("get").expect("exists");
        assert!(stored.carry_over);
        let untouched = repository.get("done").expect("get").expect("exists");
        assert!(!untouched.carry_over);
    }

    #[test]
    fn list_all_keeps_insertion_order() {
        let repository = repository();
        for id in ["c", "a", "b"] {
            repository.insert(&task(id, id, None)).expect("insert");
        }
        let ids = repository
            .list_all()
            .expect("list")
            .into_iter()
            .map(|task| task.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn list_dated_between_is_inclusive() {
        let repository = repository();
        repository.insert(&task("before", "x", Some("2024-01-31"))).expect("insert");
        repository.insert(&task("first", "x", Some("2024-02-01"))).expect("insert");
        repository.insert(&task("last", "x", Some("2024-02-29"))).expect("insert");
        repository.insert(&task("undated", "x", None)).expect("insert");

        let start = NaiveDate::from_ymd_opt(2024, 2, 1).expect("date");
        let end = NaiveDate::from_ymd_opt(2024, 2, 29).expect("date");
        let ids = repository
            .list_dated_between(start, end)
            .expect("list")
            .into_iter()
            .map(|task| task.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["first", "last"]);
    }

    #[test]
    fn title_fragment_lookup_is_case_insensitive() {
        let repository = repository();
        repository.insert(&task("t1", "Call the Bank", None)).expect("insert");

        let found = repository
            .find_by_title_fragment("call the bank")
            .expect("lookup");
        assert_eq!(found.map(|task| task.id), Some("t1".to_string()));
        assert_eq!(repository.find_by_title_fragment("dentist").expect("lookup"), None);
        assert!(!repository.supports_source_lookup());
    }

    #[test]
    fn title_fragment_lookup_folds_non_ascii_case() {
        let repository = repository();
        repository.insert(&task("t1", "Überweisung Miete", None)).expect("insert");

        for candidate in ["überweisung", "ÜBERWEISUNG miete", "MIETE"] {
            let found = repository.find_by_title_fragment(candidate).expect("lookup");
            assert_eq!(found.map(|task| task.id), Some("t1".to_string()), "{candidate}");
        }
    }

    #[test]
    fn mark_carried_over_handles_more_ids_than_one_statement_binds() {
        let repository = repository();
        let ids = (0..40_000).map(|index| format!("t{index}")).collect::<Vec<_>>();
        repository.insert(&task("t39999", "Last", Some("2024-01-01"))).expect("insert");
        repository.insert(&task("t7", "Early", Some("2024-01-01"))).expect("insert");

        assert_eq!(repository.mark_carried_over(&ids).expect("sweep"), 2);
        assert!(repository.get("t39999").expect("get").expect("exists").carry_over);
        assert!(repository.get("t7").expect("get").expect("exists").carry_over);
    }
}
