use crate::domain::models::Note;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::Database;
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SqliteNoteRepository {
    database: Arc<Database>,
}

impl SqliteNoteRepository {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    pub fn list(&self) -> Result<Vec<Note>, InfraError> {
        self.database.with_connection(|connection| {
            let mut statement = connection.prepare(
                "SELECT id, title, content, created_at, updated_at FROM notes
                 ORDER BY updated_at DESC, rowid DESC",
            )?;
            let notes = statement
                .query_map([], note_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(notes)
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<Note>, InfraError> {
        self.database.with_connection(|connection| {
            Ok(connection
                .query_row(
                    "SELECT id, title, content, created_at, updated_at FROM notes WHERE id = ?1",
                    params![id],
                    note_from_row,
                )
                .optional()?)
        })
    }

    pub fn insert(&self, note: &Note) -> Result<(), InfraError> {
        self.database.with_connection(|connection| {
            connection.execute(
                "INSERT INTO notes (id, title, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![note.id, note.title, note.content, note.created_at, note.updated_at],
            )?;
            Ok(())
        })
    }

    pub fn update(&self, note: &Note) -> Result<bool, InfraError> {
        self.database.with_connection(|connection| {
            let changed = connection.execute(
                "UPDATE notes SET title = ?2, content = ?3, updated_at = ?4 WHERE id = ?1",
                params![note.id, note.title, note.content, note.updated_at],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn delete(&self, id: &str) -> Result<bool, InfraError> {
        self.database.with_connection(|connection| {
            let changed = connection.execute("DELETE FROM notes WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
    }
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}
