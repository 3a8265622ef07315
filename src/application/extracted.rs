use crate::application::commands::{normalize_optional, required_text, AppState, DeletedResponse};
use crate::application::resolver::FallbackResolver;
use crate::domain::candidate::is_email;
use crate::domain::models::{DocumentId, ExtractedTask, Task};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_lookup::RecordLookup;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One item as the analyzer or a client sends it. The analyzer's own
/// storage writes `_id` and `_source_account`; both are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedTaskInput {
    #[serde(default, alias = "_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub source_subject: Option<String>,
    #[serde(default)]
    pub source_from: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, alias = "_source_account")]
    pub source_account: Option<String>,
    #[serde(default)]
    pub source_email_ts: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedTaskPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default, rename = "addedToCalendar")]
    pub added_to_calendar: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct IngestResponse {
    pub inserted: u64,
    pub updated: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AddToCalendarResponse {
    pub task: Task,
    /// `None` once the extracted record has been removed.
    pub extracted: Option<ExtractedTask>,
    pub removed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpsertOutcome {
    Inserted,
    Updated,
}

pub fn list_extracted_impl(
    state: &AppState,
    account: Option<String>,
) -> Result<Vec<ExtractedTask>, InfraError> {
    let account = normalize_optional(account);
    state.extracted.list(account.as_deref())
}

pub fn create_extracted_impl(
    state: &AppState,
    input: ExtractedTaskInput,
) -> Result<ExtractedTask, InfraError> {
    let record = build_record(state, input, None)?;
    if state.extracted.get(&record.id)?.is_some() {
        return Err(InfraError::validation(format!(
            "extracted task already exists: {}",
            record.id
        )));
    }

    state.extracted.insert(&record)?;
    if let Some(account) = record.source_account.as_deref() {
        register_accounts(state, [account]);
    }
    tracing::info!(extracted_id = %record.id, "created extracted task");
    Ok(record)
}

/// Bulk upsert. Accepts an array of items, `{"accounts": {email: [items]}}`
/// or a bare `{email: [items]}` mapping. Bad items are counted and skipped.
pub fn ingest_extracted_impl(
    state: &AppState,
    payload: serde_json::Value,
) -> Result<IngestResponse, InfraError> {
    let mut response = IngestResponse::default();
    let mut seen_accounts = BTreeSet::new();

    for (account, item) in flatten_payload(payload, &mut response)? {
        match upsert_item(state, item, account.as_deref()) {
            Ok((record, outcome)) => {
                match outcome {
                    UpsertOutcome::Inserted => response.inserted += 1,
                    UpsertOutcome::Updated => response.updated += 1,
                }
                if let Some(account) = record.source_account {
                    seen_accounts.insert(account);
                }
            }
            Err(error) => {
                tracing::warn!(account = ?account, %error, "skipped extracted item");
                response.failed += 1;
            }
        }
    }

    register_accounts(state, seen_accounts.iter().map(String::as_str));
    tracing::info!(
        inserted = response.inserted,
        updated = response.updated,
        failed = response.failed,
        "ingested extracted tasks"
    );
    Ok(response)
}

pub fn update_extracted_impl(
    state: &AppState,
    candidate: String,
    patch: ExtractedTaskPatch,
) -> Result<ExtractedTask, InfraError> {
    let mut record = resolve_extracted(state, &candidate)?;

    if let Some(title) = patch.title {
        record.title = required_text(Some(title), "title")?;
    }
    if let Some(description) = patch.description {
        record.description = normalize_optional(Some(description));
    }
    if let Some(date) = patch.date {
        record.date = normalize_optional(Some(date));
    }
    if let Some(time) = patch.time {
        record.time = normalize_optional(Some(time));
    }
    if let Some(added) = patch.added_to_calendar {
        record.added_to_calendar = added;
    }
    record.validate().map_err(InfraError::Validation)?;

    save_extracted(state, &record)?;
    tracing::info!(extracted_id = %record.id, "updated extracted task");
    Ok(record)
}

/// Copies an extracted item onto the daily task list and marks it as
/// scheduled. With `remove` the extracted record is deleted afterwards.
pub fn add_extracted_to_calendar_impl(
    state: &AppState,
    candidate: String,
    remove: bool,
) -> Result<AddToCalendarResponse, InfraError> {
    let mut record = resolve_extracted(state, &candidate)?;

    let task = Task {
        id: DocumentId::generate(state.now()).to_string(),
        text: record.title.clone(),
        description: record.description.clone(),
        due: record.time.clone(),
        date: Some(record.date.clone().unwrap_or_else(|| state.today().to_string())),
        color: None,
        completed: false,
        carry_over: false,
        created_at: state.now(),
    };
    task.validate().map_err(InfraError::Validation)?;
    state.tasks.insert(&task)?;

    let extracted = if remove {
        state.extracted.delete(&record.id)?;
        None
    } else {
        record.added_to_calendar = true;
        save_extracted(state, &record)?;
        Some(record.clone())
    };

    tracing::info!(extracted_id = %record.id, task_id = %task.id, remove, "added extracted task to calendar");
    Ok(AddToCalendarResponse {
        task,
        extracted,
        removed: remove,
    })
}

pub fn delete_extracted_impl(state: &AppState, candidate: String) -> Result<DeletedResponse, InfraError> {
    let record = resolve_extracted(state, &candidate)?;
    if !state.extracted.delete(&record.id)? {
        return Err(InfraError::not_found(format!(
            "extracted task not found: {}",
            candidate.trim()
        )));
    }
    tracing::info!(extracted_id = %record.id, "deleted extracted task");
    Ok(DeletedResponse { id: record.id })
}

fn resolve_extracted(state: &AppState, candidate: &str) -> Result<ExtractedTask, InfraError> {
    let resolved = FallbackResolver::new(&state.extracted)
        .resolve(candidate)
        .ok_or_else(|| {
            InfraError::not_found(format!("extracted task not found: {}", candidate.trim()))
        })?;
    tracing::info!(
        candidate = candidate.trim(),
        extracted_id = %resolved.record.id,
        strategy = resolved.strategy.as_str(),
        "resolved extracted task"
    );
    Ok(resolved.record)
}

fn save_extracted(state: &AppState, record: &ExtractedTask) -> Result<(), InfraError> {
    if !state.extracted.update(record)? {
        return Err(InfraError::not_found(format!(
            "extracted task not found: {}",
            record.id
        )));
    }
    Ok(())
}

/// Pairs every item with the account key it was filed under, if any.
/// Mapping entries that are not lists count as one failure each. Keys next
/// to an `accounts` mapping are ignored.
fn flatten_payload(
    payload: serde_json::Value,
    response: &mut IngestResponse,
) -> Result<Vec<(Option<String>, serde_json::Value)>, InfraError> {
    let mapping = match payload {
        serde_json::Value::Array(items) => {
            return Ok(items.into_iter().map(|item| (None, item)).collect());
        }
        serde_json::Value::Object(mut object) => match object.remove("accounts") {
            Some(serde_json::Value::Object(accounts)) => {
                for key in object.keys() {
                    tracing::warn!(key = %key, "ignored key beside accounts mapping");
                }
                accounts
            }
            Some(other) => {
                return Err(InfraError::validation(format!(
                    "accounts must be a mapping of account to items, got {}",
                    json_kind(&other)
                )));
            }
            None => object,
        },
        other => {
            return Err(InfraError::validation(format!(
                "ingest payload must be a list or an account mapping, got {}",
                json_kind(&other)
            )));
        }
    };

    let mut items = Vec::new();
    for (account, entries) in mapping {
        match entries {
            serde_json::Value::Array(entries) => {
                let account = normalize_optional(Some(account));
                items.extend(entries.into_iter().map(|item| (account.clone(), item)));
            }
            other => {
                tracing::warn!(account = %account, kind = json_kind(&other), "account entry is not a list");
                response.failed += 1;
            }
        }
    }
    Ok(items)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "list",
        serde_json::Value::Object(_) => "object",
    }
}

fn upsert_item(
    state: &AppState,
    item: serde_json::Value,
    account: Option<&str>,
) -> Result<(ExtractedTask, UpsertOutcome), InfraError> {
    let input: ExtractedTaskInput = serde_json::from_value(item)
        .map_err(|error| InfraError::validation(format!("malformed extracted item: {error}")))?;
    let mut record = build_record(state, input.clone(), account)?;

    let explicit_id = normalize_optional(input.id);
    let existing = match explicit_id.as_deref() {
        Some(id) => state.extracted.get(id)?,
        None => None,
    };
    let existing = match existing {
        Some(found) => Some(found),
        None => match record.source_key() {
            Some((source_account, ts)) => state.extracted.find_by_source(source_account, ts)?,
            None => state.extracted.find_by_subject_key(
                record.source_account.as_deref(),
                &record.title,
                record.source_subject.as_deref(),
            )?,
        },
    };

    match existing {
        Some(existing) => {
            // Fields the item leaves out keep their stored values.
            record.description = record.description.or(existing.description);
            record.date = record.date.or(existing.date);
            record.time = record.time.or(existing.time);
            record.source_subject = record.source_subject.or(existing.source_subject);
            record.source_from = record.source_from.or(existing.source_from);
            record.confidence = record.confidence.or(existing.confidence);
            record.source_account = record.source_account.or(existing.source_account);
            record.source_email_ts = record.source_email_ts.or(existing.source_email_ts);
            record.id = existing.id;
            record.created_at = existing.created_at;
            record.added_to_calendar = existing.added_to_calendar;
            state.extracted.update(&record)?;
            Ok((record, UpsertOutcome::Updated))
        }
        None => {
            state.extracted.insert(&record)?;
            Ok((record, UpsertOutcome::Inserted))
        }
    }
}

fn build_record(
    state: &AppState,
    input: ExtractedTaskInput,
    account: Option<&str>,
) -> Result<ExtractedTask, InfraError> {
    let now = state.now();
    let source_account = account
        .map(ToOwned::to_owned)
        .or_else(|| normalize_optional(input.source_account));
    let record = ExtractedTask {
        id: normalize_optional(input.id).unwrap_or_else(|| DocumentId::generate(now).to_string()),
        title: required_text(input.title, "title")?,
        description: normalize_optional(input.description),
        date: normalize_optional(input.date),
        time: normalize_optional(input.time),
        source_subject: normalize_optional(input.source_subject),
        source_from: normalize_optional(input.source_from),
        confidence: input.confidence,
        source_account,
        source_email_ts: normalize_optional(input.source_email_ts),
        added_to_calendar: false,
        created_at: now,
    };
    record.validate().map_err(InfraError::Validation)?;
    Ok(record)
}

fn register_accounts<'a, I>(state: &AppState, accounts: I)
where
    I: IntoIterator<Item = &'a str>,
{
    for account in accounts {
        if !is_email(account) {
            tracing::debug!(account, "not registering non-email source account");
            continue;
        }
        match state.accounts.insert_if_missing(account, state.now()) {
            Ok(true) => tracing::info!(email = account, "registered source account"),
            Ok(false) => {}
            Err(error) => tracing::warn!(email = account, %error, "failed to register source account"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::commands::test_support::TempWorkspace;
    use crate::application::commands::{calendar_impl, list_accounts_impl, list_tasks_impl};
    use serde_json::json;

    #[test]
    fn ingest_accounts_mapping_sets_source_account() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state_on("2024-01-05");

        let response = ingest_extracted_impl(
            &state,
            json!({ "accounts": { "a@x.com": [{ "title": "Call bank" }] } }),
        )
        .expect("ingest");
        assert_eq!(response, IngestResponse { inserted: 1, updated: 0, failed: 0 });

        let stored = list_extracted_impl(&state, None).expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, "Call bank");
        assert_eq!(stored[0].source_account.as_deref(), Some("a@x.com"));

        let accounts = list_accounts_impl(&state).expect("accounts");
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].email, "a@x.com");
    }

    #[test]
    fn ingest_rejects_accounts_that_is_not_a_mapping() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state_on("2024-01-05");

        let result = ingest_extracted_impl(
            &state,
            json!({ "accounts": [{ "title": "Call bank", "source_account": "a@x.com" }] }),
        );
        assert!(matches!(result, Err(InfraError::Validation(_))));
        assert!(list_extracted_impl(&state, None).expect("list").is_empty());
        assert!(list_accounts_impl(&state).expect("accounts").is_empty());
    }

    #[test]
    fn ingest_ignores_keys_beside_accounts_mapping() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state_on("2024-01-05");

        let response = ingest_extracted_impl(
            &state,
            json!({
                "accounts": { "a@x.com": [{ "title": "Call bank" }] },
                "b@y.com": [{ "title": "Ignored" }],
                "missing_auth": []
            }),
        )
        .expect("ingest");
        assert_eq!(response, IngestResponse { inserted: 1, updated: 0, failed: 0 });

        let stored = list_extracted_impl(&state, None).expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].source_account.as_deref(), Some("a@x.com"));
    }

    #[test]
    fn ingest_upserts_by_source_key_and_counts_failures() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state_on("2024-01-05");

        let first = ingest_extracted_impl(
            &state,
            json!({
                "foo@bar.com": [
                    { "title": "Submit form", "source_email_ts": "2024-01-01T10:00:00", "date": "2024-01-10" },
                    { "title": "Reply to Sam", "source_subject": "Lunch?" },
                    { "description": "no title" }
                ],
                "b@y.com": "not a list"
            }),
        )
        .expect("first ingest");
        assert_eq!(first, IngestResponse { inserted: 2, updated: 0, failed: 2 });

        let original = state
            .extracted
            .find_by_source("foo@bar.com", "2024-01-01T10:00:00")
            .expect("lookup")
            .expect("stored");

        let second = ingest_extracted_impl(
            &state,
            json!([
                { "title": "Submit scholarship form", "_source_account": "foo@bar.com",
                  "source_email_ts": "2024-01-01T10:00:00" },
                { "title": "Reply to Sam", "source_subject": "Lunch?", "source_account": "foo@bar.com" },
                { "title": "Pay", "date": "tomorrow" },
                42
            ]),
        )
        .expect("second ingest");
        assert_eq!(second, IngestResponse { inserted: 0, updated: 2, failed: 2 });

        let updated = state.extracted.get(&original.id).expect("get").expect("exists");
        assert_eq!(updated.title, "Submit scholarship form");
        assert_eq!(updated.created_at, original.created_at);
        assert_eq!(updated.date.as_deref(), Some("2024-01-10"));
        assert_eq!(list_extracted_impl(&state, Some("foo@bar.com".to_string())).expect("list").len(), 2);
    }

    #[test]
    fn ingest_keeps_explicit_ids_and_rejects_scalars() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state_on("2024-01-05");

        ingest_extracted_impl(&state, json!([{ "_id": "legacy-1", "title": "Imported" }]))
            .expect("ingest");
        assert!(state.extracted.get("legacy-1").expect("get").is_some());

        assert!(matches!(
            ingest_extracted_impl(&state, json!("nope")),
            Err(InfraError::Validation(_))
        ));
    }

    #[test]
    fn composite_id_resolves_for_update_and_delete() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state_on("2024-01-05");
        ingest_extracted_impl(
            &state,
            json!({ "foo@bar.com": [{ "title": "Submit form", "source_email_ts": "2024-01-01T10:00:00" }] }),
        )
        .expect("ingest");

        let updated = update_extracted_impl(
            &state,
            "foo@bar.com_2024-01-01T10:00:00".to_string(),
            ExtractedTaskPatch {
                time: Some("17:00".to_string()),
                ..ExtractedTaskPatch::default()
            },
        )
        .expect("update");
        assert_eq!(updated.time.as_deref(), Some("17:00"));

        let deleted =
            delete_extracted_impl(&state, "foo@bar.com_2024-01-01T10:00:00".to_string()).expect("delete");
        assert_eq!(deleted.id, updated.id);
        assert!(matches!(
            delete_extracted_impl(&state, "foo@bar.com_2024-01-01T10:00:00".to_string()),
            Err(InfraError::NotFound(_))
        ));
    }

    #[test]
    fn add_to_calendar_creates_task_and_optionally_removes() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state_on("2024-01-05");
        ingest_extracted_impl(
            &state,
            json!([
                { "title": "Dentist", "date": "2024-01-12", "time": "15:00" },
                { "title": "Renew lease" }
            ]),
        )
        .expect("ingest");

        let before = calendar_impl(&state, None, None).expect("calendar");
        assert_eq!(before.days["2024-01-12"].extracted.len(), 1);

        let kept = add_extracted_to_calendar_impl(&state, "dentist".to_string(), false).expect("add");
        assert_eq!(kept.task.text, "Dentist");
        assert_eq!(kept.task.date.as_deref(), Some("2024-01-12"));
        assert_eq!(kept.task.due.as_deref(), Some("15:00"));
        assert!(kept.extracted.as_ref().is_some_and(|record| record.added_to_calendar));

        let after = calendar_impl(&state, None, None).expect("calendar");
        assert!(after.days["2024-01-12"].extracted.is_empty());
        assert_eq!(after.days["2024-01-12"].tasks.len(), 1);

        let removed = add_extracted_to_calendar_impl(&state, "renew lease".to_string(), true).expect("add");
        assert!(removed.removed);
        assert_eq!(removed.task.date.as_deref(), Some("2024-01-05"));
        assert_eq!(list_extracted_impl(&state, None).expect("list").len(), 1);
        assert_eq!(list_tasks_impl(&state, None).expect("tasks").today.len(), 1);
    }

    #[test]
    fn create_rejects_duplicate_ids() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state_on("2024-01-05");
        let input = ExtractedTaskInput {
            id: Some("x-1".to_string()),
            title: Some("Pick up parcel".to_string()),
            source_account: Some("a@x.com".to_string()),
            ..ExtractedTaskInput::default()
        };

        let created = create_extracted_impl(&state, input.clone()).expect("create");
        assert_eq!(created.id, "x-1");
        assert_eq!(list_accounts_impl(&state).expect("accounts").len(), 1);
        assert!(matches!(
            create_extracted_impl(&state, input),
            Err(InfraError::Validation(_))
        ));
    }
}
