use crate::application::analyzer::RetryPolicy;
use crate::application::bootstrap::BootstrapResult;
use crate::application::resolver::FallbackResolver;
use crate::domain::bucketing::bucket;
use crate::domain::candidate::is_email;
use crate::domain::models::{parse_date, DocumentId, ExtractedTask, Note, SourceAccount, Task};
use crate::infrastructure::account_repository::SqliteAccountRepository;
use crate::infrastructure::analyzer_client::{AnalyzerClient, ReqwestAnalyzerClient};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::extracted_task_repository::SqliteExtractedTaskRepository;
use crate::infrastructure::note_repository::SqliteNoteRepository;
use crate::infrastructure::storage::Database;
use crate::infrastructure::task_repository::SqliteTaskRepository;
use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

const MAX_CALENDAR_RANGE_DAYS: i64 = 62;
const DEFAULT_NOTE_TITLE: &str = "Untitled";
const INTERNAL_ERROR_MESSAGE: &str = "internal server error";

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
pub type TodayProvider = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct AppState {
    config: AppConfig,
    pub(crate) tasks: SqliteTaskRepository,
    pub(crate) extracted: SqliteExtractedTaskRepository,
    pub(crate) accounts: SqliteAccountRepository,
    pub(crate) notes: SqliteNoteRepository,
    analyzer: Option<Arc<dyn AnalyzerClient>>,
    retry_policy: RetryPolicy,
    now_provider: NowProvider,
    today_provider: TodayProvider,
}

impl AppState {
    pub fn new(bootstrap: &BootstrapResult, config: AppConfig) -> Result<Self, InfraError> {
        let analyzer = match config.analyzer_base_url.as_deref() {
            Some(base_url) => {
                Some(Arc::new(ReqwestAnalyzerClient::new(base_url)?) as Arc<dyn AnalyzerClient>)
            }
            None => None,
        };
        let database = Arc::new(Database::open(&bootstrap.database_path));

        Ok(Self {
            config,
            tasks: SqliteTaskRepository::new(Arc::clone(&database)),
            extracted: SqliteExtractedTaskRepository::new(Arc::clone(&database)),
            accounts: SqliteAccountRepository::new(Arc::clone(&database)),
            notes: SqliteNoteRepository::new(database),
            analyzer,
            retry_policy: RetryPolicy::default(),
            now_provider: Arc::new(Utc::now),
            today_provider: Arc::new(|| Local::now().date_naive()),
        })
    }

    pub fn with_analyzer_client(mut self, client: Arc<dyn AnalyzerClient>) -> Self {
        self.analyzer = Some(client);
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_today_provider(mut self, today_provider: TodayProvider) -> Self {
        self.today_provider = today_provider;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub(crate) fn analyzer(&self) -> Result<Arc<dyn AnalyzerClient>, InfraError> {
        self.analyzer.clone().ok_or_else(|| {
            InfraError::InvalidConfig("analyzer base url is not configured".to_string())
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    /// The user's calendar day. Bucketing compares against this, never
    /// against the UTC date of `now`.
    pub fn today(&self) -> NaiveDate {
        (self.today_provider)()
    }

    /// Logs a failed command and returns the message that may be shown to
    /// the caller.
    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        if error.is_client_error() {
            tracing::info!(command, %error, "command rejected");
            error.to_string()
        } else {
            tracing::error!(command, %error, "command failed");
            INTERNAL_ERROR_MESSAGE.to_string()
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeletedResponse {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskListResponse {
    pub date: String,
    pub today: Vec<Task>,
    pub carry_over: Vec<Task>,
    pub completed: Vec<Task>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Fields left out are untouched; an empty string clears an optional field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub carry_over: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoteInput {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUpdate {
    pub email: String,
    #[serde(default)]
    pub last_email_ts: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeletedAccountResponse {
    pub email: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CalendarDay {
    pub tasks: Vec<Task>,
    pub extracted: Vec<ExtractedTask>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CalendarResponse {
    pub start: String,
    pub end: String,
    pub days: BTreeMap<String, CalendarDay>,
}

pub fn list_tasks_impl(state: &AppState, date: Option<String>) -> Result<TaskListResponse, InfraError> {
    let today = state.today();
    let view_date = match normalize_optional(date) {
        Some(raw) => parse_date(&raw)
            .ok_or_else(|| InfraError::validation(format!("date must be YYYY-MM-DD, got '{raw}'")))?,
        None => today,
    };

    let buckets = bucket(state.tasks.list_all()?, view_date);
    if view_date == today && !buckets.newly_carried.is_empty() {
        match state.tasks.mark_carried_over(&buckets.newly_carried) {
            Ok(changed) => tracing::info!(changed, "carried over overdue tasks"),
            Err(error) => tracing::warn!(%error, "carry-over sweep failed"),
        }
    }

    Ok(TaskListResponse {
        date: view_date.to_string(),
        today: buckets.due,
        carry_over: buckets.carried,
        completed: buckets.done,
    })
}

pub fn create_task_impl(state: &AppState, request: CreateTaskRequest) -> Result<Task, InfraError> {
    let text = required_text(request.text, "text")?;
    let task = Task {
        id: DocumentId::generate(state.now()).to_string(),
        text,
        description: normalize_optional(request.description),
        due: normalize_optional(request.due),
        date: Some(normalize_optional(request.date).unwrap_or_else(|| state.today().to_string())),
        color: normalize_optional(request.color),
        completed: false,
        carry_over: false,
        created_at: state.now(),
    };
    task.validate().map_err(InfraError::Validation)?;

    state.tasks.insert(&task)?;
    tracing::info!(task_id = %task.id, "created task");
    Ok(task)
}

pub fn update_task_impl(state: &AppState, candidate: String, patch: TaskPatch) -> Result<Task, InfraError> {
    let mut task = resolve_task(state, &candidate)?;

    if let Some(text) = patch.text {
        task.text = required_text(Some(text), "text")?;
    }
    if let Some(description) = patch.description {
        task.description = normalize_optional(Some(description));
    }
    if let Some(due) = patch.due {
        task.due = normalize_optional(Some(due));
    }
    if let Some(date) = patch.date {
        task.date = normalize_optional(Some(date));
    }
    if let Some(color) = patch.color {
        task.color = normalize_optional(Some(color));
    }
    if let Some(completed) = patch.completed {
        task.completed = completed;
    }
    if let Some(carry_over) = patch.carry_over {
        task.carry_over = carry_over;
    }
    task.validate().map_err(InfraError::Validation)?;

    save_task(state, &task)?;
    tracing::info!(task_id = %task.id, "updated task");
    Ok(task)
}

pub fn return_task_to_today_impl(state: &AppState, candidate: String) -> Result<Task, InfraError> {
    let mut task = resolve_task(state, &candidate)?;
    task.date = Some(state.today().to_string());
    task.carry_over = false;

    save_task(state, &task)?;
    tracing::info!(task_id = %task.id, "returned task to today");
    Ok(task)
}

pub fn delete_task_impl(state: &AppState, candidate: String) -> Result<DeletedResponse, InfraError> {
    let task = resolve_task(state, &candidate)?;
    if !state.tasks.delete(&task.id)? {
        return Err(InfraError::not_found(format!("task not found: {}", candidate.trim())));
    }
    tracing::info!(task_id = %task.id, "deleted task");
    Ok(DeletedResponse { id: task.id })
}

fn resolve_task(state: &AppState, candidate: &str) -> Result<Task, InfraError> {
    FallbackResolver::new(&state.tasks)
        .resolve(candidate)
        .map(|resolved| resolved.record)
        .ok_or_else(|| InfraError::not_found(format!("task not found: {}", candidate.trim())))
}

fn save_task(state: &AppState, task: &Task) -> Result<(), InfraError> {
    if !state.tasks.update(task)? {
        return Err(InfraError::not_found(format!("task not found: {}", task.id)));
    }
    Ok(())
}

pub fn list_notes_impl(state: &AppState) -> Result<Vec<Note>, InfraError> {
    state.notes.list()
}

pub fn create_note_impl(state: &AppState, input: NoteInput) -> Result<Note, InfraError> {
    let now = state.now();
    let note = Note {
        id: DocumentId::generate(now).to_string(),
        title: normalize_optional(input.title).unwrap_or_else(|| DEFAULT_NOTE_TITLE.to_string()),
        content: input.content.unwrap_or_default(),
        created_at: now,
        updated_at: now,
    };
    note.validate().map_err(InfraError::Validation)?;

    state.notes.insert(&note)?;
    tracing::info!(note_id = %note.id, "created note");
    Ok(note)
}

pub fn get_note_impl(state: &AppState, id: String) -> Result<Note, InfraError> {
    let id = required_text(Some(id), "id")?;
    state
        .notes
        .get(&id)?
        .ok_or_else(|| InfraError::not_found(format!("note not found: {id}")))
}

pub fn update_note_impl(state: &AppState, id: String, input: NoteInput) -> Result<Note, InfraError> {
    let mut note = get_note_impl(state, id)?;
    if let Some(title) = input.title {
        note.title = normalize_optional(Some(title)).unwrap_or_else(|| DEFAULT_NOTE_TITLE.to_string());
    }
    if let Some(content) = input.content {
        note.content = content;
    }
    note.updated_at = state.now().max(note.created_at);
    note.validate().map_err(InfraError::Validation)?;

    if !state.notes.update(&note)? {
        return Err(InfraError::not_found(format!("note not found: {}", note.id)));
    }
    tracing::info!(note_id = %note.id, "updated note");
    Ok(note)
}

pub fn delete_note_impl(state: &AppState, id: String) -> Result<DeletedResponse, InfraError> {
    let id = required_text(Some(id), "id")?;
    if !state.notes.delete(&id)? {
        return Err(InfraError::not_found(format!("note not found: {id}")));
    }
    tracing::info!(note_id = %id, "deleted note");
    Ok(DeletedResponse { id })
}

pub fn list_accounts_impl(state: &AppState) -> Result<Vec<SourceAccount>, InfraError> {
    state.accounts.list()
}

/// Registers `email` as a source account. An existing account keeps its
/// `lastEmailTs`.
pub fn connect_account_impl(state: &AppState, email: String) -> Result<SourceAccount, InfraError> {
    let email = required_email(&email)?;
    if state.accounts.insert_if_missing(&email, state.now())? {
        tracing::info!(email = %email, "connected source account");
    }
    state
        .accounts
        .get(&email)?
        .ok_or_else(|| InfraError::not_found(format!("account not found: {email}")))
}

pub fn update_account_impl(state: &AppState, update: AccountUpdate) -> Result<SourceAccount, InfraError> {
    let email = required_email(&update.email)?;
    let last_email_ts = normalize_optional(update.last_email_ts);
    if let Some(value) = &last_email_ts {
        validate_email_timestamp(value)?;
    }

    if !state.accounts.set_last_email_ts(&email, last_email_ts.as_deref())? {
        return Err(InfraError::not_found(format!("account not found: {email}")));
    }
    tracing::info!(email = %email, "updated source account");
    state
        .accounts
        .get(&email)?
        .ok_or_else(|| InfraError::not_found(format!("account not found: {email}")))
}

pub fn delete_account_impl(state: &AppState, email: String) -> Result<DeletedAccountResponse, InfraError> {
    let email = required_email(&email)?;
    if !state.accounts.delete(&email)? {
        return Err(InfraError::not_found(format!("account not found: {email}")));
    }
    tracing::info!(email = %email, "deleted source account");
    Ok(DeletedAccountResponse { email })
}

/// Tasks and not-yet-scheduled extracted tasks grouped by day. Without
/// bounds the current month is returned; a missing end means the end of
/// the start's month.
pub fn calendar_impl(
    state: &AppState,
    start: Option<String>,
    end: Option<String>,
) -> Result<CalendarResponse, InfraError> {
    let start = match normalize_optional(start) {
        Some(raw) => parse_bound(&raw, "start")?,
        None => first_of_month(state.today()),
    };
    let end = match normalize_optional(end) {
        Some(raw) => parse_bound(&raw, "end")?,
        None => last_of_month(start),
    };
    if end < start {
        return Err(InfraError::validation("end must not be before start"));
    }
    if (end - start).num_days() + 1 > MAX_CALENDAR_RANGE_DAYS {
        return Err(InfraError::validation(format!(
            "calendar range must not exceed {MAX_CALENDAR_RANGE_DAYS} days"
        )));
    }

    let mut days: BTreeMap<String, CalendarDay> = BTreeMap::new();
    for task in state.tasks.list_dated_between(start, end)? {
        if let Some(date) = task.scheduled_date() {
            days.entry(date.to_string()).or_default().tasks.push(task);
        }
    }
    for extracted in state.extracted.list_pending_between(start, end)? {
        if let Some(date) = extracted.date.as_deref().and_then(parse_date) {
            days.entry(date.to_string()).or_default().extracted.push(extracted);
        }
    }

    Ok(CalendarResponse {
        start: start.to_string(),
        end: end.to_string(),
        days,
    })
}

fn parse_bound(raw: &str, field_name: &str) -> Result<NaiveDate, InfraError> {
    parse_date(raw)
        .ok_or_else(|| InfraError::validation(format!("{field_name} must be YYYY-MM-DD, got '{raw}'")))
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn last_of_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(|next_month| next_month - Duration::days(1))
        .unwrap_or(date)
}

fn validate_email_timestamp(value: &str) -> Result<(), InfraError> {
    let parsed = DateTime::parse_from_rfc3339(value).is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok();
    if !parsed {
        return Err(InfraError::validation(format!(
            "lastEmailTs must be an ISO-8601 timestamp, got '{value}'"
        )));
    }
    Ok(())
}

pub(crate) fn required_email(value: &str) -> Result<String, InfraError> {
    let email = value.trim();
    if !is_email(email) {
        return Err(InfraError::validation(format!("invalid email address: '{email}'")));
    }
    Ok(email.to_string())
}

pub(crate) fn required_text(value: Option<String>, field_name: &str) -> Result<String, InfraError> {
    normalize_optional(value).ok_or_else(|| InfraError::validation(format!("{field_name} is required")))
}

pub(crate) fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::application::bootstrap::bootstrap_workspace;
    use crate::infrastructure::config::load_app_config_with_lookup;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    pub(crate) struct TempWorkspace {
        path: PathBuf,
    }

    impl TempWorkspace {
        pub(crate) fn new() -> Self {
            let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "daybook-command-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp workspace");
            Self { path }
        }

        /// State pinned to `today` with a clock at noon UTC of that day.
        pub(crate) fn app_state_on(&self, today: &str) -> AppState {
            let bootstrap = bootstrap_workspace(&self.path).expect("bootstrap workspace");
            let config =
                load_app_config_with_lookup(&bootstrap.config_dir, |_| None).expect("load config");
            let today = parse_date(today).expect("valid today");
            let now = today
                .and_hms_opt(12, 0, 0)
                .expect("valid noon")
                .and_utc();
            AppState::new(&bootstrap, config)
                .expect("initialize app state")
                .with_today_provider(Arc::new(move || today))
                .with_now_provider(Arc::new(move || now))
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}
