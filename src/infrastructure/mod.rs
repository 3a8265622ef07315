pub mod account_repository;
pub mod analyzer_client;
pub mod config;
pub mod error;
pub mod extracted_task_repository;
pub mod note_repository;
pub mod record_lookup;
pub mod storage;
pub mod task_repository;
