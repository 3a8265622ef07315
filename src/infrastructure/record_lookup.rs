use crate::infrastructure::error::InfraError;

/// Queries the fallback resolver runs against a record store. Source-key
/// lookups only make sense for records ingested from a mailbox; stores
/// without source fields keep the defaults and never match on them.
pub trait RecordLookup: Send + Sync {
    type Record;

    fn find_by_id(&self, id: &str) -> Result<Option<Self::Record>, InfraError>;

    fn find_by_title_fragment(&self, fragment: &str) -> Result<Option<Self::Record>, InfraError>;

    fn supports_source_lookup(&self) -> bool {
        false
    }

    fn find_by_source(
        &self,
        _source_account: &str,
        _source_email_ts: &str,
    ) -> Result<Option<Self::Record>, InfraError> {
        Ok(None)
    }

    fn find_by_source_email_ts(
        &self,
        _source_email_ts: &str,
    ) -> Result<Option<Self::Record>, InfraError> {
        Ok(None)
    }

    fn find_by_source_account(
        &self,
        _source_account: &str,
    ) -> Result<Option<Self::Record>, InfraError> {
        Ok(None)
    }
}
