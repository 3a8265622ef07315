use crate::domain::candidate::Candidate;
use crate::domain::models::DocumentId;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_lookup::RecordLookup;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    NativeId,
    LiteralId,
    SourceAccountAndTimestamp,
    SourceTimestamp,
    SourceAccount,
    TitleFragment,
}

impl MatchStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NativeId => "native_id",
            Self::LiteralId => "literal_id",
            Self::SourceAccountAndTimestamp => "source_account_and_timestamp",
            Self::SourceTimestamp => "source_timestamp",
            Self::SourceAccount => "source_account",
            Self::TitleFragment => "title_fragment",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub record: T,
    pub strategy: MatchStrategy,
}

/// Locates a record from an identifier of unknown shape. Strategies run in
/// a fixed order and the first hit wins; a strategy that errors counts as a
/// miss.
pub struct FallbackResolver<'a, L>
where
    L: RecordLookup,
{
    lookup: &'a L,
}

impl<'a, L> FallbackResolver<'a, L>
where
    L: RecordLookup,
{
    pub fn new(lookup: &'a L) -> Self {
        Self { lookup }
    }

    pub fn resolve(&self, candidate: &str) -> Option<Resolved<L::Record>> {
        let raw = candidate.trim();
        if raw.is_empty() {
            return None;
        }

        match DocumentId::parse(raw) {
            Ok(native) => {
                if let Some(found) =
                    self.attempt(MatchStrategy::NativeId, raw, || self.lookup.find_by_id(native.as_str()))
                {
                    return Some(found);
                }
            }
            Err(reason) => {
                tracing::debug!(candidate = raw, strategy = "native_id", %reason, "lookup strategy skipped");
            }
        }

        if let Some(found) = self.attempt(MatchStrategy::LiteralId, raw, || self.lookup.find_by_id(raw)) {
            return Some(found);
        }

        let parsed = Candidate::parse(raw);
        if self.lookup.supports_source_lookup() {
            let source_hit = match (parsed.email.as_deref(), parsed.timestamp.as_deref()) {
                (Some(email), Some(timestamp)) => {
                    self.attempt(MatchStrategy::SourceAccountAndTimestamp, raw, || {
                        self.lookup.find_by_source(email, timestamp)
                    })
                }
                (None, Some(timestamp)) => self.attempt(MatchStrategy::SourceTimestamp, raw, || {
                    self.lookup.find_by_source_email_ts(timestamp)
                }),
                (Some(email), None) => self.attempt(MatchStrategy::SourceAccount, raw, || {
                    self.lookup.find_by_source_account(email)
                }),
                (None, None) => None,
            };
            if source_hit.is_some() {
                return source_hit;
            }
        }

        let fragment = parsed.title_fragment.as_deref()?;
        self.attempt(MatchStrategy::TitleFragment, raw, || {
            self.lookup.find_by_title_fragment(fragment)
        })
    }

    fn attempt<F>(
        &self,
        strategy: MatchStrategy,
        candidate: &str,
        query: F,
    ) -> Option<Resolved<L::Record>>
    where
        F: FnOnce() -> Result<Option<L::Record>, InfraError>,
    {
        match query() {
            Ok(Some(record)) => {
                tracing::debug!(candidate, strategy = strategy.as_str(), "resolved record");
                Some(Resolved { record, strategy })
            }
            Ok(None) => None,
            Err(error) => {
                tracing::debug!(candidate, strategy = strategy.as_str(), %error, "lookup strategy failed");
                None
            }
        }
    }
}
