//! Parsing of loosely-formed record identifiers.
//!
//! Clients address extracted tasks with whatever id they were handed: a
//! native document id, a plain string id from another writer, or the
//! composite `account_timestamp` form the analyzer produces. A candidate is
//! split into the parts the fallback lookups need.

use regex::Regex;
use std::sync::OnceLock;

const MIN_TITLE_FRAGMENT_CHARS: usize = 3;

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9][A-Za-z0-9._%+-]*@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
            .expect("valid email regex")
    })
}

fn exact_email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._%+-]*@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")
            .expect("valid email regex")
    })
}

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?",
        )
        .expect("valid timestamp regex")
    })
}

fn separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[_\-.:/|+,\s]+").expect("valid separator regex"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub raw: String,
    pub email: Option<String>,
    pub timestamp: Option<String>,
    /// What is left once email and timestamp are removed, normalized to
    /// single spaces. Only kept when it is long enough to match on.
    pub title_fragment: Option<String>,
}

impl Candidate {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        // The timestamp goes first: its seconds field would otherwise be
        // read as the local part of an adjacent email.
        let timestamp = timestamp_re()
            .find(raw)
            .map(|found| found.as_str().to_string());
        let without_timestamp = timestamp_re().replace_all(raw, " ");

        let email = email_re()
            .find(&without_timestamp)
            .map(|found| found.as_str().to_string());
        let without_email = email_re().replace_all(&without_timestamp, " ");

        let collapsed = separator_re().replace_all(&without_email, " ");
        let fragment = collapsed.trim();
        let title_fragment = (fragment.chars().count() >= MIN_TITLE_FRAGMENT_CHARS)
            .then(|| fragment.to_string());

        Self {
            raw: raw.to_string(),
            email,
            timestamp,
            title_fragment,
        }
    }
}

pub fn is_email(value: &str) -> bool {
    exact_email_re().is_match(value.trim())
}
