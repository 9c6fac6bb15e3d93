//! Metadata filter engine.
//!
//! Turns query text, conversation topics, and caller identity into three
//! predicate buckets handed to the vector index:
//!
//! | Bucket | Semantics | Sources |
//! |--------|-----------|---------|
//! | `must` | every predicate holds | project scope, absolute quarters |
//! | `should` | at least one holds (when non-empty) | caller identity, relative recency, document types, topics |
//! | `must_not` | no predicate holds | negated document types |
//!
//! Each bucket is deduplicated by `(key, condition)` while keeping first
//! occurrence order.

use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Document categories and the keywords that signal them, in match order.
pub const DOC_TYPE_KEYWORDS: &[(&str, &[&str])] = &[
    ("policy", &["policy", "policies", "guideline", "rule"]),
    ("manual", &["manual", "guide", "instruction", "handbook"]),
    ("report", &["report", "analysis", "summary", "findings"]),
    ("specification", &["spec", "specification", "requirement"]),
    ("procedure", &["procedure", "process", "workflow", "sop", "step"]),
];

/// Whitespace tokens that flip document-type predicates into `must_not`.
pub const NEGATION_TOKENS: &[&str] = &["not", "except", "without", "exclude"];

/// Relative recency phrases and their look-back window in days. First match wins.
pub const RECENCY_PATTERNS: &[(&str, i64)] = &[
    ("recent", 30),
    ("latest", 30),
    ("last 7 days", 7),
    ("last week", 7),
    ("last 30 days", 30),
    ("last month", 30),
    ("last quarter", 90),
];

static QUARTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bq([1-4])[\s\-]*(20\d{2})\b").expect("valid quarter regex"));

pub const KEY_PROJECT: &str = "project_name";
pub const KEY_USER: &str = "user_id";
pub const KEY_CREATED_AT: &str = "created_at";
pub const KEY_DOC_TYPE: &str = "doc_type";
pub const KEY_TAGS: &str = "content_tags";
pub const KEY_DOCUMENT_ID: &str = "document_id";
pub const KEY_EMBEDDING_MODEL: &str = "embedding_model";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Payload value equals `value`, or is an array containing it.
    Match { value: String },
    /// Payload value parses as an RFC 3339 timestamp within the inclusive bounds.
    Range {
        #[serde(skip_serializing_if = "Option::is_none")]
        gte: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lte: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Predicate {
    pub key: String,
    #[serde(flatten)]
    pub condition: Condition,
}

impl Predicate {
    pub fn matching(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            condition: Condition::Match {
                value: value.into(),
            },
        }
    }

    pub fn range(key: &str, gte: Option<DateTime<Utc>>, lte: Option<DateTime<Utc>>) -> Self {
        Self {
            key: key.to_string(),
            condition: Condition::Range { gte, lte },
        }
    }

    /// Evaluate against a JSON payload object.
    pub fn matches(&self, payload: &serde_json::Value) -> bool {
        let Some(field) = payload.get(&self.key) else {
            return false;
        };
        match &self.condition {
            Condition::Match { value } => match field {
                serde_json::Value::String(s) => s == value,
                serde_json::Value::Array(items) => {
                    items.iter().any(|item| item.as_str() == Some(value.as_str()))
                }
                serde_json::Value::Null => false,
                other => other.to_string() == *value,
            },
            Condition::Range { gte, lte } => {
                let Some(ts) = field
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc))
                else {
                    return false;
                };
                gte.map_or(true, |g| ts >= g) && lte.map_or(true, |l| ts <= l)
            }
        }
    }
}

/// Three predicate buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterSet {
    pub must: Vec<Predicate>,
    pub should: Vec<Predicate>,
    #[serde(rename = "not")]
    pub must_not: Vec<Predicate>,
}

impl FilterSet {
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.should.is_empty() && self.must_not.is_empty()
    }

    /// `must` all hold, no `must_not` holds, and at least one `should` holds
    /// when any are present.
    pub fn matches(&self, payload: &serde_json::Value) -> bool {
        self.must.iter().all(|p| p.matches(payload))
            && !self.must_not.iter().any(|p| p.matches(payload))
            && (self.should.is_empty() || self.should.iter().any(|p| p.matches(payload)))
    }

    /// Drop repeated predicates within each bucket, keeping first occurrence.
    pub fn dedup(&mut self) {
        for bucket in [&mut self.must, &mut self.should, &mut self.must_not] {
            let mut seen = HashSet::new();
            bucket.retain(|p| seen.insert(p.clone()));
        }
    }
}

/// Inputs for [`build_filters`].
#[derive(Debug, Clone, Copy)]
pub struct FilterRequest<'a> {
    pub query: &'a str,
    pub project_name: &'a str,
    pub user_id: Option<&'a str>,
    pub recent_topics: &'a [String],
}

/// Document categories whose keywords occur (as substrings) in `text`.
pub fn doc_types_in(text: &str) -> Vec<&'static str> {
    let lower = text.to_lowercase();
    DOC_TYPE_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(doc_type, _)| *doc_type)
        .collect()
}

/// First document category signalled by `text`, used to tag chunks at ingestion.
pub fn infer_doc_type(text: &str) -> Option<String> {
    doc_types_in(text).first().map(|s| s.to_string())
}

/// Inclusive `[start, end]` range for quarter `q` of `year`.
pub fn quarter_range(q: u32, year: i32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    if !(1..=4).contains(&q) {
        return None;
    }
    let start_month = (q - 1) * 3 + 1;
    let start = NaiveDate::from_ymd_opt(year, start_month, 1)?;
    let next = if q == 4 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, start_month + 3, 1)?
    };
    let start = Utc.from_utc_datetime(&start.and_hms_opt(0, 0, 0)?);
    let end = Utc.from_utc_datetime(&next.and_hms_opt(0, 0, 0)?) - Duration::seconds(1);
    Some((start, end))
}

/// Build must/should/not buckets for one query, relative to `now`.
pub fn build_filters(req: &FilterRequest<'_>, now: DateTime<Utc>) -> FilterSet {
    let mut filters = FilterSet::default();
    let ql = req.query.to_lowercase();

    if !req.project_name.is_empty() {
        filters
            .must
            .push(Predicate::matching(KEY_PROJECT, req.project_name));
    }

    if let Some(user) = req.user_id.filter(|u| !u.is_empty()) {
        filters.should.push(Predicate::matching(KEY_USER, user));
    }

    if let Some((_, days)) = RECENCY_PATTERNS
        .iter()
        .find(|(phrase, _)| ql.contains(phrase))
    {
        let since = now - Duration::days(*days);
        filters
            .should
            .push(Predicate::range(KEY_CREATED_AT, Some(since), None));
    }

    if let Some(caps) = QUARTER_RE.captures(&ql) {
        let q = caps[1].parse::<u32>().ok();
        let year = caps[2].parse::<i32>().ok();
        if let Some((start, end)) = q.zip(year).and_then(|(q, y)| quarter_range(q, y)) {
            filters
                .must
                .push(Predicate::range(KEY_CREATED_AT, Some(start), Some(end)));
        }
    }

    let negated = ql
        .split_whitespace()
        .any(|token| NEGATION_TOKENS.contains(&token));
    for doc_type in doc_types_in(&ql) {
        let predicate = Predicate::matching(KEY_DOC_TYPE, doc_type);
        if negated {
            filters.must_not.push(predicate);
        } else {
            filters.should.push(predicate);
        }
    }

    for topic in req.recent_topics {
        filters.should.push(Predicate::matching(KEY_TAGS, topic.as_str()));
    }

    filters.dedup();
    filters
}
