//! Standing query DSL.
//!
//! Trigger conditions are registered with the content store as standing
//! queries. The DSL is a small JSON query language over event data:
//!
//! ```json
//! {"bool": {"must": [{"term": {"num": 17}}, {"range": {"severity": {"gte": 3}}}]}}
//! ```
//!
//! Field names are dotted paths into the event data. When any step of a path
//! crosses an array, every element is considered and the clause matches if
//! any of them does.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{OnceLock, RwLock};

use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::ValidationError;

const REGEX_CACHE_MAX: usize = 1024;

static REGEX_CACHE: OnceLock<RwLock<HashMap<String, Regex>>> = OnceLock::new();

fn cached_regex(pattern: &str) -> Result<Regex, ValidationError> {
    let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    if let Ok(guard) = cache.read() {
        if let Some(re) = guard.get(pattern) {
            return Ok(re.clone());
        }
    }

    // Anchored like a whole-value regexp match.
    let compiled = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| ValidationError::InvalidQuery {
        reason: format!("invalid regexp '{pattern}': {e}"),
    })?;

    if let Ok(mut guard) = cache.write() {
        if guard.len() >= REGEX_CACHE_MAX {
            guard.clear();
        }
        guard
            .entry(pattern.to_string())
            .or_insert_with(|| compiled.clone());
    }
    Ok(compiled)
}

/// Bounds of a range clause. At least one bound must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<JsonValue>,
}

impl RangeBounds {
    fn is_empty(&self) -> bool {
        self.gt.is_none() && self.gte.is_none() && self.lt.is_none() && self.lte.is_none()
    }

    fn contains(&self, value: &JsonValue) -> bool {
        let check = |bound: &Option<JsonValue>, ok: fn(Ordering) -> bool| match bound {
            None => true,
            Some(b) => compare(value, b).is_some_and(ok),
        };
        check(&self.gt, Ordering::is_gt)
            && check(&self.gte, Ordering::is_ge)
            && check(&self.lt, Ordering::is_lt)
            && check(&self.lte, Ordering::is_le)
    }
}

/// Boolean combination of clauses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoolQuery {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<Query>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<Query>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub should: Vec<Query>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<Query>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_should_match: Option<usize>,
}

impl BoolQuery {
    fn children(&self) -> impl Iterator<Item = &Query> {
        self.must
            .iter()
            .chain(&self.filter)
            .chain(&self.should)
            .chain(&self.must_not)
    }

    fn matches(&self, doc: &JsonValue) -> bool {
        if !self.must.iter().chain(&self.filter).all(|q| q.matches(doc)) {
            return false;
        }
        if self.must_not.iter().any(|q| q.matches(doc)) {
            return false;
        }
        let required = match self.minimum_should_match {
            Some(n) => n,
            None if self.must.is_empty() && self.filter.is_empty() && !self.should.is_empty() => 1,
            None => 0,
        };
        if required == 0 {
            return true;
        }
        self.should.iter().filter(|q| q.matches(doc)).take(required).count() >= required
    }
}

/// A standing query over event data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    /// Matches every document.
    MatchAll {},
    /// Every listed field equals the given value.
    Term(BTreeMap<String, JsonValue>),
    /// Every listed field equals one of the given values.
    Terms(BTreeMap<String, Vec<JsonValue>>),
    /// Text fields share at least one lowercase token; other values compare equal.
    Match(BTreeMap<String, JsonValue>),
    /// String field starts with the given prefix.
    Prefix(BTreeMap<String, String>),
    /// String field matches the whole regular expression.
    Regexp(BTreeMap<String, String>),
    /// Field lies within the bounds (numbers, strings, dates).
    Range(BTreeMap<String, RangeBounds>),
    /// Field is present and not null.
    Exists { field: String },
    /// Boolean combination.
    Bool(BoolQuery),
}

impl Query {
    /// `match_all`.
    #[must_use]
    pub fn match_all() -> Self {
        Self::MatchAll {}
    }

    /// Single-field `term`.
    #[must_use]
    pub fn term(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::Term(BTreeMap::from([(field.into(), value.into())]))
    }

    /// Single-field `range`.
    #[must_use]
    pub fn range(field: impl Into<String>, bounds: RangeBounds) -> Self {
        Self::Range(BTreeMap::from([(field.into(), bounds)]))
    }

    /// `exists`.
    #[must_use]
    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists { field: field.into() }
    }

    /// `bool` with every clause required.
    #[must_use]
    pub fn all(clauses: Vec<Query>) -> Self {
        Self::Bool(BoolQuery {
            must: clauses,
            ..BoolQuery::default()
        })
    }

    /// Parses and validates a query from JSON.
    pub fn from_json(value: &JsonValue) -> Result<Self, ValidationError> {
        let query: Self = serde_json::from_value(value.clone()).map_err(|e| ValidationError::InvalidQuery {
            reason: e.to_string(),
        })?;
        query.validate()?;
        Ok(query)
    }

    /// Validates clause shapes and compiles regular expressions.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidQuery { reason };
        let non_empty = |name: &str, len: usize| {
            if len == 0 {
                Err(invalid(format!("'{name}' clause names no field")))
            } else {
                Ok(())
            }
        };

        match self {
            Self::MatchAll {} => Ok(()),
            Self::Term(fields) => non_empty("term", fields.len()),
            Self::Match(fields) => non_empty("match", fields.len()),
            Self::Prefix(fields) => non_empty("prefix", fields.len()),
            Self::Terms(fields) => {
                non_empty("terms", fields.len())?;
                match fields.iter().find(|(_, values)| values.is_empty()) {
                    Some((field, _)) => Err(invalid(format!("'terms' on '{field}' lists no values"))),
                    None => Ok(()),
                }
            }
            Self::Regexp(fields) => {
                non_empty("regexp", fields.len())?;
                fields.values().try_for_each(|p| cached_regex(p).map(|_| ()))
            }
            Self::Range(fields) => {
                non_empty("range", fields.len())?;
                match fields.iter().find(|(_, bounds)| bounds.is_empty()) {
                    Some((field, _)) => Err(invalid(format!("'range' on '{field}' sets no bound"))),
                    None => Ok(()),
                }
            }
            Self::Exists { field } => {
                if field.trim().is_empty() {
                    Err(invalid("'exists' needs a field".to_string()))
                } else {
                    Ok(())
                }
            }
            Self::Bool(b) => {
                if let Some(n) = b.minimum_should_match {
                    if n > b.should.len() {
                        return Err(invalid(format!(
                            "minimum_should_match {n} exceeds {} should clauses",
                            b.should.len()
                        )));
                    }
                }
                b.children().try_for_each(Query::validate)
            }
        }
    }

    /// Every field path this query references.
    #[must_use]
    pub fn fields(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::MatchAll {} => {}
            Self::Term(f) | Self::Match(f) => out.extend(f.keys().cloned()),
            Self::Terms(f) => out.extend(f.keys().cloned()),
            Self::Prefix(f) | Self::Regexp(f) => out.extend(f.keys().cloned()),
            Self::Range(f) => out.extend(f.keys().cloned()),
            Self::Exists { field } => {
                out.insert(field.clone());
            }
            Self::Bool(b) => b.children().for_each(|q| q.collect_fields(out)),
        }
    }

    /// Evaluates this query against a document.
    #[must_use]
    pub fn matches(&self, doc: &JsonValue) -> bool {
        match self {
            Self::MatchAll {} => true,
            Self::Term(fields) => fields
                .iter()
                .all(|(path, want)| lookup(doc, path).into_iter().any(|v| values_equal(v, want))),
            Self::Terms(fields) => fields.iter().all(|(path, wants)| {
                lookup(doc, path)
                    .into_iter()
                    .any(|v| wants.iter().any(|w| values_equal(v, w)))
            }),
            Self::Match(fields) => fields
                .iter()
                .all(|(path, want)| lookup(doc, path).into_iter().any(|v| text_match(v, want))),
            Self::Prefix(fields) => fields.iter().all(|(path, prefix)| {
                lookup(doc, path)
                    .into_iter()
                    .any(|v| v.as_str().is_some_and(|s| s.starts_with(prefix.as_str())))
            }),
            Self::Regexp(fields) => fields.iter().all(|(path, pattern)| {
                let Ok(re) = cached_regex(pattern) else {
                    return false;
                };
                lookup(doc, path)
                    .into_iter()
                    .any(|v| v.as_str().is_some_and(|s| re.is_match(s)))
            }),
            Self::Range(fields) => fields
                .iter()
                .all(|(path, bounds)| lookup(doc, path).into_iter().any(|v| bounds.contains(v))),
            Self::Exists { field } => !lookup(doc, field).is_empty(),
            Self::Bool(b) => b.matches(doc),
        }
    }
}

/// Resolves a dotted path, flattening arrays. Nulls are skipped.
fn lookup<'a>(doc: &'a JsonValue, path: &str) -> Vec<&'a JsonValue> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    collect(doc, &segments, &mut out);
    out
}

fn collect<'a>(value: &'a JsonValue, segments: &[&str], out: &mut Vec<&'a JsonValue>) {
    match (value, segments.split_first()) {
        (JsonValue::Array(items), _) => {
            for item in items {
                collect(item, segments, out);
            }
        }
        (JsonValue::Null, _) => {}
        (_, None) => out.push(value),
        (JsonValue::Object(obj), Some((head, rest))) => {
            if let Some(child) = obj.get(*head) {
                collect(child, rest, out);
            }
        }
        _ => {}
    }
}

fn values_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return x == y;
            }
            match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        _ => a == b,
    }
}

fn tokens(s: &str) -> BTreeSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn text_match(field: &JsonValue, want: &JsonValue) -> bool {
    match (field, want) {
        (JsonValue::String(have), JsonValue::String(want)) => {
            let have = tokens(have);
            tokens(want).iter().any(|t| have.contains(t))
        }
        _ => values_equal(field, want),
    }
}

fn date_millis(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

#[allow(clippy::cast_precision_loss)]
fn compare(field: &JsonValue, bound: &JsonValue) -> Option<Ordering> {
    match (field, bound) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (JsonValue::String(a), JsonValue::String(b)) => match (date_millis(a), date_millis(b)) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => Some(a.as_str().cmp(b.as_str())),
        },
        (JsonValue::Number(a), JsonValue::String(b)) => {
            a.as_f64()?.partial_cmp(&(date_millis(b)? as f64))
        }
        (JsonValue::String(a), JsonValue::Number(b)) => {
            (date_millis(a)? as f64).partial_cmp(&b.as_f64()?)
        }
        _ => None,
    }
}
