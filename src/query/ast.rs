//! A small, statically typed AST for the structured queries the backend
//! expects, per the design note in `SPEC_FULL.md`/`spec.md` §9 ("Dynamic
//! query documents"): `Filter`, `Must`, `Should`, `MustNot` position clauses
//! around the leaf clause types `MoreLikeThis`, `Term`, `Terms`, `Wildcard`,
//! `Range`, `Exists`. A single [`Query::to_value`] serializer turns this into
//! the backend's wire format, keeping §4.2 directly unit-testable without a
//! live backend.
use serde_json::{json, Value};

/// Minimum-should-match threshold: either a percentage of query terms or an
/// absolute token count (§GLOSSARY, §6 "threshold fields").
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MinShouldMatch {
    Percent(u8),
    Count(u32),
}

impl MinShouldMatch {
    pub fn as_wire_string(self) -> String {
        match self {
            MinShouldMatch::Percent(p) => format!("{p}%"),
            MinShouldMatch::Count(n) => n.to_string(),
        }
    }
}

/// Leaf clause types plus the four bool-query positions, recursively
/// composable so a position can wrap any leaf (or, rarely, another
/// position — e.g. `MustNot(Exists(...))`).
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Filter(Box<Clause>),
    Must(Box<Clause>),
    Should(Box<Clause>),
    MustNot(Box<Clause>),

    /// A more-like-this style match: the document's `field` must share at
    /// least `min_should_match` of `like`'s tokens.
    MoreLikeThis {
        field: String,
        like: String,
        min_should_match: MinShouldMatch,
        boost: f32,
    },
    /// Exact-value equality filter.
    Term { field: String, value: String, boost: f32 },
    /// A set of exact values combined with a minimum-should-match count
    /// (used for the found_exceptions/potential_status_codes/only_numbers
    /// high-precision gates in §4.2).
    Terms {
        field: String,
        values: Vec<String>,
        min_should_match: MinShouldMatch,
        boost: f32,
    },
    Wildcard { field: String, pattern: String },
    /// Numeric range filter; only `gte` is needed by this engine (§4.2's
    /// `log_level >= ERROR` filter).
    Range { field: String, gte: i64 },
    Exists { field: String },
}

impl Clause {
    pub fn filter(self) -> Clause {
        Clause::Filter(Box::new(self))
    }
    pub fn must(self) -> Clause {
        Clause::Must(Box::new(self))
    }
    pub fn should(self) -> Clause {
        Clause::Should(Box::new(self))
    }
    pub fn must_not(self) -> Clause {
        Clause::MustNot(Box::new(self))
    }

    fn to_leaf_value(&self) -> Value {
        match self {
            Clause::Filter(inner) | Clause::Must(inner) | Clause::Should(inner) | Clause::MustNot(inner) => {
                inner.to_leaf_value()
            }
            Clause::MoreLikeThis {
                field,
                like,
                min_should_match,
                boost,
            } => json!({
                "more_like_this": {
                    "fields": [field],
                    "like": like,
                    "min_should_match": min_should_match.as_wire_string(),
                    "boost": boost,
                }
            }),
            Clause::Term { field, value, boost } => {
                json!({ "term": { field.clone(): { "value": value, "boost": boost } } })
            }
            Clause::Terms {
                field,
                values,
                min_should_match,
                boost,
            } => json!({
                "terms_set": {
                    field.clone(): {
                        "terms": values,
                        "minimum_should_match": min_should_match.as_wire_string(),
                        "boost": boost,
                    }
                }
            }),
            Clause::Wildcard { field, pattern } => {
                json!({ "wildcard": { field.clone(): { "value": pattern } } })
            }
            Clause::Range { field, gte } => json!({ "range": { field.clone(): { "gte": gte } } }),
            Clause::Exists { field } => json!({ "exists": { "field": field } }),
        }
    }
}

/// A structured backend query: a bool query assembled from clauses bucketed
/// by position (§4.2).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Vec<Clause>,
    pub must: Vec<Clause>,
    pub should: Vec<Clause>,
    pub must_not: Vec<Clause>,
    /// `minimum_should_match` on the top-level should bucket, if any
    /// should-clauses are present but none are individually required.
    pub minimum_should_match: Option<MinShouldMatch>,
}

impl Query {
    pub fn push(&mut self, clause: Clause) {
        match clause {
            Clause::Filter(inner) => self.filter.push((*inner).clone()),
            Clause::Must(inner) => self.must.push((*inner).clone()),
            Clause::Should(inner) => self.should.push((*inner).clone()),
            Clause::MustNot(inner) => self.must_not.push((*inner).clone()),
            other => self.must.push(other),
        }
    }

    /// Serialize to the backend's wire format. The exact JSON dialect is a
    /// Non-goal (§2); this shape exists to make clause composition
    /// deterministically testable.
    pub fn to_value(&self) -> Value {
        let mut bool_body = serde_json::Map::new();
        bool_body.insert(
            "filter".to_string(),
            Value::Array(self.filter.iter().map(Clause::to_leaf_value).collect()),
        );
        bool_body.insert(
            "must".to_string(),
            Value::Array(self.must.iter().map(Clause::to_leaf_value).collect()),
        );
        bool_body.insert(
            "should".to_string(),
            Value::Array(self.should.iter().map(Clause::to_leaf_value).collect()),
        );
        bool_body.insert(
            "must_not".to_string(),
            Value::Array(self.must_not.iter().map(Clause::to_leaf_value).collect()),
        );
        if let Some(msm) = self.minimum_should_match {
            bool_body.insert("minimum_should_match".to_string(), json!(msm.as_wire_string()));
        }
        json!({ "query": { "bool": Value::Object(bool_body) } })
    }
}
