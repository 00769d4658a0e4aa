//! Typed query DSL.
//!
//! Queries are built once and then either rendered to the backend's JSON query
//! language ([`Query::to_json`]) or evaluated directly against a JSON document
//! ([`Query::matches`]), so every backend implementation shares the same
//! semantics.

use serde_json::{json, Value};

/// Delimiter between an identifier's type prefix and its key.
const ID_DELIMITER: &str = "--";

/// Subfield holding the tokenized type prefix of reference fields.
pub const REF_TYPE_SUBFIELD: &str = "type";

/// A query over entity documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Matches every document.
    MatchAll,
    /// Matches no document.
    MatchNone,
    /// Exact match on a field (any element when the field is a list).
    Term { field: String, value: Value },
    /// Exact match on any of the values.
    Terms { field: String, values: Vec<Value> },
    /// The field is present, non-null and not an empty list.
    Exists { field: String },
    /// The field has at least one value and every value is one of `values`.
    SubsetOf { field: String, values: Vec<Value> },
    /// Free text: any token of `query` appears in one of `fields`, or in any
    /// string of the document when `fields` is empty.
    MultiMatch { query: String, fields: Vec<String> },
    /// A reference field points at an entity of the given type.
    RefType { field: String, entity_type: String },
    /// Any of the given reference fields holds one of the ids.
    RefersTo { fields: Vec<String>, ids: Vec<String> },
    /// Boolean composition.
    Bool(BoolQuery),
}

/// Boolean combination of queries.
///
/// A document matches when every `must` and `filter` clause matches, no
/// `must_not` clause matches, and, when `should` is non-empty, at least one
/// `should` clause matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    pub must: Vec<Query>,
    pub should: Vec<Query>,
    pub filter: Vec<Query>,
    pub must_not: Vec<Query>,
}

impl BoolQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, query: Query) -> Self {
        self.must.push(query);
        self
    }

    pub fn should(mut self, query: Query) -> Self {
        self.should.push(query);
        self
    }

    pub fn filter(mut self, query: Query) -> Self {
        self.filter.push(query);
        self
    }

    pub fn must_not(mut self, query: Query) -> Self {
        self.must_not.push(query);
        self
    }

    fn is_empty(&self) -> bool {
        self.must.is_empty()
            && self.should.is_empty()
            && self.filter.is_empty()
            && self.must_not.is_empty()
    }
}

impl From<BoolQuery> for Query {
    fn from(query: BoolQuery) -> Self {
        Query::Bool(query)
    }
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Query::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn terms<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Query::Terms {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Query::Exists {
            field: field.into(),
        }
    }

    pub fn subset_of<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Query::SubsetOf {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn multi_match<F>(query: impl Into<String>, fields: F) -> Self
    where
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Query::MultiMatch {
            query: query.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn ref_type(field: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Query::RefType {
            field: field.into(),
            entity_type: entity_type.into(),
        }
    }

    pub fn refers_to<F, I>(fields: F, ids: I) -> Self
    where
        F: IntoIterator,
        F::Item: Into<String>,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Query::RefersTo {
            fields: fields.into_iter().map(Into::into).collect(),
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Every clause must match.
    pub fn all(clauses: Vec<Query>) -> Self {
        Query::Bool(BoolQuery {
            must: clauses,
            ..BoolQuery::default()
        })
    }

    /// At least one clause must match. An empty list matches nothing.
    pub fn any(clauses: Vec<Query>) -> Self {
        if clauses.is_empty() {
            return Query::MatchNone;
        }
        Query::Bool(BoolQuery {
            should: clauses,
            ..BoolQuery::default()
        })
    }

    /// The clause must not match.
    pub fn not(clause: Query) -> Self {
        Query::Bool(BoolQuery {
            must_not: vec![clause],
            ..BoolQuery::default()
        })
    }

    /// Render the query in the backend's JSON query language.
    pub fn to_json(&self) -> Value {
        match self {
            Query::MatchAll => json!({ "match_all": {} }),
            Query::MatchNone => json!({ "match_none": {} }),
            Query::Term { field, value } => json!({ "term": { field.as_str(): value } }),
            Query::Terms { field, values } => json!({ "terms": { field.as_str(): values } }),
            Query::Exists { field } => json!({ "exists": { "field": field } }),
            Query::SubsetOf { field, values } => json!({
                "bool": {
                    "filter": [
                        { "exists": { "field": field } },
                        { "terms_set": { field.as_str(): {
                            "terms": values,
                            "minimum_should_match_script": {
                                "source": format!("doc['{}'].size()", field)
                            }
                        } } }
                    ]
                }
            }),
            Query::MultiMatch { query, fields } => {
                if fields.is_empty() {
                    json!({ "multi_match": { "query": query } })
                } else {
                    json!({ "multi_match": { "query": query, "fields": fields } })
                }
            }
            Query::RefType { field, entity_type } => json!({
                "match": { format!("{}.{}", field, REF_TYPE_SUBFIELD): entity_type }
            }),
            Query::RefersTo { fields, ids } => {
                let should: Vec<Value> = fields
                    .iter()
                    .map(|field| json!({ "terms": { field.as_str(): ids } }))
                    .collect();
                json!({ "bool": { "should": should, "minimum_should_match": 1 } })
            }
            Query::Bool(b) => {
                if b.is_empty() {
                    return json!({ "match_all": {} });
                }
                let render = |clauses: &[Query]| -> Vec<Value> {
                    clauses.iter().map(Query::to_json).collect()
                };
                let mut body = serde_json::Map::new();
                if !b.must.is_empty() {
                    body.insert("must".to_string(), Value::Array(render(&b.must)));
                }
                if !b.filter.is_empty() {
                    body.insert("filter".to_string(), Value::Array(render(&b.filter)));
                }
                if !b.must_not.is_empty() {
                    body.insert("must_not".to_string(), Value::Array(render(&b.must_not)));
                }
                if !b.should.is_empty() {
                    body.insert("should".to_string(), Value::Array(render(&b.should)));
                    body.insert("minimum_should_match".to_string(), json!(1));
                }
                json!({ "bool": body })
            }
        }
    }

    /// Evaluate the query against a JSON document.
    ///
    /// Field names may be dotted paths into nested objects; when a path crosses
    /// a list, any element may satisfy the clause.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Query::MatchAll => true,
            Query::MatchNone => false,
            Query::Term { field, value } => field_values(doc, field).iter().any(|v| *v == value),
            Query::Terms { field, values } => field_values(doc, field)
                .iter()
                .any(|v| values.iter().any(|candidate| candidate == *v)),
            Query::Exists { field } => !field_values(doc, field).is_empty(),
            Query::SubsetOf { field, values } => {
                let found = field_values(doc, field);
                !found.is_empty() && found.iter().all(|v| values.iter().any(|c| c == *v))
            }
            Query::MultiMatch { query, fields } => {
                let wanted = tokens(query);
                if wanted.is_empty() {
                    return false;
                }
                let mut strings = Vec::new();
                if fields.is_empty() {
                    collect_strings(doc, &mut strings);
                } else {
                    for field in fields {
                        for value in field_values(doc, field) {
                            collect_strings(value, &mut strings);
                        }
                    }
                }
                strings
                    .iter()
                    .flat_map(|s| tokens(s))
                    .any(|token| wanted.contains(&token))
            }
            Query::RefType { field, entity_type } => {
                let prefix = format!("{}{}", entity_type, ID_DELIMITER);
                field_values(doc, field)
                    .iter()
                    .filter_map(|v| v.as_str())
                    .any(|s| s.starts_with(&prefix))
            }
            Query::RefersTo { fields, ids } => fields.iter().any(|field| {
                field_values(doc, field)
                    .iter()
                    .filter_map(|v| v.as_str())
                    .any(|s| ids.iter().any(|id| id == s))
            }),
            Query::Bool(b) => {
                b.must.iter().all(|q| q.matches(doc))
                    && b.filter.iter().all(|q| q.matches(doc))
                    && !b.must_not.iter().any(|q| q.matches(doc))
                    && (b.should.is_empty() || b.should.iter().any(|q| q.matches(doc)))
            }
        }
    }
}

/// Collect the leaf values at a dotted path, flattening lists along the way.
fn field_values<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![doc];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => {
                    if let Some(child) = map.get(segment) {
                        next.push(child);
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        if let Some(child) = item.get(segment) {
                            next.push(child);
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }

    let mut leaves = Vec::new();
    for value in current {
        match value {
            Value::Array(items) => leaves.extend(items.iter().filter(|v| !v.is_null())),
            Value::Null => {}
            other => leaves.push(other),
        }
    }
    leaves
}

/// Lowercased alphanumeric runs, the way a standard analyzer splits text.
fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}
