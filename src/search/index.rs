//! In-memory document index.
//!
//! Documents are flat multimaps: ordered `(field, value)` pairs where a field
//! may repeat for multi-valued data. Queries combine a free-text part with
//! per-field filters (OR within a filter's values, AND across filters), plus
//! take/skip paging, single-field sorting and field projection.

use std::collections::HashSet;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// One indexed document: ordered field/value pairs, fields may repeat.
pub type Document = Vec<(String, String)>;

/// A search request against the index.
#[derive(Debug, Clone)]
pub struct Query {
    /// Free-text part: every whitespace-separated token must occur
    /// (case-insensitive substring) in some field value.
    pub text: Option<String>,
    /// Per-field filters. A value ending in `*` matches by prefix,
    /// otherwise matching is exact.
    pub filters: Vec<(String, Vec<String>)>,
    pub take: usize,
    pub skip: usize,
    /// Sort ascending by the first value of this field.
    pub sort: Option<String>,
    /// Restrict returned documents to these fields.
    pub include: Option<HashSet<String>>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            text: None,
            filters: Vec::new(),
            take: 25,
            skip: 0,
            sort: None,
            include: None,
        }
    }
}

#[derive(Debug)]
pub struct SearchResult {
    /// Number of matching documents before paging.
    pub total: usize,
    pub elapsed: Duration,
    pub docs: Vec<Document>,
}

#[derive(Debug, Default)]
pub struct Index {
    docs: RwLock<Vec<Document>>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-load documents, returning how many were added.
    pub fn load_documents(&self, docs: impl IntoIterator<Item = Document>) -> usize {
        let mut store = self.docs.write().unwrap();
        let before = store.len();
        store.extend(docs);
        store.len() - before
    }

    pub fn count(&self) -> usize {
        self.docs.read().unwrap().len()
    }

    /// First document carrying `value` in `field`.
    pub fn get_by_term(&self, field: &str, value: &str) -> Option<Document> {
        self.docs
            .read()
            .unwrap()
            .iter()
            .find(|doc| has_term(doc, field, value))
            .cloned()
    }

    /// Upsert keyed by `field == value`: any existing documents with the term
    /// are removed, then `doc` is added.
    pub fn update_by_term(&self, field: &str, value: &str, doc: Document) {
        let mut store = self.docs.write().unwrap();
        store.retain(|d| !has_term(d, field, value));
        store.push(doc);
    }

    pub fn delete_by_term(&self, field: &str, value: &str) {
        self.docs
            .write()
            .unwrap()
            .retain(|d| !has_term(d, field, value));
    }

    pub fn search(&self, query: &Query) -> SearchResult {
        let started = Instant::now();
        let store = self.docs.read().unwrap();

        let mut matches: Vec<&Document> = store
            .iter()
            .filter(|doc| matches_text(doc, query.text.as_deref()))
            .filter(|doc| {
                query
                    .filters
                    .iter()
                    .all(|(field, values)| matches_filter(doc, field, values))
            })
            .collect();
        let total = matches.len();

        if let Some(sort_field) = &query.sort {
            matches.sort_by(|a, b| {
                first_value(a, sort_field).cmp(&first_value(b, sort_field))
            });
        }

        let docs = matches
            .into_iter()
            .skip(query.skip)
            .take(query.take)
            .map(|doc| project(doc, query.include.as_ref()))
            .collect();

        SearchResult {
            total,
            elapsed: started.elapsed(),
            docs,
        }
    }

    /// Distinct values of `field`, sorted. With `prefix` set, only values
    /// starting with `from`; otherwise values ordered at or after `from`.
    pub fn terms(
        &self,
        field: &str,
        from: Option<&str>,
        prefix: bool,
        take: Option<usize>,
    ) -> Vec<String> {
        let store = self.docs.read().unwrap();
        let mut values: Vec<String> = store
            .iter()
            .flat_map(|doc| {
                doc.iter()
                    .filter(|(f, _)| f == field)
                    .map(|(_, v)| v.clone())
            })
            .collect();
        values.sort();
        values.dedup();

        let values = values.into_iter().filter(|v| match from {
            Some(from) if prefix => v.starts_with(from),
            Some(from) => v.as_str() >= from,
            None => true,
        });
        match take {
            Some(n) => values.take(n).collect(),
            None => values.collect(),
        }
    }
}

fn has_term(doc: &Document, field: &str, value: &str) -> bool {
    doc.iter().any(|(f, v)| f == field && v == value)
}

fn first_value<'d>(doc: &'d Document, field: &str) -> Option<&'d str> {
    doc.iter()
        .find(|(f, _)| f == field)
        .map(|(_, v)| v.as_str())
}

fn matches_text(doc: &Document, text: Option<&str>) -> bool {
    let Some(text) = text else {
        return true;
    };
    text.split_whitespace().all(|token| {
        let token = token.to_lowercase();
        doc.iter().any(|(_, v)| v.to_lowercase().contains(&token))
    })
}

fn matches_filter(doc: &Document, field: &str, values: &[String]) -> bool {
    values.iter().any(|wanted| {
        doc.iter().any(|(f, v)| {
            f == field
                && match wanted.strip_suffix('*') {
                    Some(stem) => v.starts_with(stem),
                    None => v == wanted,
                }
        })
    })
}

fn project(doc: &Document, include: Option<&HashSet<String>>) -> Document {
    match include {
        Some(fields) => doc
            .iter()
            .filter(|(f, _)| fields.contains(f))
            .cloned()
            .collect(),
        None => doc.clone(),
    }
}
