//! Pipelines exposing the index over HTTP semantics.
//!
//! [`SearchMiddleware`] owns everything under `/search`; [`DocumentMiddleware`]
//! treats any other non-empty path as a document id. Both delegate to a `next`
//! pipeline when a request is not theirs, so chains terminate in
//! [`not_found`](crate::pipeline::not_found) just like a server router would.

use std::collections::HashSet;
use std::sync::Arc;

use http::header::{self, HeaderValue};
use http::{Method, StatusCode};
use serde_json::{json, Value};

use crate::loopback::context::RequestContext;
use crate::pipeline::PipelineHandle;
use crate::search::index::{Document, Index, Query};

pub struct SearchMiddleware {
    index: Arc<Index>,
    next: PipelineHandle,
}

impl SearchMiddleware {
    pub fn new(index: Arc<Index>, next: PipelineHandle) -> PipelineHandle {
        let this = Arc::new(Self { index, next });
        Arc::new(move |ctx: RequestContext| {
            let this = this.clone();
            async move { this.handle(ctx).await }
        })
    }

    async fn handle(&self, ctx: RequestContext) -> anyhow::Result<()> {
        let path = ctx.path.clone();
        let in_search = path == "/search" || path.starts_with("/search/");

        if in_search && ctx.method != Method::GET {
            return method_not_allowed(&ctx, "GET");
        }

        if path == "/search" || path == "/search/" {
            let query = parse_query(&ctx);
            let result = self.index.search(&query);
            return write_json(
                &ctx,
                StatusCode::OK,
                &json!({
                    "totalCount": result.total,
                    "elapsed": result.elapsed.as_secs_f64() * 1000.0,
                    "results": result.docs.iter().map(doc_to_json).collect::<Vec<_>>(),
                }),
            );
        }

        if let Some(field) = path.strip_prefix("/search/term/") {
            let from = ctx.query_param("from");
            let prefix = ctx
                .query_param("p")
                .and_then(|v| v.parse::<bool>().ok())
                .unwrap_or(false);
            let take = ctx
                .query_param("take")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(100);
            let terms = self.index.terms(field, from.as_deref(), prefix, Some(take));
            return write_json(&ctx, StatusCode::OK, &json!(terms));
        }

        self.next.call(ctx).await
    }
}

pub struct DocumentMiddleware {
    index: Arc<Index>,
    identity_field: String,
    next: PipelineHandle,
}

impl DocumentMiddleware {
    pub fn new(index: Arc<Index>, identity_field: &str, next: PipelineHandle) -> PipelineHandle {
        let this = Arc::new(Self {
            index,
            identity_field: identity_field.to_string(),
            next,
        });
        Arc::new(move |ctx: RequestContext| {
            let this = this.clone();
            async move { this.handle(ctx).await }
        })
    }

    async fn handle(&self, ctx: RequestContext) -> anyhow::Result<()> {
        let id = ctx.path.strip_prefix('/').unwrap_or(&ctx.path).to_string();
        if id.is_empty() {
            return self.next.call(ctx).await;
        }
        let identity = self.identity_field.as_str();

        match ctx.method {
            Method::GET => match self.index.get_by_term(identity, &id) {
                Some(doc) => write_json(&ctx, StatusCode::OK, &doc_to_json(&doc)),
                None => {
                    ctx.response().set_status(StatusCode::NOT_FOUND);
                    Ok(())
                }
            },
            Method::PUT => match parse_document(&ctx, identity, &id) {
                Some(doc) => {
                    self.index.update_by_term(identity, &id, doc);
                    Ok(())
                }
                None => bad_request(&ctx),
            },
            Method::POST => {
                if self.index.get_by_term(identity, &id).is_some() {
                    ctx.response().set_status(StatusCode::BAD_REQUEST);
                    return Ok(());
                }
                match parse_document(&ctx, identity, &id) {
                    Some(doc) => {
                        self.index.load_documents([doc]);
                        ctx.response().set_status(StatusCode::CREATED);
                        Ok(())
                    }
                    None => bad_request(&ctx),
                }
            }
            Method::DELETE => {
                self.index.delete_by_term(identity, &id);
                Ok(())
            }
            _ => method_not_allowed(&ctx, "GET,PUT,POST,DELETE"),
        }
    }
}

fn parse_query(ctx: &RequestContext) -> Query {
    let mut query = Query::default();
    let mut filters: Vec<(String, Vec<String>)> = Vec::new();

    for (key, value) in ctx.query_pairs() {
        match key.to_ascii_lowercase().as_str() {
            "q" => query.text = Some(value),
            "skip" => {
                if let Ok(n) = value.parse() {
                    query.skip = n;
                }
            }
            "take" => {
                if let Ok(n) = value.parse() {
                    query.take = n;
                }
            }
            "sort" => query.sort = Some(value),
            "i" => {
                let fields: HashSet<String> = value
                    .split(',')
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect();
                if !fields.is_empty() {
                    query.include = Some(fields);
                }
            }
            // Anything else is a field filter; repeated keys OR together.
            _ => match filters.iter_mut().find(|(f, _)| *f == key) {
                Some((_, values)) => values.push(value),
                None => filters.push((key, vec![value])),
            },
        }
    }

    query.filters = filters;
    query
}

/// Flatten a JSON object body into field/value pairs, forcing the identity
/// field to the path id when the body omits it.
fn parse_document(ctx: &RequestContext, identity: &str, id: &str) -> Option<Document> {
    let body = ctx.body.as_ref()?;
    let value: Value = serde_json::from_slice(body).ok()?;
    let obj = value.as_object()?;

    let mut doc = Document::new();
    for (field, v) in obj {
        match v {
            Value::String(s) => doc.push((field.clone(), s.clone())),
            Value::Array(items) => {
                for item in items {
                    let rendered = item
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| item.to_string());
                    doc.push((field.clone(), rendered));
                }
            }
            Value::Null => {}
            other => doc.push((field.clone(), other.to_string())),
        }
    }
    if !doc.iter().any(|(f, _)| f == identity) {
        doc.insert(0, (identity.to_string(), id.to_string()));
    }
    Some(doc)
}

/// Render a document as a JSON object: single-valued fields become strings,
/// multi-valued fields arrays.
fn doc_to_json(doc: &Document) -> Value {
    use serde_json::map::Entry;

    let mut map = serde_json::Map::new();
    for (field, value) in doc {
        let value = Value::String(value.clone());
        match map.entry(field.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(mut slot) => match slot.get_mut() {
                Value::Array(items) => items.push(value),
                existing => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
            },
        }
    }
    Value::Object(map)
}

fn write_json(ctx: &RequestContext, status: StatusCode, value: &Value) -> anyhow::Result<()> {
    let body = serde_json::to_vec(value)?;
    let response = ctx.response();
    response.set_status(status);
    response.insert_header(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response.write(&body)?;
    Ok(())
}

fn method_not_allowed(ctx: &RequestContext, allow: &'static str) -> anyhow::Result<()> {
    let response = ctx.response();
    response.set_status(StatusCode::METHOD_NOT_ALLOWED);
    response.insert_header(header::ALLOW, HeaderValue::from_static(allow));
    response.insert_header(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response.write(b"\"Method Not Allowed\"")?;
    Ok(())
}

fn bad_request(ctx: &RequestContext) -> anyhow::Result<()> {
    ctx.response().set_status(StatusCode::BAD_REQUEST);
    ctx.response().write(b"\"Invalid document body\"")?;
    Ok(())
}
