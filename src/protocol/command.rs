//! # Commands
//!
//! Command documents for every driver operation, and [`execute`], which sends
//! one over a connection in the negotiated message format and validates the
//! reply.
//!
//! Query, update and pipeline documents are opaque here; only their shape is
//! checked (projection values, non-negative skip, non-empty names).

use std::fmt;

use tracing::{debug, instrument, warn};

use crate::core::document::{Document, Value};
use crate::core::oid::ObjectId;
use crate::error::{DriverError, EncodingErrorKind, Result};
use crate::protocol::message::{decode_reply, encode_command};
use crate::protocol::reply::{check_ok, numeric_i64, reply_document};
use crate::transport::connection::Connection;
use crate::utils::compression::is_uncompressible_command;
use crate::utils::metrics::{global_metrics, Timer};

/// `<database>.<collection>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub db: String,
    pub coll: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Result<Self> {
        let ns = Self {
            db: db.into(),
            coll: coll.into(),
        };
        if ns.db.is_empty() {
            return Err(DriverError::InvalidArgument("database name is empty".into()));
        }
        if ns.coll.is_empty() {
            return Err(DriverError::InvalidArgument(
                "collection name is empty".into(),
            ));
        }
        Ok(ns)
    }

    /// Split at the first `.`; collection names may contain further dots
    pub fn parse(full_name: &str) -> Result<Self> {
        let (db, coll) = full_name.split_once('.').ok_or_else(|| {
            DriverError::InvalidArgument(format!("namespace '{full_name}' has no '.'"))
        })?;
        Self::new(db, coll)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

/// Query document; empty matches everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter(Document);

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn as_document(&self) -> &Document {
        &self.0
    }

    pub fn into_document(self) -> Document {
        self.0
    }
}

impl From<Document> for Filter {
    fn from(doc: Document) -> Self {
        Filter(doc)
    }
}

/// `{_id: <oid>}`
impl From<ObjectId> for Filter {
    fn from(id: ObjectId) -> Self {
        let mut doc = Document::new();
        doc.set("_id", id);
        Filter(doc)
    }
}

/// Field selection document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection(Document);

impl Projection {
    /// Include exactly `fields`
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection(fields.into_iter().map(|f| (f.into(), Value::Int32(1))).collect())
    }

    /// Values must be 0/1 as a number or a boolean
    pub fn validate(&self) -> Result<()> {
        for (key, value) in self.0.iter() {
            let valid = match value {
                Value::Boolean(_) => true,
                other => matches!(numeric_i64(other), Some(0) | Some(1)),
            };
            if !valid {
                return Err(DriverError::InvalidArgument(format!(
                    "projection field '{key}' must be 0, 1, true or false, got {}",
                    value.type_name()
                )));
            }
        }
        Ok(())
    }

    pub fn as_document(&self) -> &Document {
        &self.0
    }
}

impl From<Document> for Projection {
    fn from(doc: Document) -> Self {
        Projection(doc)
    }
}

impl From<&[&str]> for Projection {
    fn from(fields: &[&str]) -> Self {
        Projection::fields(fields.iter().copied())
    }
}

impl From<Vec<&str>> for Projection {
    fn from(fields: Vec<&str>) -> Self {
        Projection::fields(fields)
    }
}

/// Options for `find`
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub filter: Filter,
    pub projection: Option<Projection>,
    pub sort: Option<Document>,
    pub skip: i64,
    /// 0 is unlimited; negative asks for one batch of `|limit|` documents
    pub limit: i64,
    pub batch_size: Option<i32>,
}

impl FindOptions {
    pub fn new(filter: impl Into<Filter>) -> Self {
        Self {
            filter: filter.into(),
            ..Default::default()
        }
    }

    pub fn projection(mut self, projection: impl Into<Projection>) -> Self {
        self.projection = Some(projection.into());
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn skip(mut self, skip: i64) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub upsert: bool,
    pub multi: bool,
}

/// `limit` 0 deletes every match, 1 deletes at most one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub limit: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertResult {
    pub inserted_count: u64,
    /// `_id` of every input document, in input order
    pub inserted_ids: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<Value>,
}

fn append_write_concern(cmd: &mut Document, write_concern: Option<&Document>) {
    if let Some(wc) = write_concern {
        if !wc.is_empty() {
            cmd.set("writeConcern", wc.clone());
        }
    }
}

pub fn insert_command(coll: &str, documents: &[Document], write_concern: Option<&Document>) -> Document {
    let mut cmd = Document::new();
    cmd.set("insert", coll);
    cmd.set(
        "documents",
        Value::Array(documents.iter().cloned().map(Value::Document).collect()),
    );
    // Unordered so every failing document is reported, not just the first
    cmd.set("ordered", false);
    append_write_concern(&mut cmd, write_concern);
    cmd
}

pub fn find_command(coll: &str, options: &FindOptions) -> Result<Document> {
    if options.skip < 0 {
        return Err(DriverError::InvalidArgument(format!(
            "skip must be >= 0, got {}",
            options.skip
        )));
    }
    let mut cmd = Document::new();
    cmd.set("find", coll);
    cmd.set("filter", options.filter.as_document().clone());
    if let Some(projection) = &options.projection {
        projection.validate()?;
        cmd.set("projection", projection.as_document().clone());
    }
    if let Some(sort) = &options.sort {
        cmd.set("sort", sort.clone());
    }
    if options.skip > 0 {
        cmd.set("skip", Value::from_integer(options.skip));
    }
    if options.limit > 0 {
        cmd.set("limit", Value::from_integer(options.limit));
    } else if options.limit < 0 {
        cmd.set("limit", Value::from_integer(options.limit.saturating_abs()));
        cmd.set("singleBatch", true);
    }
    if let Some(batch_size) = options.batch_size {
        cmd.set("batchSize", batch_size);
    }
    Ok(cmd)
}

pub fn update_command(
    coll: &str,
    query: &Filter,
    update: &Document,
    options: &UpdateOptions,
    write_concern: Option<&Document>,
) -> Document {
    let mut statement = Document::new();
    statement.set("q", query.as_document().clone());
    statement.set("u", update.clone());
    statement.set("upsert", options.upsert);
    statement.set("multi", options.multi);

    let mut cmd = Document::new();
    cmd.set("update", coll);
    cmd.set("updates", vec![statement]);
    cmd.set("ordered", true);
    append_write_concern(&mut cmd, write_concern);
    cmd
}

pub fn delete_command(
    coll: &str,
    query: &Filter,
    options: &DeleteOptions,
    write_concern: Option<&Document>,
) -> Document {
    let mut statement = Document::new();
    statement.set("q", query.as_document().clone());
    statement.set("limit", options.limit.min(1) as i32);

    let mut cmd = Document::new();
    cmd.set("delete", coll);
    cmd.set("deletes", vec![statement]);
    cmd.set("ordered", true);
    append_write_concern(&mut cmd, write_concern);
    cmd
}

pub fn count_command(coll: &str, query: &Filter, skip: i64, limit: i64) -> Result<Document> {
    if skip < 0 {
        return Err(DriverError::InvalidArgument(format!(
            "skip must be >= 0, got {skip}"
        )));
    }
    let mut cmd = Document::new();
    cmd.set("count", coll);
    cmd.set("query", query.as_document().clone());
    if skip > 0 {
        cmd.set("skip", Value::from_integer(skip));
    }
    if limit != 0 {
        cmd.set("limit", Value::from_integer(limit.saturating_abs()));
    }
    Ok(cmd)
}

/// `options` keys are appended after the pipeline; `cursor: {}` is added
/// unless the caller supplied one
pub fn aggregate_command(coll: &str, pipeline: &[Document], options: Option<&Document>) -> Document {
    let mut cmd = Document::new();
    cmd.set("aggregate", coll);
    cmd.set(
        "pipeline",
        Value::Array(pipeline.iter().cloned().map(Value::Document).collect()),
    );
    if let Some(options) = options {
        for (key, value) in options.iter() {
            cmd.set(key.clone(), value.clone());
        }
    }
    if !cmd.contains_key("cursor") {
        cmd.set("cursor", Document::new());
    }
    cmd
}

pub fn get_more_command(coll: &str, cursor_id: i64, batch_size: Option<i32>) -> Document {
    let mut cmd = Document::new();
    cmd.set("getMore", cursor_id);
    cmd.set("collection", coll);
    if let Some(batch_size) = batch_size {
        cmd.set("batchSize", batch_size);
    }
    cmd
}

pub fn kill_cursors_command(coll: &str, cursor_ids: &[i64]) -> Document {
    let mut cmd = Document::new();
    cmd.set("killCursors", coll);
    cmd.set(
        "cursors",
        Value::Array(cursor_ids.iter().map(|&id| Value::Int64(id)).collect()),
    );
    cmd
}

/// `cursor` sub-document of a find/aggregate/getMore reply
#[derive(Debug, Clone, PartialEq)]
pub struct CursorReply {
    pub id: i64,
    /// Server-reported namespace, when present
    pub ns: Option<Namespace>,
    pub batch: Vec<Document>,
}

impl CursorReply {
    pub fn parse(reply: &Document) -> Result<Self> {
        let cursor = reply.get_document("cursor").map_err(|_| {
            DriverError::encoding(EncodingErrorKind::InvalidValue, "reply has no cursor document")
        })?;
        let id = cursor
            .get("id")
            .and_then(numeric_i64)
            .ok_or_else(|| DriverError::encoding(EncodingErrorKind::InvalidValue, "cursor has no id"))?;
        let batch_values = cursor
            .get_array("firstBatch")
            .or_else(|_| cursor.get_array("nextBatch"))
            .map_err(|_| {
                DriverError::encoding(EncodingErrorKind::InvalidValue, "cursor has no batch")
            })?;
        let batch = batch_values
            .iter()
            .map(|v| match v {
                Value::Document(d) => Ok(d.clone()),
                other => Err(DriverError::encoding(
                    EncodingErrorKind::InvalidValue,
                    format!("cursor batch holds a {}", other.type_name()),
                )),
            })
            .collect::<Result<Vec<_>>>()?;
        let ns = cursor.get_str("ns").ok().and_then(|s| Namespace::parse(s).ok());
        Ok(Self { id, ns, batch })
    }
}

/// Send `command` to `db` and return the validated reply.
///
/// Uses the connection's negotiated message format and compressor;
/// handshake and authentication commands are never compressed.
#[instrument(skip(conn, command), fields(conn_id = conn.id()))]
pub async fn execute(conn: &mut Connection, db: &str, command: &Document) -> Result<Document> {
    let name = command.first_key().unwrap_or_default().to_string();
    let settings = conn.settings().clone();
    let compressor = settings
        .compressor
        .filter(|_| !is_uncompressible_command(&name));

    let (op_code, body) = encode_command(settings.format, db, command, compressor)?;
    if body.len() + crate::core::packet::HEADER_LEN > settings.max_message_size {
        return Err(DriverError::encoding(
            EncodingErrorKind::DocumentTooLarge,
            format!(
                "command '{name}' encodes to {} bytes, limit {}",
                body.len(),
                settings.max_message_size
            ),
        ));
    }

    let timer = Timer::start("command");
    global_metrics().command_sent();
    let result = async {
        let packet = conn.round_trip(op_code, body).await?;
        let message = decode_reply(packet.header.op_code, &packet.body, settings.max_message_size)?;
        check_ok(reply_document(message)?)
    }
    .await;
    let duration_ms = timer.elapsed_ms() as u64;

    match &result {
        Ok(_) => debug!(command = %name, db, duration_ms, "Command succeeded"),
        Err(e) => {
            global_metrics().command_failed();
            if e.encoding_kind().is_some() {
                // A reply that cannot be decoded leaves the stream position unknown
                conn.invalidate("undecodable reply");
                global_metrics().protocol_error();
            }
            warn!(command = %name, db, duration_ms, error = %e, "Command failed");
        }
    }
    result
}
