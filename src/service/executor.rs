//! # Command Executor
//!
//! Every driver operation as one or more commands sent through the pool.
//!
//! ## Write results
//! Inserts are split into batches no larger than the server's
//! `maxWriteBatchSize` and `maxBsonObjectSize`. Write errors from every batch
//! are collected and reported as one `CommandError` whose `write_errors`
//! carry indexes into the caller's input.

use tracing::{debug, instrument, warn};

use crate::core::bson::encoded_len;
use crate::core::document::{Document, Value};
use crate::core::oid::ObjectId;
use crate::error::{DriverError, EncodingErrorKind, Result};
use crate::protocol::command::{
    aggregate_command, count_command, delete_command, execute, find_command, get_more_command,
    insert_command, kill_cursors_command, update_command, CursorReply, DeleteOptions, Filter,
    FindOptions, InsertResult, Namespace, Projection, UpdateOptions, UpdateResult,
};
use crate::protocol::reply::{numeric_i64, WriteOutcome};
use crate::service::cursor::Cursor;
use crate::transport::pool::ConnectionPool;
use crate::utils::metrics::global_metrics;

/// Room for the command fields around the documents of one insert batch
const BATCH_OVERHEAD: usize = 16 * 1024;

/// Runs commands on pooled connections
#[derive(Debug, Clone)]
pub struct Executor {
    pool: ConnectionPool,
    write_concern: Option<Document>,
}

impl Executor {
    pub fn new(pool: ConnectionPool, write_concern: Option<Document>) -> Self {
        Self {
            pool,
            write_concern,
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn write_concern(&self) -> Option<&Document> {
        self.write_concern.as_ref()
    }

    /// Run any command and return its validated reply
    pub async fn run_command(&self, db: &str, command: &Document) -> Result<Document> {
        if command.is_empty() {
            return Err(DriverError::InvalidArgument("command document is empty".into()));
        }
        let mut conn = self.pool.acquire().await?;
        execute(&mut conn, db, command).await
    }

    /// Insert `documents`, generating an ObjectId `_id` (placed first) for
    /// any document without one
    #[instrument(skip(self, documents), fields(ns = %ns, count = documents.len()))]
    pub async fn insert(&self, ns: &Namespace, mut documents: Vec<Document>) -> Result<InsertResult> {
        if documents.is_empty() {
            return Err(DriverError::InvalidArgument(
                "insert requires at least one document".into(),
            ));
        }

        let mut inserted_ids = Vec::with_capacity(documents.len());
        for doc in documents.iter_mut() {
            if !doc.contains_key("_id") {
                doc.prepend("_id", ObjectId::new());
            }
            inserted_ids.push(doc.get("_id").cloned().unwrap_or(Value::Null));
        }

        let mut conn = self.pool.acquire().await?;
        let settings = conn.settings().clone();
        let batches = split_batches(
            &documents,
            settings.max_write_batch_size,
            settings.max_bson_object_size,
        )?;

        let mut outcome = WriteOutcome::new();
        let mut offset = 0;
        for batch in batches {
            let command = insert_command(&ns.coll, batch, self.write_concern.as_ref());
            match execute(&mut conn, &ns.db, &command).await {
                Ok(reply) => outcome.absorb(&reply, offset),
                // Earlier batches already failed; report them together with this one
                Err(DriverError::Command(err)) if outcome.has_errors() => {
                    warn!(offset, code = err.code, "Insert batch rejected");
                    outcome.absorb_failure(err, offset, batch.len());
                    offset += batch.len();
                    break;
                }
                Err(e) => return Err(e),
            }
            offset += batch.len();
        }
        debug!(documents = offset, "Insert complete");

        let outcome = outcome.into_result()?;
        Ok(InsertResult {
            inserted_count: outcome.n,
            inserted_ids,
        })
    }

    /// Start a query. The returned cursor holds the first batch.
    #[instrument(skip(self, options), fields(ns = %ns))]
    pub async fn find(&self, ns: &Namespace, options: FindOptions) -> Result<Cursor> {
        let command = find_command(&ns.coll, &options)?;
        let reply = self.run_command(&ns.db, &command).await?;
        let cursor = CursorReply::parse(&reply)?;
        Ok(Cursor::new(self.clone(), ns.clone(), cursor, options.batch_size))
    }

    /// First match, if any
    pub async fn find_one(
        &self,
        ns: &Namespace,
        filter: impl Into<Filter>,
        projection: Option<Projection>,
    ) -> Result<Option<Document>> {
        let mut options = FindOptions::new(filter).limit(-1);
        options.projection = projection;
        let mut cursor = self.find(ns, options).await?;
        let first = cursor.next().await?;
        cursor.close().await;
        Ok(first)
    }

    #[instrument(skip(self, query, update), fields(ns = %ns))]
    pub async fn update(
        &self,
        ns: &Namespace,
        query: impl Into<Filter>,
        update: &Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult> {
        if update.is_empty() {
            return Err(DriverError::InvalidArgument("update document is empty".into()));
        }
        let command = update_command(
            &ns.coll,
            &query.into(),
            update,
            &options,
            self.write_concern.as_ref(),
        );
        let reply = self.run_command(&ns.db, &command).await?;

        let mut outcome = WriteOutcome::new();
        outcome.absorb(&reply, 0);
        let outcome = outcome.into_result()?;
        let upserted_id = outcome.upserted.first().map(|(_, id)| id.clone());
        Ok(UpdateResult {
            matched: outcome.n.saturating_sub(outcome.upserted.len() as u64),
            modified: outcome.n_modified,
            upserted_id,
        })
    }

    /// Delete matches; returns the number removed
    #[instrument(skip(self, query), fields(ns = %ns))]
    pub async fn delete(
        &self,
        ns: &Namespace,
        query: impl Into<Filter>,
        options: DeleteOptions,
    ) -> Result<u64> {
        let command = delete_command(&ns.coll, &query.into(), &options, self.write_concern.as_ref());
        let reply = self.run_command(&ns.db, &command).await?;
        let mut outcome = WriteOutcome::new();
        outcome.absorb(&reply, 0);
        Ok(outcome.into_result()?.n)
    }

    pub async fn count(
        &self,
        ns: &Namespace,
        query: impl Into<Filter>,
        skip: i64,
        limit: i64,
    ) -> Result<u64> {
        let command = count_command(&ns.coll, &query.into(), skip, limit)?;
        let reply = self.run_command(&ns.db, &command).await?;
        reply
            .get("n")
            .and_then(numeric_i64)
            .map(|n| n.max(0) as u64)
            .ok_or_else(|| {
                DriverError::encoding(EncodingErrorKind::InvalidValue, "count reply has no 'n'")
            })
    }

    #[instrument(skip(self, pipeline, options), fields(ns = %ns, stages = pipeline.len()))]
    pub async fn aggregate(
        &self,
        ns: &Namespace,
        pipeline: &[Document],
        options: Option<&Document>,
    ) -> Result<Cursor> {
        let command = aggregate_command(&ns.coll, pipeline, options);
        let batch_size = command
            .get_document("cursor")
            .ok()
            .and_then(|c| c.get("batchSize"))
            .and_then(numeric_i64)
            .map(|n| n as i32);
        let reply = self.run_command(&ns.db, &command).await?;
        let cursor = CursorReply::parse(&reply)?;
        Ok(Cursor::new(self.clone(), ns.clone(), cursor, batch_size))
    }

    /// Next batch of an open cursor and the id to continue with
    pub async fn get_more(
        &self,
        ns: &Namespace,
        cursor_id: i64,
        batch_size: Option<i32>,
    ) -> Result<(Vec<Document>, i64)> {
        global_metrics().get_more();
        let command = get_more_command(&ns.coll, cursor_id, batch_size);
        let reply = self.run_command(&ns.db, &command).await?;
        let cursor = CursorReply::parse(&reply)?;
        Ok((cursor.batch, cursor.id))
    }

    pub async fn kill_cursors(&self, ns: &Namespace, cursor_ids: &[i64]) -> Result<()> {
        if cursor_ids.is_empty() {
            return Ok(());
        }
        let command = kill_cursors_command(&ns.coll, cursor_ids);
        self.run_command(&ns.db, &command).await?;
        for _ in cursor_ids {
            global_metrics().cursor_killed();
        }
        Ok(())
    }
}

/// Consecutive slices, each within `max_count` documents and roughly
/// `max_bytes` of encoded data. A single document over `max_bytes` is an error.
fn split_batches(
    documents: &[Document],
    max_count: usize,
    max_bytes: usize,
) -> Result<Vec<&[Document]>> {
    let max_count = max_count.max(1);
    let mut batches = Vec::new();
    let mut start = 0;
    let mut bytes = 0;
    for (i, doc) in documents.iter().enumerate() {
        let len = encoded_len(doc);
        if len > max_bytes {
            return Err(DriverError::encoding(
                EncodingErrorKind::DocumentTooLarge,
                format!("document {i} encodes to {len} bytes, server limit is {max_bytes}"),
            ));
        }
        let count = i - start;
        if count > 0 && (count >= max_count || bytes + len > max_bytes + BATCH_OVERHEAD) {
            batches.push(&documents[start..i]);
            start = i;
            bytes = 0;
        }
        bytes += len;
    }
    batches.push(&documents[start..]);
    Ok(batches)
}
