//! Server-side cursors.
//!
//! A cursor buffers the batch it was created with and fetches the next one
//! with `getMore` only when the buffer runs dry. Documents come out in the
//! order the server sent them.

use std::collections::VecDeque;

use futures::stream::{self, Stream};
use tracing::{debug, warn};

use crate::core::document::Document;
use crate::error::Result;
use crate::protocol::command::{CursorReply, Namespace};
use crate::service::executor::Executor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// `id` 0 means the buffer holds everything that is left
    Active { id: i64 },
    Exhausted,
}

/// Lazily fetched query results
pub struct Cursor {
    executor: Executor,
    ns: Namespace,
    state: CursorState,
    batch: VecDeque<Document>,
    batch_size: Option<i32>,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("ns", &self.ns)
            .field("state", &self.state)
            .field("buffered", &self.batch.len())
            .finish()
    }
}

impl Cursor {
    pub(crate) fn new(
        executor: Executor,
        ns: Namespace,
        reply: CursorReply,
        batch_size: Option<i32>,
    ) -> Self {
        Self {
            executor,
            ns: reply.ns.unwrap_or(ns),
            state: CursorState::Active { id: reply.id },
            batch: reply.batch.into(),
            batch_size,
        }
    }

    /// Server cursor id; 0 once the server has nothing more to send
    pub fn id(&self) -> i64 {
        match self.state {
            CursorState::Active { id } => id,
            CursorState::Exhausted => 0,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    /// Documents already received and not yet returned
    pub fn buffered(&self) -> usize {
        self.batch.len()
    }

    /// Next document, fetching another batch when the buffer is empty.
    ///
    /// A failed `getMore` leaves the cursor as it was, so the call can be
    /// retried or the cursor closed.
    pub async fn next(&mut self) -> Result<Option<Document>> {
        loop {
            if let Some(doc) = self.batch.pop_front() {
                return Ok(Some(doc));
            }
            match self.state {
                CursorState::Exhausted => return Ok(None),
                CursorState::Active { id: 0 } => {
                    self.state = CursorState::Exhausted;
                    return Ok(None);
                }
                CursorState::Active { id } => {
                    let (batch, next_id) = self.executor.get_more(&self.ns, id, self.batch_size).await?;
                    self.batch = batch.into();
                    self.state = CursorState::Active { id: next_id };
                }
            }
        }
    }

    /// Kill the server cursor if one is open. Failures are logged, never returned.
    pub async fn close(&mut self) {
        if let CursorState::Active { id } = self.state {
            if id != 0 {
                match self.executor.kill_cursors(&self.ns, &[id]).await {
                    Ok(()) => debug!(cursor_id = id, ns = %self.ns, "Cursor killed"),
                    Err(e) => warn!(cursor_id = id, ns = %self.ns, error = %e, "killCursors failed"),
                }
            }
        }
        self.batch.clear();
        self.state = CursorState::Exhausted;
    }

    /// Drain every remaining document
    pub async fn try_collect(mut self) -> Result<Vec<Document>> {
        let mut out = Vec::with_capacity(self.batch.len());
        while let Some(doc) = self.next().await? {
            out.push(doc);
        }
        Ok(out)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Document>> + Send {
        stream::try_unfold(self, |mut cursor| async move {
            Ok(cursor.next().await?.map(|doc| (doc, cursor)))
        })
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if let CursorState::Active { id } = self.state {
            if id != 0 {
                warn!(cursor_id = id, ns = %self.ns, "Cursor dropped while open; server will time it out");
            }
        }
    }
}
