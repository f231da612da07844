//! Connection pooling
//!
//! At most `max_size` connections exist at once, counted by a semaphore.
//! Idle connections are reused LIFO; a connection that was invalidated while
//! checked out is dropped on return instead of going back to the idle list.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use crate::error::{constants, DriverError, Result, TransportErrorKind};
use crate::transport::connection::Connection;
use crate::utils::timeout::with_timeout_message;

/// Produces ready-to-use connections for the pool (connected, handshaken and
/// authenticated as the caller requires)
pub trait ConnectionFactory: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, Result<Connection>>;
}

struct PoolInner {
    factory: Box<dyn ConnectionFactory>,
    idle: Mutex<Vec<Connection>>,
    semaphore: Arc<Semaphore>,
    max_size: usize,
    acquire_timeout: Duration,
    closed: AtomicBool,
}

/// A pool of server connections
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_size", &self.inner.max_size)
            .field("idle", &self.idle_count())
            .field("in_use", &self.in_use())
            .finish()
    }
}

impl ConnectionPool {
    pub fn new<F: ConnectionFactory>(factory: F, max_size: usize, acquire_timeout: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                factory: Box::new(factory),
                idle: Mutex::new(Vec::with_capacity(max_size)),
                semaphore: Arc::new(Semaphore::new(max_size)),
                max_size,
                acquire_timeout,
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn closed_error() -> DriverError {
        DriverError::transport(TransportErrorKind::HandleClosed, constants::ERR_POOL_CLOSED)
    }

    /// Check out a connection, reusing an idle one when possible. Waits up to
    /// the acquire timeout when `max_size` connections are already in use.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Self::closed_error());
        }

        let semaphore = self.inner.semaphore.clone();
        let permit = with_timeout_message(
            async move {
                semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| Self::closed_error())
            },
            self.inner.acquire_timeout,
            constants::ERR_POOL_TIMEOUT,
        )
        .await?;

        loop {
            let candidate = self.inner.idle.lock().pop();
            match candidate {
                Some(conn) if conn.is_closed() => {
                    trace!(conn_id = conn.id(), "Discarding dead idle connection");
                }
                Some(conn) => {
                    trace!(conn_id = conn.id(), "Reusing idle connection");
                    return Ok(self.wrap(conn, permit));
                }
                None => break,
            }
        }

        let conn = self.inner.factory.connect().await?;
        debug!(conn_id = conn.id(), "Opened pooled connection");
        Ok(self.wrap(conn, permit))
    }

    fn wrap(&self, conn: Connection, permit: OwnedSemaphorePermit) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            pool: self.inner.clone(),
            _permit: permit,
        }
    }

    /// Refuse further checkouts and drop idle connections.
    /// Checked-out connections are dropped when returned.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.semaphore.close();
        let drained: Vec<Connection> = self.inner.idle.lock().drain(..).collect();
        debug!(dropped = drained.len(), "Connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Connections currently checked out
    pub fn in_use(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.inner.max_size - self.inner.semaphore.available_permits()
    }
}

/// A checked-out connection; goes back to the pool on drop
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .finish()
    }
}

impl PooledConnection {
    /// Drop the connection instead of returning it
    pub fn discard(mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.invalidate("discarded by caller");
        }
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `None` after `discard` or `drop`, both of which consume self
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if conn.is_closed() || self.pool.closed.load(Ordering::Acquire) {
            trace!(conn_id = conn.id(), "Dropping connection instead of returning it");
            return;
        }
        if conn.in_flight() > 0 {
            // A cancelled round trip leaves an unread reply on the socket
            debug!(
                conn_id = conn.id(),
                in_flight = conn.in_flight(),
                "Discarding connection with a pending reply"
            );
            return;
        }
        self.pool.idle.lock().push(conn);
    }
}
