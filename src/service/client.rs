//! Client facade: [`Client`] -> [`Database`] -> [`Collection`].
//!
//! # Example
//! ```rust,no_run
//! use docwire::{doc, Client, DriverConfig};
//!
//! # async fn demo() -> docwire::Result<()> {
//! let client = Client::connect(DriverConfig::from_uri("mongodb://localhost:27017/shop")?).await?;
//! let orders = client.default_database().collection("orders")?;
//! orders.insert_one(doc! { "sku" => "A-1", "qty" => 2 }).await?;
//! let open = orders.count(doc! { "status" => "open" }).await?;
//! println!("{open} open orders");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, instrument};

use crate::config::DriverConfig;
use crate::core::document::{Document, Value};
use crate::error::Result;
use crate::protocol::auth::{authenticate, select_mechanism};
use crate::protocol::command::{
    DeleteOptions, Filter, FindOptions, InsertResult, Namespace, Projection, UpdateOptions,
    UpdateResult,
};
use crate::protocol::hello::{handshake, HelloOptions};
use crate::service::cursor::Cursor;
use crate::service::executor::Executor;
use crate::transport::connection::Connection;
use crate::transport::pool::{ConnectionFactory, ConnectionPool};
use crate::transport::tls::TlsClientConfig;

/// Opens connections the way the configuration asks: TCP or TLS, then the
/// handshake, then authentication when credentials are set
struct Establisher {
    config: Arc<DriverConfig>,
    tls: Option<TlsClientConfig>,
}

impl Establisher {
    async fn establish(&self) -> Result<Connection> {
        let client = &self.config.client;
        let mut conn = Connection::connect(
            &client.host,
            client.port,
            self.tls.as_ref(),
            client.connect_timeout,
            client.socket_timeout,
        )
        .await?;

        let credentials = self.config.credentials.as_ref();
        let options = HelloOptions {
            app_name: client.app_name.clone(),
            compressors: client.compressor_list(),
            sasl_user: credentials
                .filter(|c| c.mechanism.is_none())
                .map(|c| format!("{}.{}", c.source, c.username)),
            wire_protocol: client.wire_protocol,
            max_message_size: Some(client.max_message_size),
        };
        let hello = handshake(&mut conn, &options).await?;

        if let Some(creds) = credentials {
            let mechanism = select_mechanism(creds.mechanism, &hello);
            authenticate(
                &mut conn,
                &creds.source,
                &creds.username,
                creds.password.as_str(),
                mechanism,
            )
            .await?;
        }
        Ok(conn)
    }
}

impl ConnectionFactory for Establisher {
    fn connect(&self) -> BoxFuture<'_, Result<Connection>> {
        Box::pin(self.establish())
    }
}

/// Entry point; cheap to clone
#[derive(Debug, Clone)]
pub struct Client {
    executor: Executor,
    default_db: String,
}

impl Client {
    /// Validate `config`, build the pool and open one connection to prove
    /// the server is reachable (and the credentials accepted)
    #[instrument(skip(config), fields(address = %config.client.address()))]
    pub async fn connect(config: DriverConfig) -> Result<Self> {
        config.validate_strict()?;
        let tls = if config.tls.enabled {
            Some(TlsClientConfig::from_config(&config.tls, &config.client.host)?)
        } else {
            None
        };
        let write_concern = config
            .client
            .write_concern
            .as_ref()
            .map(|wc| wc.to_document())
            .filter(|d| !d.is_empty());
        let default_db = config.client.database.clone();
        let pool_size = config.pool.max_size;
        let acquire_timeout = config.pool.acquire_timeout;

        let establisher = Establisher {
            config: Arc::new(config),
            tls,
        };
        let pool = ConnectionPool::new(establisher, pool_size, acquire_timeout);
        drop(pool.acquire().await?);

        info!(pool_size, "Client connected");
        Ok(Self {
            executor: Executor::new(pool, write_concern),
            default_db,
        })
    }

    /// [`connect`](Self::connect) with a `mongodb://` URI
    pub async fn with_uri(uri: &str) -> Result<Self> {
        Self::connect(DriverConfig::from_uri(uri)?).await
    }

    pub fn database(&self, name: impl Into<String>) -> Database {
        Database {
            executor: self.executor.clone(),
            name: name.into(),
        }
    }

    /// The database named in the configuration or URI path
    pub fn default_database(&self) -> Database {
        self.database(self.default_db.clone())
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub async fn run_command(&self, db: &str, command: &Document) -> Result<Document> {
        self.executor.run_command(db, command).await
    }

    /// Close the pool; later operations fail with `HandleClosed`
    pub fn close(&self) {
        self.executor.pool().close();
    }
}

#[derive(Debug, Clone)]
pub struct Database {
    executor: Executor,
    name: String,
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Empty names are rejected
    pub fn collection(&self, name: &str) -> Result<Collection> {
        Ok(Collection {
            executor: self.executor.clone(),
            ns: Namespace::new(self.name.as_str(), name)?,
        })
    }

    pub async fn run_command(&self, command: &Document) -> Result<Document> {
        self.executor.run_command(&self.name, command).await
    }
}

#[derive(Debug, Clone)]
pub struct Collection {
    executor: Executor,
    ns: Namespace,
}

impl Collection {
    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// Returns the document's `_id`
    pub async fn insert_one(&self, document: Document) -> Result<Value> {
        let result = self.executor.insert(&self.ns, vec![document]).await?;
        Ok(result.inserted_ids.into_iter().next().unwrap_or(Value::Null))
    }

    pub async fn insert_many(&self, documents: Vec<Document>) -> Result<InsertResult> {
        self.executor.insert(&self.ns, documents).await
    }

    pub async fn find(&self, filter: impl Into<Filter>) -> Result<Cursor> {
        self.executor.find(&self.ns, FindOptions::new(filter)).await
    }

    pub async fn find_with(&self, options: FindOptions) -> Result<Cursor> {
        self.executor.find(&self.ns, options).await
    }

    pub async fn find_one(&self, filter: impl Into<Filter>) -> Result<Option<Document>> {
        self.executor.find_one(&self.ns, filter, None).await
    }

    pub async fn find_one_with(
        &self,
        filter: impl Into<Filter>,
        projection: impl Into<Projection>,
    ) -> Result<Option<Document>> {
        self.executor
            .find_one(&self.ns, filter, Some(projection.into()))
            .await
    }

    /// Update the first match
    pub async fn update(&self, query: impl Into<Filter>, update: &Document) -> Result<UpdateResult> {
        self.executor
            .update(&self.ns, query, update, UpdateOptions::default())
            .await
    }

    /// Update the first match, inserting when nothing matches
    pub async fn upsert(&self, query: impl Into<Filter>, update: &Document) -> Result<UpdateResult> {
        let options = UpdateOptions {
            upsert: true,
            multi: false,
        };
        self.executor.update(&self.ns, query, update, options).await
    }

    /// Update every match
    pub async fn update_all(
        &self,
        query: impl Into<Filter>,
        update: &Document,
    ) -> Result<UpdateResult> {
        let options = UpdateOptions {
            upsert: false,
            multi: true,
        };
        self.executor.update(&self.ns, query, update, options).await
    }

    /// Delete every match
    pub async fn remove(&self, query: impl Into<Filter>) -> Result<u64> {
        self.executor
            .delete(&self.ns, query, DeleteOptions { limit: 0 })
            .await
    }

    /// Delete at most one match
    pub async fn delete_one(&self, query: impl Into<Filter>) -> Result<u64> {
        self.executor
            .delete(&self.ns, query, DeleteOptions { limit: 1 })
            .await
    }

    pub async fn count(&self, query: impl Into<Filter>) -> Result<u64> {
        self.executor.count(&self.ns, query, 0, 0).await
    }

    pub async fn aggregate(
        &self,
        pipeline: &[Document],
        options: Option<&Document>,
    ) -> Result<Cursor> {
        self.executor.aggregate(&self.ns, pipeline, options).await
    }
}
