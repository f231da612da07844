//! Connection handshake.
//!
//! The first command on every connection. It announces client metadata and
//! the compressors we can use, and records the server's limits on the
//! connection: wire version (which picks OP_MSG or OP_QUERY), maximum
//! document and message sizes, write batch size, the negotiated compressor
//! and, when asked, the SASL mechanisms available for the user.

use tracing::{info, instrument, warn};

use crate::config::WireProtocol;
use crate::core::document::{Document, Value};
use crate::core::packet::DEFAULT_MAX_MESSAGE_SIZE;
use crate::error::Result;
use crate::protocol::command::execute;
use crate::protocol::message::MessageFormat;
use crate::protocol::reply::numeric_i64;
use crate::transport::connection::{
    Connection, ConnectionSettings, DEFAULT_MAX_BSON_OBJECT_SIZE, DEFAULT_MAX_WRITE_BATCH_SIZE,
};
use crate::utils::compression::Compressor;
use crate::utils::metrics::global_metrics;

/// What we tell the server about ourselves
#[derive(Debug, Clone, Default)]
pub struct HelloOptions {
    pub app_name: String,
    /// In preference order
    pub compressors: Vec<Compressor>,
    /// `<source>.<user>`; asks the server for `saslSupportedMechs`
    pub sasl_user: Option<String>,
    pub wire_protocol: WireProtocol,
    /// Upper bound for frames regardless of what the server reports
    pub max_message_size: Option<usize>,
}

/// Fields of the handshake reply the driver uses
#[derive(Debug, Clone, PartialEq)]
pub struct HelloReply {
    pub is_writable_primary: bool,
    pub min_wire_version: i32,
    pub max_wire_version: i32,
    pub max_bson_object_size: usize,
    pub max_message_size_bytes: usize,
    pub max_write_batch_size: usize,
    pub compression: Vec<String>,
    pub sasl_supported_mechs: Option<Vec<String>>,
}

fn positive_usize(doc: &Document, key: &str, default: usize) -> usize {
    doc.get(key)
        .and_then(numeric_i64)
        .filter(|&v| v > 0)
        .map(|v| v as usize)
        .unwrap_or(default)
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    match value {
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str().ok().map(str::to_string))
                .collect(),
        ),
        _ => None,
    }
}

impl HelloReply {
    pub fn from_document(doc: &Document) -> Self {
        let is_writable_primary = doc
            .get_bool("isWritablePrimary")
            .or_else(|_| doc.get_bool("ismaster"))
            .unwrap_or(false);
        Self {
            is_writable_primary,
            min_wire_version: doc.get("minWireVersion").and_then(numeric_i64).unwrap_or(0) as i32,
            max_wire_version: doc.get("maxWireVersion").and_then(numeric_i64).unwrap_or(0) as i32,
            max_bson_object_size: positive_usize(
                doc,
                "maxBsonObjectSize",
                DEFAULT_MAX_BSON_OBJECT_SIZE,
            ),
            max_message_size_bytes: positive_usize(
                doc,
                "maxMessageSizeBytes",
                DEFAULT_MAX_MESSAGE_SIZE,
            ),
            max_write_batch_size: positive_usize(
                doc,
                "maxWriteBatchSize",
                DEFAULT_MAX_WRITE_BATCH_SIZE,
            ),
            compression: string_list(doc.get("compression")).unwrap_or_default(),
            sasl_supported_mechs: string_list(doc.get("saslSupportedMechs")),
        }
    }

    /// First of our compressors (in our order) the server also accepted
    pub fn negotiate_compressor(&self, ours: &[Compressor]) -> Option<Compressor> {
        ours.iter()
            .copied()
            .find(|c| self.compression.iter().any(|name| name == c.name()))
    }
}

/// `client` metadata sub-document
pub fn client_metadata(app_name: &str) -> Document {
    let mut driver = Document::new();
    driver.set("name", env!("CARGO_PKG_NAME"));
    driver.set("version", env!("CARGO_PKG_VERSION"));

    let mut os = Document::new();
    os.set("type", std::env::consts::OS);
    os.set("architecture", std::env::consts::ARCH);

    let mut meta = Document::new();
    if !app_name.is_empty() {
        let mut application = Document::new();
        application.set("name", app_name);
        meta.set("application", application);
    }
    meta.set("driver", driver);
    meta.set("os", os);
    meta
}

/// `hello` over OP_MSG, legacy `isMaster` otherwise
pub fn hello_command(options: &HelloOptions, format: MessageFormat) -> Document {
    let mut cmd = Document::new();
    match format {
        MessageFormat::OpMsg => cmd.set("hello", 1),
        MessageFormat::OpQuery => cmd.set("isMaster", 1),
    }
    cmd.set("client", client_metadata(&options.app_name));
    cmd.set(
        "compression",
        Value::Array(
            options
                .compressors
                .iter()
                .map(|c| Value::from(c.name()))
                .collect(),
        ),
    );
    if let Some(user) = &options.sasl_user {
        cmd.set("saslSupportedMechs", user.as_str());
    }
    cmd
}

/// Run the handshake and store the negotiated settings on `conn`
#[instrument(skip(conn, options), fields(conn_id = conn.id()))]
pub async fn handshake(conn: &mut Connection, options: &HelloOptions) -> Result<HelloReply> {
    global_metrics().handshake_attempt();

    let initial_format = match options.wire_protocol {
        WireProtocol::OpMsg => MessageFormat::OpMsg,
        WireProtocol::Auto | WireProtocol::OpQuery => MessageFormat::OpQuery,
    };
    let mut settings = conn.settings().clone();
    settings.format = initial_format;
    settings.compressor = None;
    conn.set_settings(settings);

    let command = hello_command(options, initial_format);
    let reply = match execute(conn, "admin", &command).await {
        Ok(doc) => HelloReply::from_document(&doc),
        Err(e) => {
            global_metrics().handshake_failed();
            warn!(error = %e, "Handshake failed");
            return Err(e);
        }
    };

    let format = match options.wire_protocol {
        WireProtocol::Auto => MessageFormat::for_wire_version(reply.max_wire_version),
        WireProtocol::OpMsg => MessageFormat::OpMsg,
        WireProtocol::OpQuery => MessageFormat::OpQuery,
    };
    let max_message_size = match options.max_message_size {
        Some(cap) => reply.max_message_size_bytes.min(cap),
        None => reply.max_message_size_bytes,
    };
    let compressor = reply.negotiate_compressor(&options.compressors);

    conn.set_settings(ConnectionSettings {
        format,
        compressor,
        max_bson_object_size: reply.max_bson_object_size,
        max_message_size,
        max_write_batch_size: reply.max_write_batch_size,
    });

    info!(
        max_wire_version = reply.max_wire_version,
        format = ?format,
        compressor = compressor.map(|c| c.name()).unwrap_or("none"),
        "Handshake complete"
    );
    Ok(reply)
}
