//! In-process server speaking just enough of the wire protocol for tests
#![allow(dead_code, clippy::unwrap_used)]

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docwire::config::DriverConfig;
use docwire::core::codec::WireCodec;
use docwire::core::packet::{OpCode, Packet};
use docwire::protocol::message::{
    decode_op_compressed, decode_op_msg, decode_op_query, encode_op_msg, encode_op_reply,
};
use docwire::{doc, Document};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

/// Reply key: sleep this many milliseconds before answering
pub const DELAY_MS: &str = "$mockDelayMs";
/// Reply key: drop the connection instead of answering
pub const DROP: &str = "$mockDrop";

type Handler = dyn Fn(&str, &Document) -> Document + Send + Sync;

/// A command the server received, with the database it was sent to
#[derive(Debug, Clone)]
pub struct Received {
    pub db: String,
    pub command: Document,
    pub op_code: i32,
}

impl Received {
    pub fn name(&self) -> &str {
        self.command.first_key().unwrap_or("")
    }
}

pub struct MockServer {
    pub port: u16,
    received: Arc<Mutex<Vec<Received>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

/// Handshake reply of a standalone server
pub fn hello_reply(max_wire_version: i32) -> Document {
    doc! {
        "isWritablePrimary" => true,
        "ismaster" => true,
        "minWireVersion" => 0,
        "maxWireVersion" => max_wire_version,
        "maxBsonObjectSize" => 16 * 1024 * 1024,
        "maxMessageSizeBytes" => 48_000_000,
        "maxWriteBatchSize" => 100_000,
        "ok" => 1.0,
    }
}

impl MockServer {
    /// Modern server (OP_MSG) answering everything but the handshake with `handler`
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&str, &Document) -> Document + Send + Sync + 'static,
    {
        Self::with_hello(hello_reply(17), handler).await
    }

    pub async fn with_hello<F>(hello: Document, handler: F) -> Self
    where
        F: Fn(&str, &Document) -> Document + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let handler: Arc<Handler> = Arc::new(handler);
        let hello = Arc::new(hello);

        let task = {
            let received = received.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let framed = Framed::new(socket, WireCodec::default());
                    tokio::spawn(serve(
                        framed,
                        handler.clone(),
                        hello.clone(),
                        received.clone(),
                    ));
                }
            })
        };

        Self {
            port,
            received,
            connections,
            task,
        }
    }

    /// Everything except handshakes, in arrival order
    pub fn received(&self) -> Vec<Received> {
        self.received.lock().clone()
    }

    /// Received commands with the given name
    pub fn named(&self, name: &str) -> Vec<Received> {
        self.received()
            .into_iter()
            .filter(|r| r.name() == name)
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> DriverConfig {
        let port = self.port;
        DriverConfig::default_with_overrides(|c| {
            c.client.host = "127.0.0.1".into();
            c.client.port = port;
            c.client.database = "app".into();
            c.client.connect_timeout = Duration::from_secs(2);
            c.client.socket_timeout = Duration::from_secs(2);
            c.pool.acquire_timeout = Duration::from_secs(2);
        })
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

static SERVER_REQUEST_ID: AtomicI32 = AtomicI32::new(1_000_000);

async fn serve(
    mut framed: Framed<tokio::net::TcpStream, WireCodec>,
    handler: Arc<Handler>,
    hello: Arc<Document>,
    received: Arc<Mutex<Vec<Received>>>,
) {
    while let Some(Ok(packet)) = framed.next().await {
        let request_id = packet.header.request_id;
        let (op_code, body) = if packet.header.op_code == OpCode::Compressed.as_i32() {
            match decode_op_compressed(&packet.body, 64 * 1024 * 1024) {
                Ok(inner) => inner,
                Err(_) => return,
            }
        } else {
            (packet.header.op_code, packet.body)
        };

        let (db, command, modern) = if op_code == OpCode::Msg.as_i32() {
            let Ok(msg) = decode_op_msg(&body) else { return };
            let db = msg.body.get_str("$db").unwrap_or("admin").to_string();
            (db, msg.body, true)
        } else if op_code == OpCode::Query.as_i32() {
            let Ok(query) = decode_op_query(&body) else { return };
            let db = query
                .full_collection_name
                .trim_end_matches(".$cmd")
                .to_string();
            (db, query.query, false)
        } else {
            return;
        };

        let name = command.first_key().unwrap_or("").to_string();
        let mut reply = if name == "hello" || name.eq_ignore_ascii_case("isMaster") {
            (*hello).clone()
        } else {
            received.lock().push(Received {
                db: db.clone(),
                command: command.clone(),
                op_code,
            });
            handler(&db, &command)
        };

        if reply.remove(DROP).is_some() {
            return;
        }
        if let Some(delay) = reply.remove(DELAY_MS) {
            let ms = delay.as_i32().unwrap_or(0).max(0) as u64;
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        let (reply_op, reply_body) = if modern {
            (OpCode::Msg, encode_op_msg(0, &reply).unwrap())
        } else {
            (OpCode::Reply, encode_op_reply(0, 0, &[reply]).unwrap())
        };
        let id = SERVER_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let packet = Packet::reply(id, request_id, reply_op, reply_body).unwrap();
        if framed.send(packet).await.is_err() {
            return;
        }
    }
}

/// `{ok: 1}` plus the given fields
pub fn ok_with(fields: Document) -> Document {
    let mut reply = fields;
    reply.set("ok", 1.0);
    reply
}

/// A cursor reply as `find`/`aggregate` would send it
pub fn cursor_reply(ns: &str, id: i64, batch: Vec<Document>, first: bool) -> Document {
    let key = if first { "firstBatch" } else { "nextBatch" };
    let mut cursor = Document::new();
    cursor.set("id", id);
    cursor.set("ns", ns);
    cursor.set(key, batch);
    ok_with(doc! { "cursor" => cursor })
}
