#![allow(clippy::unwrap_used)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use common::{hello_reply, ok_with, MockServer, DROP};
use docwire::core::document::Value;
use docwire::error::{EncodingErrorKind, TransportErrorKind};
use docwire::{doc, Client, Document, FindOptions, ObjectId};

#[tokio::test]
async fn insert_generates_ids_and_reports_count() {
    let server = MockServer::start(|_, cmd| {
        let n = cmd.get_array("documents").map(|d| d.len()).unwrap_or(0) as i32;
        ok_with(doc! { "n" => n })
    })
    .await;
    let client = Client::connect(server.config()).await.unwrap();
    let items = client.default_database().collection("items").unwrap();

    let given = ObjectId::new();
    let result = items
        .insert_many(vec![doc! { "_id" => given, "a" => 1 }, doc! { "a" => 2 }])
        .await
        .unwrap();

    assert_eq!(result.inserted_count, 2);
    assert_eq!(result.inserted_ids[0], Value::ObjectId(given));
    assert!(matches!(result.inserted_ids[1], Value::ObjectId(_)));

    let inserts = server.named("insert");
    assert_eq!(inserts.len(), 1);
    assert_eq!(inserts[0].db, "app");
    let sent = inserts[0].command.get_array("documents").unwrap();
    // Generated ids lead the document
    let second = sent[1].as_document().unwrap();
    assert_eq!(second.first_key(), Some("_id"));
}

#[tokio::test]
async fn failed_later_batch_keeps_earlier_write_errors() {
    let mut hello = hello_reply(17);
    hello.remove("maxWriteBatchSize");
    hello.set("maxWriteBatchSize", 2);
    let batches = AtomicUsize::new(0);
    let server = MockServer::with_hello(hello, move |_, cmd| {
        if cmd.first_key() != Some("insert") {
            return ok_with(doc! {});
        }
        match batches.fetch_add(1, Ordering::SeqCst) {
            0 => ok_with(doc! {
                "n" => 1,
                "writeErrors" => vec![doc! { "index" => 1, "code" => 11000, "errmsg" => "duplicate key b" }],
            }),
            _ => doc! { "ok" => 0.0, "errmsg" => "not primary", "code" => 10107 },
        }
    })
    .await;
    let client = Client::connect(server.config()).await.unwrap();
    let items = client.default_database().collection("items").unwrap();

    let docs = (0..4).map(|i| doc! { "i" => i }).collect();
    let err = items.insert_many(docs).await.unwrap_err();

    assert_eq!(server.named("insert").len(), 2);
    let cmd = err.as_command_error().unwrap();
    let failures: Vec<_> = cmd.write_errors.iter().map(|w| (w.index, w.code)).collect();
    assert_eq!(failures, vec![(1, 11000), (2, 10107), (3, 10107)]);
    assert_eq!(cmd.code, 11000);
}

#[tokio::test]
async fn insert_write_errors_are_aggregated() {
    let server = MockServer::start(|_, _| {
        ok_with(doc! {
            "n" => 1,
            "writeErrors" => vec![
                doc! { "index" => 0, "code" => 11000, "errmsg" => "duplicate key a" },
                doc! { "index" => 2, "code" => 11000, "errmsg" => "duplicate key c" },
            ],
        })
    })
    .await;
    let client = Client::connect(server.config()).await.unwrap();
    let items = client.default_database().collection("items").unwrap();

    let err = items
        .insert_many(vec![doc! { "k" => "a" }, doc! { "k" => "b" }, doc! { "k" => "c" }])
        .await
        .unwrap_err();

    assert!(err.is_command_error());
    assert!(err.transport_kind().is_none());
    let cmd = err.as_command_error().unwrap();
    let indexes: Vec<_> = cmd.write_errors.iter().map(|w| w.index).collect();
    assert_eq!(indexes, vec![0, 2]);
    assert_eq!(cmd.code, 11000);
}

#[tokio::test]
async fn command_failure_carries_code_and_raw_reply() {
    let server = MockServer::start(|_, _| {
        doc! { "ok" => 0.0, "errmsg" => "no such command", "code" => 59, "codeName" => "CommandNotFound" }
    })
    .await;
    let client = Client::connect(server.config()).await.unwrap();

    let err = client
        .run_command("admin", &doc! { "frobnicate" => 1 })
        .await
        .unwrap_err();
    let cmd = err.as_command_error().unwrap();
    assert_eq!(cmd.code, 59);
    assert_eq!(cmd.code_name.as_deref(), Some("CommandNotFound"));
    assert_eq!(cmd.raw.get_str("errmsg").unwrap(), "no such command");
}

#[tokio::test]
async fn reply_without_ok_is_an_encoding_error() {
    let server = MockServer::start(|_, _| doc! { "n" => 1 }).await;
    let client = Client::connect(server.config()).await.unwrap();

    let err = client.run_command("admin", &doc! { "ping" => 1 }).await.unwrap_err();
    assert_eq!(err.encoding_kind(), Some(EncodingErrorKind::InvalidValue));
}

#[tokio::test]
async fn find_one_sends_single_batch_and_returns_first() {
    let server = MockServer::start(|_, cmd| {
        assert_eq!(cmd.first_key(), Some("find"));
        common::cursor_reply("app.people", 0, vec![doc! { "name" => "Ada" }], true)
    })
    .await;
    let client = Client::connect(server.config()).await.unwrap();
    let people = client.default_database().collection("people").unwrap();

    let found = people
        .find_one_with(doc! { "name" => "Ada" }, vec!["name"])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get_str("name").unwrap(), "Ada");

    let finds = server.named("find");
    let sent = &finds[0].command;
    assert!(sent.get_bool("singleBatch").unwrap());
    assert_eq!(sent.get("limit"), Some(&Value::Int32(1)));
    assert_eq!(
        sent.get_document("projection").unwrap().get("name"),
        Some(&Value::Int32(1))
    );
    assert!(server.named("killCursors").is_empty());
}

#[tokio::test]
async fn find_one_with_no_match_is_none() {
    let server =
        MockServer::start(|_, _| common::cursor_reply("app.people", 0, Vec::new(), true)).await;
    let client = Client::connect(server.config()).await.unwrap();
    let people = client.default_database().collection("people").unwrap();

    assert!(people.find_one(doc! { "name" => "nobody" }).await.unwrap().is_none());
}

#[tokio::test]
async fn update_variants_set_flags() {
    let server = MockServer::start(|_, cmd| {
        let statement = cmd.get_array("updates").unwrap()[0].as_document().unwrap().clone();
        if statement.get_bool("upsert").unwrap() {
            ok_with(doc! {
                "n" => 1,
                "nModified" => 0,
                "upserted" => vec![doc! { "index" => 0, "_id" => "new-id" }],
            })
        } else {
            ok_with(doc! { "n" => 3, "nModified" => 2 })
        }
    })
    .await;
    let client = Client::connect(server.config()).await.unwrap();
    let items = client.default_database().collection("items").unwrap();
    let change = doc! { "$set" => doc! { "seen" => true } };

    let all = items.update_all(doc! {}, &change).await.unwrap();
    assert_eq!((all.matched, all.modified), (3, 2));
    assert!(all.upserted_id.is_none());

    let up = items.upsert(doc! { "k" => 1 }, &change).await.unwrap();
    assert_eq!(up.matched, 0);
    assert_eq!(up.upserted_id, Some(Value::from("new-id")));

    let sent = server.named("update");
    let first = sent[0].command.get_array("updates").unwrap()[0].as_document().unwrap().clone();
    assert!(first.get_bool("multi").unwrap());
    assert!(!first.get_bool("upsert").unwrap());
}

#[tokio::test]
async fn empty_update_is_rejected_locally() {
    let server = MockServer::start(|_, _| ok_with(doc! { "n" => 0 })).await;
    let client = Client::connect(server.config()).await.unwrap();
    let items = client.default_database().collection("items").unwrap();

    let err = items.update(doc! {}, &Document::new()).await.unwrap_err();
    assert!(matches!(err, docwire::DriverError::InvalidArgument(_)));
    assert!(server.named("update").is_empty());
}

#[tokio::test]
async fn remove_and_delete_one_limits() {
    let server = MockServer::start(|_, _| ok_with(doc! { "n" => 4 })).await;
    let client = Client::connect(server.config()).await.unwrap();
    let items = client.default_database().collection("items").unwrap();

    assert_eq!(items.remove(doc! { "stale" => true }).await.unwrap(), 4);
    items.delete_one(doc! { "stale" => true }).await.unwrap();

    let limits: Vec<_> = server
        .named("delete")
        .iter()
        .map(|r| {
            r.command.get_array("deletes").unwrap()[0]
                .as_document()
                .unwrap()
                .get_i32("limit")
                .unwrap()
        })
        .collect();
    assert_eq!(limits, vec![0, 1]);
}

#[tokio::test]
async fn count_reads_n() {
    let server = MockServer::start(|_, cmd| {
        assert_eq!(cmd.get_str("count").unwrap(), "items");
        ok_with(doc! { "n" => 42 })
    })
    .await;
    let client = Client::connect(server.config()).await.unwrap();
    let items = client.default_database().collection("items").unwrap();

    assert_eq!(items.count(doc! {}).await.unwrap(), 42);
}

#[tokio::test]
async fn count_without_n_is_an_error_not_zero() {
    let server = MockServer::start(|_, _| ok_with(Document::new())).await;
    let client = Client::connect(server.config()).await.unwrap();
    let items = client.default_database().collection("items").unwrap();

    let err = items.count(doc! {}).await.unwrap_err();
    assert_eq!(err.encoding_kind(), Some(EncodingErrorKind::InvalidValue));
}

#[tokio::test]
async fn negative_skip_is_rejected() {
    let server = MockServer::start(|_, _| ok_with(Document::new())).await;
    let client = Client::connect(server.config()).await.unwrap();
    let items = client.default_database().collection("items").unwrap();

    let err = items
        .find_with(FindOptions::new(doc! {}).skip(-1))
        .await
        .unwrap_err();
    assert!(matches!(err, docwire::DriverError::InvalidArgument(_)));
}

#[tokio::test]
async fn dropped_connection_is_a_transport_error_and_replaced() {
    let server = MockServer::start(|_, cmd| {
        if cmd.first_key() == Some("boom") {
            doc! { DROP => true }
        } else {
            ok_with(Document::new())
        }
    })
    .await;
    let mut config = server.config();
    config.pool.max_size = 1;
    let client = Client::connect(config).await.unwrap();

    let err = client.run_command("admin", &doc! { "boom" => 1 }).await.unwrap_err();
    assert!(err.transport_kind().is_some());
    assert!(err.is_transient());
    assert_ne!(err.transport_kind(), Some(TransportErrorKind::TlsFailed));

    // The broken connection is discarded, so the next command dials again
    client.run_command("admin", &doc! { "ping" => 1 }).await.unwrap();
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn write_concern_from_config_is_appended() {
    let server = MockServer::start(|_, _| ok_with(doc! { "n" => 1 })).await;
    let mut config = server.config();
    config.client.write_concern = Some(docwire::config::WriteConcernConfig {
        w: Some("majority".into()),
        journal: Some(true),
        wtimeout_ms: None,
    });
    let client = Client::connect(config).await.unwrap();
    let items = client.default_database().collection("items").unwrap();

    items.insert_one(doc! { "a" => 1 }).await.unwrap();
    let sent = &server.named("insert")[0].command;
    let wc = sent.get_document("writeConcern").unwrap();
    assert_eq!(wc.get_str("w").unwrap(), "majority");
}

#[tokio::test]
async fn closed_client_fails_with_handle_closed() {
    let server = MockServer::start(|_, _| ok_with(Document::new())).await;
    let client = Client::connect(server.config()).await.unwrap();
    client.close();

    let err = client.run_command("admin", &doc! { "ping" => 1 }).await.unwrap_err();
    assert_eq!(err.transport_kind(), Some(TransportErrorKind::HandleClosed));
}

#[tokio::test]
async fn legacy_server_uses_op_query() {
    let server = MockServer::with_hello(common::hello_reply(4), |_, _| ok_with(doc! { "n" => 7 })).await;
    let client = Client::connect(server.config()).await.unwrap();
    let items = client.default_database().collection("items").unwrap();

    assert_eq!(items.count(doc! {}).await.unwrap(), 7);
    let sent = server.named("count");
    assert_eq!(sent[0].op_code, docwire::core::packet::OpCode::Query.as_i32());
    assert_eq!(sent[0].db, "app");
}
