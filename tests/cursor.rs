#![allow(clippy::unwrap_used)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{cursor_reply, ok_with, MockServer};
use docwire::core::document::Value;
use docwire::{doc, Client, Document, FindOptions};
use futures::TryStreamExt;

fn letter(c: &str) -> Document {
    doc! { "v" => c }
}

/// find -> [A, B] with id 42, then getMore -> [C] with id 0
async fn two_batch_server() -> MockServer {
    MockServer::start(|_, cmd| match cmd.first_key() {
        Some("find") => cursor_reply("app.letters", 42, vec![letter("A"), letter("B")], true),
        Some("getMore") => {
            assert_eq!(cmd.get("getMore"), Some(&Value::Int64(42)));
            cursor_reply("app.letters", 0, vec![letter("C")], false)
        }
        _ => ok_with(Document::new()),
    })
    .await
}

#[tokio::test]
async fn drains_buffer_before_get_more() {
    let server = two_batch_server().await;
    let client = Client::connect(server.config()).await.unwrap();
    let letters = client.default_database().collection("letters").unwrap();

    let mut cursor = letters.find(doc! {}).await.unwrap();
    assert_eq!(cursor.id(), 42);
    assert_eq!(cursor.buffered(), 2);

    assert_eq!(cursor.next().await.unwrap().unwrap(), letter("A"));
    assert_eq!(cursor.next().await.unwrap().unwrap(), letter("B"));
    assert!(server.named("getMore").is_empty());

    assert_eq!(cursor.next().await.unwrap().unwrap(), letter("C"));
    assert_eq!(server.named("getMore").len(), 1);
    assert_eq!(cursor.id(), 0);

    assert!(cursor.next().await.unwrap().is_none());
    assert!(cursor.is_exhausted());
    // Exhausted cursors never go back to the server
    assert!(cursor.next().await.unwrap().is_none());
    assert_eq!(server.named("getMore").len(), 1);
}

#[tokio::test]
async fn empty_exhausted_reply_never_issues_get_more() {
    let server = MockServer::start(|_, _| cursor_reply("app.letters", 0, Vec::new(), true)).await;
    let client = Client::connect(server.config()).await.unwrap();
    let letters = client.default_database().collection("letters").unwrap();

    let mut cursor = letters.find(doc! {}).await.unwrap();
    assert!(cursor.next().await.unwrap().is_none());
    assert!(server.named("getMore").is_empty());
    cursor.close().await;
    assert!(server.named("killCursors").is_empty());
}

#[tokio::test]
async fn close_kills_open_cursor() {
    let server = two_batch_server().await;
    let client = Client::connect(server.config()).await.unwrap();
    let letters = client.default_database().collection("letters").unwrap();

    let mut cursor = letters.find(doc! {}).await.unwrap();
    cursor.next().await.unwrap();
    cursor.close().await;
    assert!(cursor.is_exhausted());
    assert!(cursor.next().await.unwrap().is_none());

    let kills = server.named("killCursors");
    assert_eq!(kills.len(), 1);
    assert_eq!(kills[0].command.get_str("killCursors").unwrap(), "letters");
    assert_eq!(
        kills[0].command.get_array("cursors").unwrap(),
        &[Value::Int64(42)]
    );
}

#[tokio::test]
async fn close_failure_is_swallowed() {
    let server = MockServer::start(|_, cmd| match cmd.first_key() {
        Some("find") => cursor_reply("app.letters", 9, vec![letter("A")], true),
        _ => doc! { "ok" => 0.0, "errmsg" => "cursor not found", "code" => 43 },
    })
    .await;
    let client = Client::connect(server.config()).await.unwrap();
    let letters = client.default_database().collection("letters").unwrap();

    let mut cursor = letters.find(doc! {}).await.unwrap();
    cursor.close().await;
    assert!(cursor.is_exhausted());
    assert_eq!(server.named("killCursors").len(), 1);
}

#[tokio::test]
async fn failed_get_more_leaves_cursor_retryable() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    let server = MockServer::start(move |_, cmd| match cmd.first_key() {
        Some("find") => cursor_reply("app.letters", 7, Vec::new(), true),
        Some("getMore") => {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                doc! { "ok" => 0.0, "errmsg" => "interrupted", "code" => 11601 }
            } else {
                cursor_reply("app.letters", 0, vec![letter("Z")], false)
            }
        }
        _ => ok_with(Document::new()),
    })
    .await;
    let client = Client::connect(server.config()).await.unwrap();
    let letters = client.default_database().collection("letters").unwrap();

    let mut cursor = letters.find(doc! {}).await.unwrap();
    let err = cursor.next().await.unwrap_err();
    assert!(err.is_command_error());
    assert_eq!(cursor.id(), 7);
    assert!(!cursor.is_exhausted());

    assert_eq!(cursor.next().await.unwrap().unwrap(), letter("Z"));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn batch_size_is_forwarded_to_get_more() {
    let server = two_batch_server().await;
    let client = Client::connect(server.config()).await.unwrap();
    let letters = client.default_database().collection("letters").unwrap();

    let cursor = letters
        .find_with(FindOptions::new(doc! {}).batch_size(2))
        .await
        .unwrap();
    let all = cursor.try_collect().await.unwrap();
    assert_eq!(all, vec![letter("A"), letter("B"), letter("C")]);

    let get_more = &server.named("getMore")[0].command;
    assert_eq!(get_more.get_i32("batchSize").unwrap(), 2);
    assert_eq!(get_more.get_str("collection").unwrap(), "letters");
    assert_eq!(server.named("find")[0].command.get_i32("batchSize").unwrap(), 2);
}

#[tokio::test]
async fn stream_yields_in_server_order() {
    let server = two_batch_server().await;
    let client = Client::connect(server.config()).await.unwrap();
    let letters = client.default_database().collection("letters").unwrap();

    let cursor = letters.find(doc! {}).await.unwrap();
    let values: Vec<String> = cursor
        .into_stream()
        .map_ok(|d| d.get_str("v").unwrap().to_string())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(values, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn aggregate_seeds_cursor_and_adds_cursor_option() {
    let server = MockServer::start(|_, cmd| match cmd.first_key() {
        Some("aggregate") => cursor_reply("app.letters", 0, vec![doc! { "total" => 3 }], true),
        _ => ok_with(Document::new()),
    })
    .await;
    let client = Client::connect(server.config()).await.unwrap();
    let letters = client.default_database().collection("letters").unwrap();

    let pipeline = vec![doc! { "$count" => "total" }];
    let cursor = letters.aggregate(&pipeline, None).await.unwrap();
    let out = cursor.try_collect().await.unwrap();
    assert_eq!(out, vec![doc! { "total" => 3 }]);

    let sent = &server.named("aggregate")[0].command;
    assert_eq!(sent.get_array("pipeline").unwrap().len(), 1);
    assert!(sent.get_document("cursor").unwrap().is_empty());
}
