//! End-to-end page flow against a scripted transport: open a page through
//! the pool, interact with it, and verify the connection policy.

use std::io::Write;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};

use formwire::adapters::session::{SessionKey, SessionPool};
use formwire::adapters::transport::mock::MockTransportFactory;
use formwire::config::{ClientInfo, PoolConfig, WaitConfig};
use formwire::domain::page::{PageStatus, RowLookup};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn compress(records: &Value) -> String {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(records.to_string().as_bytes())
        .expect("gzip write");
    STANDARD.encode(encoder.finish().expect("gzip finish"))
}

fn open_burst(sequence: i64) -> Value {
    let records = json!([{
        "handlerType": "FormToShow",
        "parameters": [{
            "formId": "f1",
            "pageId": "27",
            "pageKind": "List",
            "caption": "Items",
            "controls": [
                {"kind": "field", "name": "PostingDate", "caption": "Posting Date",
                 "controlPath": "f1/postingDate"},
                {"kind": "repeater", "name": "Lines", "controlPath": "f1/lines",
                 "formId": "f2", "columns": [
                    {"designName": "No.", "caption": "No.", "index": 0},
                    {"designName": "Name", "caption": "Name", "index": 1}
                ]},
                {"kind": "factbox", "name": "Details", "caption": "Details", "formId": "f3"}
            ]
        }]
    }, {
        "handlerType": "FormUpdate",
        "changes": [
            {"t": "DataRefresh", "controlPath": "f1/lines", "changes": [
                {"t": "DataRowInserted", "bookmark": "bmk-1", "index": 0,
                 "cells": {"0": "10000", "1": "Adatum"}},
                {"t": "DataRowInserted", "bookmark": "bmk-2", "index": 1,
                 "cells": {"0": "20000", "1": "Contoso"}}
            ]}
        ]
    }]);
    json!({"sequenceNumber": sequence, "compressedPayload": compress(&records)})
}

fn scripted_factory() -> Arc<MockTransportFactory> {
    Arc::new(MockTransportFactory::new(Arc::new(|msg: &Value| {
        match msg.get("method").and_then(Value::as_str) {
            Some("OpenForm") => vec![open_burst(1)],
            Some("LoadPart") => {
                let id = msg["params"]["formId"].as_str().unwrap_or_default();
                vec![json!({
                    "sequenceNumber": 2,
                    "compressedPayload": compress(&json!([
                        {"handlerType": "FormUpdate", "formId": id, "changes": []}
                    ])),
                })]
            }
            Some("DeleteLine") => vec![json!({
                "sequenceNumber": 5,
                "compressedPayload": compress(&json!([{
                    "handlerType": "FormUpdate",
                    "changes": [
                        {"t": "DataRefresh", "controlPath": "f1/lines", "changes": [
                            {"t": "DataRowDeleted", "bookmark": "bmk-1"}
                        ]}
                    ]
                }])),
            })],
            _ => Vec::new(),
        }
    })))
}

fn pool(factory: Arc<MockTransportFactory>) -> SessionPool {
    init_tracing();
    SessionPool::new(
        factory,
        ClientInfo::default(),
        &PoolConfig::default(),
        &WaitConfig {
            default_timeout_ms: 500,
        },
    )
}

#[tokio::test]
async fn open_interact_and_reopen_through_the_pool() {
    let factory = scripted_factory();
    let pool = pool(factory.clone());
    let key = SessionKey {
        endpoint: "wss://host/cs".to_string(),
        tenant: "default".to_string(),
        user: "ada".to_string(),
    };

    let session = pool.get_or_create_session(&key).await;
    let mut page = session.open_page("27").await.expect("open page");

    assert_eq!(page.caption, "Items");
    assert_eq!(page.status, PageStatus::Ready);
    assert!(page.fields.contains_key("PostingDate"));
    assert!(page.factboxes["Details"].loaded);

    let lines = &page.repeaters["Lines"];
    assert_eq!(lines.row_order(), &["bmk-1", "bmk-2"]);
    match lines.get_row("bmk-1") {
        RowLookup::Loaded(row) => assert_eq!(row.values["Name"], json!("Adatum")),
        other => panic!("expected a loaded row, got {other:?}"),
    }

    // One connect for the top-level open; the part load reused it.
    assert_eq!(factory.connect_count(), 1);

    session
        .invoke(&mut page, "DeleteLine", json!({"bookmark": "bmk-1"}))
        .await
        .expect("delete line");
    assert_eq!(page.repeaters["Lines"].row_order(), &["bmk-2"]);
    assert_eq!(factory.connect_count(), 1, "interaction reuses the transport");

    // Opening another top-level page replaces the transport.
    let _other = session.open_page("31").await.expect("reopen");
    assert_eq!(factory.connect_count(), 2);

    pool.close_all().await;
}

#[tokio::test]
async fn ack_from_responses_is_echoed_on_subsequent_sends() {
    let factory = scripted_factory();
    let pool = pool(factory.clone());
    let key = SessionKey {
        endpoint: "wss://host/cs".to_string(),
        tenant: "default".to_string(),
        user: "ada".to_string(),
    };

    let session = pool.get_or_create_session(&key).await;
    let mut page = session.open_page("27").await.expect("open page");
    session
        .invoke(&mut page, "DeleteLine", json!({"bookmark": "bmk-1"}))
        .await
        .expect("delete line");

    let sent = factory.last_transport().expect("transport").sent_messages();
    let open = sent
        .iter()
        .find(|m| m["method"] == "OpenForm")
        .expect("open sent");
    let delete = sent
        .iter()
        .find(|m| m["method"] == "DeleteLine")
        .expect("delete sent");

    // The very first send has seen no server traffic yet.
    assert_eq!(open["ackSequenceNumber"], json!(-1));
    // Open burst carried 1, part response carried 2.
    assert_eq!(delete["ackSequenceNumber"], json!(2));

    pool.close_all().await;
}

#[tokio::test]
async fn unanswered_interaction_times_out_without_poisoning_the_session() {
    let factory = scripted_factory();
    let pool = pool(factory.clone());
    let key = SessionKey {
        endpoint: "wss://host/cs".to_string(),
        tenant: "default".to_string(),
        user: "ada".to_string(),
    };

    let session = pool.get_or_create_session(&key).await;
    let mut page = session.open_page("27").await.expect("open page");

    let err = session
        .invoke(&mut page, "Unscripted", json!({}))
        .await
        .expect_err("nothing answers this method");
    assert!(err.to_string().contains("timed out"), "got: {err}");

    // The session and its page survive a timed-out wait.
    session
        .invoke(&mut page, "DeleteLine", json!({"bookmark": "bmk-1"}))
        .await
        .expect("later interaction still works");
    assert_eq!(page.repeaters["Lines"].row_order(), &["bmk-2"]);

    pool.close_all().await;
}
