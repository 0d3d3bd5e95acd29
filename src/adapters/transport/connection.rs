//! Connection driver: one transport per top-level page open.
//!
//! The remote server caches form state at the connection level, so reusing a
//! connection across unrelated top-level pages returns stale or empty data.
//! Opening a top-level page therefore always tears the current transport
//! down and asks the factory for a fresh one; secondary interactions against
//! the already-open page reuse it.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapters::events::HandlerEventBus;
use crate::config::ClientInfo;
use crate::domain::foundation::json_scan::max_numeric_field_containing;
use crate::domain::foundation::EngineError;
use crate::domain::page::{
    apply_dialog_message, apply_records, apply_validation_error, PageState, ValidationScope,
};
use crate::domain::protocol::tags::handler;
use crate::domain::protocol::{HandlerEvent, ProtocolAdapter};
use crate::ports::{Transport, TransportFactory};

struct ConnState {
    transport: Option<Arc<dyn Transport>>,
    pump: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

/// Driver around one logical connection to the server.
///
/// Owns the protocol adapter and the read pump; publishes every classified
/// event on the shared bus. The `PageState` returned by [`Self::open_page`]
/// is owned by the caller and fed back into [`Self::invoke`].
pub struct Connection {
    factory: Arc<dyn TransportFactory>,
    bus: Arc<HandlerEventBus>,
    client: ClientInfo,
    wait_timeout: Duration,
    adapter: Arc<StdMutex<ProtocolAdapter>>,
    /// Maximum sequence/ack value scraped from any response so far; sent
    /// back as the ack on every outgoing message.
    next_ack: Arc<AtomicI64>,
    state: Mutex<ConnState>,
}

impl Connection {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        bus: Arc<HandlerEventBus>,
        client: ClientInfo,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            factory,
            bus,
            client,
            wait_timeout,
            adapter: Arc::new(StdMutex::new(ProtocolAdapter::new())),
            next_ack: Arc::new(AtomicI64::new(-1)),
            state: Mutex::new(ConnState {
                transport: None,
                pump: None,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// The event bus this connection publishes on.
    pub fn bus(&self) -> &Arc<HandlerEventBus> {
        &self.bus
    }

    /// Highest server sequence observed on the envelope level.
    pub fn last_server_sequence(&self) -> i64 {
        self.adapter
            .lock()
            .expect("Connection: adapter lock poisoned")
            .last_server_sequence()
    }

    /// Ack value the next outgoing message will carry.
    pub fn next_ack(&self) -> i64 {
        self.next_ack.load(Ordering::SeqCst)
    }

    /// Opens a top-level page and returns its state model.
    ///
    /// Always replaces the transport first, then issues the open, waits for
    /// the form-open burst, folds it, and loads child parts best-effort (a
    /// failing part never aborts the others or the parent open).
    pub async fn open_page(&self, page_id: &str) -> Result<PageState, EngineError> {
        self.replace_transport().await?;

        let cancel = self.shutdown_token().await;
        let wait = self.bus.wait_for(
            |event| match event {
                HandlerEvent::RawHandlers { records, .. }
                    if records.iter().any(is_form_open_record) =>
                {
                    Some(records.clone())
                }
                _ => None,
            },
            self.wait_timeout,
            &cancel,
        );

        self.send_message(
            "OpenForm",
            json!({
                "pageId": page_id,
                "clientType": self.client.client_type,
                "clientVersion": self.client.client_version,
                "culture": self.client.culture,
                "timeZone": self.client.time_zone,
            }),
        )
        .await?;

        let records = wait.await?;
        let mut page = records
            .iter()
            .find(|r| is_form_open_record(r))
            .and_then(PageState::from_form_open)
            .ok_or_else(|| EngineError::protocol("malformed form open record"))?;
        apply_records(&mut page, &records);
        fold_failure_signals(&mut page, &records);

        self.load_parts(&mut page).await;
        Ok(page)
    }

    /// Issues a secondary interaction against an open page, reusing the
    /// current transport, and folds the response burst into `page`.
    pub async fn invoke(
        &self,
        page: &mut PageState,
        method: &str,
        params: Value,
    ) -> Result<(), EngineError> {
        let cancel = self.shutdown_token().await;
        // Correlate the response by envelope sequence: a burst that does not
        // post-date the request is a replay or a racing push, not the reply.
        // Unsequenced bursts cannot be correlated and match by arrival.
        let baseline = self.last_server_sequence();
        let wait = self.bus.wait_for(
            move |event| match event {
                HandlerEvent::RawHandlers { sequence, records }
                    if *sequence > baseline || *sequence < 0 =>
                {
                    Some(records.clone())
                }
                _ => None,
            },
            self.wait_timeout,
            &cancel,
        );

        self.send_message(method, params).await?;

        let records = wait.await?;
        apply_records(page, &records);
        fold_failure_signals(page, &records);
        Ok(())
    }

    /// Tears the connection down. Idempotent.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        teardown(&mut state).await;
    }

    async fn shutdown_token(&self) -> CancellationToken {
        self.state.lock().await.shutdown.clone()
    }

    /// Child-form loads are best-effort: a failure loading one part must not
    /// abort the others or the parent open.
    async fn load_parts(&self, page: &mut PageState) {
        let parts: Vec<(String, String)> = page
            .factboxes
            .iter()
            .filter_map(|(name, fb)| fb.form_id.clone().map(|id| (name.clone(), id)))
            .collect();

        for (name, part_form_id) in parts {
            match self.load_part(&part_form_id).await {
                Ok(records) => {
                    apply_records(page, &records);
                    if let Some(fb) = page.factboxes.get_mut(&name) {
                        fb.loaded = true;
                    }
                }
                Err(e) => {
                    tracing::warn!(part = name.as_str(), error = %e, "child part load failed, skipping");
                }
            }
        }
    }

    async fn load_part(&self, part_form_id: &str) -> Result<Vec<Value>, EngineError> {
        let cancel = self.shutdown_token().await;
        let target = part_form_id.to_string();
        let wait = self.bus.wait_for(
            move |event| match event {
                HandlerEvent::RawHandlers { records, .. }
                    if records
                        .iter()
                        .any(|r| r.get("formId").and_then(Value::as_str) == Some(&target)) =>
                {
                    Some(records.clone())
                }
                _ => None,
            },
            self.wait_timeout,
            &cancel,
        );

        self.send_message("LoadPart", json!({"formId": part_form_id}))
            .await?;
        wait.await
    }

    async fn send_message(&self, method: &str, params: Value) -> Result<(), EngineError> {
        let transport = self
            .state
            .lock()
            .await
            .transport
            .clone()
            .ok_or_else(|| EngineError::connection("no open connection"))?;

        transport
            .send(json!({
                "method": method,
                "params": params,
                "ackSequenceNumber": self.next_ack.load(Ordering::SeqCst),
            }))
            .await
    }

    /// Drops the current transport (if any) and connects a fresh one.
    async fn replace_transport(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        teardown(&mut state).await;

        let transport: Arc<dyn Transport> = Arc::from(self.factory.connect().await?);
        let shutdown = CancellationToken::new();
        let pump = tokio::spawn(pump_loop(
            transport.clone(),
            self.adapter.clone(),
            self.bus.clone(),
            self.next_ack.clone(),
            shutdown.clone(),
        ));

        state.transport = Some(transport);
        state.pump = Some(pump);
        state.shutdown = shutdown;
        Ok(())
    }
}

async fn teardown(state: &mut ConnState) {
    state.shutdown.cancel();
    if let Some(transport) = state.transport.take() {
        transport.close().await;
    }
    if let Some(pump) = state.pump.take() {
        let _ = pump.await;
    }
}

/// Reads the transport until it closes, classifying every message and
/// publishing the resulting events. Also scrapes every response for
/// sequence/ack counters; the maximum observed becomes the next outgoing
/// ack, which correlates requests and responses independent of content.
async fn pump_loop(
    transport: Arc<dyn Transport>,
    adapter: Arc<StdMutex<ProtocolAdapter>>,
    bus: Arc<HandlerEventBus>,
    next_ack: Arc<AtomicI64>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = transport.receive() => match received {
                Ok(Some(message)) => message,
                Ok(None) => {
                    tracing::debug!("transport closed by peer");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "transport receive failed");
                    break;
                }
            },
        };

        if let Some(observed) = max_numeric_field_containing(&message, "sequence") {
            next_ack.fetch_max(observed, Ordering::SeqCst);
        }

        let events = {
            let mut adapter = adapter.lock().expect("Connection: adapter lock poisoned");
            adapter.process(&message)
        };
        for event in &events {
            bus.publish(event);
        }
    }
}

fn is_form_open_record(record: &Value) -> bool {
    record.get(handler::TYPE).and_then(Value::as_str) == Some(handler::FORM_TO_SHOW)
        && record
            .get(handler::PARAMETERS)
            .and_then(Value::as_array)
            .and_then(|p| p.first())
            .and_then(|p| p.get("formId"))
            .is_some()
}

/// Routes validation and dialog records from a response burst into the page
/// model. These are data, not exceptions: the caller decides whether they
/// constitute failure.
fn fold_failure_signals(page: &mut PageState, records: &[Value]) {
    for record in records {
        let text = record
            .get(handler::PARAMETERS)
            .and_then(Value::as_array)
            .and_then(|p| p.first())
            .map(|p| match p {
                Value::String(s) => s.clone(),
                other => other
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
            .unwrap_or_default();

        match record.get(handler::TYPE).and_then(Value::as_str) {
            Some(handler::CONFIRM_DIALOG)
            | Some(handler::YES_NO_DIALOG)
            | Some(handler::SHOW_ERROR_DIALOG) => {
                apply_dialog_message(page, &text);
            }
            Some(handler::VALIDATION_RESULT) => {
                apply_validation_error(page, ValidationScope::Page, &text);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::transport::mock::MockTransportFactory;
    use crate::domain::page::PageStatus;
    use crate::domain::protocol::envelope::tests_support::compress_records;
    use serde_json::json;

    fn open_burst(sequence: i64) -> Value {
        let records = json!([{
            "handlerType": "FormToShow",
            "parameters": [{
                "formId": "f1",
                "pageId": "27",
                "pageKind": "List",
                "caption": "Items",
                "controls": [
                    {"kind": "repeater", "name": "Lines", "controlPath": "f1/lines", "formId": "f2", "columns": [
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
                     "cells": {"0": "10000", "1": "Adatum"}}
                ]}
            ]
        }]);
        json!({
            "sequenceNumber": sequence,
            "compressedPayload": compress_records(&records)
        })
    }

    fn part_response(part_form_id: &str) -> Value {
        let records = json!([{
            "handlerType": "FormUpdate",
            "formId": part_form_id,
            "changes": []
        }]);
        json!({
            "sequenceNumber": 2,
            "compressedPayload": compress_records(&records)
        })
    }

    /// Responder mimicking a server that answers opens and part loads.
    fn scripted_factory() -> Arc<MockTransportFactory> {
        Arc::new(MockTransportFactory::new(Arc::new(|msg: &Value| {
            match msg.get("method").and_then(Value::as_str) {
                Some("OpenForm") => vec![open_burst(1)],
                Some("LoadPart") => {
                    let id = msg["params"]["formId"].as_str().unwrap_or_default();
                    vec![part_response(id)]
                }
                Some("Refresh") => vec![json!({
                    "sequenceNumber": 7,
                    "compressedPayload": compress_records(&json!([{
                        "handlerType": "FormUpdate",
                        "changes": [
                            {"t": "DataRefresh", "controlPath": "f1/lines", "changes": [
                                {"t": "DataRowUpdated", "bookmark": "bmk-1", "index": 0,
                                 "cells": {"1": "Contoso"}}
                            ]}
                        ]
                    }])),
                })],
                _ => Vec::new(),
            }
        })))
    }

    fn connection(factory: Arc<MockTransportFactory>) -> Connection {
        Connection::new(
            factory,
            Arc::new(HandlerEventBus::new()),
            ClientInfo::default(),
            Duration::from_millis(250),
        )
    }

    #[tokio::test]
    async fn open_page_builds_page_and_loads_parts() {
        let factory = scripted_factory();
        let conn = connection(factory.clone());

        let page = conn.open_page("27").await.unwrap();
        assert_eq!(page.caption, "Items");
        assert_eq!(page.status, PageStatus::Ready);
        assert_eq!(page.repeaters["Lines"].row_order(), &["bmk-1"]);
        assert!(page.factboxes["Details"].loaded);

        conn.close().await;
    }

    #[tokio::test]
    async fn each_top_level_open_replaces_the_transport() {
        let factory = scripted_factory();
        let conn = connection(factory.clone());

        let mut page = conn.open_page("27").await.unwrap();
        assert_eq!(factory.connect_count(), 1);

        // Secondary interaction reuses the connection.
        conn.invoke(&mut page, "Refresh", json!({})).await.unwrap();
        assert_eq!(factory.connect_count(), 1);

        // A fresh top-level open replaces the transport.
        let _page2 = conn.open_page("31").await.unwrap();
        assert_eq!(factory.connect_count(), 2);

        conn.close().await;
    }

    #[tokio::test]
    async fn invoke_folds_response_into_existing_page() {
        let factory = scripted_factory();
        let conn = connection(factory.clone());

        let mut page = conn.open_page("27").await.unwrap();
        conn.invoke(&mut page, "Refresh", json!({})).await.unwrap();

        let lines = &page.repeaters["Lines"];
        let row = lines.rows().get("bmk-1").expect("row kept");
        assert_eq!(row.values["No."], json!("10000"), "merge kept old cell");
        assert_eq!(row.values["Name"], json!("Contoso"));

        conn.close().await;
    }

    #[tokio::test]
    async fn invoke_skips_replayed_burst_and_folds_the_fresh_response() {
        // Server that answers Recalculate with a replayed burst first (its
        // sequence does not post-date the request) and the real response
        // second.
        let factory = Arc::new(MockTransportFactory::new(Arc::new(|msg: &Value| {
            match msg.get("method").and_then(Value::as_str) {
                Some("OpenForm") => vec![open_burst(1)],
                Some("LoadPart") => {
                    let id = msg["params"]["formId"].as_str().unwrap_or_default();
                    vec![part_response(id)]
                }
                Some("Recalculate") => {
                    let replayed = json!({
                        "sequenceNumber": 2,
                        "compressedPayload": compress_records(&json!([{
                            "handlerType": "FormUpdate",
                            "changes": [
                                {"t": "DataRefresh", "controlPath": "f1/lines", "changes": [
                                    {"t": "DataRowUpdated", "bookmark": "bmk-1", "index": 0,
                                     "cells": {"1": "Stale"}}
                                ]}
                            ]
                        }])),
                    });
                    let fresh = json!({
                        "sequenceNumber": 7,
                        "compressedPayload": compress_records(&json!([{
                            "handlerType": "FormUpdate",
                            "changes": [
                                {"t": "DataRefresh", "controlPath": "f1/lines", "changes": [
                                    {"t": "DataRowUpdated", "bookmark": "bmk-1", "index": 0,
                                     "cells": {"1": "Current"}}
                                ]}
                            ]
                        }])),
                    });
                    vec![replayed, fresh]
                }
                _ => Vec::new(),
            }
        })));
        let conn = connection(factory);

        // Open burst carried 1, part response carried 2: baseline is 2, so
        // the replayed burst at 2 must not resolve the wait.
        let mut page = conn.open_page("27").await.unwrap();
        conn.invoke(&mut page, "Recalculate", json!({})).await.unwrap();

        let row = page.repeaters["Lines"].rows().get("bmk-1").unwrap();
        assert_eq!(row.values["Name"], json!("Current"));

        conn.close().await;
    }

    #[tokio::test]
    async fn outgoing_ack_tracks_maximum_observed_sequence() {
        let factory = scripted_factory();
        let conn = connection(factory.clone());

        let mut page = conn.open_page("27").await.unwrap();
        // Open burst carried 1, part response carried 2.
        assert_eq!(conn.next_ack(), 2);

        conn.invoke(&mut page, "Refresh", json!({})).await.unwrap();
        assert_eq!(conn.next_ack(), 7);

        let sent = factory.last_transport().unwrap().sent_messages();
        let refresh = sent
            .iter()
            .find(|m| m["method"] == "Refresh")
            .expect("refresh sent");
        assert_eq!(refresh["ackSequenceNumber"], json!(2));

        conn.close().await;
    }

    #[tokio::test]
    async fn failed_part_load_does_not_abort_open() {
        // Server that never answers part loads.
        let factory = Arc::new(MockTransportFactory::new(Arc::new(|msg: &Value| {
            match msg.get("method").and_then(Value::as_str) {
                Some("OpenForm") => vec![open_burst(1)],
                _ => Vec::new(),
            }
        })));
        let conn = connection(factory.clone());

        let page = conn.open_page("27").await.unwrap();
        assert!(!page.factboxes["Details"].loaded, "part stays unloaded");
        assert_eq!(page.caption, "Items", "parent open still succeeded");

        conn.close().await;
    }

    #[tokio::test]
    async fn invoke_without_open_connection_fails() {
        let factory = scripted_factory();
        let conn = connection(factory);
        let mut page = PageState::from_form_open(&json!({
            "handlerType": "FormToShow",
            "parameters": [{"formId": "f9"}]
        }))
        .unwrap();

        let err = conn.invoke(&mut page, "Refresh", json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::Connection(_)));
    }

    #[tokio::test]
    async fn dialog_in_response_marks_page_error_and_clears_pending() {
        let factory = Arc::new(MockTransportFactory::new(Arc::new(|msg: &Value| {
            match msg.get("method").and_then(Value::as_str) {
                Some("OpenForm") => vec![open_burst(1)],
                Some("Post") => vec![json!({
                    "sequenceNumber": 3,
                    "compressedPayload": compress_records(&json!([
                        {"handlerType": "ConfirmDialog", "parameters": ["Session expired"]}
                    ])),
                })],
                _ => Vec::new(),
            }
        })));
        let conn = connection(factory);

        let mut page = conn.open_page("27").await.unwrap();
        page.repeaters.get_mut("Lines").unwrap().begin_operation();

        conn.invoke(&mut page, "Post", json!({})).await.unwrap();

        assert_eq!(page.status, PageStatus::Error);
        assert_eq!(page.global_errors, vec!["Session expired"]);
        assert_eq!(page.repeaters["Lines"].pending_operations(), 0);

        conn.close().await;
    }
}
