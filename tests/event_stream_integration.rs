//! Event stream behavior over a live (scripted) connection: classified
//! events reach bus subscribers, waits can be armed before the traffic that
//! resolves them, and unsolicited pushes are delivered like any response.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use formwire::adapters::events::HandlerEventBus;
use formwire::adapters::transport::mock::MockTransportFactory;
use formwire::adapters::transport::Connection;
use formwire::config::ClientInfo;
use formwire::domain::protocol::HandlerEvent;
use formwire::ports::HandlerListener;

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

fn open_burst_with_session_info() -> Value {
    let records = json!([{
        "handlerType": "FormToShow",
        "parameters": [{
            "formId": "f1",
            "pageId": "9305",
            "pageKind": "Card",
            "caption": "Order",
            "controls": []
        }]
    }, {
        "handlerType": "CallbackResponse",
        "parameters": [{
            "state": {
                "sessionId": "sess-42",
                "sessionKey": "key-42",
                "companyName": "CRONUS",
                "rolecenterFormId": "rc-1"
            }
        }]
    }]);
    json!({"sequenceNumber": 1, "compressedPayload": compress(&records)})
}

struct Recorder {
    seen: Mutex<Vec<String>>,
}

impl HandlerListener for Recorder {
    fn on_event(
        &self,
        event: &HandlerEvent,
    ) -> Result<(), formwire::domain::foundation::EngineError> {
        self.seen
            .lock()
            .expect("recorder lock")
            .push(event.name().to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

fn connection() -> (Arc<MockTransportFactory>, Connection) {
    init_tracing();
    let factory = Arc::new(MockTransportFactory::new(Arc::new(|msg: &Value| {
        match msg.get("method").and_then(Value::as_str) {
            Some("OpenForm") => vec![open_burst_with_session_info()],
            _ => Vec::new(),
        }
    })));
    let conn = Connection::new(
        factory.clone(),
        Arc::new(HandlerEventBus::new()),
        ClientInfo::default(),
        Duration::from_millis(500),
    );
    (factory, conn)
}

#[tokio::test]
async fn session_info_is_scanned_out_of_the_open_burst() {
    let (_factory, conn) = connection();

    let cancel = CancellationToken::new();
    let session_info = conn.bus().wait_for(
        |event| match event {
            HandlerEvent::SessionInfo {
                session_id,
                company_name,
                ..
            } => Some((session_id.clone(), company_name.clone())),
            _ => None,
        },
        Duration::from_millis(500),
        &cancel,
    );

    conn.open_page("9305").await.expect("open page");

    let (session_id, company) = session_info.await.expect("session info observed");
    assert_eq!(session_id, "sess-42");
    assert_eq!(company, "CRONUS");

    conn.close().await;
}

#[tokio::test]
async fn listeners_observe_the_classified_stream() {
    let (_factory, conn) = connection();
    let recorder = Arc::new(Recorder {
        seen: Mutex::new(Vec::new()),
    });
    conn.bus().subscribe(recorder.clone());

    conn.open_page("9305").await.expect("open page");
    conn.close().await;

    let seen = recorder.seen.lock().expect("recorder lock").clone();
    assert!(seen.contains(&"Message".to_string()), "envelope event: {seen:?}");
    assert!(seen.contains(&"RawHandlers".to_string()), "raw burst: {seen:?}");
    assert!(seen.contains(&"FormToShow".to_string()), "form event: {seen:?}");
    assert!(seen.contains(&"SessionInfo".to_string()), "session scan: {seen:?}");
}

#[tokio::test]
async fn unsolicited_server_push_resolves_an_armed_wait() {
    let (factory, conn) = connection();
    let _page = conn.open_page("9305").await.expect("open page");

    let cancel = CancellationToken::new();
    let wait = conn.bus().wait_for(
        |event| match event {
            HandlerEvent::DataRefreshChange { control_path, .. } => Some(control_path.clone()),
            _ => None,
        },
        Duration::from_millis(500),
        &cancel,
    );

    let records = json!([{
        "handlerType": "FormUpdate",
        "changes": [
            {"t": "DataRefresh", "controlPath": "f1/lines", "changes": []}
        ]
    }]);
    factory
        .last_transport()
        .expect("transport")
        .push_inbound(json!({
            "sequenceNumber": 9,
            "compressedPayload": compress(&records)
        }));

    assert_eq!(wait.await.expect("push observed"), "f1/lines");
    assert_eq!(conn.last_server_sequence(), 9);

    conn.close().await;
}

#[tokio::test]
async fn cancelled_wait_reports_cancellation_not_timeout() {
    let (_factory, conn) = connection();
    let _page = conn.open_page("9305").await.expect("open page");

    let cancel = CancellationToken::new();
    let wait = conn.bus().wait_for(
        |event| match event {
            HandlerEvent::CallbackResponse { .. } => Some(()),
            _ => None,
        },
        Duration::from_secs(30),
        &cancel,
    );

    cancel.cancel();
    let err = wait.await.expect_err("wait was cancelled");
    assert!(err.is_cancelled(), "got: {err}");

    conn.close().await;
}
