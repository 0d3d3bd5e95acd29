//! WebSocket transport over tokio-tungstenite.
//!
//! Text frames carry one JSON message each. The factory is configured by the
//! authentication collaborator with a ready-to-use endpoint and header
//! material; the engine itself never performs login.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::domain::foundation::EngineError;
use crate::ports::{Transport, TransportFactory};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One established websocket connection.
pub struct WebSocketTransport {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketTransport {
    /// Connects to `endpoint`, attaching the given headers to the handshake.
    ///
    /// # Errors
    ///
    /// `EngineError::Connection` when the endpoint is unreachable or the
    /// handshake fails; the caller owns retry policy.
    pub async fn connect(
        endpoint: &Url,
        headers: &[(String, String)],
    ) -> Result<Self, EngineError> {
        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| EngineError::connection(e.to_string()))?;
        for (name, value) in headers {
            let value = HeaderValue::from_str(value)
                .map_err(|e| EngineError::connection(format!("bad header '{}': {}", name, e)))?;
            let name: tokio_tungstenite::tungstenite::http::header::HeaderName = name
                .parse()
                .map_err(|_| EngineError::connection(format!("bad header name '{}'", name)))?;
            request.headers_mut().insert(name, value);
        }

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| EngineError::connection(e.to_string()))?;
        let (sink, stream) = ws.split();

        Ok(Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, message: Value) -> Result<(), EngineError> {
        let text = message.to_string();
        self.sink
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| EngineError::connection(e.to_string()))
    }

    async fn receive(&self) -> Result<Option<Value>, EngineError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    let value: Value = serde_json::from_str(&text)
                        .map_err(|e| EngineError::protocol(format!("non-JSON frame: {}", e)))?;
                    return Ok(Some(value));
                }
                // Control frames are handled by the library; skip.
                Some(Ok(Message::Ping(_)))
                | Some(Ok(Message::Pong(_)))
                | Some(Ok(Message::Frame(_))) => continue,
                Some(Ok(Message::Binary(_))) => {
                    tracing::debug!("ignoring unexpected binary frame");
                    continue;
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(e)) => return Err(EngineError::connection(e.to_string())),
            }
        }
    }

    async fn close(&self) {
        let _ = self.sink.lock().await.send(Message::Close(None)).await;
    }
}

/// Factory producing fresh websocket transports for one endpoint.
pub struct WebSocketTransportFactory {
    endpoint: Url,
    headers: Vec<(String, String)>,
}

impl WebSocketTransportFactory {
    /// Creates a factory for `endpoint` with handshake headers supplied by
    /// the authentication collaborator.
    pub fn new(endpoint: Url, headers: Vec<(String, String)>) -> Arc<Self> {
        Arc::new(Self { endpoint, headers })
    }
}

#[async_trait]
impl TransportFactory for WebSocketTransportFactory {
    async fn connect(&self) -> Result<Box<dyn Transport>, EngineError> {
        let transport = WebSocketTransport::connect(&self.endpoint, &self.headers).await?;
        Ok(Box::new(transport))
    }
}
