use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument};
use url::Url;

use crate::codec::{self, StoredValue};
use crate::config::{BackendKind, WorkerConfig};
use crate::error::{Result, StoreError};
use crate::retry::RetryPolicy;

use super::{qualified_key, KeyRecordStore};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Operation name on the worker wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkerOp {
    ReadData,
    WriteData,
    RemoveData,
    ClearAll,
    RemoveAll,
}

/// One request frame sent to the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    #[serde(rename = "type")]
    pub op: WorkerOp,
    pub db: BackendKind,
    pub values: WorkerValues,
}

/// Request payload: the record id, the fully-qualified session key and,
/// for writes, the encoded value. Bulk operations address the whole
/// session with a `*` record id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub session: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// One response frame from the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WorkerResponse {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
    Error {
        message: String,
    },
}

/// Request/response channel to the worker; one request in flight at a time.
#[derive(Debug)]
struct WorkerChannel {
    url: Url,
    socket: Mutex<Option<WsStream>>,
}

impl WorkerChannel {
    fn new(url: Url) -> Self {
        Self {
            url,
            socket: Mutex::new(None),
        }
    }

    async fn dial(&self) -> Result<WsStream> {
        let (socket, _) = connect_async(self.url.as_str()).await?;
        info!(url = %self.url, "Connected to auth worker");
        Ok(socket)
    }

    /// Send one request and wait for its response frame. The socket is
    /// dropped on any transport failure so the next call starts from a
    /// fresh dial.
    async fn request(&self, request: &WorkerRequest) -> Result<WorkerResponse> {
        let mut guard = self.socket.lock().await;
        if guard.is_none() {
            *guard = Some(self.dial().await?);
        }
        let socket = guard
            .as_mut()
            .ok_or_else(|| StoreError::Internal("worker channel unavailable".to_string()))?;

        match Self::exchange(socket, request).await {
            Ok(text) => {
                let response: WorkerResponse = serde_json::from_str(&text)?;
                Ok(response)
            }
            Err(e) => {
                *guard = None;
                Err(e)
            }
        }
    }

    async fn exchange(socket: &mut WsStream, request: &WorkerRequest) -> Result<String> {
        let frame = serde_json::to_string(request)?;
        debug!(frame = %frame, "worker request");
        socket.send(Message::Text(frame)).await?;

        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(bytes))) => {
                    return String::from_utf8(bytes)
                        .map_err(|e| StoreError::Internal(format!("non-utf8 worker frame: {e}")))
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(StoreError::Internal(
                        "worker closed the channel".to_string(),
                    ))
                }
                // Control frames; keep waiting for the response
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

/// Storage adapter that proxies every operation to a worker process over a
/// request/response channel. The worker owns the actual database and is
/// told which backend to use on each request.
#[derive(Debug)]
pub struct WorkerStore {
    channel: WorkerChannel,
    backend: BackendKind,
    session: String,
    retry: RetryPolicy,
}

impl WorkerStore {
    /// Validate settings and build the store. The channel dials lazily on
    /// the first request.
    pub fn connect(config: &WorkerConfig) -> Result<Self> {
        if config.session.is_empty() {
            return Err(StoreError::MissingSession { backend: "worker" });
        }
        if config.port == 0 {
            return Err(StoreError::MissingPort);
        }
        let url = Url::parse(&format!("ws://{}:{}", config.host, config.port))
            .map_err(|e| StoreError::Internal(format!("invalid worker address: {e}")))?;

        Ok(Self {
            channel: WorkerChannel::new(url),
            backend: config.backend,
            session: config.session.clone(),
            retry: config.retry_policy(),
        })
    }

    fn request(&self, op: WorkerOp, id: Option<&str>, value: Option<String>) -> WorkerRequest {
        let scope = id.unwrap_or("*");
        WorkerRequest {
            op,
            db: self.backend,
            values: WorkerValues {
                id: id.map(str::to_string),
                session: qualified_key(&self.session, scope),
                value,
            },
        }
    }

    async fn send(&self, what: &str, request: &WorkerRequest) -> Result<Option<serde_json::Value>> {
        self.retry
            .run(what, || async {
                match self.channel.request(request).await? {
                    WorkerResponse::Ok { result } => Ok(result),
                    WorkerResponse::Error { message } => Err(StoreError::WorkerRejected(message)),
                }
            })
            .await
    }
}

#[async_trait]
impl KeyRecordStore for WorkerStore {
    #[instrument(skip(self))]
    async fn read(&self, id: &str) -> Result<Option<StoredValue>> {
        let request = self.request(WorkerOp::ReadData, Some(id), None);
        let result = self.send("worker read", &request).await?;
        decode_result(id, result)
    }

    #[instrument(skip(self, value))]
    async fn write(&self, id: &str, value: &StoredValue) -> Result<()> {
        let request = self.request(WorkerOp::WriteData, Some(id), Some(codec::encode(value)?));
        self.send("worker write", &request).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let request = self.request(WorkerOp::RemoveData, Some(id), None);
        self.send("worker remove", &request).await?;
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        let request = self.request(WorkerOp::ClearAll, None, None);
        self.send("worker clear", &request).await?;
        Ok(())
    }

    async fn remove_all(&self) -> Result<()> {
        let request = self.request(WorkerOp::RemoveAll, None, None);
        self.send("worker remove all", &request).await?;
        Ok(())
    }

    fn session(&self) -> &str {
        &self.session
    }
}

/// Worker read results arrive as encoded text from key-value backends and
/// as already-parsed JSON trees from relational ones; accept both.
fn decode_result(id: &str, result: Option<serde_json::Value>) -> Result<Option<StoredValue>> {
    match result {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(text)) => codec::decode(&text)
            .map(Some)
            .map_err(|e| StoreError::corrupt(id, e)),
        Some(other) => StoredValue::from_json(other)
            .map(Some)
            .map_err(|e| StoreError::corrupt(id, e)),
    }
}
