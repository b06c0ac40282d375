use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use hxscan_core::{AppError, Result};

use crate::source::NodeSource;
use crate::types::{Asset, AssetAmount, Block, BlockTransactionInfo, OpReceipt, balances_by_asset};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Writer = SplitSink<Socket, Message>;
type Pending = Arc<StdMutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>;

/// Interval between keep-alive pings on an idle connection.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound on sending the close frame to an unresponsive node.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

fn lock(pending: &Pending) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<RpcResponse>>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// JSON-RPC client speaking to the node over a single websocket.
///
/// A background reader routes responses to callers by request id, so
/// [`NodeClient::close`] never waits behind an in-flight request: it fires
/// the close token, which fails every pending call with [`AppError::Rpc`].
pub struct NodeClient {
    endpoint: String,
    writer: Mutex<Option<Writer>>,
    pending: Pending,
    closed: CancellationToken,
    next_id: AtomicU64,
}

impl NodeClient {
    /// Open the websocket connection and start the response reader.
    pub async fn connect(endpoint: &str) -> Result<Arc<Self>> {
        let (socket, _) = connect_async(endpoint)
            .await
            .map_err(|e| AppError::Rpc(format!("connect {endpoint}: {e}")))?;
        let (writer, reader) = socket.split();

        tracing::info!(endpoint = %endpoint, "Connected to node");

        let client = Arc::new(Self {
            endpoint: endpoint.to_string(),
            writer: Mutex::new(Some(writer)),
            pending: Pending::default(),
            closed: CancellationToken::new(),
            next_id: AtomicU64::new(1),
        });
        tokio::spawn(read_responses(
            reader,
            client.pending.clone(),
            client.closed.clone(),
        ));
        Ok(client)
    }

    /// Ping the node every [`KEEP_ALIVE_INTERVAL`] until `cancel` fires, the
    /// connection is closed or a ping fails.
    pub fn spawn_keep_alive(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = client.closed.cancelled() => break,
                    _ = tokio::time::sleep(KEEP_ALIVE_INTERVAL) => {
                        if let Err(e) = client.send(Message::Ping(b"ping".to_vec()), "ping").await {
                            tracing::warn!(error = %e, "Node keep-alive failed");
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Keep-alive task stopped");
        })
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Close the connection. Pending and subsequent calls fail with
    /// [`AppError::Rpc`]. Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        self.closed.cancel();
        let writer = match tokio::time::timeout(CLOSE_TIMEOUT, self.writer.lock()).await {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        let Some(mut writer) = writer else {
            return Ok(());
        };
        tracing::info!(endpoint = %self.endpoint, "Closing node connection");
        match tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await {
            Ok(result) => result.map_err(|e| AppError::Rpc(format!("close: {e}"))),
            Err(_) => Err(AppError::Rpc("close: node did not take the close frame".into())),
        }
    }

    /// Write one frame, giving up as soon as the connection is closed.
    async fn send(&self, message: Message, what: &str) -> Result<()> {
        let write = async {
            let mut guard = self.writer.lock().await;
            let writer = guard
                .as_mut()
                .ok_or_else(|| AppError::Rpc(format!("{what}: node connection closed")))?;
            writer
                .send(message)
                .await
                .map_err(|e| AppError::Rpc(format!("{what}: {e}")))
        };
        tokio::select! {
            _ = self.closed.cancelled() => Err(AppError::Rpc(format!("{what}: node connection closed"))),
            result = write => result,
        }
    }

    /// Send one request and wait for the response carrying the same id.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        if let Err(e) = self.send(Message::Text(request.to_string()), method).await {
            lock(&self.pending).remove(&id);
            return Err(e);
        }

        let response = tokio::select! {
            _ = self.closed.cancelled() => None,
            response = rx => response.ok(),
        };
        let Some(response) = response else {
            lock(&self.pending).remove(&id);
            return Err(AppError::Rpc(format!("{method}: node connection closed")));
        };
        if let Some(error) = response.error.filter(|e| !e.is_null()) {
            return Err(AppError::Rpc(format!("{method}: {error}")));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| AppError::Decode(format!("{method} reply: {e}")))
    }
}

/// Deliver every response to the caller waiting on its id until the node
/// hangs up or the client is closed.
async fn read_responses(mut reader: SplitStream<Socket>, pending: Pending, closed: CancellationToken) {
    loop {
        let message = tokio::select! {
            _ = closed.cancelled() => break,
            message = reader.next() => message,
        };
        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping non-UTF-8 node message");
                    continue;
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                tracing::warn!("Node closed the connection");
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Node connection failed");
                break;
            }
        };

        let response: RpcResponse = match serde_json::from_str(&text) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed node reply");
                continue;
            }
        };
        let Some(id) = response.id.as_ref().and_then(Value::as_u64) else {
            continue;
        };
        if let Some(waiter) = lock(&pending).remove(&id) {
            let _ = waiter.send(response);
        }
    }

    closed.cancel();
    lock(&pending).clear();
    tracing::debug!("Node reader stopped");
}

#[async_trait]
impl NodeSource for NodeClient {
    async fn get_block(&self, number: u64) -> Result<Option<Block>> {
        let value = self.call("get_block", json!([number])).await?;
        if value.is_null() {
            return Ok(None);
        }
        let mut block: Block = serde_json::from_value(value)
            .map_err(|e| AppError::Decode(format!("block #{number}: {e}")))?;
        block.block_number = number;

        let infos: Vec<BlockTransactionInfo> = self
            .call_as("fetch_block_transactions", json!([number]))
            .await?;

        block.transaction_ids = infos.iter().map(|info| info.trxid.clone()).collect();
        for (index, tx) in block.transactions.iter_mut().enumerate() {
            tx.index_in_block = index;
            if let Some(info) = infos.get(index) {
                tx.trxid = info.trxid.clone();
                tx.block_num = info.block_num;
                tx.contract_id = info.contract_id.clone();
            }
        }
        Ok(Some(block))
    }

    async fn get_transaction_receipts(&self, txid: &str) -> Result<Vec<OpReceipt>> {
        let value = self
            .call("get_contract_invoke_object", json!([txid]))
            .await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(value)
            .map_err(|e| AppError::Decode(format!("receipts of {txid}: {e}")))
    }

    async fn invoke_read_only(
        &self,
        caller: &str,
        contract: &str,
        method: &str,
        arg: &str,
    ) -> Result<String> {
        let value = self
            .call(
                "invoke_contract_offline",
                json!([caller, contract, method, arg]),
            )
            .await?;
        Ok(match value {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    async fn list_assets(&self, offset: u32, limit: u32) -> Result<Vec<Asset>> {
        self.call_as("list_assets", json!([offset, limit])).await
    }

    async fn get_address_balances(&self, addr: &str) -> Result<HashMap<String, i128>> {
        let entries: Vec<AssetAmount> = self.call_as("get_addr_balances", json!([addr])).await?;
        balances_by_asset(&entries)
    }
}
