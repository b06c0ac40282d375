use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use hxscan_core::{AppError, Result};

use crate::source::NodeSource;
use crate::types::{Asset, Block, OpReceipt};

#[derive(Default)]
struct MockState {
    blocks: BTreeMap<u64, Block>,
    receipts: HashMap<String, Vec<OpReceipt>>,
    invoke_results: HashMap<(String, String, String), String>,
    balances: HashMap<String, HashMap<String, i128>>,
    assets: Vec<Asset>,
    failing_block: Option<u64>,
    head_signal: Option<CancellationToken>,
    block_requests: Vec<u64>,
    invocations: Vec<(String, String, String)>,
}

/// In-memory node for dev/test runs.
///
/// Read-only contract calls without a registered result fail with
/// [`AppError::Rpc`], mimicking a node rejecting the call.
#[derive(Default)]
pub struct MockNode {
    state: Mutex<MockState>,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_block(&self, block: Block) {
        self.state().blocks.insert(block.block_number, block);
    }

    pub fn set_receipts(&self, txid: &str, receipts: Vec<OpReceipt>) {
        self.state().receipts.insert(txid.to_string(), receipts);
    }

    pub fn set_invoke_result(&self, contract: &str, method: &str, arg: &str, result: &str) {
        self.state().invoke_results.insert(
            (contract.to_string(), method.to_string(), arg.to_string()),
            result.to_string(),
        );
    }

    pub fn set_balance(&self, addr: &str, asset_id: &str, amount: i128) {
        self.state()
            .balances
            .entry(addr.to_string())
            .or_default()
            .insert(asset_id.to_string(), amount);
    }

    pub fn add_asset(&self, asset: Asset) {
        self.state().assets.push(asset);
    }

    /// Make `get_block(number)` fail with a transport error.
    pub fn fail_block(&self, number: u64) {
        self.state().failing_block = Some(number);
    }

    /// Cancel `token` the first time a block past the head is requested.
    pub fn cancel_at_head(&self, token: CancellationToken) {
        self.state().head_signal = Some(token);
    }

    /// Block numbers requested so far, in call order.
    pub fn block_requests(&self) -> Vec<u64> {
        self.state().block_requests.clone()
    }

    /// `(contract, method, arg)` of every read-only call so far.
    pub fn invocations(&self) -> Vec<(String, String, String)> {
        self.state().invocations.clone()
    }
}

#[async_trait]
impl NodeSource for MockNode {
    async fn get_block(&self, number: u64) -> Result<Option<Block>> {
        let mut state = self.state();
        state.block_requests.push(number);
        if state.failing_block == Some(number) {
            return Err(AppError::Rpc(format!("get_block #{number}: connection reset")));
        }
        let block = state.blocks.get(&number).cloned();
        if block.is_none() {
            if let Some(token) = state.head_signal.take() {
                token.cancel();
            }
        }
        Ok(block)
    }

    async fn get_transaction_receipts(&self, txid: &str) -> Result<Vec<OpReceipt>> {
        Ok(self.state().receipts.get(txid).cloned().unwrap_or_default())
    }

    async fn invoke_read_only(
        &self,
        _caller: &str,
        contract: &str,
        method: &str,
        arg: &str,
    ) -> Result<String> {
        let mut state = self.state();
        let key = (contract.to_string(), method.to_string(), arg.to_string());
        state.invocations.push(key.clone());
        state
            .invoke_results
            .get(&key)
            .cloned()
            .ok_or_else(|| AppError::Rpc(format!("{contract}.{method}({arg}) not available")))
    }

    async fn list_assets(&self, offset: u32, limit: u32) -> Result<Vec<Asset>> {
        Ok(self
            .state()
            .assets
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_address_balances(&self, addr: &str) -> Result<HashMap<String, i128>> {
        Ok(self.state().balances.get(addr).cloned().unwrap_or_default())
    }
}
