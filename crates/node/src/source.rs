use std::collections::HashMap;

use async_trait::async_trait;

use hxscan_core::Result;

use crate::types::{Asset, Block, OpReceipt};

/// Read access to a chain node.
///
/// Every call is a network round-trip; failures are reported as
/// [`hxscan_core::AppError::Rpc`] (transport) or
/// [`hxscan_core::AppError::Decode`] (unexpected reply shape).
#[async_trait]
pub trait NodeSource: Send + Sync {
    /// Fetch a block with its transactions and transaction ids.
    /// `Ok(None)` means the block does not exist yet.
    async fn get_block(&self, number: u64) -> Result<Option<Block>>;

    /// Receipts of the contract operations of a transaction, positionally
    /// aligned with its operation list.
    async fn get_transaction_receipts(&self, txid: &str) -> Result<Vec<OpReceipt>>;

    /// Call a read-only contract method and return its raw string result.
    async fn invoke_read_only(
        &self,
        caller: &str,
        contract: &str,
        method: &str,
        arg: &str,
    ) -> Result<String>;

    async fn list_assets(&self, offset: u32, limit: u32) -> Result<Vec<Asset>>;

    /// Current balances of an address as `asset_id -> raw amount`.
    async fn get_address_balances(&self, addr: &str) -> Result<HashMap<String, i128>>;
}
