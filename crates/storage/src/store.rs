use async_trait::async_trait;

use hxscan_core::Result;

use crate::models::*;

/// The structured store the scanner writes through.
///
/// Writes are independent statements, except a receipt and its events which
/// land together. Callers get idempotency by checking existence first
/// (`find_*` / `*_exists`) or by using the `upsert_*` methods.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Scan configuration ─────────────────────────────────────────────
    async fn get_config(&self, key: &str) -> Result<Option<String>>;
    async fn set_config(&self, key: &str, value: &str) -> Result<()>;

    // ── Blocks ─────────────────────────────────────────────────────────
    async fn find_block(&self, number: i64) -> Result<Option<BlockRecord>>;
    async fn insert_block(&self, block: &BlockRecord) -> Result<()>;
    async fn update_block_hash(&self, number: i64, block_id: &str) -> Result<()>;

    // ── Transactions ───────────────────────────────────────────────────
    async fn find_transaction(&self, txid: &str) -> Result<Option<TransactionRecord>>;
    async fn insert_transaction(&self, tx: &TransactionRecord) -> Result<()>;

    // ── Generic operations ─────────────────────────────────────────────
    async fn find_operation(&self, id: &str) -> Result<Option<OperationRecord>>;
    async fn insert_operation(&self, op: &OperationRecord) -> Result<()>;

    // ── Dynamic per-type tables ────────────────────────────────────────
    async fn table_exists(&self, table: &str) -> Result<bool>;
    /// Create a table whose columns are all nullable, plus the given index.
    async fn create_table(&self, table: &str, columns: &[ColumnDef], index: &IndexDef)
    -> Result<()>;
    /// Column metadata of an existing table, in declaration order.
    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnDef>>;
    async fn row_exists(&self, table: &str, txid: &str, index_in_tx: i64) -> Result<bool>;
    async fn insert_row(&self, table: &str, row: &[(String, SqlValue)]) -> Result<()>;

    // ── Contract receipts ──────────────────────────────────────────────
    async fn contract_receipt_exists(&self, trxid: &str, op_num: i32) -> Result<bool>;
    /// Store a receipt together with its flattened events.
    async fn insert_contract_receipt(
        &self,
        receipt: &ContractReceiptRecord,
        events: &[ReceiptEventRecord],
    ) -> Result<()>;

    // ── Accounts ───────────────────────────────────────────────────────
    async fn find_account(&self, owner_addr: &str) -> Result<Option<Account>>;
    async fn insert_account(&self, account: &Account) -> Result<()>;

    // ── Assets & address balances ──────────────────────────────────────
    async fn find_asset(&self, asset_id: &str) -> Result<Option<AssetRecord>>;
    async fn insert_asset(&self, asset: &AssetRecord) -> Result<()>;
    async fn find_address_balance(
        &self,
        owner_addr: &str,
        asset_id: &str,
    ) -> Result<Option<AddressBalance>>;
    async fn upsert_address_balance(&self, balance: &AddressBalance) -> Result<()>;

    // ── Token contracts ────────────────────────────────────────────────
    async fn find_token_contract(&self, contract_id: &str) -> Result<Option<TokenContract>>;
    async fn insert_token_contract(&self, token: &TokenContract) -> Result<()>;
    async fn update_token_contract(&self, token: &TokenContract) -> Result<()>;
    async fn find_token_balance(
        &self,
        contract_addr: &str,
        owner_addr: &str,
    ) -> Result<Option<TokenBalance>>;
    async fn upsert_token_balance(&self, balance: &TokenBalance) -> Result<()>;

    // ── Token transfer history ─────────────────────────────────────────
    async fn find_transfer_history(&self, txid: &str, op_num: i32)
    -> Result<Option<TransferHistory>>;
    async fn insert_transfer_history(&self, record: &TransferHistory) -> Result<()>;
}
