use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use hxscan_core::{AppError, Result};

use crate::models::*;
use crate::store::Store;

/// A dynamic table held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub columns: Vec<ColumnDef>,
    pub index: Option<IndexDef>,
    pub rows: Vec<Vec<(String, SqlValue)>>,
}

impl MemoryTable {
    /// Value of `column` in every row, `None` where the row omits it.
    pub fn column_values(&self, column: &str) -> Vec<Option<SqlValue>> {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .find(|(name, _)| name == column)
                    .map(|(_, v)| v.clone())
            })
            .collect()
    }
}

/// Everything a [`MemoryStore`] holds. Exposed for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub configs: HashMap<String, String>,
    pub blocks: BTreeMap<i64, BlockRecord>,
    pub transactions: Vec<TransactionRecord>,
    pub operations: Vec<OperationRecord>,
    pub tables: BTreeMap<String, MemoryTable>,
    pub receipts: Vec<ContractReceiptRecord>,
    pub receipt_events: Vec<ReceiptEventRecord>,
    pub accounts: Vec<Account>,
    pub assets: Vec<AssetRecord>,
    pub address_balances: Vec<AddressBalance>,
    pub token_contracts: Vec<TokenContract>,
    pub token_balances: Vec<TokenBalance>,
    pub transfer_history: Vec<TransferHistory>,
    /// Number of metadata lookups served by `table_columns`.
    pub column_queries: usize,
    /// Number of `set_config` calls.
    pub config_writes: usize,
    failing_tables: HashSet<String>,
}

/// Simple in-memory store for fast dev/test runs.
///
/// Dynamic inserts are checked against the declared columns the way a real
/// database would: an unknown column is an error. Inserting a duplicate key
/// is an error too, so a caller that skips its existence check gets caught.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> MemoryState {
        self.read().clone()
    }

    /// Make every insert into `table` fail with a database error.
    pub fn fail_inserts_into(&self, table: &str) {
        self.write().failing_tables.insert(table.to_string());
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn duplicate(what: &str, key: impl std::fmt::Display) -> AppError {
    AppError::Database(format!("duplicate key value violates unique constraint on {what}: {key}"))
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read().configs.get(key).cloned())
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.write();
        state.config_writes += 1;
        state.configs.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn find_block(&self, number: i64) -> Result<Option<BlockRecord>> {
        Ok(self.read().blocks.get(&number).cloned())
    }

    async fn insert_block(&self, block: &BlockRecord) -> Result<()> {
        let mut state = self.write();
        if state.blocks.contains_key(&block.number) {
            return Err(duplicate("blocks", block.number));
        }
        state.blocks.insert(block.number, block.clone());
        Ok(())
    }

    async fn update_block_hash(&self, number: i64, block_id: &str) -> Result<()> {
        if let Some(block) = self.write().blocks.get_mut(&number) {
            block.block_id = block_id.to_string();
        }
        Ok(())
    }

    async fn find_transaction(&self, txid: &str) -> Result<Option<TransactionRecord>> {
        Ok(self
            .read()
            .transactions
            .iter()
            .find(|t| t.txid == txid)
            .cloned())
    }

    async fn insert_transaction(&self, tx: &TransactionRecord) -> Result<()> {
        let mut state = self.write();
        if state.transactions.iter().any(|t| t.txid == tx.txid) {
            return Err(duplicate("transactions", &tx.txid));
        }
        state.transactions.push(tx.clone());
        Ok(())
    }

    async fn find_operation(&self, id: &str) -> Result<Option<OperationRecord>> {
        Ok(self.read().operations.iter().find(|o| o.id == id).cloned())
    }

    async fn insert_operation(&self, op: &OperationRecord) -> Result<()> {
        let mut state = self.write();
        if state.operations.iter().any(|o| o.id == op.id) {
            return Err(duplicate("operations", &op.id));
        }
        state.operations.push(op.clone());
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.read().tables.contains_key(table))
    }

    async fn create_table(
        &self,
        table: &str,
        columns: &[ColumnDef],
        index: &IndexDef,
    ) -> Result<()> {
        self.write()
            .tables
            .entry(table.to_string())
            .or_insert_with(|| MemoryTable {
                columns: columns.to_vec(),
                index: Some(index.clone()),
                rows: Vec::new(),
            });
        Ok(())
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnDef>> {
        let mut state = self.write();
        state.column_queries += 1;
        Ok(state
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn row_exists(&self, table: &str, txid: &str, index_in_tx: i64) -> Result<bool> {
        let state = self.read();
        let table = state
            .tables
            .get(table)
            .ok_or_else(|| AppError::Database(format!("relation \"{table}\" does not exist")))?;
        let txid = SqlValue::Text(Some(txid.to_string()));
        let index = SqlValue::BigInt(Some(index_in_tx));
        Ok(table.rows.iter().any(|row| {
            row.iter().any(|(c, v)| c == "txid" && *v == txid)
                && row.iter().any(|(c, v)| c == "index_in_tx" && *v == index)
        }))
    }

    async fn insert_row(&self, table: &str, row: &[(String, SqlValue)]) -> Result<()> {
        let mut state = self.write();
        if state.failing_tables.contains(table) {
            return Err(AppError::Database(format!("insert into \"{table}\" failed")));
        }
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| AppError::Database(format!("relation \"{table}\" does not exist")))?;
        if let Some((unknown, _)) = row
            .iter()
            .find(|(name, _)| !target.columns.iter().any(|c| &c.name == name))
        {
            return Err(AppError::Database(format!(
                "column \"{unknown}\" of relation \"{table}\" does not exist"
            )));
        }
        target.rows.push(row.to_vec());
        Ok(())
    }

    async fn contract_receipt_exists(&self, trxid: &str, op_num: i32) -> Result<bool> {
        Ok(self
            .read()
            .receipts
            .iter()
            .any(|r| r.trxid == trxid && r.op_num == op_num))
    }

    async fn insert_contract_receipt(
        &self,
        receipt: &ContractReceiptRecord,
        events: &[ReceiptEventRecord],
    ) -> Result<()> {
        let mut state = self.write();
        if state
            .receipts
            .iter()
            .any(|r| r.trxid == receipt.trxid && r.op_num == receipt.op_num)
        {
            return Err(duplicate(
                "contract_operation_receipt",
                format!("{}#{}", receipt.trxid, receipt.op_num),
            ));
        }
        state.receipts.push(receipt.clone());
        state.receipt_events.extend_from_slice(events);
        Ok(())
    }

    async fn find_account(&self, owner_addr: &str) -> Result<Option<Account>> {
        Ok(self
            .read()
            .accounts
            .iter()
            .find(|a| a.owner_addr == owner_addr)
            .cloned())
    }

    async fn insert_account(&self, account: &Account) -> Result<()> {
        let mut state = self.write();
        if state
            .accounts
            .iter()
            .any(|a| a.owner_addr == account.owner_addr)
        {
            return Err(duplicate("account", &account.owner_addr));
        }
        state.accounts.push(account.clone());
        Ok(())
    }

    async fn find_asset(&self, asset_id: &str) -> Result<Option<AssetRecord>> {
        Ok(self
            .read()
            .assets
            .iter()
            .find(|a| a.asset_id == asset_id)
            .cloned())
    }

    async fn insert_asset(&self, asset: &AssetRecord) -> Result<()> {
        let mut state = self.write();
        if !state.assets.iter().any(|a| a.asset_id == asset.asset_id) {
            state.assets.push(asset.clone());
        }
        Ok(())
    }

    async fn find_address_balance(
        &self,
        owner_addr: &str,
        asset_id: &str,
    ) -> Result<Option<AddressBalance>> {
        Ok(self
            .read()
            .address_balances
            .iter()
            .find(|b| b.owner_addr == owner_addr && b.asset_id == asset_id)
            .cloned())
    }

    async fn upsert_address_balance(&self, balance: &AddressBalance) -> Result<()> {
        let mut state = self.write();
        match state
            .address_balances
            .iter_mut()
            .find(|b| b.owner_addr == balance.owner_addr && b.asset_id == balance.asset_id)
        {
            Some(existing) => existing.amount = balance.amount.clone(),
            None => state.address_balances.push(balance.clone()),
        }
        Ok(())
    }

    async fn find_token_contract(&self, contract_id: &str) -> Result<Option<TokenContract>> {
        Ok(self
            .read()
            .token_contracts
            .iter()
            .find(|t| t.contract_id == contract_id)
            .cloned())
    }

    async fn insert_token_contract(&self, token: &TokenContract) -> Result<()> {
        let mut state = self.write();
        if state
            .token_contracts
            .iter()
            .any(|t| t.contract_id == token.contract_id)
        {
            return Err(duplicate("token_contract", &token.contract_id));
        }
        state.token_contracts.push(token.clone());
        Ok(())
    }

    async fn update_token_contract(&self, token: &TokenContract) -> Result<()> {
        if let Some(existing) = self
            .write()
            .token_contracts
            .iter_mut()
            .find(|t| t.contract_id == token.contract_id)
        {
            *existing = token.clone();
        }
        Ok(())
    }

    async fn find_token_balance(
        &self,
        contract_addr: &str,
        owner_addr: &str,
    ) -> Result<Option<TokenBalance>> {
        Ok(self
            .read()
            .token_balances
            .iter()
            .find(|b| b.contract_addr == contract_addr && b.owner_addr == owner_addr)
            .cloned())
    }

    async fn upsert_token_balance(&self, balance: &TokenBalance) -> Result<()> {
        let mut state = self.write();
        match state
            .token_balances
            .iter_mut()
            .find(|b| b.contract_addr == balance.contract_addr && b.owner_addr == balance.owner_addr)
        {
            Some(existing) => existing.amount = balance.amount.clone(),
            None => state.token_balances.push(balance.clone()),
        }
        Ok(())
    }

    async fn find_transfer_history(
        &self,
        txid: &str,
        op_num: i32,
    ) -> Result<Option<TransferHistory>> {
        Ok(self
            .read()
            .transfer_history
            .iter()
            .find(|h| h.txid == txid && h.op_num == op_num)
            .cloned())
    }

    async fn insert_transfer_history(&self, record: &TransferHistory) -> Result<()> {
        let mut state = self.write();
        if state
            .transfer_history
            .iter()
            .any(|h| h.txid == record.txid && h.op_num == record.op_num)
        {
            return Err(duplicate(
                "token_contract_transfer_history",
                format!("{}#{}", record.txid, record.op_num),
            ));
        }
        state.transfer_history.push(record.clone());
        Ok(())
    }
}
