use async_trait::async_trait;
use sqlx::PgPool;

use hxscan_core::{AppError, Result};

use crate::models::*;
use crate::repos;
use crate::store::Store;

fn db(e: sqlx::Error) -> AppError {
    AppError::Database(e.to_string())
}

/// [`Store`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        repos::get_config(&self.pool, key).await.map_err(db)
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        repos::set_config(&self.pool, key, value).await.map_err(db)
    }

    async fn find_block(&self, number: i64) -> Result<Option<BlockRecord>> {
        repos::find_block(&self.pool, number).await.map_err(db)
    }

    async fn insert_block(&self, block: &BlockRecord) -> Result<()> {
        repos::insert_block(&self.pool, block).await.map_err(db)
    }

    async fn update_block_hash(&self, number: i64, block_id: &str) -> Result<()> {
        repos::update_block_hash(&self.pool, number, block_id)
            .await
            .map_err(db)
    }

    async fn find_transaction(&self, txid: &str) -> Result<Option<TransactionRecord>> {
        repos::find_transaction(&self.pool, txid).await.map_err(db)
    }

    async fn insert_transaction(&self, tx: &TransactionRecord) -> Result<()> {
        repos::insert_transaction(&self.pool, tx).await.map_err(db)
    }

    async fn find_operation(&self, id: &str) -> Result<Option<OperationRecord>> {
        repos::find_operation(&self.pool, id).await.map_err(db)
    }

    async fn insert_operation(&self, op: &OperationRecord) -> Result<()> {
        repos::insert_operation(&self.pool, op).await.map_err(db)
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        repos::table_exists(&self.pool, table).await.map_err(db)
    }

    async fn create_table(
        &self,
        table: &str,
        columns: &[ColumnDef],
        index: &IndexDef,
    ) -> Result<()> {
        repos::create_table(&self.pool, table, columns, index)
            .await
            .map_err(db)
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnDef>> {
        repos::table_columns(&self.pool, table).await.map_err(db)
    }

    async fn row_exists(&self, table: &str, txid: &str, index_in_tx: i64) -> Result<bool> {
        repos::row_exists(&self.pool, table, txid, index_in_tx)
            .await
            .map_err(db)
    }

    async fn insert_row(&self, table: &str, row: &[(String, SqlValue)]) -> Result<()> {
        repos::insert_row(&self.pool, table, row).await.map_err(db)
    }

    async fn contract_receipt_exists(&self, trxid: &str, op_num: i32) -> Result<bool> {
        repos::contract_receipt_exists(&self.pool, trxid, op_num)
            .await
            .map_err(db)
    }

    async fn insert_contract_receipt(
        &self,
        receipt: &ContractReceiptRecord,
        events: &[ReceiptEventRecord],
    ) -> Result<()> {
        repos::insert_contract_receipt(&self.pool, receipt, events)
            .await
            .map_err(db)
    }

    async fn find_account(&self, owner_addr: &str) -> Result<Option<Account>> {
        repos::find_account(&self.pool, owner_addr).await.map_err(db)
    }

    async fn insert_account(&self, account: &Account) -> Result<()> {
        repos::insert_account(&self.pool, account).await.map_err(db)
    }

    async fn find_asset(&self, asset_id: &str) -> Result<Option<AssetRecord>> {
        repos::find_asset(&self.pool, asset_id).await.map_err(db)
    }

    async fn insert_asset(&self, asset: &AssetRecord) -> Result<()> {
        repos::insert_asset(&self.pool, asset).await.map_err(db)
    }

    async fn find_address_balance(
        &self,
        owner_addr: &str,
        asset_id: &str,
    ) -> Result<Option<AddressBalance>> {
        repos::find_address_balance(&self.pool, owner_addr, asset_id)
            .await
            .map_err(db)
    }

    async fn upsert_address_balance(&self, balance: &AddressBalance) -> Result<()> {
        repos::upsert_address_balance(&self.pool, balance)
            .await
            .map_err(db)
    }

    async fn find_token_contract(&self, contract_id: &str) -> Result<Option<TokenContract>> {
        repos::find_token_contract(&self.pool, contract_id)
            .await
            .map_err(db)
    }

    async fn insert_token_contract(&self, token: &TokenContract) -> Result<()> {
        repos::insert_token_contract(&self.pool, token)
            .await
            .map_err(db)
    }

    async fn update_token_contract(&self, token: &TokenContract) -> Result<()> {
        repos::update_token_contract(&self.pool, token)
            .await
            .map_err(db)
    }

    async fn find_token_balance(
        &self,
        contract_addr: &str,
        owner_addr: &str,
    ) -> Result<Option<TokenBalance>> {
        repos::find_token_balance(&self.pool, contract_addr, owner_addr)
            .await
            .map_err(db)
    }

    async fn upsert_token_balance(&self, balance: &TokenBalance) -> Result<()> {
        repos::upsert_token_balance(&self.pool, balance)
            .await
            .map_err(db)
    }

    async fn find_transfer_history(
        &self,
        txid: &str,
        op_num: i32,
    ) -> Result<Option<TransferHistory>> {
        repos::find_transfer_history(&self.pool, txid, op_num)
            .await
            .map_err(db)
    }

    async fn insert_transfer_history(&self, record: &TransferHistory) -> Result<()> {
        repos::insert_transfer_history(&self.pool, record)
            .await
            .map_err(db)
    }
}
