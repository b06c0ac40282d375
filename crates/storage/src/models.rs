use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ─── Chain entities ─────────────────────────────────────────────────────────

/// A scanned block. `block_id` (the block's own hash) stays empty until the
/// next block is scanned and reports it as `previous`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BlockRecord {
    pub number: i64,
    pub previous: String,
    pub timestamp: String,
    pub trxfee: i64,
    pub miner: String,
    pub transaction_merkle_root: String,
    pub next_secret_hash: String,
    pub block_id: String,
    pub reward: i64,
    pub txs_count: i32,
}

/// An immutable transaction header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TransactionRecord {
    pub txid: String,
    pub block_num: i64,
    pub ref_block_num: i64,
    pub ref_block_prefix: i64,
    pub expiration: String,
    pub operations_count: i32,
    pub index_in_block: i32,
    /// `-1` for a transaction without operations.
    pub first_operation_type: i32,
}

/// Narrow, type-agnostic operation row. `id` is `block@txid@index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OperationRecord {
    pub id: String,
    pub txid: String,
    pub tx_block_number: i64,
    pub tx_index_in_block: i32,
    pub index_in_tx: i32,
    pub operation_type: i32,
    pub operation_type_name: String,
    pub operation_json: String,
    pub addr: String,
}

/// Contract execution receipt; side-effect collections are JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ContractReceiptRecord {
    pub trxid: String,
    pub block_num: i64,
    pub op_num: i32,
    pub api_result: String,
    pub exec_succeed: bool,
    pub actual_fee: i64,
    pub invoker: String,
    pub contract_registered: String,
    pub events: String,
    pub contract_withdraw_info: String,
    pub contract_balance_changes: String,
    pub deposit_to_address_changes: String,
    pub deposit_to_contract_changes: String,
    pub transfer_fees: String,
}

/// A receipt event flattened for lookups by contract or caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ReceiptEventRecord {
    pub trxid: String,
    pub block_num: i64,
    pub op_num: i32,
    pub caller_addr: String,
    pub contract_address: String,
    pub event_arg: String,
    pub event_name: String,
}

// ─── Derived entities ───────────────────────────────────────────────────────

/// Display name registered for an owner address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub owner_addr: String,
    pub account_name: String,
}

/// Native asset metadata mirrored from the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AssetRecord {
    pub asset_id: String,
    pub symbol: String,
    pub precision: i32,
}

/// Latest known balance of an address in a native asset (decimal text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AddressBalance {
    pub owner_addr: String,
    pub asset_id: String,
    pub amount: String,
}

/// A contract classified as a token at registration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TokenContract {
    pub contract_id: String,
    pub block_num: i64,
    pub block_time: String,
    pub txid: String,
    pub contract_type: String,
    pub owner_pubkey: String,
    pub owner_addr: String,
    pub register_time: String,
    pub inherit_from: String,
    pub gas_price: i64,
    pub gas_limit: i64,
    pub state: Option<String>,
    pub total_supply: Option<String>,
    pub precision: Option<i32>,
    pub token_symbol: Option<String>,
    pub token_name: Option<String>,
    pub logo: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
}

/// Latest known balance of an owner in a token contract (decimal text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TokenBalance {
    pub contract_addr: String,
    pub owner_addr: String,
    pub amount: String,
}

/// An immutable record of a token `Transfer` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TransferHistory {
    pub contract_addr: String,
    pub from_addr: String,
    pub to_addr: String,
    pub amount: String,
    pub block_num: i64,
    pub txid: String,
    pub op_num: i32,
    pub event_name: String,
    pub tx_time: NaiveDateTime,
}

// ─── Dynamic tables ─────────────────────────────────────────────────────────

/// Physical type of a dynamically created column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    BigInt,
    Text,
}

impl ColumnKind {
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnKind::BigInt => "BIGINT",
            ColumnKind::Text => "TEXT",
        }
    }

    /// Map an `information_schema.columns.data_type` value back to a kind.
    pub fn from_data_type(data_type: &str) -> Self {
        match data_type {
            "bigint" | "integer" | "smallint" => ColumnKind::BigInt,
            _ => ColumnKind::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
}

/// A named index over a dynamic table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
}

/// A value bound into a dynamic insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    BigInt(Option<i64>),
    Text(Option<String>),
}
