use std::sync::Arc;

use serde_json::{Map, Value};

use hxscan_core::{AppError, Result};
use hxscan_node::operations::first_operation_type;
use hxscan_node::{Block, Transaction};
use hxscan_storage::Store;
use hxscan_storage::models::{BlockRecord, OperationRecord, TransactionRecord};

use crate::schema::SchemaRegistry;

/// Payload keys that default to an empty string when an operation omits them.
const DEFAULTED_KEYS: [&str; 2] = ["memo", "guarantee_id"];

/// Identity of a generic operation row.
pub fn operation_id(block_num: u64, txid: &str, index_in_tx: usize) -> String {
    format!("{block_num}@{txid}@{index_in_tx}")
}

/// Add the positional fields every stored payload carries.
pub fn inject_synthetic_fields(
    payload: &mut Map<String, Value>,
    block_num: u64,
    txid: &str,
    index_in_tx: usize,
) {
    payload.insert("block_num".into(), Value::from(block_num));
    payload.insert("txid".into(), Value::from(txid));
    payload.insert("index_in_tx".into(), Value::from(index_in_tx as u64));
    for key in DEFAULTED_KEYS {
        payload
            .entry(key)
            .or_insert_with(|| Value::String(String::new()));
    }
}

fn to_i64(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| AppError::Decode(format!("{what} {value} out of range")))
}

fn to_i32(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| AppError::Decode(format!("{what} {value} out of range")))
}

pub fn block_record(block: &Block) -> Result<BlockRecord> {
    Ok(BlockRecord {
        number: to_i64(block.block_number, "block number")?,
        previous: block.previous.clone(),
        timestamp: block.timestamp.clone(),
        trxfee: to_i64(block.trxfee, "block fee")?,
        miner: block.miner.clone(),
        transaction_merkle_root: block.transaction_merkle_root.clone(),
        next_secret_hash: block.next_secret_hash.clone(),
        block_id: String::new(),
        reward: 0,
        txs_count: to_i32(block.transactions.len(), "transaction count")?,
    })
}

pub fn transaction_record(tx: &Transaction) -> Result<TransactionRecord> {
    let first_operation_type = first_operation_type(tx).unwrap_or(-1);
    Ok(TransactionRecord {
        txid: tx.trxid.clone(),
        block_num: to_i64(tx.block_num, "block number")?,
        ref_block_num: to_i64(tx.ref_block_num, "ref block number")?,
        ref_block_prefix: to_i64(tx.ref_block_prefix, "ref block prefix")?,
        expiration: tx.expiration.clone(),
        operations_count: to_i32(tx.operations.len(), "operation count")?,
        index_in_block: to_i32(tx.index_in_block, "transaction index")?,
        first_operation_type: i32::try_from(first_operation_type).map_err(|_| {
            AppError::Decode(format!("operation type {first_operation_type} out of range"))
        })?,
    })
}

/// One decoded operation ready to be stored.
pub struct OperationRow<'a> {
    pub block_num: u64,
    pub txid: &'a str,
    pub tx_index_in_block: usize,
    pub index_in_tx: usize,
    pub type_code: i64,
    pub type_name: &'a str,
    pub payload: &'a Map<String, Value>,
    pub addr: String,
}

/// Idempotent writes of blocks, transactions and operations.
///
/// Every write checks for an existing row first, so replaying a partially
/// processed block never duplicates anything.
pub struct OperationStore {
    store: Arc<dyn Store>,
    schemas: SchemaRegistry,
}

impl OperationStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            schemas: SchemaRegistry::new(store.clone()),
            store,
        }
    }

    /// Save the block unless already stored. Returns whether it was new.
    pub async fn save_block(&self, block: &Block) -> Result<bool> {
        let record = block_record(block)?;
        if self.store.find_block(record.number).await?.is_some() {
            return Ok(false);
        }
        self.store.insert_block(&record).await?;
        Ok(true)
    }

    /// Fill in the hash of the preceding block from `block.previous`, unless
    /// already known.
    pub async fn backfill_previous_hash(&self, block: &Block) -> Result<()> {
        if block.block_number <= 1 || block.previous.is_empty() {
            return Ok(());
        }
        let number = to_i64(block.block_number - 1, "block number")?;
        if let Some(prev) = self.store.find_block(number).await? {
            if prev.block_id.is_empty() {
                self.store.update_block_hash(number, &block.previous).await?;
                tracing::debug!(block = number, hash = %block.previous, "Backfilled block hash");
            }
        }
        Ok(())
    }

    pub async fn save_transaction(&self, tx: &Transaction) -> Result<bool> {
        if self.store.find_transaction(&tx.trxid).await?.is_some() {
            return Ok(false);
        }
        self.store.insert_transaction(&transaction_record(tx)?).await?;
        Ok(true)
    }

    /// Store an operation in its type's wide table and in the generic table.
    pub async fn save_operation(&mut self, op: &OperationRow<'_>) -> Result<()> {
        self.schemas.ensure_schema(op.type_name, op.payload).await?;
        if self.schemas.is_new(op.type_name, op.txid, op.index_in_tx).await? {
            self.schemas.insert(op.type_name, op.payload).await?;
        }

        let id = operation_id(op.block_num, op.txid, op.index_in_tx);
        if self.store.find_operation(&id).await?.is_some() {
            return Ok(());
        }
        let operation_json = serde_json::to_string(op.payload)
            .map_err(|e| AppError::Decode(format!("operation {id}: {e}")))?;
        let record = OperationRecord {
            id,
            txid: op.txid.to_string(),
            tx_block_number: to_i64(op.block_num, "block number")?,
            tx_index_in_block: to_i32(op.tx_index_in_block, "transaction index")?,
            index_in_tx: to_i32(op.index_in_tx, "operation index")?,
            operation_type: i32::try_from(op.type_code)
                .map_err(|_| AppError::Decode(format!("operation type {} out of range", op.type_code)))?,
            operation_type_name: op.type_name.to_string(),
            operation_json,
            addr: op.addr.clone(),
        };
        self.store.insert_operation(&record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hxscan_storage::MemoryStore;
    use serde_json::json;

    #[test]
    fn synthetic_fields_keep_existing_memo() {
        let mut payload = json!({"memo": "hello"}).as_object().cloned().unwrap();
        inject_synthetic_fields(&mut payload, 12, "tx1", 2);

        assert_eq!(payload["block_num"], 12);
        assert_eq!(payload["txid"], "tx1");
        assert_eq!(payload["index_in_tx"], 2);
        assert_eq!(payload["memo"], "hello");
        assert_eq!(payload["guarantee_id"], "");
        assert_eq!(operation_id(12, "tx1", 2), "12@tx1@2");
    }

    #[test]
    fn empty_transactions_have_no_first_type() {
        let tx = Transaction {
            trxid: "tx".into(),
            ..Default::default()
        };
        assert_eq!(transaction_record(&tx).unwrap().first_operation_type, -1);
    }

    #[tokio::test]
    async fn hash_is_learned_from_the_next_block() {
        let store = Arc::new(MemoryStore::new());
        let ops = OperationStore::new(store.clone());
        let first = Block {
            block_number: 1,
            ..Default::default()
        };
        let second = Block {
            block_number: 2,
            previous: "hash-1".into(),
            ..Default::default()
        };

        assert!(ops.save_block(&first).await.unwrap());
        assert!(ops.save_block(&second).await.unwrap());
        assert!(!ops.save_block(&second).await.unwrap());
        ops.backfill_previous_hash(&second).await.unwrap();

        let state = store.snapshot();
        assert_eq!(state.blocks[&1].block_id, "hash-1");
        assert_eq!(state.blocks[&2].block_id, "");
    }
}
