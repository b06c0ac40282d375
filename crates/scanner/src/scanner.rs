use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use hxscan_core::{AppError, Result, Settings};
use hxscan_node::{Block, NodeSource, Transaction, decode_operation, operation_name};
use hxscan_storage::Store;

use crate::address::primary_address;
use crate::checkpoint::Checkpoint;
use crate::persistence::{OperationRow, OperationStore, inject_synthetic_fields};
use crate::plugin::{OperationContext, PluginPipeline};
use crate::receipts::{ReceiptCorrelator, receipt_at};

/// Tuning knobs of the scan loop.
#[derive(Debug, Clone)]
pub struct ScannerOptions {
    /// Blocks between checkpoint writes.
    pub checkpoint_interval: u64,
    /// Pause once the chain head is reached.
    pub head_backoff: Duration,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self {
            checkpoint_interval: 100,
            head_backoff: Duration::from_secs(5),
        }
    }
}

impl From<&Settings> for ScannerOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            checkpoint_interval: settings.checkpoint_interval,
            head_backoff: Duration::from_secs(settings.head_backoff_secs),
        }
    }
}

/// A node error raised after cancellation comes from shutdown closing the
/// connection, not from the node itself.
fn interrupted(err: &AppError, cancel: &CancellationToken) -> bool {
    cancel.is_cancelled() && matches!(err, AppError::Rpc(_))
}

/// Positional facts of the transactions are taken from the block itself.
fn normalize(block: &mut Block) {
    let number = block.block_number;
    for (index, tx) in block.transactions.iter_mut().enumerate() {
        tx.block_num = number;
        tx.index_in_block = index;
        if tx.trxid.is_empty() {
            if let Some(id) = block.transaction_ids.get(index) {
                tx.trxid = id.clone();
            }
        }
    }
}

/// The sequential scan loop: fetch, persist, correlate receipts, dispatch to
/// plugins, checkpoint.
pub struct Scanner {
    node: Arc<dyn NodeSource>,
    checkpoint: Checkpoint,
    operations: OperationStore,
    receipts: ReceiptCorrelator,
    plugins: PluginPipeline,
    options: ScannerOptions,
}

impl Scanner {
    pub fn new(
        node: Arc<dyn NodeSource>,
        store: Arc<dyn Store>,
        plugins: PluginPipeline,
        options: ScannerOptions,
    ) -> Self {
        Self {
            checkpoint: Checkpoint::new(store.clone()),
            operations: OperationStore::new(store.clone()),
            receipts: ReceiptCorrelator::new(node.clone(), store),
            node,
            plugins,
            options,
        }
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Scan from `start` until cancelled or until an error stops the loop.
    ///
    /// Returns the last fully processed block. Cancellation is honoured
    /// between blocks, never inside one; a node error raised because
    /// shutdown closed the connection mid-block ends the run cleanly before
    /// that block. Any other error is fatal: the checkpoint stays at or
    /// behind the failed block and a restart resumes from there.
    pub async fn run(&mut self, start: u64, cancel: CancellationToken) -> Result<u64> {
        let mut cursor = start;
        tracing::info!(from = start, plugins = ?self.plugins.names(), "Starting scan loop");

        loop {
            if cancel.is_cancelled() {
                let done = cursor.saturating_sub(1);
                self.checkpoint.save(done).await?;
                tracing::info!(block = done, "Scan loop stopped");
                return Ok(done);
            }

            let fetched = match self.node.get_block(cursor).await {
                Ok(fetched) => fetched,
                Err(e) if interrupted(&e, &cancel) => return self.stop(cursor, &e).await,
                Err(e) => {
                    tracing::error!(block = cursor, error = %e, "Failed to fetch block");
                    return Err(e);
                }
            };

            let Some(mut block) = fetched else {
                let done = cursor.saturating_sub(1);
                self.checkpoint.save(done).await?;
                tracing::debug!(block = done, "Chain head reached, waiting");
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.options.head_backoff) => {}
                }
                continue;
            };

            if block.block_number != cursor {
                tracing::warn!(requested = cursor, got = block.block_number, "Node returned another block number");
                block.block_number = cursor;
            }
            normalize(&mut block);

            match self.process_block(&block).await {
                Ok(()) => {}
                Err(e) if interrupted(&e, &cancel) => return self.stop(cursor, &e).await,
                Err(e) => {
                    tracing::error!(block = cursor, error = %e, "Block processing failed, stopping");
                    return Err(e);
                }
            }

            let interval = self.options.checkpoint_interval;
            if interval > 0 && cursor % interval == 0 {
                self.checkpoint.save(cursor).await?;
                tracing::info!(block = cursor, "Scanned block");
            }
            cursor += 1;
            tokio::task::yield_now().await;
        }
    }

    /// Shutdown closed the node under block `cursor`: the block is left
    /// for the next run and the checkpoint stays before it.
    async fn stop(&self, cursor: u64, cause: &AppError) -> Result<u64> {
        let done = cursor.saturating_sub(1);
        self.checkpoint.save(done).await?;
        tracing::info!(block = done, cause = %cause, "Scan loop interrupted by shutdown");
        Ok(done)
    }

    /// Persist one block with everything in it and feed its operations to
    /// the plugins.
    pub async fn process_block(&mut self, block: &Block) -> Result<()> {
        self.operations.save_block(block).await?;
        self.operations.backfill_previous_hash(block).await?;

        for tx in &block.transactions {
            self.process_transaction(block, tx).await?;
        }
        tracing::debug!(block = block.block_number, txs = block.transactions.len(), "Block processed");
        Ok(())
    }

    async fn process_transaction(&mut self, block: &Block, tx: &Transaction) -> Result<()> {
        let receipts = if self.receipts.needs_receipts(tx) {
            self.receipts.fetch_receipts(tx).await?
        } else {
            Vec::new()
        };

        self.operations.save_transaction(tx).await?;

        for (op_index, raw) in tx.operations.iter().enumerate() {
            let (type_code, mut payload) = decode_operation(raw)?;
            inject_synthetic_fields(&mut payload, block.block_number, &tx.trxid, op_index);
            let type_name = operation_name(type_code);

            self.operations
                .save_operation(&OperationRow {
                    block_num: block.block_number,
                    txid: &tx.trxid,
                    tx_index_in_block: tx.index_in_block,
                    index_in_tx: op_index,
                    type_code,
                    type_name: &type_name,
                    payload: &payload,
                    addr: primary_address(&payload),
                })
                .await?;

            let ctx = OperationContext {
                block,
                txid: &tx.trxid,
                op_index,
                type_code,
                type_name: &type_name,
                payload: &payload,
                receipt: receipt_at(&receipts, op_index),
            };
            self.plugins.apply(&ctx).await?;
        }

        let stored = self.receipts.persist(&receipts).await?;
        if stored > 0 {
            tracing::debug!(txid = %tx.trxid, receipts = stored, "Stored contract receipts");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::default_pipeline;
    use async_trait::async_trait;
    use hxscan_node::{Asset, MockNode, OpReceipt, ReceiptEvent};
    use std::collections::HashMap;
    use hxscan_storage::models::{SqlValue, TokenContract};
    use hxscan_storage::{MemoryStore, Store};
    use serde_json::{Value, json};

    fn tx(id: &str, operations: Vec<Value>) -> Transaction {
        Transaction {
            trxid: id.into(),
            operations,
            ..Default::default()
        }
    }

    fn block(number: u64, transactions: Vec<Transaction>) -> Block {
        Block {
            block_number: number,
            previous: format!("hash-{}", number.saturating_sub(1)),
            timestamp: "2019-03-04T05:06:07".into(),
            transaction_ids: transactions.iter().map(|t| t.trxid.clone()).collect(),
            transactions,
            ..Default::default()
        }
    }

    fn account_op(name: &str, payer: &str) -> Value {
        json!([5, {"name": name, "payer": payer, "fee": {"amount": 1, "asset_id": "1.3.0"}}])
    }

    fn scanner(node: &Arc<MockNode>, store: &Arc<MemoryStore>) -> Scanner {
        scanner_every(node.clone(), store, 100)
    }

    fn scanner_every(node: Arc<dyn NodeSource>, store: &Arc<MemoryStore>, checkpoint_interval: u64) -> Scanner {
        let pipeline = default_pipeline(node.clone(), store.clone(), "pk");
        let options = ScannerOptions {
            checkpoint_interval,
            head_backoff: Duration::from_millis(10),
        };
        Scanner::new(node, store.clone(), pipeline, options)
    }

    /// Node whose connection is closed by shutdown while `closes_at` is
    /// being fetched.
    struct ClosedOnShutdown {
        inner: MockNode,
        cancel: CancellationToken,
        closes_at: u64,
    }

    #[async_trait]
    impl NodeSource for ClosedOnShutdown {
        async fn get_block(&self, number: u64) -> Result<Option<Block>> {
            if number == self.closes_at {
                self.cancel.cancel();
                return Err(AppError::Rpc("get_block: node connection closed".into()));
            }
            self.inner.get_block(number).await
        }

        async fn get_transaction_receipts(&self, txid: &str) -> Result<Vec<OpReceipt>> {
            self.inner.get_transaction_receipts(txid).await
        }

        async fn invoke_read_only(&self, caller: &str, contract: &str, method: &str, arg: &str) -> Result<String> {
            self.inner.invoke_read_only(caller, contract, method, arg).await
        }

        async fn list_assets(&self, offset: u32, limit: u32) -> Result<Vec<Asset>> {
            self.inner.list_assets(offset, limit).await
        }

        async fn get_address_balances(&self, addr: &str) -> Result<HashMap<String, i128>> {
            self.inner.get_address_balances(addr).await
        }
    }

    async fn scan_to_head(node: &Arc<MockNode>, store: &Arc<MemoryStore>, start: u64) -> Result<u64> {
        let cancel = CancellationToken::new();
        node.cancel_at_head(cancel.clone());
        scanner(node, store).run(start, cancel).await
    }

    fn token(contract: &str, precision: i32) -> TokenContract {
        TokenContract {
            contract_id: contract.into(),
            block_num: 1,
            block_time: "2019-01-01T00:00:00".into(),
            txid: "reg".into(),
            contract_type: "common".into(),
            owner_pubkey: String::new(),
            owner_addr: String::new(),
            register_time: String::new(),
            inherit_from: String::new(),
            gas_price: 0,
            gas_limit: 0,
            state: Some("common".into()),
            total_supply: None,
            precision: Some(precision),
            token_symbol: None,
            token_name: None,
            logo: None,
            url: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn checkpoint_tracks_last_processed_block() {
        let node = Arc::new(MockNode::new());
        let store = Arc::new(MemoryStore::new());
        for n in 1..=3 {
            node.add_block(block(n, vec![tx(&format!("tx{n}"), vec![account_op(&format!("user{n}"), &format!("HX{n}"))])]));
        }

        assert_eq!(scan_to_head(&node, &store, 1).await.unwrap(), 3);
        assert_eq!(node.block_requests(), vec![1, 2, 3, 4]);

        let checkpoint = Checkpoint::new(store.clone());
        assert_eq!(checkpoint.load().await.unwrap(), 3);
        assert_eq!(checkpoint.start_block(None).await.unwrap(), 4);

        let state = store.snapshot();
        assert_eq!(state.blocks.len(), 3);
        assert_eq!(state.blocks[&1].block_id, "hash-1");
        assert_eq!(state.blocks[&2].block_id, "hash-2");
        assert_eq!(state.blocks[&3].block_id, "");
        assert_eq!(state.accounts.len(), 3);
    }

    #[tokio::test]
    async fn replaying_blocks_changes_nothing() {
        let node = Arc::new(MockNode::new());
        let store = Arc::new(MemoryStore::new());
        node.add_block(block(1, vec![tx("tx1", vec![account_op("alice", "HXa"), json!([79, {"caller_addr": "HXa"}])])]));
        node.add_block(block(2, vec![tx("tx2", vec![json!([0, {"from_addr": "HXa", "to_addr": "HXb"}])])]));
        node.set_receipts(
            "tx1",
            vec![
                OpReceipt { op_num: 0, exec_succeed: true, ..Default::default() },
                OpReceipt { op_num: 1, exec_succeed: true, ..Default::default() },
            ],
        );

        scan_to_head(&node, &store, 1).await.unwrap();
        let first = store.snapshot();
        scan_to_head(&node, &store, 1).await.unwrap();
        let second = store.snapshot();

        assert_eq!(first.blocks, second.blocks);
        assert_eq!(first.transactions, second.transactions);
        assert_eq!(first.operations, second.operations);
        assert_eq!(first.receipts, second.receipts);
        assert_eq!(first.receipt_events, second.receipt_events);
        assert_eq!(first.accounts, second.accounts);
        for (name, table) in &first.tables {
            assert_eq!(table.rows, second.tables[name].rows, "{name}");
        }
        assert_eq!(second.operations.len(), 3);
        assert_eq!(second.receipts.len(), 2);
        assert_eq!(second.transactions[0].first_operation_type, 5);
    }

    #[tokio::test]
    async fn wide_tables_keep_first_schema() {
        let node = Arc::new(MockNode::new());
        let store = Arc::new(MemoryStore::new());
        node.add_block(block(
            1,
            vec![tx(
                "tx1",
                vec![
                    json!([0, {"from_addr": "HXa", "to_addr": "HXb"}]),
                    json!([0, {"from_addr": "HXa", "to_addr": "HXc", "extra": "dropped"}]),
                ],
            )],
        ));

        scan_to_head(&node, &store, 1).await.unwrap();

        let state = store.snapshot();
        let table = &state.tables["op_transfer"];
        assert_eq!(table.rows.len(), 2);
        let columns: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        for expected in ["block_num", "txid", "index_in_tx", "memo", "guarantee_id", "from_addr", "to_addr"] {
            assert!(columns.contains(&expected), "missing {expected}");
        }
        assert!(!columns.contains(&"extra"));
        assert_eq!(
            table.column_values("index_in_tx"),
            vec![Some(SqlValue::BigInt(Some(0))), Some(SqlValue::BigInt(Some(1)))]
        );
        assert_eq!(state.operations[1].id, "1@tx1@1");
        assert_eq!(state.operations[1].addr, "HXa");
        assert!(state.operations[1].operation_json.contains("\"extra\":\"dropped\""));
    }

    #[tokio::test]
    async fn token_transfer_end_to_end() {
        let node = Arc::new(MockNode::new());
        let store = Arc::new(MemoryStore::new());
        store.insert_token_contract(&token("HXCtoken", 2)).await.unwrap();
        node.add_block(block(
            100,
            vec![tx(
                "tx100",
                vec![json!([78, {
                    "caller_addr": "HXcaller",
                    "contract_id": "HXCtoken",
                    "contract_api": "transfer",
                    "contract_arg": "B,500",
                    "fee": {"amount": 10, "asset_id": "1.3.0"}
                }])],
            )],
        ));
        node.set_receipts(
            "tx100",
            vec![OpReceipt {
                op_num: 0,
                exec_succeed: true,
                events: vec![ReceiptEvent {
                    contract_address: "HXCtoken".into(),
                    event_name: "Transfer".into(),
                    event_arg: r#"{"from":"A","to":"B","amount":500}"#.into(),
                    caller_addr: "HXcaller".into(),
                    block_num: 100,
                    ..Default::default()
                }],
                ..Default::default()
            }],
        );
        node.set_invoke_result("HXCtoken", "balanceOf", "A", "1000");
        node.set_invoke_result("HXCtoken", "balanceOf", "B", "1500");

        assert_eq!(scan_to_head(&node, &store, 100).await.unwrap(), 100);

        let state = store.snapshot();
        assert_eq!(state.transfer_history.len(), 1);
        assert_eq!(state.transfer_history[0].amount, "500");
        assert_eq!(state.transfer_history[0].txid, "tx100");

        let balance = |owner: &str| {
            state
                .token_balances
                .iter()
                .find(|b| b.contract_addr == "HXCtoken" && b.owner_addr == owner)
                .map(|b| b.amount.clone())
        };
        assert_eq!(balance("A").as_deref(), Some("10.00"));
        assert_eq!(balance("B").as_deref(), Some("15.00"));

        assert_eq!(state.receipts.len(), 1);
        assert_eq!(state.receipts[0].trxid, "tx100");
        assert_eq!(state.receipt_events.len(), 1);
        assert_eq!(state.operations[0].addr, "HXcaller");
        assert_eq!(state.operations[0].operation_type_name, "contract_invoke_operation");
        assert!(state.tables.contains_key("op_contract_invoke"));
    }

    #[tokio::test]
    async fn waits_at_head_without_failing() {
        let node = Arc::new(MockNode::new());
        let store = Arc::new(MemoryStore::new());
        node.add_block(block(1, Vec::new()));

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            stopper.cancel();
        });

        let done = scanner(&node, &store).run(1, cancel).await.unwrap();

        assert_eq!(done, 1);
        assert!(node.block_requests().iter().filter(|n| **n == 2).count() >= 2);
        assert_eq!(Checkpoint::new(store.clone()).load().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn transport_errors_stop_the_loop() {
        let node = Arc::new(MockNode::new());
        let store = Arc::new(MemoryStore::new());
        node.add_block(block(1, Vec::new()));
        node.add_block(block(2, Vec::new()));
        node.fail_block(2);

        let err = scan_to_head(&node, &store, 1).await.unwrap_err();

        assert!(matches!(err, AppError::Rpc(_)));
        assert_eq!(store.snapshot().blocks.len(), 1);
        assert_eq!(Checkpoint::new(store.clone()).load().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failure_resumes_after_last_periodic_checkpoint() {
        let node = Arc::new(MockNode::new());
        let store = Arc::new(MemoryStore::new());
        for n in 1..=6 {
            node.add_block(block(n, Vec::new()));
        }
        node.fail_block(5);

        let err = scanner_every(node.clone(), &store, 2)
            .run(1, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Rpc(_)));
        assert_eq!(store.snapshot().blocks.len(), 4);
        let checkpoint = Checkpoint::new(store.clone());
        assert_eq!(checkpoint.load().await.unwrap(), 4);
        assert_eq!(checkpoint.start_block(None).await.unwrap(), 5);
        assert_eq!(store.snapshot().config_writes, 2);
    }

    #[tokio::test]
    async fn unchanged_checkpoint_is_not_rewritten() {
        let node = Arc::new(MockNode::new());
        let store = Arc::new(MemoryStore::new());
        for n in 1..=4 {
            node.add_block(block(n, Vec::new()));
        }
        let cancel = CancellationToken::new();
        node.cancel_at_head(cancel.clone());

        let done = scanner_every(node.clone(), &store, 2).run(1, cancel).await.unwrap();

        assert_eq!(done, 4);
        assert_eq!(node.block_requests(), vec![1, 2, 3, 4, 5]);
        // Blocks 2 and 4; the head and shutdown saves repeat 4.
        assert_eq!(store.snapshot().config_writes, 2);
        assert_eq!(Checkpoint::new(store.clone()).load().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn shutdown_closing_the_node_is_not_an_error() {
        let inner = MockNode::new();
        for n in 1..=3 {
            inner.add_block(block(n, Vec::new()));
        }
        let cancel = CancellationToken::new();
        let node = Arc::new(ClosedOnShutdown {
            inner,
            cancel: cancel.clone(),
            closes_at: 3,
        });
        let store = Arc::new(MemoryStore::new());

        let done = scanner_every(node, &store, 100).run(1, cancel).await.unwrap();

        assert_eq!(done, 2);
        assert_eq!(store.snapshot().blocks.len(), 2);
        assert_eq!(Checkpoint::new(store.clone()).start_block(None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn persistence_errors_stop_the_loop() {
        let node = Arc::new(MockNode::new());
        let store = Arc::new(MemoryStore::new());
        store.fail_inserts_into("op_transfer");
        node.add_block(block(1, vec![tx("tx1", vec![json!([0, {"from_addr": "HXa"}])])]));
        node.add_block(block(2, Vec::new()));

        let err = scan_to_head(&node, &store, 1).await.unwrap_err();

        assert!(err.is_persistence());
        assert_eq!(node.block_requests(), vec![1]);
    }

    #[tokio::test]
    async fn malformed_operations_are_fatal() {
        let node = Arc::new(MockNode::new());
        let store = Arc::new(MemoryStore::new());
        node.add_block(block(1, vec![tx("tx1", vec![json!([0])])]));

        let err = scan_to_head(&node, &store, 1).await.unwrap_err();

        assert!(matches!(err, AppError::Decode(_)));
    }
}
