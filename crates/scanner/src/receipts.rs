use std::sync::Arc;

use serde::Serialize;

use hxscan_core::{AppError, Result};
use hxscan_node::operations::has_contract_operation;
use hxscan_node::{NodeSource, OpReceipt, Transaction};
use hxscan_storage::Store;
use hxscan_storage::models::{ContractReceiptRecord, ReceiptEventRecord};

fn json_text<T: Serialize + ?Sized>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string(value).map_err(|e| AppError::Decode(format!("{what}: {e}")))
}

/// Convert a node receipt into its stored row and flattened events.
pub fn receipt_records(receipt: &OpReceipt) -> Result<(ContractReceiptRecord, Vec<ReceiptEventRecord>)> {
    let block_num = i64::try_from(receipt.block_num)
        .map_err(|_| AppError::Decode(format!("receipt block {} out of range", receipt.block_num)))?;
    let op_num = i32::try_from(receipt.op_num)
        .map_err(|_| AppError::Decode(format!("receipt op_num {} out of range", receipt.op_num)))?;

    let record = ContractReceiptRecord {
        trxid: receipt.trxid.clone(),
        block_num,
        op_num,
        api_result: receipt.api_result.clone(),
        exec_succeed: receipt.exec_succeed,
        actual_fee: i64::try_from(receipt.actual_fee)
            .map_err(|_| AppError::Decode(format!("receipt fee {} out of range", receipt.actual_fee)))?,
        invoker: receipt.invoker.clone(),
        contract_registered: receipt.contract_registered.clone(),
        events: json_text(&receipt.events, "receipt events")?,
        contract_withdraw_info: json_text(&receipt.contract_withdraw_info, "contract_withdraw")?,
        contract_balance_changes: json_text(&receipt.contract_balance_changes, "contract_balances")?,
        deposit_to_address_changes: json_text(&receipt.deposit_to_address_changes, "deposit_to_address")?,
        deposit_to_contract_changes: json_text(&receipt.deposit_to_contract_changes, "deposit_contract")?,
        transfer_fees: json_text(&receipt.transfer_fees, "transfer_fees")?,
    };

    let events = receipt
        .events
        .iter()
        .map(|event| {
            Ok(ReceiptEventRecord {
                trxid: receipt.trxid.clone(),
                block_num: i64::try_from(event.block_num)
                    .map_err(|_| AppError::Decode(format!("event block {} out of range", event.block_num)))?,
                op_num: i32::try_from(event.op_num)
                    .map_err(|_| AppError::Decode(format!("event op_num {} out of range", event.op_num)))?,
                caller_addr: event.caller_addr.clone(),
                contract_address: event.contract_address.clone(),
                event_arg: event.event_arg.clone(),
                event_name: event.event_name.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((record, events))
}

/// Fetches and stores the execution receipts of contract operations.
pub struct ReceiptCorrelator {
    node: Arc<dyn NodeSource>,
    store: Arc<dyn Store>,
}

impl ReceiptCorrelator {
    pub fn new(node: Arc<dyn NodeSource>, store: Arc<dyn Store>) -> Self {
        Self { node, store }
    }

    /// Whether any operation of `tx` runs contract code.
    pub fn needs_receipts(&self, tx: &Transaction) -> bool {
        has_contract_operation(tx)
    }

    /// Receipts of `tx`, positionally aligned with its operations.
    ///
    /// Receipts that omit their transaction id or block get the ones of
    /// `tx`.
    pub async fn fetch_receipts(&self, tx: &Transaction) -> Result<Vec<OpReceipt>> {
        let mut receipts = self.node.get_transaction_receipts(&tx.trxid).await?;
        for receipt in &mut receipts {
            if receipt.trxid.is_empty() {
                receipt.trxid = tx.trxid.clone();
            }
            if receipt.block_num == 0 {
                receipt.block_num = tx.block_num;
            }
        }
        if receipts.iter().any(|r| !r.exec_succeed) {
            tracing::debug!(txid = %tx.trxid, "Transaction has failed contract operations");
        }
        Ok(receipts)
    }

    /// Store every receipt not stored yet, with its events. Returns how many
    /// were written.
    pub async fn persist(&self, receipts: &[OpReceipt]) -> Result<usize> {
        let mut written = 0;
        for receipt in receipts {
            let (record, events) = receipt_records(receipt)?;
            if self
                .store
                .contract_receipt_exists(&record.trxid, record.op_num)
                .await?
            {
                continue;
            }
            self.store.insert_contract_receipt(&record, &events).await?;
            written += 1;
        }
        Ok(written)
    }
}

/// The receipt of the operation at `index`, if the node reported one.
pub fn receipt_at(receipts: &[OpReceipt], index: usize) -> Option<&OpReceipt> {
    receipts.get(index)
}
