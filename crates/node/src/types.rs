use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use hxscan_core::AppError;

// ─── Block ──────────────────────────────────────────────────────────────────

/// A block as returned by `get_block`, completed with the transaction ids
/// reported by `fetch_block_transactions`.
///
/// `previous` is the id (hash) of the preceding block. A block never reports
/// its own id, which is why the stored hash of block N is only learned from
/// block N+1.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Block {
    pub block_number: u64,
    pub previous: String,
    pub timestamp: String,
    pub miner: String,
    pub miner_signature: String,
    pub next_secret_hash: String,
    pub previous_secret: String,
    pub transaction_merkle_root: String,
    pub trxfee: u64,
    pub transactions: Vec<Transaction>,
    pub transaction_ids: Vec<String>,
    pub extensions: Vec<Value>,
}

// ─── Transaction ────────────────────────────────────────────────────────────

/// A signed transaction inside a block.
///
/// Every entry of `operations` is a `[type_code, payload]` pair; decoding is
/// left to [`crate::operations::decode_operation`] so that a malformed pair
/// surfaces at the point where it is processed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Transaction {
    pub block_num: u64,
    pub trxid: String,
    pub contract_id: String,
    pub index_in_block: usize,
    pub expiration: String,
    pub extensions: Vec<Value>,
    pub operation_results: Vec<Value>,
    pub operations: Vec<Value>,
    pub ref_block_num: u64,
    pub ref_block_prefix: u64,
    pub signatures: Vec<String>,
}

/// One row of the `fetch_block_transactions` reply.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BlockTransactionInfo {
    pub block_num: u64,
    pub trxid: String,
    pub contract_id: String,
}

// ─── Contract receipts ──────────────────────────────────────────────────────

/// An event emitted by a contract during one operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiptEvent {
    pub block_num: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub caller_addr: String,
    pub contract_address: String,
    #[serde(deserialize_with = "null_as_default")]
    pub event_arg: String,
    pub event_name: String,
    pub op_num: usize,
    #[serde(rename = "trx_id")]
    pub trxid: String,
}

/// Execution outcome of a contract-invoking operation
/// (`get_contract_invoke_object`).
///
/// Field renames follow the node's wire names, typos included.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OpReceipt {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(rename = "trx_id")]
    pub trxid: String,
    pub block_num: u64,
    pub op_num: usize,
    #[serde(deserialize_with = "null_as_default")]
    pub api_result: String,
    pub events: Vec<ReceiptEvent>,
    pub exec_succeed: bool,
    #[serde(rename = "acctual_fee")]
    pub actual_fee: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub invoker: String,
    #[serde(rename = "contract_registed", deserialize_with = "null_as_default")]
    pub contract_registered: String,
    #[serde(rename = "contract_withdraw")]
    pub contract_withdraw_info: Vec<Value>,
    #[serde(rename = "contract_balances")]
    pub contract_balance_changes: Vec<Value>,
    #[serde(rename = "deposit_to_address")]
    pub deposit_to_address_changes: Vec<Value>,
    #[serde(rename = "deposit_contract")]
    pub deposit_to_contract_changes: Vec<Value>,
    pub transfer_fees: Vec<Value>,
}

// ─── Assets & balances ──────────────────────────────────────────────────────

/// A native chain asset (`list_assets`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(rename = "id")]
    pub asset_id: String,
    pub symbol: String,
    pub precision: u32,
}

/// One entry of the `get_addr_balances` reply. The amount is either a bare
/// number or a decimal string depending on its magnitude.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetAmount {
    pub amount: Value,
    pub asset_id: String,
}

/// Collapse a `get_addr_balances` reply into `asset_id -> raw amount`.
pub fn balances_by_asset(entries: &[AssetAmount]) -> Result<HashMap<String, i128>, AppError> {
    entries
        .iter()
        .map(|entry| {
            amount_from_json(&entry.amount)
                .map(|amount| (entry.asset_id.clone(), amount))
                .ok_or_else(|| {
                    AppError::Decode(format!(
                        "invalid balance amount {} for asset {}",
                        entry.amount, entry.asset_id
                    ))
                })
        })
        .collect()
}

// ─── Value helpers ──────────────────────────────────────────────────────────

/// Read an integer amount that may be encoded as a JSON number or a string.
pub fn amount_from_json(value: &Value) -> Option<i128> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read-only contract calls return their result as a string that is itself
/// JSON-encoded when the contract returns a string.
pub fn unquote_result(raw: &str) -> String {
    if raw.len() > 1 && raw.starts_with('"') {
        if let Ok(inner) = serde_json::from_str::<String>(raw) {
            return inner;
        }
    }
    raw.to_string()
}

/// Parse an integer result of a read-only contract call, quoted or not.
pub fn int_result(raw: &str) -> Result<i128, AppError> {
    let text = unquote_result(raw.trim());
    text.trim()
        .parse()
        .map_err(|_| AppError::Decode(format!("expected integer contract result, got {raw:?}")))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn receipt_uses_node_field_names() {
        let receipt: OpReceipt = serde_json::from_value(json!({
            "trx_id": "abc",
            "block_num": 7,
            "op_num": 1,
            "api_result": null,
            "exec_succeed": true,
            "acctual_fee": 120,
            "invoker": "HXinvoker",
            "contract_registed": "",
            "events": [{
                "trx_id": "abc",
                "block_num": 7,
                "op_num": 1,
                "caller_addr": "HXcaller",
                "contract_address": "HXCtoken",
                "event_name": "Transfer",
                "event_arg": "{\"from\":\"A\",\"to\":\"B\",\"amount\":5}"
            }],
            "deposit_to_address": [[["HXaddr", "1.3.0"], 10]]
        }))
        .unwrap();

        assert_eq!(receipt.trxid, "abc");
        assert_eq!(receipt.actual_fee, 120);
        assert_eq!(receipt.api_result, "");
        assert_eq!(receipt.events.len(), 1);
        assert_eq!(receipt.events[0].contract_address, "HXCtoken");
        assert_eq!(receipt.deposit_to_address_changes.len(), 1);
        assert!(receipt.contract_withdraw_info.is_empty());
    }

    #[test]
    fn amounts_accept_numbers_and_strings() {
        assert_eq!(amount_from_json(&json!(500)), Some(500));
        assert_eq!(amount_from_json(&json!("12345678901234567890")), Some(12345678901234567890));
        assert_eq!(amount_from_json(&json!({"amount": 1})), None);
    }

    #[test]
    fn contract_results_are_unquoted() {
        assert_eq!(unquote_result("\"Test Token\""), "Test Token");
        assert_eq!(unquote_result("TT"), "TT");
        assert_eq!(int_result("\"1000\"").unwrap(), 1000);
        assert_eq!(int_result("42").unwrap(), 42);
        assert!(int_result("\"abc\"").is_err());
    }

    #[test]
    fn balances_are_keyed_by_asset() {
        let entries: Vec<AssetAmount> = serde_json::from_value(json!([
            {"amount": 100, "asset_id": "1.3.0"},
            {"amount": "250", "asset_id": "1.3.1"}
        ]))
        .unwrap();
        let balances = balances_by_asset(&entries).unwrap();
        assert_eq!(balances["1.3.0"], 100);
        assert_eq!(balances["1.3.1"], 250);
    }
}
