use std::borrow::Cow;

use serde_json::{Map, Value};

use hxscan_core::AppError;

use crate::types::Transaction;

/// Operation type codes that run contract code and therefore have receipts.
pub const CONTRACT_OP_TYPES: std::ops::RangeInclusive<i64> = 76..=81;

// ─── Operation catalogue ────────────────────────────────────────────────────

const OPERATION_NAMES: &[(i64, &str)] = &[
    (0, "transfer_operation"),
    (1, "limit_order_create_operation"),
    (2, "limit_order_cancel_operation"),
    (3, "call_order_update_operation"),
    (4, "fill_order_operation"),
    (5, "account_create_operation"),
    (6, "account_update_operation"),
    (7, "account_whitelist_operation"),
    (8, "account_upgrade_operation"),
    (9, "account_transfer_operation"),
    (10, "asset_create_operation"),
    (11, "asset_update_operation"),
    (12, "asset_update_bitasset_operation"),
    (13, "asset_update_feed_producers_operation"),
    (14, "asset_issue_operation"),
    (15, "asset_reserve_operation"),
    (16, "asset_fund_fee_pool_operation"),
    (17, "asset_settle_operation"),
    (18, "asset_global_settle_operation"),
    (19, "asset_publish_feed_operation"),
    (20, "miner_create_operation"),
    (21, "miner_update_operation"),
    (22, "proposal_create_operation"),
    (23, "proposal_update_operation"),
    (24, "proposal_delete_operation"),
    (25, "withdraw_permission_create_operation"),
    (26, "withdraw_permission_update_operation"),
    (27, "withdraw_permission_claim_operation"),
    (28, "withdraw_permission_delete_operation"),
    (29, "committee_member_create_operation"),
    (30, "committee_member_update_operation"),
    (31, "committee_member_update_global_parameters_operation"),
    (32, "vesting_balance_create_operation"),
    (33, "vesting_balance_withdraw_operation"),
    (34, "worker_create_operation"),
    (35, "custom_operation"),
    (36, "assert_operation"),
    (37, "balance_claim_operation"),
    (38, "override_transfer_operation"),
    (39, "transfer_to_blind_operation"),
    (40, "blind_transfer_operation"),
    (41, "transfer_from_blind_operation"),
    (42, "asset_settle_cancel_operation"),
    (43, "asset_claim_fees_operation"),
    (44, "fba_distribute_operation"),
    (76, "contract_register_operation"),
    (77, "native_contract_register_operation"),
    (78, "contract_invoke_operation"),
    (79, "storage_operation"),
    (80, "transfer_contract_operation"),
    (81, "contract_upgrade_operation"),
];

/// Resolve the human-readable name of an operation type code.
///
/// Codes missing from the catalogue get a stable synthetic name so that their
/// payloads still land in a dedicated wide table.
pub fn operation_name(code: i64) -> Cow<'static, str> {
    OPERATION_NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| Cow::Borrowed(*name))
        .unwrap_or_else(|| Cow::Owned(format!("unknown_operation_{code}")))
}

pub fn is_contract_op_type(code: i64) -> bool {
    CONTRACT_OP_TYPES.contains(&code)
}

// ─── Decoding ───────────────────────────────────────────────────────────────

/// Split a raw `[type_code, payload]` pair.
pub fn decode_operation(raw: &Value) -> Result<(i64, Map<String, Value>), AppError> {
    let pair = raw
        .as_array()
        .ok_or_else(|| AppError::Decode(format!("operation is not a pair: {raw}")))?;
    if pair.len() != 2 {
        return Err(AppError::Decode(format!(
            "invalid operation pair size (require 2 and got {})",
            pair.len()
        )));
    }
    let code = pair[0]
        .as_i64()
        .ok_or_else(|| AppError::Decode(format!("invalid operation type {}", pair[0])))?;
    let payload = pair[1]
        .as_object()
        .cloned()
        .ok_or_else(|| AppError::Decode(format!("invalid operation payload for type {code}")))?;
    Ok((code, payload))
}

/// Type code of the first operation, or `None` for an empty (or malformed)
/// operation list.
pub fn first_operation_type(tx: &Transaction) -> Option<i64> {
    tx.operations
        .first()
        .and_then(|op| op.as_array())
        .and_then(|pair| pair.first())
        .and_then(Value::as_i64)
}

/// Whether any operation of the transaction invokes contract code.
///
/// Malformed pairs are ignored here; they are rejected when the operation
/// itself is decoded.
pub fn has_contract_operation(tx: &Transaction) -> bool {
    tx.operations.iter().any(|op| {
        op.as_array()
            .filter(|pair| pair.len() >= 2)
            .and_then(|pair| pair[0].as_i64())
            .is_some_and(is_contract_op_type)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn names_known_and_unknown_codes() {
        assert_eq!(operation_name(0), "transfer_operation");
        assert_eq!(operation_name(76), "contract_register_operation");
        assert_eq!(operation_name(999), "unknown_operation_999");
    }

    #[test]
    fn contract_range_is_inclusive() {
        assert!(!is_contract_op_type(75));
        assert!(is_contract_op_type(76));
        assert!(is_contract_op_type(81));
        assert!(!is_contract_op_type(82));
    }

    #[test]
    fn decodes_pairs_and_rejects_malformed_ones() {
        let (code, payload) = decode_operation(&json!([0, {"from_addr": "HXa"}])).unwrap();
        assert_eq!(code, 0);
        assert_eq!(payload["from_addr"], "HXa");

        assert!(decode_operation(&json!([0])).is_err());
        assert!(decode_operation(&json!(["zero", {}])).is_err());
        assert!(decode_operation(&json!([0, "payload"])).is_err());
    }

    #[test]
    fn detects_contract_operations_in_transaction() {
        let mut tx = Transaction {
            operations: vec![json!([0, {}]), json!([5, {}])],
            ..Default::default()
        };
        assert!(!has_contract_operation(&tx));
        assert_eq!(first_operation_type(&tx), Some(0));

        tx.operations.push(json!([79, {}]));
        assert!(has_contract_operation(&tx));

        assert_eq!(first_operation_type(&Transaction::default()), None);
    }
}
