use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use hxscan_core::{AppError, Result};
use hxscan_node::NodeSource;
use hxscan_storage::Store;

use super::balance::BalanceRefresher;
use crate::address::first_string;
use crate::plugin::{OperationContext, ScanPlugin};

/// Address properties of operations that may move funds, in priority order.
pub const AMOUNT_ADDRESS_PROPS: [&str; 4] = ["addr", "caller_addr", "lock_balance_addr", "foreclose_addr"];

/// Asset properties paired with [`AMOUNT_ADDRESS_PROPS`], in priority order.
pub const AMOUNT_ASSET_PROPS: [&str; 3] = ["asset_id", "lock_asset_id", "foreclose_asset_id"];

fn nested_asset_id(payload: &Map<String, Value>) -> Option<&str> {
    payload
        .get("amount")
        .and_then(Value::as_object)
        .and_then(|amount| amount.get("asset_id"))
        .and_then(Value::as_str)
}

/// The address/asset pair an operation may have changed the balance of.
pub fn amount_bearing_pair(payload: &Map<String, Value>) -> Option<(&str, &str)> {
    let addr = first_string(payload, &AMOUNT_ADDRESS_PROPS).filter(|a| !a.is_empty())?;
    let asset = first_string(payload, &AMOUNT_ASSET_PROPS)
        .filter(|a| !a.is_empty())
        .or_else(|| nested_asset_id(payload))?;
    Some((addr, asset))
}

/// Refreshes both sides of a native `transfer_operation`.
pub struct TransferBalanceUpdater {
    balances: BalanceRefresher,
}

impl TransferBalanceUpdater {
    pub fn new(node: Arc<dyn NodeSource>, store: Arc<dyn Store>) -> Self {
        Self {
            balances: BalanceRefresher::new(node, store),
        }
    }
}

#[async_trait]
impl ScanPlugin for TransferBalanceUpdater {
    fn name(&self) -> &'static str {
        "TransferBalanceUpdater"
    }

    async fn apply(&mut self, ctx: &OperationContext<'_>) -> Result<()> {
        if ctx.type_name != "transfer_operation" {
            return Ok(());
        }
        let from = first_string(ctx.payload, &["from_addr"])
            .ok_or_else(|| AppError::Decode("invalid from_addr in transfer op".into()))?;
        let to = first_string(ctx.payload, &["to_addr"])
            .ok_or_else(|| AppError::Decode("invalid to_addr in transfer op".into()))?;
        let asset = nested_asset_id(ctx.payload)
            .ok_or_else(|| AppError::Decode("invalid amount type in transfer op".into()))?;

        self.balances.refresh(from, asset).await?;
        if to != from {
            self.balances.refresh(to, asset).await?;
        }
        Ok(())
    }
}

/// Refreshes the balance of any operation carrying a recognizable
/// address/asset pair.
pub struct AmountBearingBalanceUpdater {
    balances: BalanceRefresher,
}

impl AmountBearingBalanceUpdater {
    pub fn new(node: Arc<dyn NodeSource>, store: Arc<dyn Store>) -> Self {
        Self {
            balances: BalanceRefresher::new(node, store),
        }
    }
}

#[async_trait]
impl ScanPlugin for AmountBearingBalanceUpdater {
    fn name(&self) -> &'static str {
        "AmountBearingBalanceUpdater"
    }

    async fn apply(&mut self, ctx: &OperationContext<'_>) -> Result<()> {
        match amount_bearing_pair(ctx.payload) {
            Some((addr, asset)) => self.balances.refresh(addr, asset).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hxscan_node::{Asset, Block, MockNode};
    use hxscan_storage::MemoryStore;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn pair_probing_follows_priority() {
        let op = payload(json!({"caller_addr": "HXc", "addr": "HXa", "lock_asset_id": "1.3.2", "asset_id": "1.3.1"}));
        assert_eq!(amount_bearing_pair(&op), Some(("HXa", "1.3.1")));

        let op = payload(json!({"lock_balance_addr": "HXl", "amount": {"amount": 1, "asset_id": "1.3.0"}}));
        assert_eq!(amount_bearing_pair(&op), Some(("HXl", "1.3.0")));

        let op = payload(json!({"addr": "", "asset_id": "1.3.0"}));
        assert_eq!(amount_bearing_pair(&op), None);

        let op = payload(json!({"addr": "HXa", "fee": {"amount": 1, "asset_id": "1.3.0"}}));
        assert_eq!(amount_bearing_pair(&op), None);
    }

    #[tokio::test]
    async fn transfer_refreshes_sender_and_receiver() {
        let node = Arc::new(MockNode::new());
        let store = Arc::new(MemoryStore::new());
        node.add_asset(Asset {
            asset_id: "1.3.0".into(),
            symbol: "HX".into(),
            precision: 2,
        });
        node.set_balance("HXa", "1.3.0", 700);
        node.set_balance("HXb", "1.3.0", 300);
        let mut plugin = TransferBalanceUpdater::new(node, store.clone());

        let block = Block::default();
        let op = payload(json!({
            "from_addr": "HXa",
            "to_addr": "HXb",
            "amount": {"amount": 300, "asset_id": "1.3.0"}
        }));
        let ctx = OperationContext {
            block: &block,
            txid: "tx",
            op_index: 0,
            type_code: 0,
            type_name: "transfer_operation",
            payload: &op,
            receipt: None,
        };
        plugin.apply(&ctx).await.unwrap();

        let balances = store.snapshot().address_balances;
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[0].owner_addr, "HXa");
        assert_eq!(balances[0].amount, "7.00");
        assert_eq!(balances[1].amount, "3.00");
    }

    #[tokio::test]
    async fn transfer_without_amount_is_rejected() {
        let node = Arc::new(MockNode::new());
        let store = Arc::new(MemoryStore::new());
        let mut plugin = TransferBalanceUpdater::new(node, store.clone());

        let block = Block::default();
        for op in [
            payload(json!({"from_addr": "HXa", "to_addr": "HXb"})),
            payload(json!({"from_addr": "HXa", "to_addr": "HXb", "amount": 300})),
        ] {
            let ctx = OperationContext {
                block: &block,
                txid: "tx",
                op_index: 0,
                type_code: 0,
                type_name: "transfer_operation",
                payload: &op,
                receipt: None,
            };
            assert!(matches!(plugin.apply(&ctx).await, Err(AppError::Decode(_))));
        }
        assert!(store.snapshot().address_balances.is_empty());
    }
}
