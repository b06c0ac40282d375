use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;

use hxscan_core::{AppError, Result};
use hxscan_node::types::amount_from_json;
use hxscan_node::{NodeSource, ReceiptEvent};
use hxscan_storage::Store;
use hxscan_storage::models::{TokenBalance, TransferHistory};

use super::balance::{BalanceRefresher, scale_amount};
use super::token_queries::TokenQueries;
use crate::plugin::{OperationContext, ScanPlugin, tolerate};

/// Block timestamps are naive UTC in this layout.
pub const BLOCK_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const PLUGIN: &str = "TokenEventProcessor";

#[derive(Debug, Deserialize)]
struct TransferArg {
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    amount: Value,
}

/// Decoded `Transfer` event argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub from: String,
    pub to: String,
    pub amount: i128,
}

impl TransferEvent {
    pub fn parse(event_arg: &str) -> Result<Self> {
        let arg: TransferArg = serde_json::from_str(event_arg)
            .map_err(|e| AppError::Decode(format!("invalid Transfer event arg {event_arg:?}: {e}")))?;
        let amount = amount_from_json(&arg.amount)
            .ok_or_else(|| AppError::Decode(format!("invalid Transfer amount {}", arg.amount)))?;
        Ok(Self {
            from: arg.from,
            to: arg.to,
            amount,
        })
    }

    /// Distinct non-empty participants, sender first.
    pub fn participants(&self) -> Vec<&str> {
        let mut users = Vec::with_capacity(2);
        if !self.from.is_empty() {
            users.push(self.from.as_str());
        }
        if !self.to.is_empty() && self.to != self.from {
            users.push(self.to.as_str());
        }
        users
    }

    /// Mints and burns have an empty side.
    pub fn changes_supply(&self) -> bool {
        self.from.is_empty() || self.to.is_empty()
    }
}

/// Address/asset pairs listed in a receipt's `deposit_to_address` changes.
///
/// Entries come either as `[[addr, asset_id], amount]` or as objects with
/// `addr` (or `address`) and `asset_id`.
pub fn deposit_pairs(changes: &[Value]) -> Vec<(String, String)> {
    changes
        .iter()
        .filter_map(|change| match change {
            Value::Array(items) => {
                let key = items.first()?.as_array()?;
                let addr = key.first()?.as_str()?;
                let asset = key.get(1)?.as_str()?;
                Some((addr.to_string(), asset.to_string()))
            }
            Value::Object(obj) => {
                let addr = obj.get("addr").or_else(|| obj.get("address"))?.as_str()?;
                let asset = obj.get("asset_id")?.as_str()?;
                Some((addr.to_string(), asset.to_string()))
            }
            _ => None,
        })
        .filter(|(addr, asset)| !addr.is_empty() && !asset.is_empty())
        .collect()
}

/// Keeps token contracts, balances and transfer history in step with the
/// events emitted by successful contract calls.
///
/// Balances are never derived from the event amounts: every affected owner
/// is re-queried from the contract.
pub struct TokenEventProcessor {
    store: Arc<dyn Store>,
    queries: TokenQueries,
    balances: BalanceRefresher,
    // Only positive answers are cached: a contract can become a token later
    // in the scan, never the other way round.
    known_tokens: HashSet<String>,
}

impl TokenEventProcessor {
    pub fn new(node: Arc<dyn NodeSource>, store: Arc<dyn Store>, queries: TokenQueries) -> Self {
        Self {
            balances: BalanceRefresher::new(node, store.clone()),
            store,
            queries,
            known_tokens: HashSet::new(),
        }
    }

    async fn is_token(&mut self, contract: &str) -> Result<bool> {
        if self.known_tokens.contains(contract) {
            return Ok(true);
        }
        let known = self.store.find_token_contract(contract).await?.is_some();
        if known {
            self.known_tokens.insert(contract.to_string());
        }
        Ok(known)
    }

    async fn on_inited(&self, contract: &str) -> Result<()> {
        let Some(mut token) = self.store.find_token_contract(contract).await? else {
            return Ok(());
        };
        token.state = Some("common".into());
        match self.queries.info(contract).await {
            Ok(info) => {
                token.token_name = Some(info.name);
                token.token_symbol = Some(info.symbol);
                token.precision = i32::try_from(info.precision).ok();
            }
            Err(e) => tracing::warn!(contract, error = %e, "Token metadata query failed"),
        }
        match self.queries.total_supply(contract).await {
            Ok(supply) => token.total_supply = Some(supply.to_string()),
            Err(e) => tracing::warn!(contract, error = %e, "Token supply query failed"),
        }
        self.store.update_token_contract(&token).await?;
        tracing::info!(contract, "Token contract initialised");
        Ok(())
    }

    async fn on_transfer(&mut self, ctx: &OperationContext<'_>, event: &ReceiptEvent) -> Result<()> {
        let contract = event.contract_address.as_str();
        let transfer = TransferEvent::parse(&event.event_arg)?;
        let op_num = i32::try_from(ctx.op_index)
            .map_err(|_| AppError::Decode(format!("operation index {} out of range", ctx.op_index)))?;

        if self.store.find_transfer_history(ctx.txid, op_num).await?.is_none() {
            let tx_time = NaiveDateTime::parse_from_str(&ctx.block.timestamp, BLOCK_TIME_FORMAT)
                .map_err(|e| AppError::Decode(format!("block timestamp {:?}: {e}", ctx.block.timestamp)))?;
            self.store
                .insert_transfer_history(&TransferHistory {
                    contract_addr: contract.to_string(),
                    from_addr: transfer.from.clone(),
                    to_addr: transfer.to.clone(),
                    amount: transfer.amount.to_string(),
                    block_num: i64::try_from(ctx.block.block_number).map_err(|_| {
                        AppError::Decode(format!("block number {} out of range", ctx.block.block_number))
                    })?,
                    txid: ctx.txid.to_string(),
                    op_num,
                    event_name: event.event_name.clone(),
                    tx_time,
                })
                .await?;
        }

        let precision = self
            .store
            .find_token_contract(contract)
            .await?
            .and_then(|t| t.precision)
            .and_then(|p| u32::try_from(p).ok());
        for owner in transfer.participants() {
            tolerate(
                self.refresh_token_balance(contract, owner, precision).await,
                PLUGIN,
                "token balance refresh",
            )?;
        }
        if transfer.changes_supply() {
            tolerate(self.refresh_total_supply(contract).await, PLUGIN, "total supply refresh")?;
        }
        Ok(())
    }

    async fn refresh_token_balance(&self, contract: &str, owner: &str, precision: Option<u32>) -> Result<()> {
        let raw = self.queries.balance_of(contract, owner).await?;
        let amount = scale_amount(raw, precision);
        self.store
            .upsert_token_balance(&TokenBalance {
                contract_addr: contract.to_string(),
                owner_addr: owner.to_string(),
                amount: amount.clone(),
            })
            .await?;
        tracing::debug!(contract, owner, %amount, "Token balance refreshed");
        Ok(())
    }

    async fn refresh_total_supply(&self, contract: &str) -> Result<()> {
        let supply = self.queries.total_supply(contract).await?;
        if let Some(mut token) = self.store.find_token_contract(contract).await? {
            token.total_supply = Some(supply.to_string());
            self.store.update_token_contract(&token).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ScanPlugin for TokenEventProcessor {
    fn name(&self) -> &'static str {
        PLUGIN
    }

    async fn apply(&mut self, ctx: &OperationContext<'_>) -> Result<()> {
        let Some(receipt) = ctx.successful_receipt() else {
            return Ok(());
        };

        for event in &receipt.events {
            if !self.is_token(&event.contract_address).await? {
                continue;
            }
            match event.event_name.as_str() {
                "Inited" => tolerate(self.on_inited(&event.contract_address).await, PLUGIN, "Inited event")?,
                "Transfer" => tolerate(self.on_transfer(ctx, event).await, PLUGIN, "Transfer event")?,
                // Approved included: allowances are not tracked.
                _ => {}
            }
        }

        for (addr, asset) in deposit_pairs(&receipt.deposit_to_address_changes) {
            tolerate(self.balances.refresh(&addr, &asset).await, PLUGIN, "deposit balance refresh")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hxscan_node::{Asset, Block, MockNode, OpReceipt};
    use hxscan_storage::MemoryStore;
    use hxscan_storage::models::TokenContract;
    use serde_json::{Map, json};

    fn token(contract: &str, precision: Option<i32>) -> TokenContract {
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
            state: None,
            total_supply: None,
            precision,
            token_symbol: None,
            token_name: None,
            logo: None,
            url: None,
            description: None,
        }
    }

    fn event(name: &str, arg: &str) -> ReceiptEvent {
        ReceiptEvent {
            contract_address: "HXCtoken".into(),
            event_name: name.into(),
            event_arg: arg.into(),
            ..Default::default()
        }
    }

    struct Fixture {
        node: Arc<MockNode>,
        store: Arc<MemoryStore>,
        plugin: TokenEventProcessor,
    }

    async fn fixture() -> Fixture {
        let node = Arc::new(MockNode::new());
        let store = Arc::new(MemoryStore::new());
        store.insert_token_contract(&token("HXCtoken", Some(2))).await.unwrap();
        let plugin = TokenEventProcessor::new(node.clone(), store.clone(), TokenQueries::new(node.clone(), "pk"));
        Fixture { node, store, plugin }
    }

    async fn apply(plugin: &mut TokenEventProcessor, receipt: &OpReceipt) {
        let block = Block {
            block_number: 100,
            timestamp: "2019-03-04T05:06:07".into(),
            ..Default::default()
        };
        let payload = Map::new();
        let ctx = OperationContext {
            block: &block,
            txid: "tx100",
            op_index: 0,
            type_code: 78,
            type_name: "contract_invoke_operation",
            payload: &payload,
            receipt: Some(receipt),
        };
        plugin.apply(&ctx).await.unwrap();
    }

    #[test]
    fn transfer_args_accept_quoted_amounts() {
        let t = TransferEvent::parse(r#"{"from":"A","to":"B","amount":"500"}"#).unwrap();
        assert_eq!(t.amount, 500);
        assert_eq!(t.participants(), vec!["A", "B"]);
        assert!(!t.changes_supply());

        let mint = TransferEvent::parse(r#"{"to":"B","amount":5}"#).unwrap();
        assert_eq!(mint.participants(), vec!["B"]);
        assert!(mint.changes_supply());

        assert!(TransferEvent::parse("not json").is_err());
    }

    #[test]
    fn deposit_pairs_accept_both_shapes() {
        let pairs = deposit_pairs(&[
            json!([["HXa", "1.3.0"], 10]),
            json!({"address": "HXb", "asset_id": "1.3.1", "amount": 3}),
            json!("garbage"),
        ]);
        assert_eq!(
            pairs,
            vec![("HXa".to_string(), "1.3.0".to_string()), ("HXb".to_string(), "1.3.1".to_string())]
        );
    }

    #[tokio::test]
    async fn transfer_is_recorded_once_and_balances_refreshed() {
        let Fixture { node, store, mut plugin } = fixture().await;
        node.set_invoke_result("HXCtoken", "balanceOf", "A", "1000");
        node.set_invoke_result("HXCtoken", "balanceOf", "B", "1500");
        let receipt = OpReceipt {
            exec_succeed: true,
            events: vec![event("Transfer", r#"{"from":"A","to":"B","amount":500}"#)],
            ..Default::default()
        };

        apply(&mut plugin, &receipt).await;
        apply(&mut plugin, &receipt).await;

        let state = store.snapshot();
        assert_eq!(state.transfer_history.len(), 1);
        let history = &state.transfer_history[0];
        assert_eq!(history.amount, "500");
        assert_eq!(history.block_num, 100);
        assert_eq!(history.tx_time.to_string(), "2019-03-04 05:06:07");

        let amount = |owner: &str| {
            state
                .token_balances
                .iter()
                .find(|b| b.owner_addr == owner)
                .map(|b| b.amount.clone())
        };
        assert_eq!(amount("A").as_deref(), Some("10.00"));
        assert_eq!(amount("B").as_deref(), Some("15.00"));
        assert_eq!(state.token_balances.len(), 2);
    }

    #[tokio::test]
    async fn mint_refreshes_supply() {
        let Fixture { node, store, mut plugin } = fixture().await;
        node.set_invoke_result("HXCtoken", "balanceOf", "B", "700");
        node.set_invoke_result("HXCtoken", "totalSupply", "", "9000");
        let receipt = OpReceipt {
            exec_succeed: true,
            events: vec![event("Transfer", r#"{"from":"","to":"B","amount":700}"#)],
            ..Default::default()
        };

        apply(&mut plugin, &receipt).await;

        let state = store.snapshot();
        assert_eq!(state.token_contracts[0].total_supply.as_deref(), Some("9000"));
        assert_eq!(state.token_balances[0].amount, "7.00");
    }

    #[tokio::test]
    async fn inited_marks_token_common() {
        let Fixture { node, store, mut plugin } = fixture().await;
        node.set_invoke_result("HXCtoken", "tokenName", "", "\"Test Token\"");
        node.set_invoke_result("HXCtoken", "tokenSymbol", "", "\"TT\"");
        node.set_invoke_result("HXCtoken", "precision", "", "4");
        let receipt = OpReceipt {
            exec_succeed: true,
            events: vec![event("Inited", "")],
            ..Default::default()
        };

        apply(&mut plugin, &receipt).await;

        let token = &store.snapshot().token_contracts[0];
        assert_eq!(token.state.as_deref(), Some("common"));
        assert_eq!(token.token_name.as_deref(), Some("Test Token"));
        assert_eq!(token.precision, Some(4));
        assert_eq!(token.total_supply, None);
    }

    #[tokio::test]
    async fn approvals_change_nothing() {
        let Fixture { node, store, mut plugin } = fixture().await;
        let before = store.snapshot();
        let receipt = OpReceipt {
            exec_succeed: true,
            events: vec![event("Approved", r#"{"from":"A","spender":"B","amount":5}"#)],
            ..Default::default()
        };

        apply(&mut plugin, &receipt).await;

        let after = store.snapshot();
        assert_eq!(after.token_contracts, before.token_contracts);
        assert!(after.token_balances.is_empty());
        assert!(after.transfer_history.is_empty());
        assert!(node.invocations().is_empty());
    }

    #[tokio::test]
    async fn unknown_contracts_and_failed_calls_are_ignored() {
        let Fixture { node, store, mut plugin } = fixture().await;
        let mut foreign = event("Transfer", r#"{"from":"A","to":"B","amount":1}"#);
        foreign.contract_address = "HXCother".into();
        let receipt = OpReceipt {
            exec_succeed: true,
            events: vec![foreign],
            ..Default::default()
        };
        apply(&mut plugin, &receipt).await;

        let failed = OpReceipt {
            exec_succeed: false,
            events: vec![event("Transfer", r#"{"from":"A","to":"B","amount":1}"#)],
            ..Default::default()
        };
        apply(&mut plugin, &failed).await;

        assert!(store.snapshot().transfer_history.is_empty());
        assert!(node.invocations().is_empty());
    }

    #[tokio::test]
    async fn deposit_changes_refresh_address_balances() {
        let Fixture { node, store, mut plugin } = fixture().await;
        node.add_asset(Asset {
            asset_id: "1.3.0".into(),
            symbol: "HX".into(),
            precision: 5,
        });
        node.set_balance("HXa", "1.3.0", 100_000);
        let receipt = OpReceipt {
            exec_succeed: true,
            deposit_to_address_changes: vec![json!([["HXa", "1.3.0"], 10])],
            ..Default::default()
        };

        apply(&mut plugin, &receipt).await;

        let balances = store.snapshot().address_balances;
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].amount, "1.00000");
    }
}
