use std::sync::Arc;

use hxscan_core::Result;
use hxscan_node::NodeSource;
use hxscan_node::types::{int_result, unquote_result};

/// Metadata a token contract reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub name: String,
    pub symbol: String,
    pub precision: u32,
}

/// Live read-only queries against token contracts.
#[derive(Clone)]
pub struct TokenQueries {
    node: Arc<dyn NodeSource>,
    caller: String,
}

impl TokenQueries {
    pub fn new(node: Arc<dyn NodeSource>, caller: impl Into<String>) -> Self {
        Self {
            node,
            caller: caller.into(),
        }
    }

    async fn text(&self, contract: &str, method: &str) -> Result<String> {
        let raw = self
            .node
            .invoke_read_only(&self.caller, contract, method, "")
            .await?;
        Ok(unquote_result(&raw))
    }

    async fn int(&self, contract: &str, method: &str, arg: &str) -> Result<i128> {
        let raw = self
            .node
            .invoke_read_only(&self.caller, contract, method, arg)
            .await?;
        int_result(&raw)
    }

    /// Name, symbol and precision, all or nothing.
    pub async fn info(&self, contract: &str) -> Result<TokenInfo> {
        let name = self.text(contract, "tokenName").await?;
        let symbol = self.text(contract, "tokenSymbol").await?;
        let precision = self.int(contract, "precision", "").await?;
        let precision = u32::try_from(precision).map_err(|_| {
            hxscan_core::AppError::Decode(format!("invalid precision {precision} of {contract}"))
        })?;
        Ok(TokenInfo {
            name,
            symbol,
            precision,
        })
    }

    pub async fn total_supply(&self, contract: &str) -> Result<i128> {
        self.int(contract, "totalSupply", "").await
    }

    pub async fn balance_of(&self, contract: &str, owner: &str) -> Result<i128> {
        self.int(contract, "balanceOf", owner).await
    }
}
