use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;

use hxscan_core::{AppError, Result};
use hxscan_node::NodeSource;
use hxscan_storage::Store;
use hxscan_storage::models::{AddressBalance, AssetRecord};

/// How many assets to pull from the node when an unknown one shows up.
const ASSET_PAGE: u32 = 100;

/// Render a raw integer amount with `precision` decimal places.
///
/// Without a precision the raw value is returned unchanged.
pub fn scale_amount(raw: i128, precision: Option<u32>) -> String {
    let Some(precision) = precision else {
        return raw.to_string();
    };
    match Decimal::try_from_i128_with_scale(raw, precision) {
        Ok(amount) => amount.to_string(),
        Err(_) => shift_point(raw, precision),
    }
}

// Fallback for magnitudes beyond 96 bits or scales beyond 28.
fn shift_point(raw: i128, precision: u32) -> String {
    let digits = raw.unsigned_abs().to_string();
    let precision = precision as usize;
    let sign = if raw < 0 { "-" } else { "" };
    if precision == 0 {
        return format!("{sign}{digits}");
    }
    let padded = format!("{digits:0>width$}", width = precision + 1);
    let (int, frac) = padded.split_at(padded.len() - precision);
    format!("{sign}{int}.{frac}")
}

/// Re-query an address's live balance and overwrite the stored one.
///
/// Asset metadata is cached in memory, then looked up in the store, and
/// finally pulled from the node's asset list.
pub struct BalanceRefresher {
    node: Arc<dyn NodeSource>,
    store: Arc<dyn Store>,
    assets: HashMap<String, AssetRecord>,
}

impl BalanceRefresher {
    pub fn new(node: Arc<dyn NodeSource>, store: Arc<dyn Store>) -> Self {
        Self {
            node,
            store,
            assets: HashMap::new(),
        }
    }

    async fn find_asset(&mut self, asset_id: &str) -> Result<Option<AssetRecord>> {
        if let Some(asset) = self.assets.get(asset_id) {
            return Ok(Some(asset.clone()));
        }
        if let Some(asset) = self.store.find_asset(asset_id).await? {
            self.assets.insert(asset_id.to_string(), asset.clone());
            return Ok(Some(asset));
        }

        let listed = self.node.list_assets(0, ASSET_PAGE).await?;
        let mut found = None;
        for asset in listed {
            let record = AssetRecord {
                precision: i32::try_from(asset.precision).map_err(|_| {
                    AppError::Decode(format!("asset {} precision {} out of range", asset.asset_id, asset.precision))
                })?,
                asset_id: asset.asset_id,
                symbol: asset.symbol,
            };
            if self.store.find_asset(&record.asset_id).await?.is_none() {
                self.store.insert_asset(&record).await?;
                tracing::info!(asset = %record.asset_id, symbol = %record.symbol, "Registered asset");
            }
            if record.asset_id == asset_id {
                found = Some(record.clone());
            }
            self.assets.insert(record.asset_id.clone(), record);
        }
        Ok(found)
    }

    pub async fn refresh(&mut self, addr: &str, asset_id: &str) -> Result<()> {
        let balances = self.node.get_address_balances(addr).await?;
        let raw = balances.get(asset_id).copied().unwrap_or(0);
        let asset = self
            .find_asset(asset_id)
            .await?
            .ok_or_else(|| AppError::Decode(format!("unknown asset id {asset_id}")))?;

        let amount = scale_amount(raw, u32::try_from(asset.precision).ok());
        self.store
            .upsert_address_balance(&AddressBalance {
                owner_addr: addr.to_string(),
                asset_id: asset_id.to_string(),
                amount: amount.clone(),
            })
            .await?;
        tracing::debug!(addr, asset = asset_id, %amount, "Address balance refreshed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hxscan_node::{Asset, MockNode};
    use hxscan_storage::MemoryStore;

    #[test]
    fn scales_by_precision() {
        assert_eq!(scale_amount(1000, Some(2)), "10.00");
        assert_eq!(scale_amount(5, Some(3)), "0.005");
        assert_eq!(scale_amount(-150, Some(2)), "-1.50");
        assert_eq!(scale_amount(1000, None), "1000");
        assert_eq!(scale_amount(1000, Some(0)), "1000");
    }

    #[test]
    fn huge_amounts_fall_back_to_text_shifting() {
        let raw = i128::MAX;
        let scaled = scale_amount(raw, Some(8));
        assert_eq!(scaled.replace('.', ""), raw.to_string());
        assert_eq!(scaled.split('.').nth(1).map(str::len), Some(8));
    }

    #[tokio::test]
    async fn unknown_assets_are_pulled_from_the_node() {
        let node = Arc::new(MockNode::new());
        let store = Arc::new(MemoryStore::new());
        node.add_asset(Asset {
            asset_id: "1.3.0".into(),
            symbol: "HX".into(),
            precision: 5,
        });
        node.add_asset(Asset {
            asset_id: "1.3.1".into(),
            symbol: "BTC".into(),
            precision: 8,
        });
        node.set_balance("HXa", "1.3.0", 123_456);

        let mut refresher = BalanceRefresher::new(node, store.clone());
        refresher.refresh("HXa", "1.3.0").await.unwrap();
        refresher.refresh("HXb", "1.3.1").await.unwrap();

        let state = store.snapshot();
        assert_eq!(state.assets.len(), 2);
        assert_eq!(state.address_balances[0].amount, "1.23456");
        assert_eq!(state.address_balances[1].amount, "0.00000000");
    }

    #[tokio::test]
    async fn unlisted_asset_is_an_error() {
        let node = Arc::new(MockNode::new());
        let store = Arc::new(MemoryStore::new());
        let mut refresher = BalanceRefresher::new(node, store.clone());

        let err = refresher.refresh("HXa", "1.3.9").await.unwrap_err();
        assert!(!err.is_persistence());
        assert!(store.snapshot().address_balances.is_empty());
    }

    #[tokio::test]
    async fn out_of_range_precision_is_an_error() {
        let node = Arc::new(MockNode::new());
        let store = Arc::new(MemoryStore::new());
        node.add_asset(Asset {
            asset_id: "1.3.0".into(),
            symbol: "HX".into(),
            precision: u32::MAX,
        });
        let mut refresher = BalanceRefresher::new(node, store.clone());

        let err = refresher.refresh("HXa", "1.3.0").await.unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
        let state = store.snapshot();
        assert!(state.assets.is_empty());
        assert!(state.address_balances.is_empty());
    }
}
