use std::sync::Arc;

use async_trait::async_trait;

use hxscan_core::Result;
use hxscan_storage::Store;
use hxscan_storage::models::Account;

use crate::address::first_string;
use crate::plugin::{OperationContext, ScanPlugin};

/// Records the display name chosen at account creation. The first
/// registration for an address wins; later renames are not tracked.
pub struct AccountRegistry {
    store: Arc<dyn Store>,
}

impl AccountRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ScanPlugin for AccountRegistry {
    fn name(&self) -> &'static str {
        "AccountRegistry"
    }

    async fn apply(&mut self, ctx: &OperationContext<'_>) -> Result<()> {
        if ctx.type_name != "account_create_operation" {
            return Ok(());
        }
        let (Some(name), Some(payer)) = (
            first_string(ctx.payload, &["name"]),
            first_string(ctx.payload, &["payer"]),
        ) else {
            tracing::debug!(txid = %ctx.txid, "Account creation without name or payer");
            return Ok(());
        };

        if self.store.find_account(payer).await?.is_some() {
            return Ok(());
        }
        self.store
            .insert_account(&Account {
                owner_addr: payer.to_string(),
                account_name: name.to_string(),
            })
            .await?;
        tracing::info!(addr = payer, name, "Registered account");
        Ok(())
    }
}
