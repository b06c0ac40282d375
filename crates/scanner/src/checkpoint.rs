use std::sync::Arc;

use hxscan_core::{AppError, Result};
use hxscan_storage::Store;

/// Config key holding the number of the last fully processed block.
pub const LAST_SCANNED_BLOCK_KEY: &str = "last_scanned_block_number";

/// The persisted scan cursor.
#[derive(Clone)]
pub struct Checkpoint {
    store: Arc<dyn Store>,
}

impl Checkpoint {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Last fully processed block, `0` when nothing was scanned yet.
    pub async fn load(&self) -> Result<u64> {
        match self.store.get_config(LAST_SCANNED_BLOCK_KEY).await? {
            Some(value) => value.trim().parse().map_err(|_| {
                AppError::Decode(format!("invalid {LAST_SCANNED_BLOCK_KEY} value {value:?}"))
            }),
            None => Ok(0),
        }
    }

    /// Persist `block` as the last fully processed block. Writing an
    /// unchanged value is skipped.
    pub async fn save(&self, block: u64) -> Result<()> {
        let value = block.to_string();
        if self.store.get_config(LAST_SCANNED_BLOCK_KEY).await?.as_deref() == Some(value.as_str()) {
            return Ok(());
        }
        self.store.set_config(LAST_SCANNED_BLOCK_KEY, &value).await?;
        tracing::debug!(block, "Checkpoint saved");
        Ok(())
    }

    /// First block to scan: the explicit override, else the block after the
    /// checkpoint.
    pub async fn start_block(&self, scan_from: Option<u64>) -> Result<u64> {
        match scan_from {
            Some(block) => Ok(block),
            None => Ok(self.load().await? + 1),
        }
    }
}
