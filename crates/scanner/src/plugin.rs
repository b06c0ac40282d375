use async_trait::async_trait;
use serde_json::{Map, Value};

use hxscan_core::Result;
use hxscan_node::{Block, OpReceipt};

/// Everything a plugin gets to see about one accepted operation.
#[derive(Debug, Clone, Copy)]
pub struct OperationContext<'a> {
    pub block: &'a Block,
    pub txid: &'a str,
    pub op_index: usize,
    pub type_code: i64,
    pub type_name: &'a str,
    /// Payload including the injected positional fields.
    pub payload: &'a Map<String, Value>,
    pub receipt: Option<&'a OpReceipt>,
}

impl<'a> OperationContext<'a> {
    /// The receipt, only if the contract call succeeded.
    pub fn successful_receipt(&self) -> Option<&'a OpReceipt> {
        self.receipt.filter(|r| r.exec_succeed)
    }
}

/// A derived-state processor fed every accepted operation in chain order.
#[async_trait]
pub trait ScanPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&mut self, ctx: &OperationContext<'_>) -> Result<()>;
}

/// Pass a per-item result through, swallowing everything but persistence
/// failures.
pub(crate) fn tolerate(result: Result<()>, plugin: &str, what: &str) -> Result<()> {
    match result {
        Err(e) if e.is_persistence() => Err(e),
        Err(e) => {
            tracing::warn!(plugin, error = %e, "Skipping {what}");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

/// Ordered plugin chain.
///
/// Plugins run sequentially in registration order. Only persistence errors
/// abort the block: such an error stops the chain and is returned, while any
/// other plugin error is logged and the next plugin runs.
#[derive(Default)]
pub struct PluginPipeline {
    plugins: Vec<Box<dyn ScanPlugin>>,
}

impl PluginPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: impl ScanPlugin + 'static) -> &mut Self {
        tracing::debug!(plugin = plugin.name(), "Registered scan plugin");
        self.plugins.push(Box::new(plugin));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub async fn apply(&mut self, ctx: &OperationContext<'_>) -> Result<()> {
        for plugin in &mut self.plugins {
            if let Err(e) = plugin.apply(ctx).await {
                if e.is_persistence() {
                    tracing::error!(plugin = plugin.name(), txid = %ctx.txid, op = ctx.op_index, error = %e, "Plugin failed");
                    return Err(e);
                }
                tracing::warn!(
                    plugin = plugin.name(),
                    txid = %ctx.txid,
                    op = ctx.op_index,
                    error = %e,
                    "Plugin skipped operation"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hxscan_core::AppError;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
        fail_with: Option<AppError>,
    }

    #[async_trait]
    impl ScanPlugin for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn apply(&mut self, _ctx: &OperationContext<'_>) -> Result<()> {
            self.seen.lock().unwrap().push(self.name);
            match self.fail_with.take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    fn ctx_parts() -> (Block, Map<String, Value>) {
        (Block::default(), Map::new())
    }

    #[tokio::test]
    async fn runs_in_order_and_skips_enrichment_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = PluginPipeline::new();
        pipeline
            .register(Recorder { name: "first", seen: seen.clone(), fail_with: Some(AppError::Rpc("down".into())) })
            .register(Recorder { name: "second", seen: seen.clone(), fail_with: None });

        let (block, payload) = ctx_parts();
        let ctx = OperationContext {
            block: &block,
            txid: "tx",
            op_index: 0,
            type_code: 0,
            type_name: "transfer_operation",
            payload: &payload,
            receipt: None,
        };
        pipeline.apply(&ctx).await.unwrap();

        assert_eq!(pipeline.names(), vec!["first", "second"]);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn persistence_failures_stop_the_chain() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = PluginPipeline::new();
        pipeline
            .register(Recorder { name: "first", seen: seen.clone(), fail_with: Some(AppError::Database("gone".into())) })
            .register(Recorder { name: "second", seen: seen.clone(), fail_with: None });

        let (block, payload) = ctx_parts();
        let ctx = OperationContext {
            block: &block,
            txid: "tx",
            op_index: 0,
            type_code: 0,
            type_name: "transfer_operation",
            payload: &payload,
            receipt: None,
        };
        let err = pipeline.apply(&ctx).await.unwrap_err();

        assert!(err.is_persistence());
        assert_eq!(*seen.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn tolerate_only_passes_persistence_errors() {
        assert!(tolerate(Err(AppError::Rpc("x".into())), "p", "item").is_ok());
        assert!(tolerate(Err(AppError::Database("x".into())), "p", "item").is_err());
    }
}
