//! Built-in derived-state processors.

pub mod account;
pub mod balance;
pub mod token_contract;
pub mod token_events;
pub mod token_queries;
pub mod transfer;

use std::sync::Arc;

use hxscan_node::NodeSource;
use hxscan_storage::Store;

use crate::plugin::PluginPipeline;

pub use account::AccountRegistry;
pub use balance::BalanceRefresher;
pub use token_contract::TokenContractClassifier;
pub use token_events::TokenEventProcessor;
pub use token_queries::TokenQueries;
pub use transfer::{AmountBearingBalanceUpdater, TransferBalanceUpdater};

/// The standard plugin chain. `caller` is the identity used for read-only
/// contract queries.
pub fn default_pipeline(node: Arc<dyn NodeSource>, store: Arc<dyn Store>, caller: &str) -> PluginPipeline {
    let queries = TokenQueries::new(node.clone(), caller);
    let mut pipeline = PluginPipeline::new();
    pipeline
        .register(AccountRegistry::new(store.clone()))
        .register(TokenContractClassifier::new(store.clone(), queries.clone()))
        .register(TransferBalanceUpdater::new(node.clone(), store.clone()))
        .register(AmountBearingBalanceUpdater::new(node.clone(), store.clone()))
        .register(TokenEventProcessor::new(node, store, queries));
    pipeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use hxscan_node::MockNode;
    use hxscan_storage::MemoryStore;

    #[test]
    fn default_order() {
        let pipeline = default_pipeline(Arc::new(MockNode::new()), Arc::new(MemoryStore::new()), "pk");
        assert_eq!(
            pipeline.names(),
            vec![
                "AccountRegistry",
                "TokenContractClassifier",
                "TransferBalanceUpdater",
                "AmountBearingBalanceUpdater",
                "TokenEventProcessor",
            ]
        );
    }
}
