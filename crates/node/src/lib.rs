pub mod client;
pub mod mock;
pub mod operations;
pub mod source;
pub mod types;

pub use client::NodeClient;
pub use mock::MockNode;
pub use operations::{decode_operation, is_contract_op_type, operation_name};
pub use source::NodeSource;
pub use types::{Asset, Block, OpReceipt, ReceiptEvent, Transaction};
