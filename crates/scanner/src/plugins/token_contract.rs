use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use hxscan_core::{AppError, Result};
use hxscan_storage::Store;
use hxscan_storage::models::TokenContract;

use super::token_queries::TokenQueries;
use crate::plugin::{OperationContext, ScanPlugin};

/// Callable methods a token contract must declare.
pub const TOKEN_ABI: [&str; 3] = ["transfer", "transferFrom", "approve"];

/// Read-only methods a token contract must declare.
pub const TOKEN_OFFLINE_ABI: [&str; 4] = ["balanceOf", "totalSupply", "precision", "approvedBalanceFrom"];

/// The fields of a `contract_register_operation` a token row is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractRegistration {
    pub contract_id: String,
    pub abi: Vec<String>,
    pub offline_abi: Vec<String>,
    pub owner_pubkey: String,
    pub owner_addr: String,
    pub register_time: String,
    pub inherit_from: String,
    pub gas_price: i64,
    pub gas_limit: i64,
}

fn decode_err(what: &str) -> AppError {
    AppError::Decode(format!("contract registration: {what}"))
}

fn string_prop(payload: &Map<String, Value>, key: &str) -> Result<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| decode_err(&format!("{key} not found")))
}

fn int_prop(payload: &Map<String, Value>, key: &str) -> Result<i64> {
    let value = payload.get(key).ok_or_else(|| decode_err(&format!("{key} not found")))?;
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok())),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| decode_err(&format!("{key} is not an integer")))
}

fn string_list(code: &Map<String, Value>, key: &str) -> Result<Vec<String>> {
    code.get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| decode_err(&format!("{key} not found")))?
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| decode_err(&format!("{key} is not a list of strings")))
        })
        .collect()
}

impl ContractRegistration {
    pub fn decode(payload: &Map<String, Value>) -> Result<Self> {
        let code = payload
            .get("contract_code")
            .and_then(Value::as_object)
            .ok_or_else(|| decode_err("contract_code not found"))?;
        Ok(Self {
            abi: string_list(code, "abi")?,
            offline_abi: string_list(code, "offline_abi")?,
            owner_pubkey: string_prop(payload, "owner_pubkey")?,
            register_time: string_prop(payload, "register_time")?,
            owner_addr: string_prop(payload, "owner_addr")?,
            inherit_from: string_prop(payload, "inherit_from")?,
            gas_price: int_prop(payload, "gas_price")?,
            gas_limit: int_prop(payload, "init_cost")?,
            contract_id: string_prop(payload, "contract_id")?,
        })
    }

    /// Whether the declared method sets cover the token capability set.
    pub fn is_token(&self) -> bool {
        let has_all = |declared: &[String], required: &[&str]| {
            required.iter().all(|m| declared.iter().any(|d| d == m))
        };
        has_all(&self.abi, &TOKEN_ABI) && has_all(&self.offline_abi, &TOKEN_OFFLINE_ABI)
    }
}

/// Detects token contracts at registration time and records them.
///
/// An existing row is never touched here; lifecycle updates come from the
/// token's own events.
pub struct TokenContractClassifier {
    store: Arc<dyn Store>,
    queries: TokenQueries,
}

impl TokenContractClassifier {
    pub fn new(store: Arc<dyn Store>, queries: TokenQueries) -> Self {
        Self { store, queries }
    }

    async fn register(&self, ctx: &OperationContext<'_>, reg: ContractRegistration) -> Result<()> {
        if self.store.find_token_contract(&reg.contract_id).await?.is_some() {
            return Ok(());
        }

        let mut token = TokenContract {
            contract_id: reg.contract_id,
            block_num: i64::try_from(ctx.block.block_number)
                .map_err(|_| AppError::Decode(format!("block number {} out of range", ctx.block.block_number)))?,
            block_time: ctx.block.timestamp.clone(),
            txid: ctx.txid.to_string(),
            contract_type: "common".into(),
            owner_pubkey: reg.owner_pubkey,
            owner_addr: reg.owner_addr,
            register_time: reg.register_time,
            inherit_from: reg.inherit_from,
            gas_price: reg.gas_price,
            gas_limit: reg.gas_limit,
            state: None,
            total_supply: None,
            precision: None,
            token_symbol: None,
            token_name: None,
            logo: None,
            url: None,
            description: None,
        };

        match self.queries.info(&token.contract_id).await {
            Ok(info) => {
                token.token_name = Some(info.name);
                token.token_symbol = Some(info.symbol);
                token.precision = i32::try_from(info.precision).ok();
            }
            Err(e) => tracing::warn!(contract = %token.contract_id, error = %e, "Token metadata query failed"),
        }
        match self.queries.total_supply(&token.contract_id).await {
            Ok(supply) => token.total_supply = Some(supply.to_string()),
            Err(e) => tracing::warn!(contract = %token.contract_id, error = %e, "Token supply query failed"),
        }

        self.store.insert_token_contract(&token).await?;
        tracing::info!(
            contract = %token.contract_id,
            symbol = token.token_symbol.as_deref().unwrap_or(""),
            block = token.block_num,
            "New token contract"
        );
        Ok(())
    }
}

#[async_trait]
impl ScanPlugin for TokenContractClassifier {
    fn name(&self) -> &'static str {
        "TokenContractClassifier"
    }

    async fn apply(&mut self, ctx: &OperationContext<'_>) -> Result<()> {
        match ctx.type_name {
            "contract_register_operation" => {
                if ctx.successful_receipt().is_none() {
                    tracing::debug!(txid = %ctx.txid, "Contract registration failed on chain");
                    return Ok(());
                }
                let reg = ContractRegistration::decode(ctx.payload)?;
                if !reg.is_token() {
                    tracing::debug!(contract = %reg.contract_id, "Registered contract is not a token");
                    return Ok(());
                }
                self.register(ctx, reg).await
            }
            "native_contract_register_operation" => {
                tracing::info!(txid = %ctx.txid, "Native contract registered");
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
