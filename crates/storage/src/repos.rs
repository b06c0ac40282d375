use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::models::*;

/// Quote an identifier that comes from chain data (dynamic table/column names).
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// ─── Scan Config ────────────────────────────────────────────────────────────

/// Read a scan config value by key.
pub async fn get_config(pool: &PgPool, key: &str) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT config_value FROM scan_configs WHERE config_key = $1")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|r| r.0))
}

/// Insert or overwrite a scan config value.
pub async fn set_config(pool: &PgPool, key: &str, value: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO scan_configs (config_key, config_value)
        VALUES ($1, $2)
        ON CONFLICT (config_key) DO UPDATE SET config_value = EXCLUDED.config_value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

// ─── Block Queries ──────────────────────────────────────────────────────────

pub async fn find_block(pool: &PgPool, number: i64) -> Result<Option<BlockRecord>, sqlx::Error> {
    sqlx::query_as::<_, BlockRecord>(
        r#"
        SELECT number, previous, timestamp, trxfee, miner, transaction_merkle_root,
               next_secret_hash, block_id, reward, txs_count
        FROM blocks WHERE number = $1
        "#,
    )
    .bind(number)
    .fetch_optional(pool)
    .await
}

/// Insert a scanned block (ignore if already exists).
pub async fn insert_block(pool: &PgPool, block: &BlockRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO blocks (number, previous, timestamp, trxfee, miner, transaction_merkle_root,
                            next_secret_hash, block_id, reward, txs_count)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (number) DO NOTHING
        "#,
    )
    .bind(block.number)
    .bind(&block.previous)
    .bind(&block.timestamp)
    .bind(block.trxfee)
    .bind(&block.miner)
    .bind(&block.transaction_merkle_root)
    .bind(&block.next_secret_hash)
    .bind(&block.block_id)
    .bind(block.reward)
    .bind(block.txs_count)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fill in the hash of a block once its successor reports it.
pub async fn update_block_hash(
    pool: &PgPool,
    number: i64,
    block_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE blocks SET block_id = $1 WHERE number = $2")
        .bind(block_id)
        .bind(number)
        .execute(pool)
        .await?;
    Ok(())
}

// ─── Transaction Queries ────────────────────────────────────────────────────

pub async fn find_transaction(
    pool: &PgPool,
    txid: &str,
) -> Result<Option<TransactionRecord>, sqlx::Error> {
    sqlx::query_as::<_, TransactionRecord>(
        r#"
        SELECT txid, block_num, ref_block_num, ref_block_prefix, expiration,
               operations_count, index_in_block, first_operation_type
        FROM transactions WHERE txid = $1
        "#,
    )
    .bind(txid)
    .fetch_optional(pool)
    .await
}

pub async fn insert_transaction(pool: &PgPool, tx: &TransactionRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO transactions (txid, block_num, ref_block_num, ref_block_prefix, expiration,
                                  operations_count, index_in_block, first_operation_type)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (txid) DO NOTHING
        "#,
    )
    .bind(&tx.txid)
    .bind(tx.block_num)
    .bind(tx.ref_block_num)
    .bind(tx.ref_block_prefix)
    .bind(&tx.expiration)
    .bind(tx.operations_count)
    .bind(tx.index_in_block)
    .bind(tx.first_operation_type)
    .execute(pool)
    .await?;
    Ok(())
}

// ─── Operation Queries ──────────────────────────────────────────────────────

pub async fn find_operation(pool: &PgPool, id: &str) -> Result<Option<OperationRecord>, sqlx::Error> {
    sqlx::query_as::<_, OperationRecord>(
        r#"
        SELECT id, txid, tx_block_number, tx_index_in_block, index_in_tx, operation_type,
               operation_type_name, operation_json, addr
        FROM operations WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn insert_operation(pool: &PgPool, op: &OperationRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO operations (id, txid, tx_block_number, tx_index_in_block, index_in_tx,
                                operation_type, operation_type_name, operation_json, addr)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(&op.id)
    .bind(&op.txid)
    .bind(op.tx_block_number)
    .bind(op.tx_index_in_block)
    .bind(op.index_in_tx)
    .bind(op.operation_type)
    .bind(&op.operation_type_name)
    .bind(&op.operation_json)
    .bind(&op.addr)
    .execute(pool)
    .await?;
    Ok(())
}

// ─── Dynamic Tables ─────────────────────────────────────────────────────────

// Dynamic tables live in the connection's schema only; a same-named table
// elsewhere on the search path must not leak into the snapshot.
const TABLE_EXISTS_SQL: &str = r#"
    SELECT EXISTS (
        SELECT 1 FROM information_schema.tables
        WHERE table_type = 'BASE TABLE'
          AND table_schema = current_schema()
          AND table_name = $1
    )
"#;

const TABLE_COLUMNS_SQL: &str = r#"
    SELECT column_name::TEXT, data_type::TEXT
    FROM information_schema.columns
    WHERE table_schema = current_schema() AND table_name = $1
    ORDER BY ordinal_position
"#;

pub async fn table_exists(pool: &PgPool, table: &str) -> Result<bool, sqlx::Error> {
    let row: (bool,) = sqlx::query_as(TABLE_EXISTS_SQL)
        .bind(table)
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

pub async fn create_table(
    pool: &PgPool,
    table: &str,
    columns: &[ColumnDef],
    index: &IndexDef,
) -> Result<(), sqlx::Error> {
    let column_sql = columns
        .iter()
        .map(|c| format!("{} {} NULL", quote_ident(&c.name), c.kind.sql_type()))
        .collect::<Vec<_>>()
        .join(", ");
    let create = format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table),
        column_sql
    );
    sqlx::query(&create).execute(pool).await?;

    let index_columns = index
        .columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let create_index = format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_ident(&index.name),
        quote_ident(table),
        index_columns
    );
    sqlx::query(&create_index).execute(pool).await?;
    Ok(())
}

/// Column names and types of a table from `information_schema`.
pub async fn table_columns(pool: &PgPool, table: &str) -> Result<Vec<ColumnDef>, sqlx::Error> {
    let rows: Vec<(String, String)> = sqlx::query_as(TABLE_COLUMNS_SQL)
        .bind(table)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(name, data_type)| ColumnDef {
            name,
            kind: ColumnKind::from_data_type(&data_type),
        })
        .collect())
}

pub async fn row_exists(
    pool: &PgPool,
    table: &str,
    txid: &str,
    index_in_tx: i64,
) -> Result<bool, sqlx::Error> {
    let sql = format!(
        "SELECT EXISTS (SELECT 1 FROM {} WHERE txid = $1 AND index_in_tx = $2)",
        quote_ident(table)
    );
    let row: (bool,) = sqlx::query_as(&sql)
        .bind(txid)
        .bind(index_in_tx)
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

/// Insert one row into a dynamic table using a single parameterized INSERT.
pub async fn insert_row(
    pool: &PgPool,
    table: &str,
    row: &[(String, SqlValue)],
) -> Result<(), sqlx::Error> {
    if row.is_empty() {
        return Ok(());
    }

    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("INSERT INTO {} (", quote_ident(table)));
    {
        let mut columns = qb.separated(", ");
        for (name, _) in row {
            columns.push(quote_ident(name));
        }
    }
    qb.push(") VALUES (");
    {
        let mut values = qb.separated(", ");
        for (_, value) in row {
            match value {
                SqlValue::BigInt(v) => values.push_bind(*v),
                SqlValue::Text(v) => values.push_bind(v.clone()),
            };
        }
    }
    qb.push(")");
    qb.build().execute(pool).await?;
    Ok(())
}

// ─── Contract Receipts ──────────────────────────────────────────────────────

pub async fn contract_receipt_exists(
    pool: &PgPool,
    trxid: &str,
    op_num: i32,
) -> Result<bool, sqlx::Error> {
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM contract_operation_receipt WHERE trxid = $1 AND op_num = $2)",
    )
    .bind(trxid)
    .bind(op_num)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Insert a receipt and its flattened events in one transaction so a crash
/// cannot leave a receipt without its events.
pub async fn insert_contract_receipt(
    pool: &PgPool,
    receipt: &ContractReceiptRecord,
    events: &[ReceiptEventRecord],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO contract_operation_receipt
            (trxid, block_num, op_num, api_result, exec_succeed, actual_fee, invoker,
             contract_registered, events, contract_withdraw_info, contract_balance_changes,
             deposit_to_address_changes, deposit_to_contract_changes, transfer_fees)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (trxid, op_num) DO NOTHING
        "#,
    )
    .bind(&receipt.trxid)
    .bind(receipt.block_num)
    .bind(receipt.op_num)
    .bind(&receipt.api_result)
    .bind(receipt.exec_succeed)
    .bind(receipt.actual_fee)
    .bind(&receipt.invoker)
    .bind(&receipt.contract_registered)
    .bind(&receipt.events)
    .bind(&receipt.contract_withdraw_info)
    .bind(&receipt.contract_balance_changes)
    .bind(&receipt.deposit_to_address_changes)
    .bind(&receipt.deposit_to_contract_changes)
    .bind(&receipt.transfer_fees)
    .execute(&mut *tx)
    .await?;

    if !events.is_empty() {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO contract_operation_receipt_event (trxid, block_num, op_num, caller_addr, contract_address, event_arg, event_name) ",
        );
        qb.push_values(events, |mut b, e| {
            b.push_bind(&e.trxid)
                .push_bind(e.block_num)
                .push_bind(e.op_num)
                .push_bind(&e.caller_addr)
                .push_bind(&e.contract_address)
                .push_bind(&e.event_arg)
                .push_bind(&e.event_name);
        });
        qb.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(())
}

// ─── Account Queries ────────────────────────────────────────────────────────

pub async fn find_account(pool: &PgPool, owner_addr: &str) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(
        "SELECT owner_addr, account_name FROM account WHERE owner_addr = $1",
    )
    .bind(owner_addr)
    .fetch_optional(pool)
    .await
}

/// Register an account name (first registration wins).
pub async fn insert_account(pool: &PgPool, account: &Account) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO account (owner_addr, account_name)
        VALUES ($1, $2)
        ON CONFLICT (owner_addr) DO NOTHING
        "#,
    )
    .bind(&account.owner_addr)
    .bind(&account.account_name)
    .execute(pool)
    .await?;
    Ok(())
}

// ─── Asset & Address Balance Queries ────────────────────────────────────────

pub async fn find_asset(pool: &PgPool, asset_id: &str) -> Result<Option<AssetRecord>, sqlx::Error> {
    sqlx::query_as::<_, AssetRecord>(
        "SELECT asset_id, symbol, precision FROM asset WHERE asset_id = $1",
    )
    .bind(asset_id)
    .fetch_optional(pool)
    .await
}

pub async fn insert_asset(pool: &PgPool, asset: &AssetRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO asset (asset_id, symbol, precision)
        VALUES ($1, $2, $3)
        ON CONFLICT (asset_id) DO NOTHING
        "#,
    )
    .bind(&asset.asset_id)
    .bind(&asset.symbol)
    .bind(asset.precision)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_address_balance(
    pool: &PgPool,
    owner_addr: &str,
    asset_id: &str,
) -> Result<Option<AddressBalance>, sqlx::Error> {
    sqlx::query_as::<_, AddressBalance>(
        "SELECT owner_addr, asset_id, amount FROM address_balance WHERE owner_addr = $1 AND asset_id = $2",
    )
    .bind(owner_addr)
    .bind(asset_id)
    .fetch_optional(pool)
    .await
}

/// Overwrite an address balance with a freshly queried value.
pub async fn upsert_address_balance(
    pool: &PgPool,
    balance: &AddressBalance,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO address_balance (owner_addr, asset_id, amount)
        VALUES ($1, $2, $3)
        ON CONFLICT (owner_addr, asset_id) DO UPDATE
        SET amount = EXCLUDED.amount,
            updated_at = NOW()
        "#,
    )
    .bind(&balance.owner_addr)
    .bind(&balance.asset_id)
    .bind(&balance.amount)
    .execute(pool)
    .await?;
    Ok(())
}

// ─── Token Contract Queries ─────────────────────────────────────────────────

const TOKEN_CONTRACT_COLUMNS: &str = "contract_id, block_num, block_time, txid, contract_type, \
     owner_pubkey, owner_addr, register_time, inherit_from, gas_price, gas_limit, state, \
     total_supply, precision, token_symbol, token_name, logo, url, description";

pub async fn find_token_contract(
    pool: &PgPool,
    contract_id: &str,
) -> Result<Option<TokenContract>, sqlx::Error> {
    let sql = format!("SELECT {TOKEN_CONTRACT_COLUMNS} FROM token_contract WHERE contract_id = $1");
    sqlx::query_as::<_, TokenContract>(&sql)
        .bind(contract_id)
        .fetch_optional(pool)
        .await
}

/// Insert a newly classified token (ignore if already exists).
pub async fn insert_token_contract(pool: &PgPool, token: &TokenContract) -> Result<(), sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO token_contract ({TOKEN_CONTRACT_COLUMNS})
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
        ON CONFLICT (contract_id) DO NOTHING
        "#
    );
    sqlx::query(&sql)
        .bind(&token.contract_id)
        .bind(token.block_num)
        .bind(&token.block_time)
        .bind(&token.txid)
        .bind(&token.contract_type)
        .bind(&token.owner_pubkey)
        .bind(&token.owner_addr)
        .bind(&token.register_time)
        .bind(&token.inherit_from)
        .bind(token.gas_price)
        .bind(token.gas_limit)
        .bind(&token.state)
        .bind(&token.total_supply)
        .bind(token.precision)
        .bind(&token.token_symbol)
        .bind(&token.token_name)
        .bind(&token.logo)
        .bind(&token.url)
        .bind(&token.description)
        .execute(pool)
        .await?;
    Ok(())
}

/// Update the mutable (enrichment and lifecycle) fields of a token.
pub async fn update_token_contract(pool: &PgPool, token: &TokenContract) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE token_contract
        SET state = $1, total_supply = $2, precision = $3, token_symbol = $4, token_name = $5,
            logo = $6, url = $7, description = $8
        WHERE contract_id = $9
        "#,
    )
    .bind(&token.state)
    .bind(&token.total_supply)
    .bind(token.precision)
    .bind(&token.token_symbol)
    .bind(&token.token_name)
    .bind(&token.logo)
    .bind(&token.url)
    .bind(&token.description)
    .bind(&token.contract_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_token_balance(
    pool: &PgPool,
    contract_addr: &str,
    owner_addr: &str,
) -> Result<Option<TokenBalance>, sqlx::Error> {
    sqlx::query_as::<_, TokenBalance>(
        "SELECT contract_addr, owner_addr, amount FROM token_balance WHERE contract_addr = $1 AND owner_addr = $2",
    )
    .bind(contract_addr)
    .bind(owner_addr)
    .fetch_optional(pool)
    .await
}

/// Overwrite a token balance with a freshly queried value.
pub async fn upsert_token_balance(pool: &PgPool, balance: &TokenBalance) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO token_balance (contract_addr, owner_addr, amount)
        VALUES ($1, $2, $3)
        ON CONFLICT (contract_addr, owner_addr) DO UPDATE
        SET amount = EXCLUDED.amount,
            updated_at = NOW()
        "#,
    )
    .bind(&balance.contract_addr)
    .bind(&balance.owner_addr)
    .bind(&balance.amount)
    .execute(pool)
    .await?;
    Ok(())
}

// ─── Transfer History Queries ───────────────────────────────────────────────

pub async fn find_transfer_history(
    pool: &PgPool,
    txid: &str,
    op_num: i32,
) -> Result<Option<TransferHistory>, sqlx::Error> {
    sqlx::query_as::<_, TransferHistory>(
        r#"
        SELECT contract_addr, from_addr, to_addr, amount, block_num, txid, op_num, event_name, tx_time
        FROM token_contract_transfer_history
        WHERE txid = $1 AND op_num = $2
        "#,
    )
    .bind(txid)
    .bind(op_num)
    .fetch_optional(pool)
    .await
}

/// Record a token transfer. Skips duplicates on (txid, op_num).
pub async fn insert_transfer_history(
    pool: &PgPool,
    record: &TransferHistory,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO token_contract_transfer_history
            (contract_addr, from_addr, to_addr, amount, block_num, txid, op_num, event_name, tx_time)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (txid, op_num) DO NOTHING
        "#,
    )
    .bind(&record.contract_addr)
    .bind(&record.from_addr)
    .bind(&record.to_addr)
    .bind(&record.amount)
    .bind(record.block_num)
    .bind(&record.txid)
    .bind(record.op_num)
    .bind(&record.event_name)
    .bind(record.tx_time)
    .execute(pool)
    .await?;
    Ok(())
}
