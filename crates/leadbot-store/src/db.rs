use rusqlite::Connection;

use crate::error::Result;

/// Initialise the durable tables. Safe to call on every startup (idempotent).
///
/// `account_data` holds one row per tenant with its config and funnel JSON;
/// `user_data` holds one conversation state per (tenant, user).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_account_data_table(conn)?;
    create_user_data_table(conn)?;
    Ok(())
}

fn create_account_data_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS account_data (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id   TEXT NOT NULL UNIQUE,
            config_info TEXT,
            funnel_info TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn create_user_data_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_data (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id   TEXT NOT NULL,
            user_id     TEXT NOT NULL,
            user_info   TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            UNIQUE(tenant_id, user_id)
        );
        CREATE INDEX IF NOT EXISTS idx_user_data_tenant
            ON user_data(tenant_id, updated_at DESC);",
    )?;
    Ok(())
}
