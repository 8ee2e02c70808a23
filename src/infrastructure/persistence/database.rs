use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Shared sqlite handle. The daemon keeps one pool; every repository clones
/// this wrapper.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        let pool = match SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                eprintln!("DIAG connect error: {:?}", e);
                return Err(e).context("Failed to connect to SQLite database");
            }
        };

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        // Lockouts: one hard, one cooldown, any number of symbol rows per
        // account. Non-symbol kinds store symbol as ''. Timestamps are unix
        // seconds; expires_at i64::MAX means manual-only.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lockouts (
                account_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                symbol TEXT NOT NULL DEFAULT '',
                reason TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (account_id, kind, symbol)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create lockouts table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_pnl (
                account_id INTEGER NOT NULL,
                session_date DATE NOT NULL,
                realized TEXT NOT NULL,
                PRIMARY KEY (account_id, session_date)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create daily_pnl table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_counts (
                account_id INTEGER NOT NULL,
                window_kind TEXT NOT NULL,
                window_start INTEGER NOT NULL,
                count INTEGER NOT NULL,
                PRIMARY KEY (account_id, window_kind, window_start)
            );
            CREATE INDEX IF NOT EXISTS idx_trade_counts_start
            ON trade_counts (window_start);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create trade_counts table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions_snapshot (
                account_id INTEGER NOT NULL,
                contract_id TEXT NOT NULL,
                side TEXT NOT NULL,
                size INTEGER NOT NULL,
                average_price TEXT NOT NULL,
                opened_at INTEGER NOT NULL,
                PRIMARY KEY (account_id, contract_id)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create positions_snapshot table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders_snapshot (
                account_id INTEGER NOT NULL,
                order_id INTEGER NOT NULL,
                contract_id TEXT NOT NULL,
                side TEXT NOT NULL,
                order_type TEXT NOT NULL,
                status TEXT NOT NULL,
                size INTEGER NOT NULL,
                limit_price TEXT,
                stop_price TEXT,
                fill_volume INTEGER NOT NULL DEFAULT 0,
                filled_price TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (account_id, order_id)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create orders_snapshot table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS enforcement_log (
                id TEXT PRIMARY KEY,
                account_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                target TEXT NOT NULL,
                generation INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                detail TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_enforcement_account_time
            ON enforcement_log (account_id, created_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create enforcement_log table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
