//! PostgreSQL backing store.
//!
//! Expects the following tables (schema management lives outside this crate):
//!
//! - `users (id BIGINT PRIMARY KEY, ...)`
//! - `balances (user_id BIGINT PRIMARY KEY REFERENCES users, amount NUMERIC(15,2), updated_at TIMESTAMPTZ)`
//! - `transfers (id BIGSERIAL, from_user_id, to_user_id, amount NUMERIC(15,2), comment TEXT, created_at TIMESTAMPTZ NOT NULL)`
//! - `transactions (id BIGSERIAL, user_id, "type" TEXT, amount NUMERIC(15,2), comment TEXT, transfer_id BIGINT NULL, created_at TIMESTAMPTZ NOT NULL)`
//!
//! Row locks are `SELECT ... FOR UPDATE`; the wait is bounded by `SET LOCAL lock_timeout`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::debug;

use crate::config::StoreConfig;
use crate::domain::{
    AccountDirectory, Balance, BalanceStore, Error, LedgerStore, Money, NewTransaction,
    NewTransfer, Result, Transaction, TransactionKind, TransactionLog, Transfer, TransferId,
    TransferStore, TransferWithLegs, UnitOfWork, UserId,
};

const TRANSACTION_COLUMNS: &str =
    r#"id, user_id, "type", amount, comment, transfer_id, created_at"#;
const TRANSFER_COLUMNS: &str = "id, from_user_id, to_user_id, amount, comment, created_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let url = config.database_url.as_deref().ok_or_else(|| {
            Error::Config("store.database_url is required for the postgres backend".to_string())
        })?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool, config.lock_timeout()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn select_transactions(
        &self,
        filter: &str,
        user_id: UserId,
        kind: Option<TransactionKind>,
    ) -> Result<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE {} ORDER BY created_at DESC, id DESC",
            TRANSACTION_COLUMNS, filter
        );
        let mut query = sqlx::query(&sql).bind(user_id);
        if let Some(kind) = kind {
            query = query.bind(kind.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn select_transfers(&self, filter: &str, user_id: UserId) -> Result<Vec<Transfer>> {
        let sql = format!(
            "SELECT {} FROM transfers WHERE {} ORDER BY created_at DESC, id DESC",
            TRANSFER_COLUMNS, filter
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(transfer_from_row).collect()
    }
}

fn money_from(row: &PgRow, column: &str) -> Result<Money> {
    let value: Decimal = row.try_get(column)?;
    Money::from_decimal(value).ok_or_else(|| {
        Error::Storage(format!(
            "Column {} holds an amount finer than a cent: {}",
            column, value
        ))
    })
}

fn balance_from_row(row: &PgRow) -> Result<Balance> {
    Ok(Balance {
        user_id: row.try_get("user_id")?,
        amount: money_from(row, "amount")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    let kind: String = row.try_get("type")?;
    let kind = kind
        .parse::<TransactionKind>()
        .map_err(|_| Error::Storage(format!("Unknown transaction type in log: {}", kind)))?;
    Ok(Transaction {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        kind,
        amount: money_from(row, "amount")?,
        comment: row.try_get("comment")?,
        transfer_id: row.try_get("transfer_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn transfer_from_row(row: &PgRow) -> Result<Transfer> {
    Ok(Transfer {
        id: row.try_get("id")?,
        from_user_id: row.try_get("from_user_id")?,
        to_user_id: row.try_get("to_user_id")?,
        amount: money_from(row, "amount")?,
        comment: row.try_get("comment")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl AccountDirectory for PgStore {
    async fn user_exists(&self, user_id: UserId) -> Result<bool> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

#[async_trait]
impl BalanceStore for PgStore {
    async fn read(&self, user_id: UserId) -> Result<Option<Balance>> {
        let row = sqlx::query("SELECT user_id, amount FROM balances WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(balance_from_row).transpose()
    }

    async fn exists(&self, user_id: UserId) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM balances WHERE user_id = $1)",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn create(&self, balance: Balance) -> Result<Balance> {
        balance.validate()?;
        let row = sqlx::query(
            r#"
            INSERT INTO balances (user_id, amount, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id) DO NOTHING
            RETURNING user_id, amount
            "#,
        )
        .bind(balance.user_id)
        .bind(balance.amount.to_decimal())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => balance_from_row(&row),
            None => Err(Error::Validation(format!(
                "Balance for user {} already exists",
                balance.user_id
            ))),
        }
    }

    async fn list(&self) -> Result<Vec<Balance>> {
        let rows = sqlx::query("SELECT user_id, amount FROM balances ORDER BY user_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(balance_from_row).collect()
    }
}

#[async_trait]
impl TransactionLog for PgStore {
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Transaction>> {
        self.select_transactions("user_id = $1", user_id, None)
            .await
    }

    async fn list_by_user_and_kind(
        &self,
        user_id: UserId,
        kind: TransactionKind,
    ) -> Result<Vec<Transaction>> {
        self.select_transactions(r#"user_id = $1 AND "type" = $2"#, user_id, Some(kind))
            .await
    }

    async fn list_by_transfer(&self, transfer_id: TransferId) -> Result<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE transfer_id = $1 ORDER BY id",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(transfer_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(transaction_from_row).collect()
    }
}

#[async_trait]
impl TransferStore for PgStore {
    async fn read(&self, transfer_id: TransferId) -> Result<Option<Transfer>> {
        let sql = format!("SELECT {} FROM transfers WHERE id = $1", TRANSFER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(transfer_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(transfer_from_row).transpose()
    }

    async fn read_with_legs(&self, transfer_id: TransferId) -> Result<Option<TransferWithLegs>> {
        let Some(transfer) = TransferStore::read(self, transfer_id).await? else {
            return Ok(None);
        };
        let legs = self.list_by_transfer(transfer_id).await?;
        Ok(Some(TransferWithLegs { transfer, legs }))
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Transfer>> {
        self.select_transfers("from_user_id = $1 OR to_user_id = $1", user_id)
            .await
    }

    async fn list_by_sender(&self, user_id: UserId) -> Result<Vec<Transfer>> {
        self.select_transfers("from_user_id = $1", user_id).await
    }

    async fn list_by_recipient(&self, user_id: UserId) -> Result<Vec<Transfer>> {
        self.select_transfers("to_user_id = $1", user_id).await
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    type Work = PgUnitOfWork;

    async fn begin(&self) -> Result<PgUnitOfWork> {
        let mut tx = self.pool.begin().await?;
        // SET does not take bind parameters; the value is an integer we formatted ourselves.
        let statement = format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        );
        sqlx::query(&statement).execute(&mut *tx).await?;
        Ok(PgUnitOfWork { tx })
    }
}

/// A database transaction. Dropping it without commit rolls back.
pub struct PgUnitOfWork {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn read_for_update(&mut self, user_id: UserId) -> Result<Option<Balance>> {
        let row = sqlx::query("SELECT user_id, amount FROM balances WHERE user_id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        debug!(user_id, found = row.is_some(), "balance row locked");
        row.as_ref().map(balance_from_row).transpose()
    }

    async fn write_balance(&mut self, balance: &Balance) -> Result<()> {
        let result = sqlx::query(
            "UPDATE balances SET amount = $1, updated_at = NOW() WHERE user_id = $2",
        )
        .bind(balance.amount.to_decimal())
        .bind(balance.user_id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Storage(format!(
                "Balance row of user {} vanished before write",
                balance.user_id
            )));
        }
        Ok(())
    }

    async fn append(&mut self, transaction: NewTransaction) -> Result<Transaction> {
        transaction.validate()?;
        let sql = format!(
            r#"
            INSERT INTO transactions (user_id, "type", amount, comment, transfer_id, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(transaction.user_id)
            .bind(transaction.kind.as_str())
            .bind(transaction.amount.to_decimal())
            .bind(transaction.comment)
            .bind(transaction.transfer_id)
            .fetch_one(&mut *self.tx)
            .await?;
        transaction_from_row(&row)
    }

    async fn append_batch(&mut self, transactions: Vec<NewTransaction>) -> Result<()> {
        for transaction in &transactions {
            transaction.validate()?;
        }
        if transactions.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            r#"INSERT INTO transactions (user_id, "type", amount, comment, transfer_id, created_at) "#,
        );
        builder.push_values(transactions, |mut row, transaction| {
            row.push_bind(transaction.user_id)
                .push_bind(transaction.kind.as_str())
                .push_bind(transaction.amount.to_decimal())
                .push_bind(transaction.comment)
                .push_bind(transaction.transfer_id)
                .push("NOW()");
        });
        builder.build().execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn create_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer> {
        let sql = format!(
            r#"
            INSERT INTO transfers (from_user_id, to_user_id, amount, comment, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING {}
            "#,
            TRANSFER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(transfer.from_user_id)
            .bind(transfer.to_user_id)
            .bind(transfer.amount.to_decimal())
            .bind(transfer.comment)
            .fetch_one(&mut *self.tx)
            .await?;
        transfer_from_row(&row)
    }

    async fn find_leg(
        &mut self,
        transfer_id: TransferId,
        user_id: UserId,
        kind: TransactionKind,
    ) -> Result<Option<Transaction>> {
        let sql = format!(
            r#"SELECT {} FROM transactions WHERE transfer_id = $1 AND user_id = $2 AND "type" = $3"#,
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(transfer_id)
            .bind(user_id)
            .bind(kind.as_str())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn commit(mut self) -> Result<DateTime<Utc>> {
        // NOW() is fixed for the whole transaction, so this matches every row it stamped.
        let committed_at: DateTime<Utc> = sqlx::query_scalar("SELECT NOW()")
            .fetch_one(&mut *self.tx)
            .await?;
        self.tx.commit().await?;
        Ok(committed_at)
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
