//! Balance rows guarded by per-row async mutexes; writes are buffered until commit.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::config::StoreConfig;
use crate::domain::{
    AccountDirectory, Balance, BalanceStore, Error, LedgerStore, Money, NewTransaction,
    NewTransfer, Result, Transaction, TransactionKind, TransactionLog, Transfer, TransferId,
    TransferStore, TransferWithLegs, UnitOfWork, UserId,
};

#[derive(Debug)]
struct Row {
    amount: Money,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Default)]
struct Tables {
    balances: HashMap<UserId, Row>,
    transactions: Vec<Transaction>,
    transfers: Vec<Transfer>,
}

#[derive(Debug)]
struct Shared {
    tables: RwLock<Tables>,
    transaction_seq: AtomicI64,
    transfer_seq: AtomicI64,
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    lock_timeout: Duration,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(StoreConfig::default().lock_timeout())
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::with_lock_timeout(config.lock_timeout())
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                transaction_seq: AtomicI64::new(1),
                transfer_seq: AtomicI64::new(1),
            }),
            lock_timeout,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first<T, K: Ord>(items: &mut [T], key: impl Fn(&T) -> K) {
    items.sort_by(|a, b| key(b).cmp(&key(a)));
}

#[async_trait]
impl AccountDirectory for MemoryStore {
    async fn user_exists(&self, user_id: UserId) -> Result<bool> {
        Ok(self.shared.tables.read().balances.contains_key(&user_id))
    }
}

#[async_trait]
impl BalanceStore for MemoryStore {
    async fn read(&self, user_id: UserId) -> Result<Option<Balance>> {
        let tables = self.shared.tables.read();
        Ok(tables.balances.get(&user_id).map(|row| Balance {
            user_id,
            amount: row.amount,
        }))
    }

    async fn exists(&self, user_id: UserId) -> Result<bool> {
        Ok(self.shared.tables.read().balances.contains_key(&user_id))
    }

    async fn create(&self, balance: Balance) -> Result<Balance> {
        balance.validate()?;
        let mut tables = self.shared.tables.write();
        if tables.balances.contains_key(&balance.user_id) {
            return Err(Error::Validation(format!(
                "Balance for user {} already exists",
                balance.user_id
            )));
        }
        tables.balances.insert(
            balance.user_id,
            Row {
                amount: balance.amount,
                lock: Arc::new(Mutex::new(())),
            },
        );
        Ok(balance)
    }

    async fn list(&self) -> Result<Vec<Balance>> {
        let tables = self.shared.tables.read();
        let mut balances: Vec<Balance> = tables
            .balances
            .iter()
            .map(|(user_id, row)| Balance {
                user_id: *user_id,
                amount: row.amount,
            })
            .collect();
        balances.sort_by_key(|balance| balance.user_id);
        Ok(balances)
    }
}

#[async_trait]
impl TransactionLog for MemoryStore {
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Transaction>> {
        let tables = self.shared.tables.read();
        let mut found: Vec<Transaction> = tables
            .transactions
            .iter()
            .filter(|tx| tx.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut found, |tx| (tx.created_at, tx.id));
        Ok(found)
    }

    async fn list_by_user_and_kind(
        &self,
        user_id: UserId,
        kind: TransactionKind,
    ) -> Result<Vec<Transaction>> {
        let tables = self.shared.tables.read();
        let mut found: Vec<Transaction> = tables
            .transactions
            .iter()
            .filter(|tx| tx.user_id == user_id && tx.kind == kind)
            .cloned()
            .collect();
        newest_first(&mut found, |tx| (tx.created_at, tx.id));
        Ok(found)
    }

    async fn list_by_transfer(&self, transfer_id: TransferId) -> Result<Vec<Transaction>> {
        let tables = self.shared.tables.read();
        let mut legs: Vec<Transaction> = tables
            .transactions
            .iter()
            .filter(|tx| tx.transfer_id == Some(transfer_id))
            .cloned()
            .collect();
        legs.sort_by_key(|tx| tx.id);
        Ok(legs)
    }
}

#[async_trait]
impl TransferStore for MemoryStore {
    async fn read(&self, transfer_id: TransferId) -> Result<Option<Transfer>> {
        let tables = self.shared.tables.read();
        Ok(tables
            .transfers
            .iter()
            .find(|transfer| transfer.id == transfer_id)
            .cloned())
    }

    async fn read_with_legs(&self, transfer_id: TransferId) -> Result<Option<TransferWithLegs>> {
        let Some(transfer) = TransferStore::read(self, transfer_id).await? else {
            return Ok(None);
        };
        let legs = self.list_by_transfer(transfer_id).await?;
        Ok(Some(TransferWithLegs { transfer, legs }))
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Transfer>> {
        self.select_transfers(|transfer| transfer.involves(user_id))
    }

    async fn list_by_sender(&self, user_id: UserId) -> Result<Vec<Transfer>> {
        self.select_transfers(|transfer| transfer.from_user_id == user_id)
    }

    async fn list_by_recipient(&self, user_id: UserId) -> Result<Vec<Transfer>> {
        self.select_transfers(|transfer| transfer.to_user_id == user_id)
    }
}

impl MemoryStore {
    fn select_transfers(&self, predicate: impl Fn(&Transfer) -> bool) -> Result<Vec<Transfer>> {
        let tables = self.shared.tables.read();
        let mut found: Vec<Transfer> = tables
            .transfers
            .iter()
            .filter(|transfer| predicate(transfer))
            .cloned()
            .collect();
        newest_first(&mut found, |transfer| (transfer.created_at, transfer.id));
        Ok(found)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Work = MemoryUnitOfWork;

    async fn begin(&self) -> Result<MemoryUnitOfWork> {
        Ok(MemoryUnitOfWork {
            shared: Arc::clone(&self.shared),
            lock_timeout: self.lock_timeout,
            locks: HashMap::new(),
            balances: HashMap::new(),
            transactions: Vec::new(),
            transfers: Vec::new(),
        })
    }
}

#[derive(Debug)]
pub struct MemoryUnitOfWork {
    shared: Arc<Shared>,
    lock_timeout: Duration,
    locks: HashMap<UserId, OwnedMutexGuard<()>>,
    balances: HashMap<UserId, Money>,
    transactions: Vec<Transaction>,
    transfers: Vec<Transfer>,
}

impl MemoryUnitOfWork {
    fn visible_balance(&self, user_id: UserId) -> Option<Balance> {
        if let Some(amount) = self.balances.get(&user_id) {
            return Some(Balance {
                user_id,
                amount: *amount,
            });
        }
        let tables = self.shared.tables.read();
        tables.balances.get(&user_id).map(|row| Balance {
            user_id,
            amount: row.amount,
        })
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn read_for_update(&mut self, user_id: UserId) -> Result<Option<Balance>> {
        if self.locks.contains_key(&user_id) {
            return Ok(self.visible_balance(user_id));
        }

        let lock = {
            let tables = self.shared.tables.read();
            match tables.balances.get(&user_id) {
                Some(row) => Arc::clone(&row.lock),
                None => return Ok(None),
            }
        };

        let guard = tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| {
                Error::Storage(format!(
                    "Lock wait timeout on balance of user {} after {:?}",
                    user_id, self.lock_timeout
                ))
            })?;
        debug!(user_id, "balance row locked");
        self.locks.insert(user_id, guard);

        Ok(self.visible_balance(user_id))
    }

    async fn write_balance(&mut self, balance: &Balance) -> Result<()> {
        if !self.locks.contains_key(&balance.user_id) {
            return Err(Error::Storage(format!(
                "Balance of user {} written without holding its row lock",
                balance.user_id
            )));
        }
        self.balances.insert(balance.user_id, balance.amount);
        Ok(())
    }

    async fn append(&mut self, transaction: NewTransaction) -> Result<Transaction> {
        transaction.validate()?;
        let id = self.shared.transaction_seq.fetch_add(1, Ordering::Relaxed);
        let transaction = transaction.into_transaction(id, Utc::now());
        self.transactions.push(transaction.clone());
        Ok(transaction)
    }

    async fn append_batch(&mut self, transactions: Vec<NewTransaction>) -> Result<()> {
        for transaction in &transactions {
            transaction.validate()?;
        }
        for transaction in transactions {
            self.append(transaction).await?;
        }
        Ok(())
    }

    async fn create_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer> {
        let id = self.shared.transfer_seq.fetch_add(1, Ordering::Relaxed);
        let transfer = transfer.into_transfer(id, Utc::now());
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn find_leg(
        &mut self,
        transfer_id: TransferId,
        user_id: UserId,
        kind: TransactionKind,
    ) -> Result<Option<Transaction>> {
        let is_leg = |tx: &&Transaction| {
            tx.transfer_id == Some(transfer_id) && tx.user_id == user_id && tx.kind == kind
        };
        if let Some(pending) = self.transactions.iter().find(is_leg) {
            return Ok(Some(pending.clone()));
        }
        let tables = self.shared.tables.read();
        Ok(tables.transactions.iter().find(is_leg).cloned())
    }

    async fn commit(self) -> Result<DateTime<Utc>> {
        let MemoryUnitOfWork {
            shared,
            locks,
            balances,
            mut transactions,
            mut transfers,
            ..
        } = self;

        let committed_at = {
            let mut tables = shared.tables.write();
            if let Some(missing) = balances
                .keys()
                .find(|user_id| !tables.balances.contains_key(user_id))
            {
                return Err(Error::Storage(format!(
                    "Balance row of user {} vanished before commit",
                    missing
                )));
            }
            for (user_id, amount) in balances {
                if let Some(row) = tables.balances.get_mut(&user_id) {
                    row.amount = amount;
                }
            }
            // Rows are stamped with the moment they become visible.
            let committed_at = Utc::now();
            for transaction in &mut transactions {
                transaction.created_at = committed_at;
            }
            for transfer in &mut transfers {
                transfer.created_at = committed_at;
            }
            tables.transactions.extend(transactions);
            tables.transfers.extend(transfers);
            committed_at
        };

        debug!(released = locks.len(), "unit of work committed");
        drop(locks);
        Ok(committed_at)
    }

    async fn rollback(self) -> Result<()> {
        debug!(
            released = self.locks.len(),
            discarded = self.transactions.len(),
            "unit of work rolled back"
        );
        Ok(())
    }
}
