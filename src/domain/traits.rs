use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;

use crate::domain::{
    Balance, Error, LedgerCommand, NewTransaction, NewTransfer, Result, Transaction,
    TransactionKind, Transfer, TransferId, TransferWithLegs, UserId,
};

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn user_exists(&self, user_id: UserId) -> Result<bool>;
}

#[async_trait]
pub trait BalanceStore: Send + Sync {
    async fn read(&self, user_id: UserId) -> Result<Option<Balance>>;

    async fn exists(&self, user_id: UserId) -> Result<bool>;

    async fn create(&self, balance: Balance) -> Result<Balance>;

    /// Every balance row, ascending by user id.
    async fn list(&self) -> Result<Vec<Balance>>;
}

#[async_trait]
pub trait TransactionLog: Send + Sync {
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Transaction>>;

    async fn list_by_user_and_kind(
        &self,
        user_id: UserId,
        kind: TransactionKind,
    ) -> Result<Vec<Transaction>>;

    async fn list_by_transfer(&self, transfer_id: TransferId) -> Result<Vec<Transaction>>;
}

#[async_trait]
pub trait TransferStore: Send + Sync {
    async fn read(&self, transfer_id: TransferId) -> Result<Option<Transfer>>;

    async fn read_with_legs(&self, transfer_id: TransferId) -> Result<Option<TransferWithLegs>>;

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Transfer>>;

    async fn list_by_sender(&self, user_id: UserId) -> Result<Vec<Transfer>>;

    async fn list_by_recipient(&self, user_id: UserId) -> Result<Vec<Transfer>>;
}

/// Row locks are held until `commit` or `rollback`. Dropping without committing discards all writes.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn read_for_update(&mut self, user_id: UserId) -> Result<Option<Balance>>;

    async fn write_balance(&mut self, balance: &Balance) -> Result<()>;

    async fn append(&mut self, transaction: NewTransaction) -> Result<Transaction>;

    async fn append_batch(&mut self, transactions: Vec<NewTransaction>) -> Result<()>;

    async fn create_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer>;

    async fn find_leg(
        &mut self,
        transfer_id: TransferId,
        user_id: UserId,
        kind: TransactionKind,
    ) -> Result<Option<Transaction>>;

    async fn commit(self) -> Result<DateTime<Utc>>;

    async fn rollback(self) -> Result<()>;
}

#[async_trait]
pub trait LedgerStore: BalanceStore + TransactionLog + TransferStore {
    type Work: UnitOfWork;

    async fn begin(&self) -> Result<Self::Work>;
}

pub trait CommandStream {
    type CommandStream: Stream<Item = Result<LedgerCommand>> + Send + Unpin + 'static;
    fn stream(&mut self) -> Self::CommandStream;
}

pub trait DeadLetterQueue {
    fn report(&self, error: &Error);
}
