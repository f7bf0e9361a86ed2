pub mod balance;
pub mod command;
pub mod error;
pub mod money;
pub mod receipt;
pub mod traits;
pub mod transaction;
pub mod transfer;

pub type UserId = i64;
pub type TransactionId = i64;
pub type TransferId = i64;

pub use balance::Balance;
pub use command::LedgerCommand;
pub use error::{Error, Result};
pub use money::Money;
pub use receipt::{BalanceView, MovementReceipt, Stamp, TransferReceipt};
pub use traits::{
    AccountDirectory, BalanceStore, CommandStream, DeadLetterQueue, LedgerStore, TransactionLog,
    TransferStore, UnitOfWork,
};
pub use transaction::{NewTransaction, Transaction, TransactionKind};
pub use transfer::{NewTransfer, Transfer, TransferWithLegs};
