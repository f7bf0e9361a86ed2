use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Error, Money, TransactionId, TransferId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    TransferOut,
    TransferIn,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdraw => "withdraw",
            TransactionKind::TransferOut => "transfer_out",
            TransactionKind::TransferIn => "transfer_in",
        }
    }

    pub fn is_transfer_leg(&self) -> bool {
        matches!(self, TransactionKind::TransferOut | TransactionKind::TransferIn)
    }
}

impl FromStr for TransactionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionKind::Deposit),
            "withdraw" => Ok(TransactionKind::Withdraw),
            "transfer_out" => Ok(TransactionKind::TransferOut),
            "transfer_in" => Ok(TransactionKind::TransferIn),
            other => Err(Error::Validation(format!(
                "Invalid transaction type: {}",
                other
            ))),
        }
    }
}

impl core::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable ledger entry. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub amount: Money,
    pub comment: Option<String>,
    pub transfer_id: Option<TransferId>,
    pub created_at: DateTime<Utc>,
}

/// A transaction not yet appended to the log.
///
/// Built through the per-kind constructors so that `transfer_id` is present exactly for
/// transfer legs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub amount: Money,
    pub comment: Option<String>,
    pub transfer_id: Option<TransferId>,
}

impl NewTransaction {
    pub fn deposit(user_id: UserId, amount: Money, comment: Option<String>) -> Self {
        Self {
            user_id,
            kind: TransactionKind::Deposit,
            amount,
            comment,
            transfer_id: None,
        }
    }

    pub fn withdraw(user_id: UserId, amount: Money, comment: Option<String>) -> Self {
        Self {
            user_id,
            kind: TransactionKind::Withdraw,
            amount,
            comment,
            transfer_id: None,
        }
    }

    pub fn transfer_out(
        transfer_id: TransferId,
        user_id: UserId,
        amount: Money,
        comment: Option<String>,
    ) -> Self {
        Self {
            user_id,
            kind: TransactionKind::TransferOut,
            amount,
            comment,
            transfer_id: Some(transfer_id),
        }
    }

    pub fn transfer_in(
        transfer_id: TransferId,
        user_id: UserId,
        amount: Money,
        comment: Option<String>,
    ) -> Self {
        Self {
            user_id,
            kind: TransactionKind::TransferIn,
            amount,
            comment,
            transfer_id: Some(transfer_id),
        }
    }

    /// Rejects records a store must never persist.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.amount.is_positive() {
            return Err(Error::Validation(format!(
                "Transaction amount must be positive, got {}",
                self.amount
            )));
        }
        if self.kind.is_transfer_leg() != self.transfer_id.is_some() {
            return Err(Error::Validation(format!(
                "{} transaction for user {} has inconsistent transfer reference",
                self.kind, self.user_id
            )));
        }
        Ok(())
    }

    pub fn into_transaction(self, id: TransactionId, created_at: DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            user_id: self.user_id,
            kind: self.kind,
            amount: self.amount,
            comment: self.comment,
            transfer_id: self.transfer_id,
            created_at,
        }
    }
}

impl core::fmt::Display for Transaction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.transfer_id {
            Some(transfer_id) => write!(
                f,
                "{},user={},tx={},transfer={},amount={}",
                self.kind, self.user_id, self.id, transfer_id, self.amount
            ),
            None => write!(
                f,
                "{},user={},tx={},amount={}",
                self.kind, self.user_id, self.id, self.amount
            ),
        }
    }
}
