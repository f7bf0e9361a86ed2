use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{Money, Transaction, Transfer, UserId};

pub const DEPOSIT_MESSAGE: &str = "balance topped up";
pub const WITHDRAW_MESSAGE: &str = "funds withdrawn";
pub const TRANSFER_MESSAGE: &str = "transfer completed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceView {
    pub user_id: UserId,
    pub amount: Money,
}

/// Result of a committed deposit or withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovementReceipt {
    pub user_id: UserId,
    pub new_balance: Money,
    pub amount: Money,
    pub message: &'static str,
    pub transaction: Transaction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub from_new_balance: Money,
    pub to_new_balance: Money,
    pub amount: Money,
    pub message: &'static str,
    pub transfer: Transfer,
    pub outgoing: Transaction,
    pub incoming: Transaction,
}

/// Copies the commit timestamp onto the rows a receipt carries.
pub trait Stamp {
    fn stamp(&mut self, committed_at: DateTime<Utc>);
}

impl Stamp for MovementReceipt {
    fn stamp(&mut self, committed_at: DateTime<Utc>) {
        self.transaction.created_at = committed_at;
    }
}

impl Stamp for TransferReceipt {
    fn stamp(&mut self, committed_at: DateTime<Utc>) {
        self.transfer.created_at = committed_at;
        self.outgoing.created_at = committed_at;
        self.incoming.created_at = committed_at;
    }
}
