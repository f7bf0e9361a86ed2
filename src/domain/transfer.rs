use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Money, Transaction, TransferId, UserId};

/// Metadata linking the two legs of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub amount: Money,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub amount: Money,
    pub comment: Option<String>,
}

impl NewTransfer {
    pub fn into_transfer(self, id: TransferId, created_at: DateTime<Utc>) -> Transfer {
        Transfer {
            id,
            from_user_id: self.from_user_id,
            to_user_id: self.to_user_id,
            amount: self.amount,
            comment: self.comment,
            created_at,
        }
    }
}

impl Transfer {
    pub fn involves(&self, user_id: UserId) -> bool {
        self.from_user_id == user_id || self.to_user_id == user_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferWithLegs {
    pub transfer: Transfer,
    pub legs: Vec<Transaction>,
}
