use serde::{Deserialize, Serialize};

use crate::domain::{Error, Money, Result, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: UserId,
    pub amount: Money,
}

impl Balance {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            amount: Money::ZERO,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.amount < Money::ZERO {
            return Err(Error::Validation(format!(
                "Balance of user {} cannot be negative, got {}",
                self.user_id, self.amount
            )));
        }
        Ok(())
    }
}
