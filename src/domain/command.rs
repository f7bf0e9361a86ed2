use crate::domain::{Money, UserId};

/// A request to the ledger, as replayed from an input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCommand {
    Open {
        user_id: UserId,
    },
    Deposit {
        user_id: UserId,
        amount: Money,
        comment: Option<String>,
    },
    Withdraw {
        user_id: UserId,
        amount: Money,
        comment: Option<String>,
    },
    Transfer {
        from_user_id: UserId,
        to_user_id: UserId,
        amount: Money,
        comment: Option<String>,
    },
}

impl core::fmt::Display for LedgerCommand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LedgerCommand::Open { user_id } => write!(f, "open,user={}", user_id),
            LedgerCommand::Deposit { user_id, amount, .. } => {
                write!(f, "deposit,user={},amount={}", user_id, amount)
            }
            LedgerCommand::Withdraw { user_id, amount, .. } => {
                write!(f, "withdraw,user={},amount={}", user_id, amount)
            }
            LedgerCommand::Transfer {
                from_user_id,
                to_user_id,
                amount,
                ..
            } => write!(
                f,
                "transfer,from={},to={},amount={}",
                from_user_id, to_user_id, amount
            ),
        }
    }
}
