use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::config::LedgerConfig;
use crate::domain::receipt::{DEPOSIT_MESSAGE, TRANSFER_MESSAGE, WITHDRAW_MESSAGE};
use crate::domain::{
    AccountDirectory, Balance, BalanceStore, BalanceView, CommandStream, DeadLetterQueue, Error,
    LedgerCommand, LedgerStore, Money, MovementReceipt, NewTransaction, NewTransfer, Result, Stamp,
    Transaction, TransactionKind, TransactionLog, Transfer, TransferId, TransferReceipt,
    TransferStore, TransferWithLegs, UnitOfWork, UserId,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub applied: usize,
    pub rejected: usize,
}

#[derive(Debug)]
pub struct Ledger<S, A>
where
    S: LedgerStore,
    A: AccountDirectory,
{
    store: S,
    accounts: A,
    rules: LedgerConfig,
}

impl<S, A> Ledger<S, A>
where
    S: LedgerStore,
    A: AccountDirectory,
{
    pub fn new(store: S, accounts: A) -> Self {
        Self::with_rules(store, accounts, LedgerConfig::default())
    }

    pub fn with_rules(store: S, accounts: A, rules: LedgerConfig) -> Self {
        Self {
            store,
            accounts,
            rules,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn open_account(&self, user_id: UserId) -> Result<BalanceView> {
        let balance = BalanceStore::create(&self.store, Balance::new(user_id)).await?;
        info!(user_id, "balance opened");
        Ok(BalanceView {
            user_id: balance.user_id,
            amount: balance.amount,
        })
    }

    pub async fn deposit(
        &self,
        user_id: UserId,
        amount: Money,
        comment: Option<String>,
    ) -> Result<MovementReceipt> {
        let result = self.try_deposit(user_id, amount, comment).await;
        match &result {
            Ok(receipt) => info!(
                user_id,
                amount = %amount,
                new_balance = %receipt.new_balance,
                transaction_id = receipt.transaction.id,
                "deposit committed"
            ),
            Err(err) => log_rejection("deposit", err),
        }
        result
    }

    async fn try_deposit(
        &self,
        user_id: UserId,
        amount: Money,
        comment: Option<String>,
    ) -> Result<MovementReceipt> {
        check_amount(amount)?;
        let comment = self.normalize_comment(comment)?;
        self.ensure_user(user_id).await?;

        let mut work = self.store.begin().await?;
        let outcome = apply_deposit(&mut work, user_id, amount, comment).await;
        settle(work, outcome).await
    }

    pub async fn withdraw(
        &self,
        user_id: UserId,
        amount: Money,
        comment: Option<String>,
    ) -> Result<MovementReceipt> {
        let result = self.try_withdraw(user_id, amount, comment).await;
        match &result {
            Ok(receipt) => info!(
                user_id,
                amount = %amount,
                new_balance = %receipt.new_balance,
                transaction_id = receipt.transaction.id,
                "withdrawal committed"
            ),
            Err(err) => log_rejection("withdraw", err),
        }
        result
    }

    async fn try_withdraw(
        &self,
        user_id: UserId,
        amount: Money,
        comment: Option<String>,
    ) -> Result<MovementReceipt> {
        check_amount(amount)?;
        let comment = self.normalize_comment(comment)?;
        self.ensure_user(user_id).await?;

        let mut work = self.store.begin().await?;
        let outcome = apply_withdraw(&mut work, user_id, amount, comment).await;
        settle(work, outcome).await
    }

    pub async fn transfer(
        &self,
        from_user_id: UserId,
        to_user_id: UserId,
        amount: Money,
        comment: Option<String>,
    ) -> Result<TransferReceipt> {
        let result = self
            .try_transfer(from_user_id, to_user_id, amount, comment)
            .await;
        match &result {
            Ok(receipt) => info!(
                from_user_id,
                to_user_id,
                amount = %amount,
                transfer_id = receipt.transfer.id,
                "transfer committed"
            ),
            Err(err) => log_rejection("transfer", err),
        }
        result
    }

    async fn try_transfer(
        &self,
        from_user_id: UserId,
        to_user_id: UserId,
        amount: Money,
        comment: Option<String>,
    ) -> Result<TransferReceipt> {
        if from_user_id == to_user_id {
            return Err(Error::SelfTransfer {
                user_id: from_user_id,
            });
        }
        check_amount(amount)?;
        let comment = self.normalize_comment(comment)?;
        self.ensure_user(from_user_id).await?;
        self.ensure_user(to_user_id).await?;

        let mut work = self.store.begin().await?;
        let outcome = apply_transfer(&mut work, from_user_id, to_user_id, amount, comment).await;
        settle(work, outcome).await
    }

    /// Unlocked read.
    pub async fn balance(&self, user_id: UserId) -> Result<BalanceView> {
        let balance = BalanceStore::read(&self.store, user_id)
            .await?
            .ok_or(Error::UserNotFound { user_id })?;
        Ok(BalanceView {
            user_id: balance.user_id,
            amount: balance.amount,
        })
    }

    pub async fn history(&self, user_id: UserId) -> Result<Vec<Transaction>> {
        self.ensure_user(user_id).await?;
        TransactionLog::list_by_user(&self.store, user_id).await
    }

    pub async fn transactions_by_kind(
        &self,
        user_id: UserId,
        kind: TransactionKind,
    ) -> Result<Vec<Transaction>> {
        self.ensure_user(user_id).await?;
        self.store.list_by_user_and_kind(user_id, kind).await
    }

    pub async fn deposits(&self, user_id: UserId) -> Result<Vec<Transaction>> {
        self.transactions_by_kind(user_id, TransactionKind::Deposit)
            .await
    }

    pub async fn withdrawals(&self, user_id: UserId) -> Result<Vec<Transaction>> {
        self.transactions_by_kind(user_id, TransactionKind::Withdraw)
            .await
    }

    pub async fn outgoing_transfers(&self, user_id: UserId) -> Result<Vec<Transaction>> {
        self.transactions_by_kind(user_id, TransactionKind::TransferOut)
            .await
    }

    pub async fn incoming_transfers(&self, user_id: UserId) -> Result<Vec<Transaction>> {
        self.transactions_by_kind(user_id, TransactionKind::TransferIn)
            .await
    }

    pub async fn transfer_details(&self, transfer_id: TransferId) -> Result<TransferWithLegs> {
        self.store
            .read_with_legs(transfer_id)
            .await?
            .ok_or(Error::TransferNotFound { transfer_id })
    }

    pub async fn transfers_for_user(&self, user_id: UserId) -> Result<Vec<Transfer>> {
        self.ensure_user(user_id).await?;
        TransferStore::list_by_user(&self.store, user_id).await
    }

    pub async fn sent_transfers(&self, user_id: UserId) -> Result<Vec<Transfer>> {
        self.ensure_user(user_id).await?;
        self.store.list_by_sender(user_id).await
    }

    pub async fn received_transfers(&self, user_id: UserId) -> Result<Vec<Transfer>> {
        self.ensure_user(user_id).await?;
        self.store.list_by_recipient(user_id).await
    }

    pub async fn apply(&self, command: LedgerCommand) -> Result<()> {
        match command {
            LedgerCommand::Open { user_id } => self.open_account(user_id).await.map(|_| ()),
            LedgerCommand::Deposit {
                user_id,
                amount,
                comment,
            } => self.deposit(user_id, amount, comment).await.map(|_| ()),
            LedgerCommand::Withdraw {
                user_id,
                amount,
                comment,
            } => self.withdraw(user_id, amount, comment).await.map(|_| ()),
            LedgerCommand::Transfer {
                from_user_id,
                to_user_id,
                amount,
                comment,
            } => self
                .transfer(from_user_id, to_user_id, amount, comment)
                .await
                .map(|_| ()),
        }
    }

    pub async fn process<I, D>(&self, ingestion: &mut I, dlq: &D) -> Result<ReplaySummary>
    where
        I: CommandStream,
        D: DeadLetterQueue,
    {
        let mut commands = ingestion.stream();
        let mut summary = ReplaySummary::default();

        while let Some(command) = commands.next().await {
            let outcome = match command {
                Ok(command) => {
                    debug!(%command, "applying command");
                    self.apply(command).await
                }
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => summary.applied += 1,
                Err(e) => {
                    summary.rejected += 1;
                    dlq.report(&e);
                }
            }
        }

        Ok(summary)
    }

    async fn ensure_user(&self, user_id: UserId) -> Result<()> {
        if self.accounts.user_exists(user_id).await? {
            Ok(())
        } else {
            Err(Error::UserNotFound { user_id })
        }
    }

    fn normalize_comment(&self, comment: Option<String>) -> Result<Option<String>> {
        let Some(comment) = comment else {
            return Ok(None);
        };
        let trimmed = comment.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let len = trimmed.chars().count();
        if len > self.rules.max_comment_len {
            return Err(Error::Validation(format!(
                "Comment is {} characters long, at most {} allowed",
                len, self.rules.max_comment_len
            )));
        }
        Ok(Some(trimmed.to_string()))
    }
}

fn check_amount(amount: Money) -> Result<()> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "Amount must be positive, got {}",
            amount
        )))
    }
}

fn log_rejection(operation: &'static str, err: &Error) {
    if err.is_retryable() {
        error!(operation, error = %err, "ledger operation rolled back");
    } else {
        warn!(operation, error = %err, "ledger operation rejected");
    }
}

async fn settle<W, T>(work: W, outcome: Result<T>) -> Result<T>
where
    W: UnitOfWork,
    T: Stamp,
{
    match outcome {
        Ok(mut value) => {
            let committed_at = work.commit().await?;
            value.stamp(committed_at);
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = work.rollback().await {
                error!(error = %rollback_err, cause = %err, "rollback failed");
            }
            Err(err)
        }
    }
}

async fn lock_balance<W: UnitOfWork>(work: &mut W, user_id: UserId) -> Result<Balance> {
    work.read_for_update(user_id)
        .await?
        .ok_or(Error::UserNotFound { user_id })
}

fn overflow(user_id: UserId) -> Error {
    Error::Validation(format!("Balance of user {} would overflow", user_id))
}

async fn apply_deposit<W: UnitOfWork>(
    work: &mut W,
    user_id: UserId,
    amount: Money,
    comment: Option<String>,
) -> Result<MovementReceipt> {
    let mut balance = lock_balance(work, user_id).await?;
    balance.amount = balance
        .amount
        .checked_add(amount)
        .ok_or_else(|| overflow(user_id))?;
    work.write_balance(&balance).await?;

    let transaction = work
        .append(NewTransaction::deposit(user_id, amount, comment))
        .await?;

    Ok(MovementReceipt {
        user_id,
        new_balance: balance.amount,
        amount,
        message: DEPOSIT_MESSAGE,
        transaction,
    })
}

async fn apply_withdraw<W: UnitOfWork>(
    work: &mut W,
    user_id: UserId,
    amount: Money,
    comment: Option<String>,
) -> Result<MovementReceipt> {
    // The row lock is held from this check until commit.
    let mut balance = lock_balance(work, user_id).await?;
    if balance.amount < amount {
        return Err(Error::InsufficientFunds {
            user_id,
            balance: balance.amount,
            requested: amount,
        });
    }
    balance.amount = balance
        .amount
        .checked_sub(amount)
        .ok_or_else(|| overflow(user_id))?;
    work.write_balance(&balance).await?;

    let transaction = work
        .append(NewTransaction::withdraw(user_id, amount, comment))
        .await?;

    Ok(MovementReceipt {
        user_id,
        new_balance: balance.amount,
        amount,
        message: WITHDRAW_MESSAGE,
        transaction,
    })
}

async fn apply_transfer<W: UnitOfWork>(
    work: &mut W,
    from_user_id: UserId,
    to_user_id: UserId,
    amount: Money,
    comment: Option<String>,
) -> Result<TransferReceipt> {
    let sender_first = from_user_id < to_user_id;
    let (low, high) = if sender_first {
        (from_user_id, to_user_id)
    } else {
        (to_user_id, from_user_id)
    };
    let low_balance = lock_balance(work, low).await?;
    let high_balance = lock_balance(work, high).await?;
    let (mut sender, mut recipient) = if sender_first {
        (low_balance, high_balance)
    } else {
        (high_balance, low_balance)
    };

    if sender.amount < amount {
        return Err(Error::InsufficientFunds {
            user_id: from_user_id,
            balance: sender.amount,
            requested: amount,
        });
    }

    let transfer = work
        .create_transfer(NewTransfer {
            from_user_id,
            to_user_id,
            amount,
            comment: comment.clone(),
        })
        .await?;
    work.append_batch(vec![
        NewTransaction::transfer_out(transfer.id, from_user_id, amount, comment.clone()),
        NewTransaction::transfer_in(transfer.id, to_user_id, amount, comment),
    ])
    .await?;

    sender.amount = sender
        .amount
        .checked_sub(amount)
        .ok_or_else(|| overflow(from_user_id))?;
    recipient.amount = recipient
        .amount
        .checked_add(amount)
        .ok_or_else(|| overflow(to_user_id))?;
    work.write_balance(&sender).await?;
    work.write_balance(&recipient).await?;

    let outgoing = find_leg(work, transfer.id, from_user_id, TransactionKind::TransferOut).await?;
    let incoming = find_leg(work, transfer.id, to_user_id, TransactionKind::TransferIn).await?;

    Ok(TransferReceipt {
        from_user_id,
        to_user_id,
        from_new_balance: sender.amount,
        to_new_balance: recipient.amount,
        amount,
        message: TRANSFER_MESSAGE,
        transfer,
        outgoing,
        incoming,
    })
}

async fn find_leg<W: UnitOfWork>(
    work: &mut W,
    transfer_id: TransferId,
    user_id: UserId,
    kind: TransactionKind,
) -> Result<Transaction> {
    work.find_leg(transfer_id, user_id, kind)
        .await?
        .ok_or_else(|| {
            Error::Storage(format!(
                "Transfer {} is missing its {} leg for user {}",
                transfer_id, kind, user_id
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn money(s: &str) -> Money {
        s.parse().unwrap()
    }

    async fn ledger_with(users: &[(UserId, &str)]) -> Ledger<MemoryStore, MemoryStore> {
        let store = MemoryStore::new();
        let ledger = Ledger::new(store.clone(), store);
        for (user_id, amount) in users {
            ledger.open_account(*user_id).await.unwrap();
            let amount = money(amount);
            if amount.is_positive() {
                ledger.deposit(*user_id, amount, None).await.unwrap();
            }
        }
        ledger
    }

    #[tokio::test]
    async fn deposit_on_zero_balance() {
        let ledger = ledger_with(&[(1, "0")]).await;

        let receipt = ledger.deposit(1, money("100.00"), None).await.unwrap();

        assert_eq!(receipt.new_balance, money("100.00"));
        assert_eq!(receipt.amount, money("100.00"));
        assert_eq!(receipt.message, DEPOSIT_MESSAGE);
        assert_eq!(receipt.transaction.kind, TransactionKind::Deposit);
        assert_eq!(receipt.transaction.user_id, 1);
        assert_eq!(receipt.transaction.transfer_id, None);

        let history = ledger.history(1).await.unwrap();
        assert_eq!(history, vec![receipt.transaction]);
    }

    #[tokio::test]
    async fn withdraw_beyond_balance_changes_nothing() {
        let ledger = ledger_with(&[(1, "100.00")]).await;

        let err = ledger.withdraw(1, money("150.00"), None).await.unwrap_err();

        match err {
            Error::InsufficientFunds {
                user_id,
                balance,
                requested,
            } => {
                assert_eq!(user_id, 1);
                assert_eq!(balance, money("100.00"));
                assert_eq!(requested, money("150.00"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ledger.balance(1).await.unwrap().amount, money("100.00"));
        assert!(ledger.withdrawals(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn withdraw_exact_balance_reaches_zero() {
        let ledger = ledger_with(&[(1, "25.50")]).await;
        let receipt = ledger
            .withdraw(1, money("25.50"), Some("rent".to_string()))
            .await
            .unwrap();
        assert_eq!(receipt.new_balance, Money::ZERO);
        assert_eq!(receipt.transaction.comment.as_deref(), Some("rent"));
    }

    #[tokio::test]
    async fn transfer_moves_funds_and_links_both_legs() {
        let ledger = ledger_with(&[(1, "100.00"), (2, "0")]).await;

        let receipt = ledger
            .transfer(1, 2, money("30.00"), Some("lunch".to_string()))
            .await
            .unwrap();

        assert_eq!(receipt.from_new_balance, money("70.00"));
        assert_eq!(receipt.to_new_balance, money("30.00"));
        assert_eq!(ledger.balance(1).await.unwrap().amount, money("70.00"));
        assert_eq!(ledger.balance(2).await.unwrap().amount, money("30.00"));

        assert_eq!(receipt.outgoing.kind, TransactionKind::TransferOut);
        assert_eq!(receipt.outgoing.user_id, 1);
        assert_eq!(receipt.incoming.kind, TransactionKind::TransferIn);
        assert_eq!(receipt.incoming.user_id, 2);
        assert_eq!(receipt.outgoing.transfer_id, Some(receipt.transfer.id));
        assert_eq!(receipt.incoming.transfer_id, Some(receipt.transfer.id));

        let details = ledger.transfer_details(receipt.transfer.id).await.unwrap();
        assert_eq!(details.transfer.comment.as_deref(), Some("lunch"));
        assert_eq!(details.legs.len(), 2);
        assert!(details.legs.iter().all(|leg| leg.amount == money("30.00")));

        // The receipt describes the committed rows, timestamps included.
        assert_eq!(details.transfer, receipt.transfer);
        assert_eq!(details.legs, vec![receipt.outgoing, receipt.incoming]);
    }

    #[tokio::test]
    async fn transfer_from_higher_to_lower_id() {
        let ledger = ledger_with(&[(1, "0"), (2, "50.00")]).await;
        let receipt = ledger.transfer(2, 1, money("20.00"), None).await.unwrap();
        assert_eq!(receipt.from_new_balance, money("30.00"));
        assert_eq!(receipt.to_new_balance, money("20.00"));
        assert_eq!(ledger.sent_transfers(2).await.unwrap().len(), 1);
        assert_eq!(ledger.received_transfers(1).await.unwrap().len(), 1);
        assert_eq!(ledger.transfers_for_user(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn self_transfer_rejected_before_store_access() {
        // No accounts exist, so reaching the store would report UserNotFound instead.
        let ledger = ledger_with(&[]).await;
        let err = ledger.transfer(1, 1, money("10.00"), None).await.unwrap_err();
        assert!(matches!(err, Error::SelfTransfer { user_id: 1 }));
    }

    #[tokio::test]
    async fn transfer_names_missing_recipient() {
        let ledger = ledger_with(&[(1, "10.00")]).await;
        let err = ledger.transfer(1, 99, money("1.00"), None).await.unwrap_err();
        assert!(matches!(err, Error::UserNotFound { user_id: 99 }));
        assert_eq!(ledger.balance(1).await.unwrap().amount, money("10.00"));
    }

    #[tokio::test]
    async fn transfer_with_insufficient_funds_leaves_no_trace() {
        let ledger = ledger_with(&[(1, "5.00"), (2, "0")]).await;
        let err = ledger.transfer(1, 2, money("5.01"), None).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { user_id: 1, .. }));
        assert!(ledger.transfers_for_user(1).await.unwrap().is_empty());
        assert!(ledger.incoming_transfers(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_positive_amounts_are_validation_errors() {
        let ledger = ledger_with(&[(1, "10.00")]).await;
        assert!(matches!(
            ledger.deposit(1, Money::ZERO, None).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            ledger.withdraw(1, money("-1.00"), None).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn unknown_user_is_reported() {
        let ledger = ledger_with(&[]).await;
        assert!(matches!(
            ledger.deposit(5, money("1.00"), None).await,
            Err(Error::UserNotFound { user_id: 5 })
        ));
        assert!(matches!(
            ledger.balance(5).await,
            Err(Error::UserNotFound { user_id: 5 })
        ));
        assert!(matches!(
            ledger.history(5).await,
            Err(Error::UserNotFound { user_id: 5 })
        ));
    }

    #[tokio::test]
    async fn comments_are_trimmed_and_bounded() {
        let store = MemoryStore::new();
        let ledger = Ledger::with_rules(
            store.clone(),
            store,
            LedgerConfig { max_comment_len: 5 },
        );
        ledger.open_account(1).await.unwrap();

        let receipt = ledger
            .deposit(1, money("1.00"), Some("  hi  ".to_string()))
            .await
            .unwrap();
        assert_eq!(receipt.transaction.comment.as_deref(), Some("hi"));

        let receipt = ledger
            .deposit(1, money("1.00"), Some("   ".to_string()))
            .await
            .unwrap();
        assert_eq!(receipt.transaction.comment, None);

        assert!(matches!(
            ledger
                .deposit(1, money("1.00"), Some("too long".to_string()))
                .await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn balance_read_is_stable_without_mutation() {
        let ledger = ledger_with(&[(1, "12.34")]).await;
        let first = ledger.balance(1).await.unwrap();
        let second = ledger.balance(1).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let ledger = ledger_with(&[(1, "10.00")]).await;
        ledger.withdraw(1, money("1.00"), None).await.unwrap();
        ledger.deposit(1, money("2.00"), None).await.unwrap();

        let kinds: Vec<TransactionKind> = ledger
            .history(1)
            .await
            .unwrap()
            .into_iter()
            .map(|tx| tx.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                TransactionKind::Deposit,
                TransactionKind::Withdraw,
                TransactionKind::Deposit
            ]
        );
        assert_eq!(ledger.deposits(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_transfer_is_reported() {
        let ledger = ledger_with(&[]).await;
        assert!(matches!(
            ledger.transfer_details(404).await,
            Err(Error::TransferNotFound { transfer_id: 404 })
        ));
    }

    #[tokio::test]
    async fn reopening_an_account_fails() {
        let ledger = ledger_with(&[(1, "3.00")]).await;
        assert!(matches!(
            ledger.open_account(1).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(ledger.balance(1).await.unwrap().amount, money("3.00"));
    }
}
