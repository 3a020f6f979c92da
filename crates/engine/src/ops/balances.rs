use serde::{Deserialize, Serialize};

use crate::{Account, CancelToken, EngineError, LedgerRepository, LedgerStore, ResultEngine};

use super::{Engine, settle};

/// Which side of a transfer has its balance updated first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOrder {
    SourceFirst,
    DestinationFirst,
}

/// Lock order for a pair of accounts: the smaller id always goes first.
///
/// Every transaction that touches two accounts acquires their row locks in
/// ascending id order, so no two transfers can wait on each other.
pub fn update_order(from_account_id: i64, to_account_id: i64) -> UpdateOrder {
    if from_account_id <= to_account_id {
        UpdateOrder::SourceFirst
    } else {
        UpdateOrder::DestinationFirst
    }
}

/// Move `amount` from one balance to the other inside `repo`'s transaction.
///
/// Both updates are single "add delta and return the row" statements issued
/// in [`update_order`]. If the first one fails the second is not attempted.
/// The snapshots are returned as `(source, destination)`.
pub async fn add_money<R>(
    repo: &R,
    cancel: &CancelToken,
    from_account_id: i64,
    to_account_id: i64,
    amount: i64,
) -> ResultEngine<(Account, Account)>
where
    R: LedgerRepository + ?Sized,
{
    let debit = amount
        .checked_neg()
        .ok_or_else(|| EngineError::InvalidAmount(format!("amount {amount} out of range")))?;
    match update_order(from_account_id, to_account_id) {
        UpdateOrder::SourceFirst => {
            let from = cancel
                .run(repo.add_account_balance(from_account_id, debit))
                .await?;
            let to = cancel
                .run(repo.add_account_balance(to_account_id, amount))
                .await?;
            Ok((from, to))
        }
        UpdateOrder::DestinationFirst => {
            let to = cancel
                .run(repo.add_account_balance(to_account_id, amount))
                .await?;
            let from = cancel
                .run(repo.add_account_balance(from_account_id, debit))
                .await?;
            Ok((from, to))
        }
    }
}

/// Stored balance of an account compared with the sum of its entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCheck {
    pub account_id: i64,
    pub balance: i64,
    pub entries_total: i64,
    pub consistent: bool,
}

impl<S: LedgerStore> Engine<S> {
    /// Check that the balance of `account_id` equals the sum of its entries.
    ///
    /// Both values are read in one transaction.
    pub async fn verify_account(
        &self,
        cancel: &CancelToken,
        account_id: i64,
    ) -> ResultEngine<LedgerCheck> {
        let tx = self.begin(cancel).await?;
        let result = read_check(&tx, cancel, account_id).await;
        let check = settle(tx, result, cancel).await?;
        if !check.consistent {
            tracing::warn!(
                "account {account_id} balance {} differs from entries total {}",
                check.balance,
                check.entries_total
            );
        }
        Ok(check)
    }
}

async fn read_check<R: LedgerRepository>(
    repo: &R,
    cancel: &CancelToken,
    account_id: i64,
) -> ResultEngine<LedgerCheck> {
    let account = cancel.run(repo.get_account(account_id)).await?;
    let entries_total = cancel.run(repo.entries_total(account_id)).await?;
    Ok(LedgerCheck {
        account_id,
        balance: account.balance,
        entries_total,
        consistent: account.balance == entries_total,
    })
}
