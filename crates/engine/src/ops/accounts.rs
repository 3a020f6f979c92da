use crate::{
    Account, CancelToken, Currency, EngineError, Entry, LedgerRepository, LedgerStore,
    OpenAccount, Page, ResultEngine, util::normalize_owner,
};

use super::{Engine, settle};

impl<S: LedgerStore> Engine<S> {
    /// Create an account and post its opening deposit, if any.
    ///
    /// The deposit is recorded as an entry and applied to the balance in the
    /// same transaction, so a new account always matches its ledger.
    pub async fn open_account(
        &self,
        cancel: &CancelToken,
        cmd: OpenAccount,
    ) -> ResultEngine<Account> {
        let owner = normalize_owner(&cmd.owner)?;
        if cmd.opening_deposit < 0 {
            return Err(EngineError::InvalidAmount(
                "opening deposit must be >= 0".to_string(),
            ));
        }
        let tx = self.begin(cancel).await?;
        let result = open_steps(&tx, cancel, &owner, cmd.currency, cmd.opening_deposit).await;
        let account = settle(tx, result, cancel).await?;
        tracing::debug!(
            "account {} opened for {} with {} {}",
            account.id,
            account.owner,
            account.balance,
            account.currency
        );
        Ok(account)
    }

    pub async fn account(&self, cancel: &CancelToken, id: i64) -> ResultEngine<Account> {
        cancel.run(self.store.get_account(id)).await
    }

    pub async fn accounts(
        &self,
        cancel: &CancelToken,
        owner: Option<&str>,
        page: Page,
    ) -> ResultEngine<Vec<Account>> {
        cancel.run(self.store.list_accounts(owner, page)).await
    }

    /// Delete an account. Refused while entries or transfers reference it.
    pub async fn delete_account(&self, cancel: &CancelToken, id: i64) -> ResultEngine<()> {
        cancel.run(self.store.delete_account(id)).await?;
        tracing::debug!("account {id} deleted");
        Ok(())
    }

    pub async fn entry(&self, cancel: &CancelToken, id: i64) -> ResultEngine<Entry> {
        cancel.run(self.store.get_entry(id)).await
    }

    pub async fn entries(
        &self,
        cancel: &CancelToken,
        account_id: i64,
        page: Page,
    ) -> ResultEngine<Vec<Entry>> {
        cancel.run(self.store.list_entries(account_id, page)).await
    }
}

async fn open_steps<R: LedgerRepository>(
    repo: &R,
    cancel: &CancelToken,
    owner: &str,
    currency: Currency,
    opening_deposit: i64,
) -> ResultEngine<Account> {
    let account = cancel.run(repo.create_account(owner, currency)).await?;
    if opening_deposit == 0 {
        return Ok(account);
    }
    cancel
        .run(repo.create_entry(account.id, opening_deposit))
        .await?;
    cancel
        .run(repo.add_account_balance(account.id, opening_deposit))
        .await
}
