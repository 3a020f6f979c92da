use crate::{
    CancelToken, EngineError, LedgerRepository, LedgerStore, Page, ResultEngine, Transfer,
    TransferRequest, TransferTxParams, TransferTxResult, util::ensure_currency,
};

use super::{Engine, add_money, settle};

fn validate(params: &TransferTxParams) -> ResultEngine<()> {
    if params.amount <= 0 {
        return Err(EngineError::InvalidAmount(
            "amount must be > 0".to_string(),
        ));
    }
    if params.from_account_id == params.to_account_id {
        return Err(EngineError::SameAccount(params.from_account_id));
    }
    Ok(())
}

impl<S: LedgerStore> Engine<S> {
    /// Move money between two accounts in one transaction.
    ///
    /// Inserts the transfer record and its two entries, then updates both
    /// balances through [`add_money`]. Either all five writes commit or none
    /// does. The first failing step aborts the transaction and its error is
    /// returned; a rollback that fails as well is escalated as
    /// [`EngineError::RollbackFailed`].
    pub async fn transfer_tx(
        &self,
        cancel: &CancelToken,
        params: TransferTxParams,
    ) -> ResultEngine<TransferTxResult> {
        validate(&params)?;
        let tx = self.begin(cancel).await?;
        let result = self.transfer_steps(&tx, cancel, params).await;
        let result = settle(tx, result, cancel).await?;
        tracing::debug!(
            "transfer {} committed: {} -> {} amount {}",
            result.transfer.id,
            params.from_account_id,
            params.to_account_id,
            params.amount
        );
        Ok(result)
    }

    async fn transfer_steps(
        &self,
        tx: &S::Tx,
        cancel: &CancelToken,
        params: TransferTxParams,
    ) -> ResultEngine<TransferTxResult> {
        let TransferTxParams {
            from_account_id,
            to_account_id,
            amount,
        } = params;
        let transfer = cancel
            .run(tx.create_transfer(from_account_id, to_account_id, amount))
            .await?;
        let from_entry = cancel
            .run(tx.create_entry(from_account_id, -amount))
            .await?;
        let to_entry = cancel.run(tx.create_entry(to_account_id, amount)).await?;
        let (from_account, to_account) =
            add_money(tx, cancel, from_account_id, to_account_id, amount).await?;
        // The source row is locked until commit, so this cannot race.
        if from_account.balance < 0 && !self.allow_overdraft {
            return Err(EngineError::InsufficientFunds(format!(
                "account {from_account_id} cannot send {amount}"
            )));
        }
        Ok(TransferTxResult {
            transfer,
            from_account,
            to_account,
            from_entry,
            to_entry,
        })
    }

    /// Transfer between existing accounts that both hold the requested
    /// currency.
    pub async fn transfer(
        &self,
        cancel: &CancelToken,
        request: TransferRequest,
    ) -> ResultEngine<TransferTxResult> {
        let params = request.params();
        validate(&params)?;
        for account_id in [params.from_account_id, params.to_account_id] {
            let account = cancel.run(self.store.get_account(account_id)).await?;
            ensure_currency(account_id, request.currency, account.currency)?;
        }
        self.transfer_tx(cancel, params).await
    }

    pub async fn transfer_record(&self, cancel: &CancelToken, id: i64) -> ResultEngine<Transfer> {
        cancel.run(self.store.get_transfer(id)).await
    }

    /// Transfers sent by `from_account_id` or received by `to_account_id`.
    pub async fn transfers(
        &self,
        cancel: &CancelToken,
        from_account_id: i64,
        to_account_id: i64,
        page: Page,
    ) -> ResultEngine<Vec<Transfer>> {
        cancel
            .run(
                self.store
                    .list_transfers(from_account_id, to_account_id, page),
            )
            .await
    }
}
