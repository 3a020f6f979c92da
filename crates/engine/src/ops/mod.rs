use crate::{
    CancelToken, EngineError, LedgerStore, LedgerTransaction, ResultEngine, store::SqlStore,
};

mod accounts;
mod balances;
mod transfers;

pub use balances::{LedgerCheck, UpdateOrder, add_money, update_order};

/// Transfer engine over a [`LedgerStore`].
///
/// The engine holds no lock of its own: any number of callers may run
/// operations concurrently and overlapping transfers are serialized by the
/// store's row locks.
#[derive(Clone, Debug)]
pub struct Engine<S = SqlStore> {
    store: S,
    allow_overdraft: bool,
}

impl<S: LedgerStore> Engine<S> {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder<S> {
        EngineBuilder::default()
    }

    async fn begin(&self, cancel: &CancelToken) -> ResultEngine<S::Tx> {
        cancel.run(self.store.begin()).await
    }
}

/// Finish a transaction opened by the engine.
///
/// `result` is committed only when it is `Ok` and `cancel` has not fired;
/// otherwise the transaction is rolled back and the original error returned.
/// A rollback that fails is reported as [`EngineError::RollbackFailed`].
pub(crate) async fn settle<T, X>(
    tx: X,
    result: ResultEngine<T>,
    cancel: &CancelToken,
) -> ResultEngine<T>
where
    X: LedgerTransaction,
{
    match result.and_then(|value| cancel.check().map(|()| value)) {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(cause) => match tx.rollback().await {
            Ok(()) => {
                tracing::warn!("transaction rolled back: {cause}");
                Err(cause)
            }
            Err(rollback) => {
                tracing::error!("rollback failed ({rollback}) after: {cause}");
                Err(EngineError::RollbackFailed {
                    cause: Box::new(cause),
                    rollback: Box::new(rollback),
                })
            }
        },
    }
}

/// The builder for `Engine`
pub struct EngineBuilder<S> {
    store: Option<S>,
    allow_overdraft: bool,
}

impl<S> Default for EngineBuilder<S> {
    fn default() -> Self {
        Self {
            store: None,
            allow_overdraft: false,
        }
    }
}

impl<S: LedgerStore> EngineBuilder<S> {
    /// Pass the required store
    pub fn store(mut self, store: S) -> EngineBuilder<S> {
        self.store = Some(store);
        self
    }

    /// Let transfers drive the source balance below zero.
    pub fn allow_overdraft(mut self, allow: bool) -> EngineBuilder<S> {
        self.allow_overdraft = allow;
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine<S>> {
        let store = self
            .store
            .ok_or_else(|| EngineError::Storage("engine requires a store".to_string()))?;
        Ok(Engine {
            store,
            allow_overdraft: self.allow_overdraft,
        })
    }
}
