//! Storage capabilities the engine depends on.
//!
//! The engine never talks to a concrete database type. It needs three
//! capabilities:
//!
//! - [`LedgerRepository`]: point reads and writes on accounts, entries and
//!   transfers. Implemented both by stores (autocommit) and by transaction
//!   handles.
//! - [`LedgerTransaction`]: a repository scoped to one open transaction that
//!   can be committed or rolled back. Row locks taken by
//!   [`LedgerRepository::add_account_balance`] are held until then.
//! - [`LedgerStore`]: opens transactions.
//!
//! [`SqlStore`] is the sea-orm implementation, [`MemoryStore`] an in-process
//! one with the same locking behaviour.

use async_trait::async_trait;

use crate::{Account, Currency, Entry, ResultEngine, Transfer};

pub mod memory;
mod sql;

pub use memory::MemoryStore;
pub use sql::{Queries, SqlStore};

/// Default number of rows returned by list operations.
pub const DEFAULT_PAGE_LIMIT: u64 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub limit: u64,
    pub offset: u64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Page {
    pub fn new(limit: u64, offset: u64) -> Self {
        Self { limit, offset }
    }

    pub(crate) fn apply<T>(self, rows: impl Iterator<Item = T>) -> Vec<T> {
        let offset = usize::try_from(self.offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(self.limit).unwrap_or(usize::MAX);
        rows.skip(offset).take(limit).collect()
    }
}

/// Point operations on the ledger tables.
///
/// Every method returns the persisted row or an error; nothing is retried.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Insert an account with a zero balance.
    async fn create_account(&self, owner: &str, currency: Currency) -> ResultEngine<Account>;

    async fn get_account(&self, id: i64) -> ResultEngine<Account>;

    /// Accounts ordered by id, optionally restricted to one owner.
    async fn list_accounts(&self, owner: Option<&str>, page: Page) -> ResultEngine<Vec<Account>>;

    /// Delete an account nothing references.
    async fn delete_account(&self, id: i64) -> ResultEngine<()>;

    /// Add `delta` to the balance of account `id` in a single statement and
    /// return the updated row.
    ///
    /// Inside a transaction this locks the row until commit or rollback.
    async fn add_account_balance(&self, id: i64, delta: i64) -> ResultEngine<Account>;

    async fn create_entry(&self, account_id: i64, amount: i64) -> ResultEngine<Entry>;

    async fn get_entry(&self, id: i64) -> ResultEngine<Entry>;

    async fn list_entries(&self, account_id: i64, page: Page) -> ResultEngine<Vec<Entry>>;

    /// Sum of all entry amounts posted against `account_id`.
    async fn entries_total(&self, account_id: i64) -> ResultEngine<i64>;

    async fn create_transfer(
        &self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> ResultEngine<Transfer>;

    async fn get_transfer(&self, id: i64) -> ResultEngine<Transfer>;

    /// Transfers sent by `from_account_id` or received by `to_account_id`.
    async fn list_transfers(
        &self,
        from_account_id: i64,
        to_account_id: i64,
        page: Page,
    ) -> ResultEngine<Vec<Transfer>>;
}

/// A repository bound to one open transaction.
#[async_trait]
pub trait LedgerTransaction: LedgerRepository + Sized {
    /// Make every write of the transaction visible atomically.
    ///
    /// When the commit fails nothing has been applied: implementations
    /// discard the transaction before returning the error.
    async fn commit(self) -> ResultEngine<()>;

    /// Discard every write of the transaction and release its locks.
    async fn rollback(self) -> ResultEngine<()>;
}

/// Opens transactions and serves autocommit reads/writes.
#[async_trait]
pub trait LedgerStore: LedgerRepository {
    type Tx: LedgerTransaction + 'static;

    async fn begin(&self) -> ResultEngine<Self::Tx>;
}
