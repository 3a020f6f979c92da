//! In-process store with the same transactional behaviour as the SQL one.
//!
//! Every transaction stages its writes and applies them on commit. Balance
//! updates take a per-account async lock that is held until the transaction
//! ends, so two transactions touching the same account serialize exactly like
//! row locks do. Failures can be injected per operation with
//! [`MemoryStore::fail_on`] and the order in which rows were locked is
//! recorded in [`MemoryStore::lock_log`].

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;

use super::{LedgerRepository, LedgerStore, LedgerTransaction, Page};
use crate::{Account, Currency, EngineError, Entry, ResultEngine, Transfer};

/// Operations a failure can be injected into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateAccount,
    DeleteAccount,
    AddAccountBalance,
    CreateEntry,
    CreateTransfer,
    Commit,
    Rollback,
}

/// One row lock acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockEvent {
    pub tx: u64,
    pub account_id: i64,
}

#[derive(Debug)]
struct Failpoint {
    op: Operation,
    skip: usize,
}

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<i64, Account>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
    last_account_id: i64,
    last_entry_id: i64,
    last_transfer_id: i64,
}

#[derive(Debug, Default)]
struct Staged {
    accounts: BTreeMap<i64, Account>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
    deleted: BTreeSet<i64>,
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
    failpoints: Mutex<Vec<Failpoint>>,
    lock_log: Mutex<Vec<LockEvent>>,
    last_tx: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn next_id(last: &mut i64) -> i64 {
    *last += 1;
    *last
}

impl Shared {
    /// Fail if a failpoint for `op` is due, consuming it.
    fn trip(&self, op: Operation) -> ResultEngine<()> {
        let mut failpoints = lock(&self.failpoints);
        let Some(idx) = failpoints.iter().position(|f| f.op == op) else {
            return Ok(());
        };
        if failpoints[idx].skip > 0 {
            failpoints[idx].skip -= 1;
            return Ok(());
        }
        failpoints.remove(idx);
        Err(EngineError::Storage(format!("injected failure on {op:?}")))
    }
}

/// Shared handle to an in-process ledger.
///
/// The lock log and the per-account lock table grow with every account and
/// transaction and are never pruned; call [`MemoryStore::clear_lock_log`] in
/// long-running tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` after `skip` successful ones fail with a
    /// storage error.
    pub fn fail_on(&self, op: Operation, skip: usize) {
        lock(&self.shared.failpoints).push(Failpoint { op, skip });
    }

    /// Every row lock acquired so far, in acquisition order.
    pub fn lock_log(&self) -> Vec<LockEvent> {
        lock(&self.shared.lock_log).clone()
    }

    /// Forget every recorded lock acquisition.
    pub fn clear_lock_log(&self) {
        lock(&self.shared.lock_log).clear();
    }

    /// Row locks acquired by transaction `tx`, in order.
    pub fn locks_of(&self, tx: u64) -> Vec<i64> {
        lock(&self.shared.lock_log)
            .iter()
            .filter(|event| event.tx == tx)
            .map(|event| event.account_id)
            .collect()
    }

    fn begin_tx(&self) -> MemoryTx {
        MemoryTx {
            id: self.shared.last_tx.fetch_add(1, Ordering::SeqCst) + 1,
            shared: Arc::clone(&self.shared),
            staged: Mutex::default(),
            held: Mutex::default(),
        }
    }
}

/// An open transaction on a [`MemoryStore`].
///
/// Dropping it without committing discards its writes and releases its row
/// locks.
#[derive(Debug)]
pub struct MemoryTx {
    id: u64,
    shared: Arc<Shared>,
    staged: Mutex<Staged>,
    held: Mutex<HashMap<i64, OwnedMutexGuard<()>>>,
}

impl MemoryTx {
    pub fn id(&self) -> u64 {
        self.id
    }

    async fn lock_row(&self, id: i64) {
        let already_held = lock(&self.held).contains_key(&id);
        if already_held {
            return;
        }
        let row = {
            let mut rows = lock(&self.shared.row_locks);
            Arc::clone(rows.entry(id).or_default())
        };
        let guard = row.lock_owned().await;
        lock(&self.shared.lock_log).push(LockEvent {
            tx: self.id,
            account_id: id,
        });
        lock(&self.held).insert(id, guard);
    }

    fn account(&self, id: i64) -> Option<Account> {
        let staged = lock(&self.staged);
        if staged.deleted.contains(&id) {
            return None;
        }
        if let Some(account) = staged.accounts.get(&id) {
            return Some(account.clone());
        }
        lock(&self.shared.tables).accounts.get(&id).cloned()
    }

    fn ensure_referenced(&self, account_id: i64) -> ResultEngine<()> {
        if self.account(account_id).is_none() {
            return Err(EngineError::ConstraintViolation(format!(
                "FOREIGN KEY constraint failed: account {account_id}"
            )));
        }
        Ok(())
    }

    fn entries(&self) -> BTreeMap<i64, Entry> {
        let staged = lock(&self.staged);
        let mut rows = lock(&self.shared.tables).entries.clone();
        rows.extend(staged.entries.iter().map(|(id, e)| (*id, e.clone())));
        rows
    }

    fn transfers(&self) -> BTreeMap<i64, Transfer> {
        let staged = lock(&self.staged);
        let mut rows = lock(&self.shared.tables).transfers.clone();
        rows.extend(staged.transfers.iter().map(|(id, t)| (*id, t.clone())));
        rows
    }

    /// Apply staged writes to the shared tables.
    fn apply(self) {
        let staged = std::mem::take(&mut *lock(&self.staged));
        let mut tables = lock(&self.shared.tables);
        for id in &staged.deleted {
            tables.accounts.remove(id);
        }
        tables.accounts.extend(staged.accounts);
        tables.entries.extend(staged.entries);
        tables.transfers.extend(staged.transfers);
    }
}

#[async_trait]
impl LedgerRepository for MemoryTx {
    async fn create_account(&self, owner: &str, currency: Currency) -> ResultEngine<Account> {
        self.shared.trip(Operation::CreateAccount)?;
        let id = next_id(&mut lock(&self.shared.tables).last_account_id);
        let account = Account {
            id,
            owner: owner.to_string(),
            balance: 0,
            currency,
            created_at: Utc::now(),
        };
        lock(&self.staged).accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: i64) -> ResultEngine<Account> {
        self.account(id)
            .ok_or_else(|| EngineError::NotFound(format!("account {id}")))
    }

    async fn list_accounts(&self, owner: Option<&str>, page: Page) -> ResultEngine<Vec<Account>> {
        let rows = {
            let staged = lock(&self.staged);
            let mut rows = lock(&self.shared.tables).accounts.clone();
            rows.extend(staged.accounts.iter().map(|(id, a)| (*id, a.clone())));
            rows.retain(|id, _| !staged.deleted.contains(id));
            rows
        };
        Ok(page.apply(
            rows.into_values()
                .filter(|account| owner.is_none_or(|owner| account.owner == owner)),
        ))
    }

    async fn delete_account(&self, id: i64) -> ResultEngine<()> {
        self.shared.trip(Operation::DeleteAccount)?;
        self.lock_row(id).await;
        if self.account(id).is_none() {
            return Err(EngineError::NotFound(format!("account {id}")));
        }
        let referenced = self.entries().values().any(|e| e.account_id == id)
            || self
                .transfers()
                .values()
                .any(|t| t.from_account_id == id || t.to_account_id == id);
        if referenced {
            return Err(EngineError::ConstraintViolation(format!(
                "FOREIGN KEY constraint failed: account {id} is referenced"
            )));
        }
        let mut staged = lock(&self.staged);
        staged.accounts.remove(&id);
        staged.deleted.insert(id);
        Ok(())
    }

    async fn add_account_balance(&self, id: i64, delta: i64) -> ResultEngine<Account> {
        self.shared.trip(Operation::AddAccountBalance)?;
        self.lock_row(id).await;
        let mut account = self
            .account(id)
            .ok_or_else(|| EngineError::NotFound(format!("account {id}")))?;
        account.balance = account.balance.checked_add(delta).ok_or_else(|| {
            EngineError::ConstraintViolation(format!("account {id} balance overflow"))
        })?;
        lock(&self.staged).accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn create_entry(&self, account_id: i64, amount: i64) -> ResultEngine<Entry> {
        self.shared.trip(Operation::CreateEntry)?;
        self.ensure_referenced(account_id)?;
        let id = next_id(&mut lock(&self.shared.tables).last_entry_id);
        let entry = Entry {
            id,
            account_id,
            amount,
            created_at: Utc::now(),
        };
        lock(&self.staged).entries.insert(id, entry.clone());
        Ok(entry)
    }

    async fn get_entry(&self, id: i64) -> ResultEngine<Entry> {
        self.entries()
            .remove(&id)
            .ok_or_else(|| EngineError::NotFound(format!("entry {id}")))
    }

    async fn list_entries(&self, account_id: i64, page: Page) -> ResultEngine<Vec<Entry>> {
        Ok(page.apply(
            self.entries()
                .into_values()
                .filter(|entry| entry.account_id == account_id),
        ))
    }

    async fn entries_total(&self, account_id: i64) -> ResultEngine<i64> {
        Ok(self
            .entries()
            .values()
            .filter(|entry| entry.account_id == account_id)
            .map(|entry| entry.amount)
            .sum())
    }

    async fn create_transfer(
        &self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> ResultEngine<Transfer> {
        self.shared.trip(Operation::CreateTransfer)?;
        if amount <= 0 {
            return Err(EngineError::ConstraintViolation(
                "CHECK constraint failed: amount > 0".to_string(),
            ));
        }
        self.ensure_referenced(from_account_id)?;
        self.ensure_referenced(to_account_id)?;
        let id = next_id(&mut lock(&self.shared.tables).last_transfer_id);
        let transfer = Transfer {
            id,
            from_account_id,
            to_account_id,
            amount,
            created_at: Utc::now(),
        };
        lock(&self.staged).transfers.insert(id, transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&self, id: i64) -> ResultEngine<Transfer> {
        self.transfers()
            .remove(&id)
            .ok_or_else(|| EngineError::NotFound(format!("transfer {id}")))
    }

    async fn list_transfers(
        &self,
        from_account_id: i64,
        to_account_id: i64,
        page: Page,
    ) -> ResultEngine<Vec<Transfer>> {
        Ok(page.apply(self.transfers().into_values().filter(|transfer| {
            transfer.from_account_id == from_account_id || transfer.to_account_id == to_account_id
        })))
    }
}

#[async_trait]
impl LedgerTransaction for MemoryTx {
    async fn commit(self) -> ResultEngine<()> {
        // On failure `self` is dropped here, discarding the staged writes.
        self.shared.trip(Operation::Commit)?;
        self.apply();
        Ok(())
    }

    async fn rollback(self) -> ResultEngine<()> {
        self.shared.trip(Operation::Rollback)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> ResultEngine<Self::Tx> {
        Ok(self.begin_tx())
    }
}

// Outside a transaction every write commits on its own.
#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn create_account(&self, owner: &str, currency: Currency) -> ResultEngine<Account> {
        let tx = self.begin_tx();
        let account = tx.create_account(owner, currency).await?;
        tx.apply();
        Ok(account)
    }

    async fn get_account(&self, id: i64) -> ResultEngine<Account> {
        self.begin_tx().get_account(id).await
    }

    async fn list_accounts(&self, owner: Option<&str>, page: Page) -> ResultEngine<Vec<Account>> {
        self.begin_tx().list_accounts(owner, page).await
    }

    async fn delete_account(&self, id: i64) -> ResultEngine<()> {
        let tx = self.begin_tx();
        tx.delete_account(id).await?;
        tx.apply();
        Ok(())
    }

    async fn add_account_balance(&self, id: i64, delta: i64) -> ResultEngine<Account> {
        let tx = self.begin_tx();
        let account = tx.add_account_balance(id, delta).await?;
        tx.apply();
        Ok(account)
    }

    async fn create_entry(&self, account_id: i64, amount: i64) -> ResultEngine<Entry> {
        let tx = self.begin_tx();
        let entry = tx.create_entry(account_id, amount).await?;
        tx.apply();
        Ok(entry)
    }

    async fn get_entry(&self, id: i64) -> ResultEngine<Entry> {
        self.begin_tx().get_entry(id).await
    }

    async fn list_entries(&self, account_id: i64, page: Page) -> ResultEngine<Vec<Entry>> {
        self.begin_tx().list_entries(account_id, page).await
    }

    async fn entries_total(&self, account_id: i64) -> ResultEngine<i64> {
        self.begin_tx().entries_total(account_id).await
    }

    async fn create_transfer(
        &self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> ResultEngine<Transfer> {
        let tx = self.begin_tx();
        let transfer = tx
            .create_transfer(from_account_id, to_account_id, amount)
            .await?;
        tx.apply();
        Ok(transfer)
    }

    async fn get_transfer(&self, id: i64) -> ResultEngine<Transfer> {
        self.begin_tx().get_transfer(id).await
    }

    async fn list_transfers(
        &self,
        from_account_id: i64,
        to_account_id: i64,
        page: Page,
    ) -> ResultEngine<Vec<Transfer>> {
        self.begin_tx()
            .list_transfers(from_account_id, to_account_id, page)
            .await
    }
}
