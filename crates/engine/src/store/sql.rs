//! sea-orm implementation of the storage capabilities.
//!
//! [`Queries`] runs the ledger statements against any sea-orm connection. Over
//! a `DatabaseConnection` every statement autocommits; over a
//! `DatabaseTransaction` the statements share the transaction and
//! [`LedgerRepository::add_account_balance`] keeps the updated row locked
//! until commit or rollback.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
    sea_query::Expr,
};

use super::{LedgerRepository, LedgerStore, LedgerTransaction, Page};
use crate::{
    Account, Currency, EngineError, Entry, ResultEngine, Transfer, accounts, entries, transfers,
};

#[derive(Clone, Debug)]
pub struct Queries<C> {
    conn: C,
}

/// Store backed by a sea-orm connection pool.
pub type SqlStore = Queries<DatabaseConnection>;

impl<C> Queries<C> {
    pub fn new(conn: C) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl<C> LedgerRepository for Queries<C>
where
    C: ConnectionTrait + Send + Sync,
{
    async fn create_account(&self, owner: &str, currency: Currency) -> ResultEngine<Account> {
        let model = accounts::ActiveModel {
            owner: ActiveValue::Set(owner.to_string()),
            balance: ActiveValue::Set(0),
            currency: ActiveValue::Set(currency.code().to_string()),
            created_at: ActiveValue::Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.conn)
        .await?;
        Account::try_from(model)
    }

    async fn get_account(&self, id: i64) -> ResultEngine<Account> {
        let model = accounts::Entity::find_by_id(id)
            .one(&self.conn)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("account {id}")))?;
        Account::try_from(model)
    }

    async fn list_accounts(&self, owner: Option<&str>, page: Page) -> ResultEngine<Vec<Account>> {
        let mut query = accounts::Entity::find();
        if let Some(owner) = owner {
            query = query.filter(accounts::Column::Owner.eq(owner));
        }
        query
            .order_by_asc(accounts::Column::Id)
            .limit(page.limit)
            .offset(page.offset)
            .all(&self.conn)
            .await?
            .into_iter()
            .map(Account::try_from)
            .collect()
    }

    async fn delete_account(&self, id: i64) -> ResultEngine<()> {
        let res = accounts::Entity::delete_by_id(id).exec(&self.conn).await?;
        if res.rows_affected == 0 {
            return Err(EngineError::NotFound(format!("account {id}")));
        }
        Ok(())
    }

    async fn add_account_balance(&self, id: i64, delta: i64) -> ResultEngine<Account> {
        // `balance = balance + delta` keeps the update a single statement, so
        // no other transaction can slip in between a read and a write.
        // SQLite silently widens an overflowing sum to REAL, so rows whose
        // new balance would leave the i64 range are filtered out instead.
        let in_range = if delta >= 0 {
            accounts::Column::Balance.lte(i64::MAX - delta)
        } else {
            accounts::Column::Balance.gte(i64::MIN - delta)
        };
        let updated = accounts::Entity::update_many()
            .col_expr(
                accounts::Column::Balance,
                Expr::col(accounts::Column::Balance).add(delta),
            )
            .filter(accounts::Column::Id.eq(id))
            .filter(in_range)
            .exec_with_returning(&self.conn)
            .await?
            .into_iter()
            .next();
        match updated {
            Some(model) => Account::try_from(model),
            None => {
                let exists = accounts::Entity::find_by_id(id)
                    .one(&self.conn)
                    .await?
                    .is_some();
                if exists {
                    Err(EngineError::ConstraintViolation(format!(
                        "account {id} balance overflow"
                    )))
                } else {
                    Err(EngineError::NotFound(format!("account {id}")))
                }
            }
        }
    }

    async fn create_entry(&self, account_id: i64, amount: i64) -> ResultEngine<Entry> {
        let model = entries::ActiveModel {
            account_id: ActiveValue::Set(account_id),
            amount: ActiveValue::Set(amount),
            created_at: ActiveValue::Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.conn)
        .await?;
        Ok(model.into())
    }

    async fn get_entry(&self, id: i64) -> ResultEngine<Entry> {
        entries::Entity::find_by_id(id)
            .one(&self.conn)
            .await?
            .map(Entry::from)
            .ok_or_else(|| EngineError::NotFound(format!("entry {id}")))
    }

    async fn list_entries(&self, account_id: i64, page: Page) -> ResultEngine<Vec<Entry>> {
        let models = entries::Entity::find()
            .filter(entries::Column::AccountId.eq(account_id))
            .order_by_asc(entries::Column::Id)
            .limit(page.limit)
            .offset(page.offset)
            .all(&self.conn)
            .await?;
        Ok(models.into_iter().map(Entry::from).collect())
    }

    async fn entries_total(&self, account_id: i64) -> ResultEngine<i64> {
        let total: Option<Option<i64>> = entries::Entity::find()
            .select_only()
            .column_as(entries::Column::Amount.sum(), "total")
            .filter(entries::Column::AccountId.eq(account_id))
            .into_tuple()
            .one(&self.conn)
            .await?;
        Ok(total.flatten().unwrap_or(0))
    }

    async fn create_transfer(
        &self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> ResultEngine<Transfer> {
        let model = transfers::ActiveModel {
            from_account_id: ActiveValue::Set(from_account_id),
            to_account_id: ActiveValue::Set(to_account_id),
            amount: ActiveValue::Set(amount),
            created_at: ActiveValue::Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.conn)
        .await?;
        Ok(model.into())
    }

    async fn get_transfer(&self, id: i64) -> ResultEngine<Transfer> {
        transfers::Entity::find_by_id(id)
            .one(&self.conn)
            .await?
            .map(Transfer::from)
            .ok_or_else(|| EngineError::NotFound(format!("transfer {id}")))
    }

    async fn list_transfers(
        &self,
        from_account_id: i64,
        to_account_id: i64,
        page: Page,
    ) -> ResultEngine<Vec<Transfer>> {
        let models = transfers::Entity::find()
            .filter(
                Condition::any()
                    .add(transfers::Column::FromAccountId.eq(from_account_id))
                    .add(transfers::Column::ToAccountId.eq(to_account_id)),
            )
            .order_by_asc(transfers::Column::Id)
            .limit(page.limit)
            .offset(page.offset)
            .all(&self.conn)
            .await?;
        Ok(models.into_iter().map(Transfer::from).collect())
    }
}

#[async_trait]
impl LedgerTransaction for Queries<DatabaseTransaction> {
    async fn commit(self) -> ResultEngine<()> {
        // A failed COMMIT drops the transaction, which rolls it back.
        self.conn.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> ResultEngine<()> {
        self.conn.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for Queries<DatabaseConnection> {
    type Tx = Queries<DatabaseTransaction>;

    async fn begin(&self) -> ResultEngine<Self::Tx> {
        Ok(Queries::new(self.conn.begin().await?))
    }
}
