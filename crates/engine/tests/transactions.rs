use std::{collections::HashSet, sync::Arc, time::Duration};

use sea_orm::{ConnectOptions, Database};

use engine::{
    CancelToken, Currency, Engine, EngineError, LedgerRepository, OpenAccount, Page, SqlStore,
    TransferRequest, TransferTxParams,
};
use migration::MigratorTrait;

async fn store_with_db() -> SqlStore {
    // One connection: an in-memory SQLite database lives as long as it does,
    // and writers serialize on it the same way they do on the file lock.
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    SqlStore::new(db)
}

async fn engine_with_db() -> Engine<SqlStore> {
    Engine::builder()
        .store(store_with_db().await)
        .build()
        .await
        .unwrap()
}

async fn open(engine: &Engine<SqlStore>, owner: &str, deposit: i64) -> i64 {
    engine
        .open_account(
            &CancelToken::new(),
            OpenAccount::new(owner, Currency::Usd).opening_deposit(deposit),
        )
        .await
        .unwrap()
        .id
}

fn params(from: i64, to: i64, amount: i64) -> TransferTxParams {
    TransferTxParams {
        from_account_id: from,
        to_account_id: to,
        amount,
    }
}

async fn balance(engine: &Engine<SqlStore>, id: i64) -> i64 {
    engine
        .account(&CancelToken::new(), id)
        .await
        .unwrap()
        .balance
}

#[tokio::test]
async fn transfer_moves_money_and_records_both_entries() {
    let engine = engine_with_db().await;
    let cancel = CancelToken::new();
    let a = open(&engine, "alice", 100).await;
    let b = open(&engine, "bob", 50).await;
    assert_eq!((a, b), (1, 2));

    let result = engine.transfer_tx(&cancel, params(a, b, 30)).await.unwrap();

    assert_eq!(result.transfer.from_account_id, a);
    assert_eq!(result.transfer.to_account_id, b);
    assert_eq!(result.transfer.amount, 30);
    assert_eq!((result.from_entry.account_id, result.from_entry.amount), (a, -30));
    assert_eq!((result.to_entry.account_id, result.to_entry.amount), (b, 30));
    assert_eq!((result.from_account.id, result.from_account.balance), (a, 70));
    assert_eq!((result.to_account.id, result.to_account.balance), (b, 80));

    let stored = engine
        .transfer_record(&cancel, result.transfer.id)
        .await
        .unwrap();
    assert_eq!(stored, result.transfer);
    let entry = engine.entry(&cancel, result.to_entry.id).await.unwrap();
    assert_eq!(entry, result.to_entry);

    for id in [a, b] {
        assert!(engine.verify_account(&cancel, id).await.unwrap().consistent);
    }
}

#[tokio::test]
async fn reverse_id_transfer_reports_source_first() {
    let engine = engine_with_db().await;
    let deposits = [0, 0, 10, 0, 200];
    for (i, deposit) in deposits.iter().enumerate() {
        open(&engine, &format!("owner{i}"), *deposit).await;
    }

    let result = engine
        .transfer_tx(&CancelToken::new(), params(5, 3, 40))
        .await
        .unwrap();

    assert_eq!((result.from_account.id, result.from_account.balance), (5, 160));
    assert_eq!((result.to_account.id, result.to_account.balance), (3, 50));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transfers_observe_distinct_steps() {
    let engine = Arc::new(engine_with_db().await);
    let a = open(&engine, "alice", 100).await;
    let b = open(&engine, "bob", 100).await;
    let n = 5;
    let amount = 10;

    let mut handles = Vec::new();
    for _ in 0..n {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .transfer_tx(&CancelToken::new(), params(a, b, amount))
                .await
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.from_entry.amount, -amount);
        assert_eq!(result.to_entry.amount, amount);

        let sent = 100 - result.from_account.balance;
        let received = result.to_account.balance - 100;
        assert_eq!(sent, received);
        assert_eq!(sent % amount, 0);
        let k = sent / amount;
        assert!((1..=n).contains(&k));
        assert!(seen.insert(k), "step {k} observed twice");
    }

    assert_eq!(balance(&engine, a).await, 100 - n * amount);
    assert_eq!(balance(&engine, b).await, 100 + n * amount);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_transfers_do_not_deadlock() {
    let engine = Arc::new(engine_with_db().await);
    let a = open(&engine, "alice", 100).await;
    let b = open(&engine, "bob", 100).await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let engine = Arc::clone(&engine);
        let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
        handles.push(tokio::spawn(async move {
            engine
                .transfer_tx(&CancelToken::new(), params(from, to, 10))
                .await
        }));
    }

    tokio::time::timeout(Duration::from_secs(30), async {
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    })
    .await
    .unwrap();

    assert_eq!(balance(&engine, a).await, 100);
    assert_eq!(balance(&engine, b).await, 100);
}

#[tokio::test]
async fn rejected_params_never_reach_storage() {
    let engine = engine_with_db().await;
    let cancel = CancelToken::new();
    let a = open(&engine, "alice", 100).await;
    let b = open(&engine, "bob", 0).await;

    assert_eq!(
        engine.transfer_tx(&cancel, params(a, a, 10)).await,
        Err(EngineError::SameAccount(a))
    );
    assert!(matches!(
        engine.transfer_tx(&cancel, params(a, b, 0)).await,
        Err(EngineError::InvalidAmount(_))
    ));
    let listed = engine.transfers(&cancel, a, a, Page::default()).await.unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn unknown_account_aborts_the_whole_transfer() {
    let engine = engine_with_db().await;
    let cancel = CancelToken::new();
    let a = open(&engine, "alice", 100).await;

    let err = engine
        .transfer_tx(&cancel, params(a, 42, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ConstraintViolation(_)), "{err:?}");

    assert_eq!(balance(&engine, a).await, 100);
    let entries = engine.entries(&cancel, a, Page::default()).await.unwrap();
    assert_eq!(entries.len(), 1);
    let listed = engine.transfers(&cancel, a, a, Page::default()).await.unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn insufficient_funds_rolls_back() {
    let engine = engine_with_db().await;
    let cancel = CancelToken::new();
    let a = open(&engine, "alice", 10).await;
    let b = open(&engine, "bob", 0).await;

    let err = engine
        .transfer_tx(&cancel, params(a, b, 20))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds(_)));
    assert_eq!(balance(&engine, a).await, 10);
    assert_eq!(balance(&engine, b).await, 0);
    assert!(engine.entries(&cancel, b, Page::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn overdraft_can_be_allowed() {
    let engine = Engine::builder()
        .store(store_with_db().await)
        .allow_overdraft(true)
        .build()
        .await
        .unwrap();
    let a = open(&engine, "alice", 10).await;
    let b = open(&engine, "bob", 0).await;

    let result = engine
        .transfer_tx(&CancelToken::new(), params(a, b, 20))
        .await
        .unwrap();
    assert_eq!(result.from_account.balance, -10);
    assert_eq!(result.to_account.balance, 20);
}

#[tokio::test]
async fn validated_transfer_checks_accounts_and_currency() {
    let engine = engine_with_db().await;
    let cancel = CancelToken::new();
    let usd = open(&engine, "alice", 100).await;
    let eur = engine
        .open_account(
            &cancel,
            OpenAccount::new("bob", Currency::Eur).opening_deposit(100),
        )
        .await
        .unwrap()
        .id;
    let other_usd = open(&engine, "carol", 0).await;

    assert!(matches!(
        engine
            .transfer(&cancel, TransferRequest::new(usd, eur, 10, Currency::Usd))
            .await,
        Err(EngineError::CurrencyMismatch(_))
    ));
    assert!(matches!(
        engine
            .transfer(&cancel, TransferRequest::new(usd, 99, 10, Currency::Usd))
            .await,
        Err(EngineError::NotFound(_))
    ));

    let result = engine
        .transfer(
            &cancel,
            TransferRequest::new(usd, other_usd, 25, Currency::Usd),
        )
        .await
        .unwrap();
    assert_eq!(result.to_account.balance, 25);
    assert_eq!(balance(&engine, eur).await, 100);
}

#[tokio::test]
async fn cancelled_token_writes_nothing() {
    let engine = engine_with_db().await;
    let a = open(&engine, "alice", 100).await;
    let b = open(&engine, "bob", 0).await;
    let cancel = CancelToken::new();
    cancel.cancel();

    assert_eq!(
        engine.transfer_tx(&cancel, params(a, b, 10)).await,
        Err(EngineError::Cancelled)
    );
    assert_eq!(balance(&engine, a).await, 100);
}

#[tokio::test]
async fn transfers_list_sent_or_received() {
    let engine = engine_with_db().await;
    let cancel = CancelToken::new();
    let a = open(&engine, "alice", 100).await;
    let b = open(&engine, "bob", 100).await;
    let c = open(&engine, "carol", 100).await;

    engine.transfer_tx(&cancel, params(a, b, 1)).await.unwrap();
    engine.transfer_tx(&cancel, params(b, a, 2)).await.unwrap();
    engine.transfer_tx(&cancel, params(c, b, 3)).await.unwrap();
    engine.transfer_tx(&cancel, params(b, c, 4)).await.unwrap();

    let listed = engine.transfers(&cancel, a, a, Page::default()).await.unwrap();
    let amounts: Vec<i64> = listed.iter().map(|t| t.amount).collect();
    assert_eq!(amounts, vec![1, 2]);

    let listed = engine.transfers(&cancel, b, b, Page::new(2, 1)).await.unwrap();
    let amounts: Vec<i64> = listed.iter().map(|t| t.amount).collect();
    assert_eq!(amounts, vec![2, 3]);
}

#[tokio::test]
async fn referenced_accounts_cannot_be_deleted() {
    let engine = engine_with_db().await;
    let cancel = CancelToken::new();
    let funded = open(&engine, "alice", 100).await;
    let empty = open(&engine, "bob", 0).await;

    assert!(matches!(
        engine.delete_account(&cancel, funded).await,
        Err(EngineError::ConstraintViolation(_))
    ));
    engine.delete_account(&cancel, empty).await.unwrap();
    assert!(matches!(
        engine.account(&cancel, empty).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.delete_account(&cancel, empty).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn storage_enforces_positive_transfer_amounts() {
    let store = store_with_db().await;
    let a = store.create_account("alice", Currency::Usd).await.unwrap();
    let b = store.create_account("bob", Currency::Usd).await.unwrap();

    assert!(matches!(
        store.create_transfer(a.id, b.id, 0).await,
        Err(EngineError::ConstraintViolation(_))
    ));
    assert!(matches!(
        store.add_account_balance(99, 1).await,
        Err(EngineError::NotFound(_))
    ));
    assert_eq!(store.entries_total(a.id).await.unwrap(), 0);
}

#[tokio::test]
async fn balance_overflow_is_a_constraint_violation() {
    let engine = engine_with_db().await;
    let a = open(&engine, "alice", 10).await;
    let b = open(&engine, "bob", i64::MAX).await;

    let res = engine
        .transfer_tx(&CancelToken::new(), params(a, b, 5))
        .await;
    assert!(
        matches!(res, Err(EngineError::ConstraintViolation(_))),
        "{res:?}"
    );
    assert_eq!(balance(&engine, a).await, 10);
    assert_eq!(balance(&engine, b).await, i64::MAX);

    let store = store_with_db().await;
    let low = store.create_account("carol", Currency::Usd).await.unwrap();
    store.add_account_balance(low.id, i64::MIN).await.unwrap();
    assert!(matches!(
        store.add_account_balance(low.id, -1).await,
        Err(EngineError::ConstraintViolation(_))
    ));
    assert_eq!(store.get_account(low.id).await.unwrap().balance, i64::MIN);
}
