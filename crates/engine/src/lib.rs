//! Transactional funds-transfer engine.
//!
//! Accounts hold a balance in minor units. Money moves between them through
//! [`Engine::transfer_tx`], which records a [`Transfer`], two opposite
//! [`Entry`] rows and both balance updates in a single transaction. Balance
//! rows are always locked in ascending account id order (see
//! [`update_order`]), so concurrent transfers never deadlock.
//!
//! Storage is reached only through the traits in [`store`]: [`SqlStore`]
//! runs on sea-orm, [`MemoryStore`] keeps everything in process.

pub use accounts::Account;
pub use cancel::CancelToken;
pub use commands::{OpenAccount, TransferRequest};
pub use currency::Currency;
pub use entries::Entry;
pub use error::EngineError;
pub use ops::{Engine, EngineBuilder, LedgerCheck, UpdateOrder, add_money, update_order};
pub use store::{
    LedgerRepository, LedgerStore, LedgerTransaction, MemoryStore, Page, Queries, SqlStore,
};
pub use transfers::{Transfer, TransferTxParams, TransferTxResult};

mod accounts;
mod cancel;
mod commands;
mod currency;
mod entries;
mod error;
mod ops;
pub mod store;
mod transfers;
mod util;

pub type ResultEngine<T> = Result<T, EngineError>;
