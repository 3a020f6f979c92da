//! Command structs for engine operations.
//!
//! These types group parameters for the validated write operations (account
//! opening and currency-checked transfers), keeping call sites readable.

use serde::{Deserialize, Serialize};

use crate::{Currency, TransferTxParams};

/// Open an account, optionally funded with an opening deposit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAccount {
    pub owner: String,
    pub currency: Currency,
    pub opening_deposit: i64,
}

impl OpenAccount {
    #[must_use]
    pub fn new(owner: impl Into<String>, currency: Currency) -> Self {
        Self {
            owner: owner.into(),
            currency,
            opening_deposit: 0,
        }
    }

    #[must_use]
    pub fn opening_deposit(mut self, amount: i64) -> Self {
        self.opening_deposit = amount;
        self
    }
}

/// Move `amount` between two accounts that must both hold `currency`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
    pub currency: Currency,
}

impl TransferRequest {
    #[must_use]
    pub fn new(from_account_id: i64, to_account_id: i64, amount: i64, currency: Currency) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
            currency,
        }
    }

    pub fn params(&self) -> TransferTxParams {
        TransferTxParams {
            from_account_id: self.from_account_id,
            to_account_id: self.to_account_id,
            amount: self.amount,
        }
    }
}
