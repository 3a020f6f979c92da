//! Internal helpers for model validation and conversion.
//!
//! These utilities are **not** part of the public API. They centralize
//! validation and mapping logic so every store enforces the same invariants.

use crate::{Currency, EngineError, ResultEngine};

/// Parse a currency code stored in the DB into a strongly typed `Currency`.
pub(crate) fn model_currency(value: &str) -> ResultEngine<Currency> {
    Currency::try_from(value)
        .map_err(|_| EngineError::Storage(format!("invalid stored currency: {value}")))
}

/// Trim an owner name and reject empty ones.
pub(crate) fn normalize_owner(value: &str) -> ResultEngine<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidOwner(
            "owner must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Ensure an account is denominated in the expected currency.
pub(crate) fn ensure_currency(
    account_id: i64,
    expected: Currency,
    actual: Currency,
) -> ResultEngine<()> {
    if expected != actual {
        return Err(EngineError::CurrencyMismatch(format!(
            "account {account_id} currency mismatch: expected {}, got {}",
            expected.code(),
            actual.code()
        )));
    }
    Ok(())
}
