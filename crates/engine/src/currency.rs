use serde::{Deserialize, Serialize};

use crate::EngineError;

/// ISO currency code of an account. Balances and amounts are always `i64`
/// minor units (cents).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Usd,
    Eur,
    Cad,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::Usd, Currency::Eur, Currency::Cad];

    /// Canonical currency code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Cad => "CAD",
        }
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl TryFrom<&str> for Currency {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "CAD" => Ok(Currency::Cad),
            other => Err(EngineError::CurrencyMismatch(format!(
                "unsupported currency: {other}"
            ))),
        }
    }
}

impl core::str::FromStr for Currency {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::try_from(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Currency::try_from(" usd "), Ok(Currency::Usd));
        assert_eq!("cad".parse::<Currency>(), Ok(Currency::Cad));
    }

    #[test]
    fn unsupported_currency_is_rejected() {
        assert_eq!(
            Currency::try_from("GBP"),
            Err(EngineError::CurrencyMismatch(
                "unsupported currency: GBP".to_string()
            ))
        );
    }

    #[test]
    fn code_round_trips() {
        for currency in Currency::ALL {
            assert_eq!(Currency::try_from(currency.code()), Ok(currency));
        }
    }
}
