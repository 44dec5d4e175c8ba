//! Display rounding policy.
//!
//! Monetary and percentage fields are rounded once, at snapshot build time,
//! so every reader of a cached snapshot sees identical digits. Rounding is
//! half away from zero to match how the explorer frontend renders amounts.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Which rounding class a field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
    /// USD denominated amounts such as price and market cap.
    Usd,
    /// Percentages such as 24h change and transaction share.
    Percent,
    /// Native token amounts such as block rewards.
    Token,
}

/// Decimal places applied per field class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Precision {
    pub usd_dp: u32,
    pub percent_dp: u32,
    pub token_dp: u32,
}

impl Default for Precision {
    fn default() -> Self {
        Precision {
            usd_dp: 2,
            percent_dp: 2,
            token_dp: 4,
        }
    }
}

impl Precision {
    pub fn round(&self, class: FieldClass, value: Decimal) -> Decimal {
        value.round_dp_with_strategy(self.places(class), RoundingStrategy::MidpointAwayFromZero)
    }

    fn places(&self, class: FieldClass) -> u32 {
        match class {
            FieldClass::Usd => self.usd_dp,
            FieldClass::Percent => self.percent_dp,
            FieldClass::Token => self.token_dp,
        }
    }
}

/// Share of `part` in `whole` as a percentage. A zero whole yields zero
/// rather than a division error.
pub fn share_percent(part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        Decimal::ZERO
    } else {
        part * Decimal::ONE_HUNDRED / whole
    }
}
