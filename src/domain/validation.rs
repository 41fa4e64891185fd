//! Order Validator - Rate Invariant Validation
//!
//! Checks a human-readable order before it is compressed into the on-chain
//! format. Violations are reported, never corrected.
//!
//! ## Validation Rules
//! - Liquidity and rates must not be negative
//! - One of the following rate orderings must hold:
//!   - `highest >= marginal > lowest`
//!   - `highest == marginal == lowest`
//!   - `highest > marginal == lowest` with zero liquidity
//!
//! ## Usage
//! ```rust
//! use curve_engine::domain::validation::OrderValidator;
//! use curve_engine::shared::protocol::DecodedOrder;
//! use rust_decimal::Decimal;
//!
//! let order = DecodedOrder {
//!     liquidity: Decimal::from(100),
//!     lowest_rate: Decimal::new(5, 1),
//!     highest_rate: Decimal::ONE,
//!     marginal_rate: Decimal::ONE,
//! };
//! assert!(OrderValidator::new().validate(&order).is_ok());
//! ```

use crate::shared::protocol::DecodedOrder;
use rust_decimal::Decimal;

/// Validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Rates do not describe a usable curve
    #[error("invalid rate ordering: lowest={lowest}, marginal={marginal}, highest={highest}, liquidity={liquidity}")]
    InvalidRateOrdering {
        lowest: Decimal,
        marginal: Decimal,
        highest: Decimal,
        liquidity: Decimal,
    },

    /// A field that must be non-negative is negative
    #[error("{field} must not be negative, got {value}")]
    NegativeValue { field: &'static str, value: Decimal },
}

/// Order validator
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderValidator;

impl OrderValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validates a decoded order
    ///
    /// # Returns
    /// * `Ok(())` if the order is valid
    /// * `Err(ValidationError)` describing the first violated rule
    pub fn validate(&self, order: &DecodedOrder) -> Result<(), ValidationError> {
        self.validate_non_negative(order)?;
        self.validate_rates(
            order.lowest_rate,
            order.marginal_rate,
            order.highest_rate,
            order.liquidity,
        )
    }

    fn validate_non_negative(&self, order: &DecodedOrder) -> Result<(), ValidationError> {
        let fields = [
            ("liquidity", order.liquidity),
            ("lowest_rate", order.lowest_rate),
            ("highest_rate", order.highest_rate),
            ("marginal_rate", order.marginal_rate),
        ];
        for (field, value) in fields {
            if value.is_sign_negative() && !value.is_zero() {
                return Err(ValidationError::NegativeValue { field, value });
            }
        }
        Ok(())
    }

    /// Validates the rate ordering
    pub fn validate_rates(
        &self,
        lowest: Decimal,
        marginal: Decimal,
        highest: Decimal,
        liquidity: Decimal,
    ) -> Result<(), ValidationError> {
        if rates_are_ordered(lowest, marginal, highest, liquidity.is_zero()) {
            return Ok(());
        }
        Err(ValidationError::InvalidRateOrdering { lowest, marginal, highest, liquidity })
    }
}

/// The rate ordering rule, shared by decimal rates and their encoded
/// square-root counterparts.
pub fn rates_are_ordered<T: PartialOrd>(lowest: T, marginal: T, highest: T, empty: bool) -> bool {
    (highest >= marginal && marginal > lowest)
        || (highest == marginal && marginal == lowest)
        || (highest > marginal && marginal == lowest && empty)
}
