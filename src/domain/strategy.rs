//! Strategy prices
//!
//! Converts between human prices (quote per base, in whole tokens) with
//! budgets and the two decoded orders of a strategy, whose rates are
//! expressed in smallest units of the token sold per smallest unit of the
//! token received.
//!
//! - `order0` sells the base token: its rates are inverted sell prices
//! - `order1` sells the quote token: its rates are the buy prices

use crate::domain::validation::{OrderValidator, ValidationError};
use crate::shared::protocol::{DecodedOrder, DecodedStrategy};
use alloy_primitives::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Largest decimals count whose power of ten fits a decimal mantissa.
const MAX_TOKEN_DECIMALS: u8 = 28;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StrategyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0} must be positive")]
    ZeroSellPrice(&'static str),

    #[error("arithmetic overflow computing {0}")]
    Overflow(&'static str),

    #[error("unsupported token decimals: {0}")]
    Decimals(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDecimals {
    pub base: u8,
    pub quote: u8,
}

/// Buy and sell ranges of a strategy, in quote tokens per base token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyPrices {
    pub buy_price_low: Decimal,
    pub buy_price_marginal: Decimal,
    pub buy_price_high: Decimal,
    /// Quote tokens available for buying
    pub buy_budget: Decimal,
    pub sell_price_low: Decimal,
    pub sell_price_marginal: Decimal,
    pub sell_price_high: Decimal,
    /// Base tokens available for selling
    pub sell_budget: Decimal,
}

impl StrategyPrices {
    fn non_negative(&self) -> Result<(), ValidationError> {
        let fields = [
            ("buy_price_low", self.buy_price_low),
            ("buy_price_marginal", self.buy_price_marginal),
            ("buy_price_high", self.buy_price_high),
            ("buy_budget", self.buy_budget),
            ("sell_price_low", self.sell_price_low),
            ("sell_price_marginal", self.sell_price_marginal),
            ("sell_price_high", self.sell_price_high),
            ("sell_budget", self.sell_budget),
        ];
        for (field, value) in fields {
            if value.is_sign_negative() && !value.is_zero() {
                return Err(ValidationError::NegativeValue { field, value });
            }
        }
        Ok(())
    }
}

/// Builds a new strategy trading `base` against `quote`.
///
/// The id is left at zero; the ledger assigns it on creation.
pub fn build_strategy(
    base: Address,
    quote: Address,
    decimals: TokenDecimals,
    prices: &StrategyPrices,
) -> Result<DecodedStrategy, StrategyError> {
    prices.non_negative()?;
    for (field, price) in [
        ("sell_price_low", prices.sell_price_low),
        ("sell_price_marginal", prices.sell_price_marginal),
        ("sell_price_high", prices.sell_price_high),
    ] {
        if price.is_zero() {
            return Err(StrategyError::ZeroSellPrice(field));
        }
    }

    let base_unit = unit(decimals.base)?;
    let quote_unit = unit(decimals.quote)?;

    // 卖单价格取倒数，因此最高价对应最低汇率
    let order0 = DecodedOrder {
        liquidity: mul(prices.sell_budget, base_unit, "sell liquidity")?.trunc(),
        lowest_rate: normalize(invert(prices.sell_price_high)?, base_unit, quote_unit)?,
        highest_rate: normalize(invert(prices.sell_price_low)?, base_unit, quote_unit)?,
        marginal_rate: normalize(invert(prices.sell_price_marginal)?, base_unit, quote_unit)?,
    };
    let order1 = DecodedOrder {
        liquidity: mul(prices.buy_budget, quote_unit, "buy liquidity")?.trunc(),
        lowest_rate: normalize(prices.buy_price_low, quote_unit, base_unit)?,
        highest_rate: normalize(prices.buy_price_high, quote_unit, base_unit)?,
        marginal_rate: normalize(prices.buy_price_marginal, quote_unit, base_unit)?,
    };

    let validator = OrderValidator::new();
    validator.validate(&order0)?;
    validator.validate(&order1)?;

    Ok(DecodedStrategy { id: U256::ZERO, token0: base, token1: quote, order0, order1 })
}

/// Recovers prices and budgets from a strategy whose `token0` is the base.
pub fn strategy_prices(strategy: &DecodedStrategy, decimals: TokenDecimals) -> Result<StrategyPrices, StrategyError> {
    let base_unit = unit(decimals.base)?;
    let quote_unit = unit(decimals.quote)?;
    let sell = &strategy.order0;
    let buy = &strategy.order1;

    let sell_price = |rate: Decimal, field: &'static str| -> Result<Decimal, StrategyError> {
        if rate.is_zero() {
            return Err(StrategyError::ZeroSellPrice(field));
        }
        invert(normalize(rate, quote_unit, base_unit)?)
    };

    Ok(StrategyPrices {
        buy_price_low: normalize(buy.lowest_rate, base_unit, quote_unit)?,
        buy_price_marginal: normalize(buy.marginal_rate, base_unit, quote_unit)?,
        buy_price_high: normalize(buy.highest_rate, base_unit, quote_unit)?,
        buy_budget: div(buy.liquidity, quote_unit, "buy budget")?,
        sell_price_low: sell_price(sell.highest_rate, "sell_price_low")?,
        sell_price_marginal: sell_price(sell.marginal_rate, "sell_price_marginal")?,
        sell_price_high: sell_price(sell.lowest_rate, "sell_price_high")?,
        sell_budget: div(sell.liquidity, base_unit, "sell budget")?,
    })
}

fn unit(decimals: u8) -> Result<Decimal, StrategyError> {
    if decimals > MAX_TOKEN_DECIMALS {
        return Err(StrategyError::Decimals(decimals));
    }
    10i128
        .checked_pow(u32::from(decimals))
        .and_then(|value| Decimal::try_from_i128_with_scale(value, 0).ok())
        .ok_or(StrategyError::Decimals(decimals))
}

/// `rate * numerator_unit / denominator_unit`
fn normalize(rate: Decimal, numerator_unit: Decimal, denominator_unit: Decimal) -> Result<Decimal, StrategyError> {
    div(mul(rate, numerator_unit, "rate")?, denominator_unit, "rate")
}

fn invert(value: Decimal) -> Result<Decimal, StrategyError> {
    div(Decimal::ONE, value, "inverse price")
}

fn mul(a: Decimal, b: Decimal, what: &'static str) -> Result<Decimal, StrategyError> {
    a.checked_mul(b).ok_or(StrategyError::Overflow(what))
}

fn div(a: Decimal, b: Decimal, what: &'static str) -> Result<Decimal, StrategyError> {
    a.checked_div(b).ok_or(StrategyError::Overflow(what))
}
