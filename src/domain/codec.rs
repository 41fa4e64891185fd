//! Order Codec
//!
//! Converts between human-readable orders (decimal liquidity and rates) and
//! the compact `{y, z, A, B}` representation stored on-chain.
//!
//! Rates are carried as square roots scaled by `2^48`. The low bound `L` and
//! the range width `H - L` are packed into compressed floats
//! (`mantissa << exponent`) whose mantissa is limited to [`ORDER_FLOAT_BITS`].
//! Encoding truncates the scaled square root to the bits the packing keeps, so
//! `B` decodes back to exactly the value that was encoded.

use crate::domain::validation::{rates_are_ordered, OrderValidator, ValidationError};
use crate::shared::protocol::{DecodedOrder, DecodedStrategy, EncodedOrder, EncodedStrategy};
use crate::shared::uint::{isqrt, mul_div_floor, narrow, pow10, to_u128, u256, widen};
use alloy_primitives::{U256, U512};
use rust_decimal::Decimal;

/// Fixed-point shift of an encoded square-root rate.
pub const RATE_SHIFT: usize = 48;

/// Mantissa width of the `A`/`B` compressed floats.
pub const ORDER_FLOAT_BITS: u32 = 48;

/// Largest scale a [`Decimal`] can carry.
const MAX_DECIMAL_SCALE: u32 = 28;

/// Decimal mantissas are limited to 96 bits.
const DECIMAL_MANTISSA_BITS: usize = 96;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0} exceeds the encodable range")]
    Overflow(&'static str),

    #[error("{0} does not fit a 96-bit decimal")]
    DecimalOverflow(&'static str),
}

impl CodecError {
    pub fn is_invalid_rate_ordering(&self) -> bool {
        matches!(self, CodecError::Validation(ValidationError::InvalidRateOrdering { .. }))
    }
}

/// Packs `value` into a compressed float with a `bits`-wide mantissa.
pub fn encode_float(value: U256, bits: u32) -> u64 {
    let exponent = (value >> bits as usize).bit_len();
    let mantissa = (value >> exponent).as_limbs()[0];
    ((exponent as u64) << bits) | mantissa
}

/// Expands a compressed float. Low bits dropped by [`encode_float`] read as zero.
pub fn decode_float(value: u64, bits: u32) -> U256 {
    let mask = (1u64 << bits) - 1;
    let exponent = (value >> bits) as usize;
    U256::from(value & mask) << exponent
}

/// `floor(sqrt(rate) * 2^48)`, truncated to the bits [`encode_float`] keeps.
pub fn encode_rate(rate: Decimal) -> Result<U256, CodecError> {
    if rate.is_sign_negative() && !rate.is_zero() {
        return Err(ValidationError::NegativeValue { field: "rate", value: rate }.into());
    }
    let mantissa = widen(u256(rate.mantissa().unsigned_abs()));
    let scaled = (mantissa << (2 * RATE_SHIFT)) / pow10(rate.scale());
    let root = narrow(isqrt(scaled)).ok_or(CodecError::Overflow("rate"))?;
    let shift = (root >> RATE_SHIFT).bit_len();
    Ok((root >> shift) << shift)
}

/// Squares an encoded square-root rate back into a decimal rate.
pub fn decode_rate(value: U256) -> Result<Decimal, CodecError> {
    let wide = widen(value);
    ratio_to_decimal(wide * wide, U512::from(1u8) << (2 * RATE_SHIFT), "rate")
}

/// Integer part of a non-negative decimal.
pub fn liquidity_units(liquidity: Decimal) -> Result<u128, CodecError> {
    if liquidity.is_sign_negative() && !liquidity.is_zero() {
        return Err(ValidationError::NegativeValue { field: "liquidity", value: liquidity }.into());
    }
    let units = widen(u256(liquidity.mantissa().unsigned_abs())) / pow10(liquidity.scale());
    narrow(units).and_then(to_u128).ok_or(CodecError::Overflow("liquidity"))
}

pub fn encode_order(order: &DecodedOrder) -> Result<EncodedOrder, CodecError> {
    encode_order_with_z(order, None)
}

/// Encodes an order, optionally overriding the capacity `z`.
///
/// The override is used for empty orders whose capacity is derived from the
/// opposite order of the same strategy (see [`calculate_correlated_z`]).
pub fn encode_order_with_z(order: &DecodedOrder, z: Option<u128>) -> Result<EncodedOrder, CodecError> {
    OrderValidator::new().validate(order)?;

    let y = liquidity_units(order.liquidity)?;
    let low = encode_rate(order.lowest_rate)?;
    let high = encode_rate(order.highest_rate)?;
    let marginal = encode_rate(order.marginal_rate)?;

    // 截断后再次检查，编码值必须同样满足价格顺序
    if !rates_are_ordered(low, marginal, high, y == 0) {
        return Err(ValidationError::InvalidRateOrdering {
            lowest: order.lowest_rate,
            marginal: order.marginal_rate,
            highest: order.highest_rate,
            liquidity: order.liquidity,
        }
        .into());
    }

    let z = match z {
        Some(z) => z,
        None if high == marginal || y == 0 || marginal == low => y,
        None => mul_div_floor(u256(y), high - low, marginal - low)
            .and_then(to_u128)
            .ok_or(CodecError::Overflow("z"))?,
    };

    Ok(EncodedOrder {
        y,
        z,
        a: encode_float(high - low, ORDER_FLOAT_BITS),
        b: encode_float(low, ORDER_FLOAT_BITS),
    })
}

pub fn decode_order(order: &EncodedOrder) -> Result<DecodedOrder, CodecError> {
    let a = widen(decode_float(order.a, ORDER_FLOAT_BITS));
    let b = widen(decode_float(order.b, ORDER_FLOAT_BITS));
    let one = U512::from(1u8) << (2 * RATE_SHIFT);

    let lowest_rate = ratio_to_decimal(b * b, one, "lowest rate")?;
    let high = a + b;
    let highest_rate = ratio_to_decimal(high * high, one, "highest rate")?;
    let marginal_rate = if order.y == order.z || order.z == 0 {
        highest_rate
    } else {
        // (B + A*y/z)^2 = (B*z + A*y)^2 / z^2
        let y = widen(u256(order.y));
        let z = widen(u256(order.z));
        let numerator = b * z + a * y;
        let squared = numerator
            .checked_mul(numerator)
            .ok_or(CodecError::Overflow("marginal rate"))?;
        ratio_to_decimal(squared, z * z * one, "marginal rate")?
    };

    Ok(DecodedOrder {
        liquidity: units_to_decimal(order.y)?,
        lowest_rate,
        highest_rate,
        marginal_rate,
    })
}

/// Capacity for an empty order, priced from the opposite order's liquidity
/// at the empty order's geometric-mean rate.
pub fn calculate_correlated_z(empty: &DecodedOrder, other_liquidity: u128) -> Result<u128, CodecError> {
    let low = encode_rate(empty.lowest_rate)?;
    let high = encode_rate(empty.highest_rate)?;
    // sqrt(low * high) = L * H / 2^96
    let product = widen(u256(other_liquidity)) * widen(low) * widen(high);
    narrow(product >> (2 * RATE_SHIFT))
        .and_then(to_u128)
        .ok_or(CodecError::Overflow("correlated z"))
}

pub fn encode_strategy(strategy: &DecodedStrategy) -> Result<EncodedStrategy, CodecError> {
    let y0 = liquidity_units(strategy.order0.liquidity)?;
    let y1 = liquidity_units(strategy.order1.liquidity)?;

    let z0 = if y0 == 0 && y1 > 0 {
        Some(calculate_correlated_z(&strategy.order0, y1)?)
    } else {
        None
    };
    let z1 = if y1 == 0 && y0 > 0 {
        Some(calculate_correlated_z(&strategy.order1, y0)?)
    } else {
        None
    };

    Ok(EncodedStrategy {
        id: strategy.id,
        token0: strategy.token0,
        token1: strategy.token1,
        order0: encode_order_with_z(&strategy.order0, z0)?,
        order1: encode_order_with_z(&strategy.order1, z1)?,
    })
}

pub fn decode_strategy(strategy: &EncodedStrategy) -> Result<DecodedStrategy, CodecError> {
    Ok(DecodedStrategy {
        id: strategy.id,
        token0: strategy.token0,
        token1: strategy.token1,
        order0: decode_order(&strategy.order0)?,
        order1: decode_order(&strategy.order1)?,
    })
}

fn units_to_decimal(units: u128) -> Result<Decimal, CodecError> {
    if units >> DECIMAL_MANTISSA_BITS != 0 {
        return Err(CodecError::DecimalOverflow("liquidity"));
    }
    Ok(Decimal::from_i128_with_scale(units as i128, 0))
}

/// `numerator / denominator` as a decimal, truncated to the finest scale
/// whose mantissa still fits 96 bits.
fn ratio_to_decimal(numerator: U512, denominator: U512, what: &'static str) -> Result<Decimal, CodecError> {
    if denominator.is_zero() {
        return Err(CodecError::Overflow(what));
    }
    let limit = U512::from(1u8) << DECIMAL_MANTISSA_BITS;
    let whole = numerator / denominator;
    if whole >= limit {
        return Err(CodecError::DecimalOverflow(what));
    }
    let remainder = numerator % denominator;

    for scale in (0..=MAX_DECIMAL_SCALE).rev() {
        let factor = pow10(scale);
        let fraction = remainder
            .checked_mul(factor)
            .ok_or(CodecError::Overflow(what))?
            / denominator;
        let mantissa = whole * factor + fraction;
        if mantissa < limit {
            let value = narrow(mantissa).and_then(to_u128).ok_or(CodecError::DecimalOverflow(what))?;
            return Ok(Decimal::from_i128_with_scale(value as i128, scale).normalize());
        }
    }
    Err(CodecError::DecimalOverflow(what))
}
