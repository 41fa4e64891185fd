//! Trade Math
//!
//! Exact integer evaluation of an order's bonding curve, reproducing the
//! ledger's rounding and overflow behavior.
//!
//! With `C = 2^48` and the expanded coefficients `A`, `B`:
//!
//! ```text
//! target(x) = floor( x (Ay + Bz)^2 / (C^2 z^2 + A x (Ay + Bz)) )
//! source(x) =  ceil( x C^2 z^2 / ((Ay + Bz) (Ay + Bz - A x)) )
//! ```
//!
//! Every intermediate is bounded by 2^256. A result that overflows, divides by
//! zero or exceeds 2^128 - 1 is reported as a sentinel: `0` for target amounts,
//! `u128::MAX` for source amounts.

use crate::domain::codec::{decode_float, ORDER_FLOAT_BITS};
use crate::shared::protocol::EncodedOrder;
use crate::shared::uint::{mul_div_ceil, mul_div_floor, to_u128, u256, MAX_UINT128};
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// Fixed-point scale of the curve (`2^48`).
pub const CURVE_ONE: U256 = U256::from_limbs([1 << 48, 0, 0, 0]);

/// Fee resolution, parts per million.
pub const PPM_RESOLUTION: u32 = 1_000_000;

/// Evaluation strategy for the curve formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeFormula {
    /// Divides a common factor out of numerator and denominator when a
    /// product would exceed 256 bits.
    #[default]
    Rescaled,
    /// Direct evaluation; any 256-bit overflow yields the sentinel.
    Legacy,
}

/// Curve evaluator bound to one [`TradeFormula`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TradeMath {
    formula: TradeFormula,
}

impl TradeMath {
    pub fn new(formula: TradeFormula) -> Self {
        Self { formula }
    }

    pub fn formula(&self) -> TradeFormula {
        self.formula
    }

    /// Target amount received for `amount` of source, rounded down.
    ///
    /// Returns `0` when the order cannot serve the trade.
    pub fn target_from_source(&self, amount: u128, order: &EncodedOrder) -> u128 {
        let coefficients = Coefficients::new(amount, order);
        let result = match self.formula {
            TradeFormula::Rescaled => coefficients.target_rescaled(),
            TradeFormula::Legacy => coefficients.target_legacy(),
        };
        result.and_then(to_u128).unwrap_or(0)
    }

    /// Source amount required to receive `amount` of target, rounded up.
    ///
    /// Returns `u128::MAX` when the order cannot serve the trade.
    pub fn source_from_target(&self, amount: u128, order: &EncodedOrder) -> u128 {
        let coefficients = Coefficients::new(amount, order);
        let result = match self.formula {
            TradeFormula::Rescaled => coefficients.source_rescaled(),
            TradeFormula::Legacy => coefficients.source_legacy(),
        };
        result.and_then(to_u128).unwrap_or(MAX_UINT128)
    }
}

struct Coefficients {
    x: U256,
    y: U256,
    z: U256,
    a: U256,
    b: U256,
}

impl Coefficients {
    fn new(amount: u128, order: &EncodedOrder) -> Self {
        Self {
            x: u256(amount),
            y: u256(order.y),
            z: u256(order.z),
            a: decode_float(order.a, ORDER_FLOAT_BITS),
            b: decode_float(order.b, ORDER_FLOAT_BITS),
        }
    }

    /// `(C z, A y + B z)`
    fn common(&self) -> Option<(U256, U256)> {
        let t1 = self.z.checked_mul(CURVE_ONE)?;
        let t2 = self.y.checked_mul(self.a)?.checked_add(self.z.checked_mul(self.b)?)?;
        Some((t1, t2))
    }

    fn target_rescaled(&self) -> Option<U256> {
        if self.a.is_zero() {
            return self.target_limit();
        }
        let (t1, t2) = self.common()?;
        let t3 = t2.checked_mul(self.x)?;
        let factor = min_factor(t1, t1)?.max(min_factor(t3, self.a)?);
        let t4 = mul_div_ceil(t1, t1, factor)?;
        let t5 = mul_div_ceil(t3, self.a, factor)?;
        mul_div_floor(t2, t3 / factor, t4.checked_add(t5)?)
    }

    fn source_rescaled(&self) -> Option<U256> {
        if self.a.is_zero() {
            return self.source_limit();
        }
        let (t1, t2) = self.common()?;
        let t3 = t2.checked_sub(self.x.checked_mul(self.a)?)?;
        let factor = min_factor(t1, t1)?.max(min_factor(t2, t3)?);
        let t4 = mul_div_ceil(t1, t1, factor)?;
        let t5 = mul_div_floor(t2, t3, factor)?;
        mul_div_ceil(self.x, t4, t5)
    }

    fn target_legacy(&self) -> Option<U256> {
        if self.a.is_zero() {
            return self.target_limit();
        }
        let (t1, t2) = self.common()?;
        let t3 = t2.checked_mul(self.x)?;
        let denominator = t1.checked_mul(t1)?.checked_add(t3.checked_mul(self.a)?)?;
        mul_div_floor(t2, t3, denominator)
    }

    fn source_legacy(&self) -> Option<U256> {
        if self.a.is_zero() {
            return self.source_limit();
        }
        let (t1, t2) = self.common()?;
        let t3 = t2.checked_sub(self.x.checked_mul(self.a)?)?;
        mul_div_ceil(self.x, t1.checked_mul(t1)?, t2.checked_mul(t3)?)
    }

    // 限价单 (A = 0): 价格恒定为 B^2 / C^2
    fn target_limit(&self) -> Option<U256> {
        let price = self.b.checked_mul(self.b)?;
        mul_div_floor(self.x, price, CURVE_ONE * CURVE_ONE)
    }

    fn source_limit(&self) -> Option<U256> {
        let price = self.b.checked_mul(self.b)?;
        mul_div_ceil(self.x, CURVE_ONE * CURVE_ONE, price)
    }
}

/// Smallest factor that brings `a * b` back under 2^256.
fn min_factor(a: U256, b: U256) -> Option<U256> {
    mul_div_ceil(a, b, U256::MAX)
}

/// Amount left after deducting a fee, rounded down.
pub fn subtract_fee(amount: u128, fee_ppm: u32) -> u128 {
    let kept = PPM_RESOLUTION.saturating_sub(fee_ppm);
    mul_div_floor(u256(amount), U256::from(kept), U256::from(PPM_RESOLUTION))
        .and_then(to_u128)
        .unwrap_or(0)
}

/// Gross amount that leaves `amount` after the fee is deducted, rounded up.
pub fn add_fee(amount: u128, fee_ppm: u32) -> u128 {
    let kept = PPM_RESOLUTION.saturating_sub(fee_ppm);
    mul_div_ceil(u256(amount), U256::from(PPM_RESOLUTION), U256::from(kept))
        .and_then(to_u128)
        .unwrap_or(MAX_UINT128)
}
