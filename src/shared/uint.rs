//! Wide unsigned integer helpers
//!
//! 订单曲线计算全部在 256 位整数域内进行，乘除中间结果使用 512 位，
//! 以复现链上合约的取整与溢出语义。

use alloy_primitives::{U256, U512};

/// Largest value a token amount may take.
pub const MAX_UINT128: u128 = u128::MAX;

/// `U256` representation of [`MAX_UINT128`].
pub const MAX_UINT128_U256: U256 = U256::from_limbs([u64::MAX, u64::MAX, 0, 0]);

/// Lifts a 256-bit value into the 512-bit domain.
#[inline]
pub fn widen(value: U256) -> U512 {
    let l = value.as_limbs();
    U512::from_limbs([l[0], l[1], l[2], l[3], 0, 0, 0, 0])
}

/// Narrows a 512-bit value, returning `None` when it does not fit 256 bits.
#[inline]
pub fn narrow(value: U512) -> Option<U256> {
    let l = value.as_limbs();
    if l[4..].iter().any(|limb| *limb != 0) {
        return None;
    }
    Some(U256::from_limbs([l[0], l[1], l[2], l[3]]))
}

/// Converts to `u128`, returning `None` above [`MAX_UINT128`].
#[inline]
pub fn to_u128(value: U256) -> Option<u128> {
    let l = value.as_limbs();
    if l[2] != 0 || l[3] != 0 {
        return None;
    }
    Some(((l[1] as u128) << 64) | l[0] as u128)
}

/// Converts a 512-bit value to `u128`, returning `None` on overflow.
#[inline]
pub fn wide_to_u128(value: U512) -> Option<u128> {
    narrow(value).and_then(to_u128)
}

#[inline]
pub fn u256(value: u128) -> U256 {
    U256::from(value)
}

/// `floor(a * b / c)`; `None` when `c == 0` or the quotient exceeds 256 bits.
pub fn mul_div_floor(a: U256, b: U256, c: U256) -> Option<U256> {
    if c.is_zero() {
        return None;
    }
    narrow(widen(a) * widen(b) / widen(c))
}

/// `ceil(a * b / c)`; `None` when `c == 0` or the quotient exceeds 256 bits.
pub fn mul_div_ceil(a: U256, b: U256, c: U256) -> Option<U256> {
    if c.is_zero() {
        return None;
    }
    let product = widen(a) * widen(b);
    let divisor = widen(c);
    let mut quotient = product / divisor;
    if !(product % divisor).is_zero() {
        quotient += U512::from(1u8);
    }
    narrow(quotient)
}

/// Integer square root, `floor(sqrt(n))`.
pub fn isqrt(n: U512) -> U512 {
    let two = U512::from(2u8);
    if n < two {
        return n;
    }
    // 初始值不小于真实平方根，牛顿迭代单调下降
    let mut x = U512::from(1u8) << ((n.bit_len() + 1) / 2);
    loop {
        let y = (x + n / x) >> 1;
        if y >= x {
            return x;
        }
        x = y;
    }
}

/// `10^exp` in the 512-bit domain.
pub fn pow10(exp: u32) -> U512 {
    let ten = U512::from(10u8);
    (0..exp).fold(U512::from(1u8), |acc, _| acc * ten)
}
