//! tf18: an 18-bit float with 1 sign bit, a 7-bit exponent biased by 63 and
//! a 10-bit mantissa with an implicit leading one. There are no subnormals,
//! infinities or NaNs; an all-zero exponent and mantissa is zero.

pub const SIGN_BIT: u32 = 1 << 17;
pub const MANT_BITS: u32 = 10;
pub const MANT_MASK: u32 = (1 << MANT_BITS) - 1;
pub const EXP_MASK: u32 = 0x7f;
pub const EXP_BIAS: i64 = 63;
/// Largest representable magnitude, exponent 127 with a full mantissa.
pub const MAX_MAGNITUDE: u32 = (EXP_MASK << MANT_BITS) | MANT_MASK;

const F64_EXP_BIAS: i64 = 1023;
const F64_MANT_BITS: u32 = 52;
const DROPPED_BITS: u32 = F64_MANT_BITS - MANT_BITS;

/// Rounds to the nearest tf18, ties away from zero. Values too large
/// (including infinities and NaN) saturate to the largest magnitude; values
/// too small flush to a zero of the same sign.
pub fn encode(value: f64) -> u32 {
    let bits = value.to_bits();
    let sign = if bits >> 63 != 0 { SIGN_BIT } else { 0 };
    let exp = ((bits >> F64_MANT_BITS) & 0x7ff) as i64 - (F64_EXP_BIAS - EXP_BIAS);
    if exp > EXP_MASK as i64 {
        return sign | MAX_MAGNITUDE;
    }
    if exp <= 0 {
        return sign;
    }
    let f64_mant = bits & ((1u64 << F64_MANT_BITS) - 1);
    let mut mant = (f64_mant >> DROPPED_BITS) as u32;
    if f64_mant & (1u64 << (DROPPED_BITS - 1)) != 0 {
        mant += 1;
    }
    // A mantissa carry lands in the exponent field.
    let magnitude = ((exp as u32) << MANT_BITS) + mant;
    sign | magnitude.min(MAX_MAGNITUDE)
}

#[cfg(test)]
pub fn decode(bits: u32) -> f64 {
    let negative = bits & SIGN_BIT != 0;
    let exp = (bits >> MANT_BITS) & EXP_MASK;
    let mant = bits & MANT_MASK;
    let magnitude = if exp == 0 && mant == 0 {
        0.0
    } else {
        (1.0 + mant as f64 / (1 << MANT_BITS) as f64) * 2f64.powi(exp as i32 - EXP_BIAS as i32)
    };
    if negative {
        -magnitude
    } else {
        magnitude
    }
}
