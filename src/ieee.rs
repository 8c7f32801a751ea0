//! Conversion between `f64` and the 80-bit IEEE extended ("SANE") format
//! AIFF uses to store sample rates. The algorithm follows the historical
//! Apple reference conversions so rates round-trip bit-exactly against
//! files produced by other tools.

const EXPONENT_BIAS: i32 = 16383;
const INFINITY_EXPONENT: u16 = 0x7fff;

// x = m * 2^e with m in [0.5, 1); finite non-zero input only.
fn frexp(x: f64) -> (f64, i32) {
    let bits = x.to_bits();
    let raw_exp = ((bits >> 52) & 0x7ff) as i32;
    if raw_exp == 0 {
        // subnormal: renormalize first
        let (m, e) = frexp(x * f64::from_bits(0x43f0_0000_0000_0000)); // 2^64
        (m, e - 64)
    } else {
        let m = f64::from_bits((bits & !(0x7ffu64 << 52)) | (1022u64 << 52));
        (m, raw_exp - 1022)
    }
}

// x * 2^e. Built from exponent-bounded factors: a single `powi` factor
// over/underflows for |e| beyond the f64 exponent range even when the
// product itself is representable.
fn ldexp(mut x: f64, mut e: i32) -> f64 {
    while e > 1023 {
        x *= f64::from_bits(0x7fe0_0000_0000_0000); // 2^1023
        e -= 1023;
    }
    while e < -1022 {
        x *= f64::from_bits(0x0010_0000_0000_0000); // 2^-1022
        e += 1022;
    }
    x * f64::from_bits(u64::from((e + 1023) as u32) << 52)
}

/// Encodes a double as the 10-byte extended format.
///
/// Zero maps to all-zero bytes; values outside the representable exponent
/// range (and NaN) collapse to the infinity sentinel. Results that would
/// need a negative biased exponent are denormalized instead.
pub fn to_extended(num: f64) -> [u8; 10] {
    let (sign, num) = if num < 0.0 { (0x8000u16, -num) } else { (0, num) };

    let mut expon: i32;
    let hi_mant: u32;
    let lo_mant: u32;

    if num == 0.0 {
        expon = 0;
        hi_mant = 0;
        lo_mant = 0;
    } else if !num.is_finite() {
        expon = i32::from(INFINITY_EXPONENT);
        hi_mant = 0;
        lo_mant = 0;
    } else {
        let (mut f_mant, e) = frexp(num);
        expon = e;
        if expon > 16384 || !(f_mant < 1.0) {
            expon = i32::from(INFINITY_EXPONENT);
            hi_mant = 0;
            lo_mant = 0;
        } else {
            expon += EXPONENT_BIAS - 1;
            if expon < 0 {
                // denormal: scale the mantissa down, keep a zero exponent
                f_mant = ldexp(f_mant, expon);
                expon = 0;
            }
            f_mant = ldexp(f_mant, 32);
            let fs_mant = f_mant.floor();
            hi_mant = fs_mant as u32;
            lo_mant = ldexp(f_mant - fs_mant, 32).floor() as u32;
        }
    }

    let expon = expon as u16 | sign;
    let mut bytes = [0u8; 10];
    bytes[0..2].copy_from_slice(&expon.to_be_bytes());
    bytes[2..6].copy_from_slice(&hi_mant.to_be_bytes());
    bytes[6..10].copy_from_slice(&lo_mant.to_be_bytes());
    bytes
}

/// Decodes the 10-byte extended format back to a double.
///
/// All-zero input decodes to 0.0 and the infinity sentinel to
/// `f64::INFINITY`; the sign bit negates either.
pub fn from_extended(bytes: &[u8; 10]) -> f64 {
    let expon = i32::from(bytes[0] & 0x7f) << 8 | i32::from(bytes[1]);
    let hi_mant = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
    let lo_mant = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);

    let f = if expon == 0 && hi_mant == 0 && lo_mant == 0 {
        0.0
    } else if expon == i32::from(INFINITY_EXPONENT) {
        f64::INFINITY
    } else {
        // the two mantissa halves sit 31 and 63 bits below the exponent
        let e = expon - EXPONENT_BIAS;
        ldexp(f64::from(hi_mant), e - 31) + ldexp(f64::from(lo_mant), e - 63)
    };

    if bytes[0] & 0x80 != 0 {
        -f
    } else {
        f
    }
}
