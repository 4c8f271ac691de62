//! Half-precision to single-precision conversion.
//!
//! Denormals (exponent bits zero) flush to zero and the exponent is re-biased
//! without special-casing infinity or NaN, so `0x7c00` becomes `65536.0`
//! rather than `+inf`. The same steps are shipped as script source inside
//! every generated decoder because function nodes cannot import code.

const NON_SIGN_MASK: i32 = 0x7fff;
const SIGN_MASK: i32 = 0x8000;
const EXPONENT_MASK: i32 = 0x7c00;
const MANTISSA_SHIFT: u32 = 13;
const SIGN_SHIFT: u32 = 16;
const BIAS_ADJUST: i32 = 0x3800_0000;

pub fn half_to_f32(bytes: [u8; 2]) -> f32 {
    let h = i32::from(i16::from_le_bytes(bytes));
    let mut value = h & NON_SIGN_MASK;
    let mut sign = h & SIGN_MASK;
    let exponent = h & EXPONENT_MASK;

    value = value.wrapping_shl(MANTISSA_SHIFT);
    sign = sign.wrapping_shl(SIGN_SHIFT);
    value = value.wrapping_add(BIAS_ADJUST);
    if exponent == 0 {
        value = 0;
    }
    f32::from_bits((value | sign) as u32)
}

/// Script rendition of [`half_to_f32`]; expects a two byte `Buffer` slice.
pub const HALF_TO_FLOAT_JS: &str = r#"var halfToFloat = function (slice) {
    var h = slice.readInt16LE(0);
    var bits = new Int32Array(3);
    bits[0] = h & 0x7fff;
    bits[1] = h & 0x8000;
    bits[2] = h & 0x7c00;
    bits[0] = bits[0] << 13;
    bits[1] = bits[1] << 16;
    bits[0] += 0x38000000;
    bits[0] = (bits[2] === 0 ? 0 : bits[0]);
    bits[0] = bits[0] | bits[1];
    return new Float32Array(bits.buffer, 0, 1)[0];
};
"#;
