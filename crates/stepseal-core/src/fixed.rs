//! Fixed-point arithmetic.
//!
//! All committed metrics are quantized to integers at `2^scale_bits`
//! before any comparison or accumulation, so estimates and witness
//! diagnostics are bit-identical across runs and reimplementations.
//! Floating point exists only at the packet/config boundary.

/// One unit (1.0) at the given scale.
pub fn unit(scale_bits: u32) -> i64 {
    1i64 << scale_bits
}

/// Quantize a scalar to fixed point: offset by half a unit, then
/// truncate toward zero. The truncation matters for negative values
/// (`-0.5` at scale 16 is `-32767`, not `-32768`); conforming
/// reimplementations must use the same rule or witness bytes diverge.
pub fn quantize(x: f64, scale_bits: u32) -> i64 {
    (x * unit(scale_bits) as f64 + 0.5) as i64
}

/// Recover an approximate scalar from fixed point.
pub fn dequantize(m: i64, scale_bits: u32) -> f64 {
    m as f64 / unit(scale_bits) as f64
}

/// Rounded integer mean. Panics on an empty slice; callers guarantee
/// at least one rollout.
pub fn mean_round(vals: &[i64]) -> i64 {
    assert!(!vals.is_empty(), "mean of empty slice");
    let n = vals.len() as i64;
    let sum: i64 = vals.iter().sum();
    (sum + n / 2).div_euclid(n)
}
