//! Output correction functions
//!
//! Pure functions `f(value, max_val) -> value` with `f(0) = 0`,
//! `f(max_val) = max_val`, monotone non-decreasing on `[0, max_val]`.
//! Typically used to compensate for perceived brightness.

/// Signature shared by every correction function and by the
/// `set_output_correction` methods on `Node`/`Universe`/`Channel`.
pub type CorrectionFn = fn(f64, u32) -> f64;

/// Identity correction. The default when nothing else is configured.
pub fn linear(val: f64, _max_val: u32) -> f64 {
    val
}

/// `v^2 / M`
pub fn quadratic(val: f64, max_val: u32) -> f64 {
    val.powi(2) / max_val as f64
}

/// `v^3 / M^2`
pub fn cubic(val: f64, max_val: u32) -> f64 {
    val.powi(3) / (max_val as f64).powi(2)
}

/// `v^4 / M^3`
pub fn quadruple(val: f64, max_val: u32) -> f64 {
    val.powi(4) / (max_val as f64).powi(3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_fixed() {
        for f in [linear, quadratic, cubic, quadruple] {
            assert_eq!(f(0.0, 255), 0.0);
            assert!((f(255.0, 255) - 255.0).abs() < 1e-6);
        }
    }

    #[test]
    fn monotone_nondecreasing() {
        for f in [linear, quadratic, cubic, quadruple] {
            let mut prev = f(0.0, 255);
            for v in 1..=255u32 {
                let cur = f(v as f64, 255);
                assert!(cur >= prev, "{:?} not monotone at {}", cur, v);
                prev = cur;
            }
        }
    }

    #[test]
    fn quadratic_matches_known_value() {
        // 128^2 / 255 = 64.25...
        assert!((quadratic(128.0, 255) - 64.2509803921).abs() < 1e-6);
    }
}
