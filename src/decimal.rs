//! Scaled-integer decimal arithmetic.
//!
//! Monetary values are an i64 mantissa plus a scale in [0, 8], denoting
//! `scaled * 10^-scale`. All rounding is half-up (ties away from zero) and
//! the multiply path stays in integer arithmetic so results are
//! deterministic across platforms.

use serde::{Deserialize, Serialize};

use crate::errors::FeedError;

/// Largest supported scale (10^-8 resolution).
pub const MAX_SCALE: u32 = 8;

const POW10: [i64; 19] = [
    1,
    10,
    100,
    1_000,
    10_000,
    100_000,
    1_000_000,
    10_000_000,
    100_000_000,
    1_000_000_000,
    10_000_000_000,
    100_000_000_000,
    1_000_000_000_000,
    10_000_000_000_000,
    100_000_000_000_000,
    1_000_000_000_000_000,
    10_000_000_000_000_000,
    100_000_000_000_000_000,
    1_000_000_000_000_000_000,
];

/// Fixed-point decimal: `scaled * 10^-scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decimal {
    pub scaled: i64,
    pub scale: u32,
}

impl Decimal {
    pub fn new(scaled: i64, scale: u32) -> Result<Self, FeedError> {
        if scale > MAX_SCALE {
            return Err(FeedError::Validation {
                message: format!("decimal scale {scale} out of range [0, {MAX_SCALE}]"),
            });
        }
        Ok(Self { scaled, scale })
    }

    /// Build from a binary float, rounding half-up to `scale` fractional
    /// digits. Non-finite inputs are rejected at this boundary. The float's
    /// shortest decimal representation is re-parsed with integer
    /// arithmetic, so `1.005` rounds to `1.01` at scale 2 even though the
    /// nearest double sits just below the tie.
    pub fn from_f64(value: f64, scale: u32) -> Result<Self, FeedError> {
        if scale > MAX_SCALE {
            return Err(FeedError::Validation {
                message: format!("decimal scale {scale} out of range [0, {MAX_SCALE}]"),
            });
        }
        if !value.is_finite() {
            return Err(FeedError::Validation {
                message: format!("non-finite value {value} rejected"),
            });
        }
        // Display of f64 is the shortest round-trip form, never exponential.
        let text = format!("{value}");
        let unsigned = text.trim_start_matches('-');
        let (int_digits, frac_digits) = match unsigned.split_once('.') {
            Some((i, f)) => (i, f),
            None => (unsigned, ""),
        };
        let overflow = || FeedError::Validation {
            message: format!("value {value} overflows i64 mantissa at scale {scale}"),
        };
        if int_digits.len() > 19 {
            return Err(overflow());
        }
        let mut mantissa: i128 = int_digits.parse().map_err(|_| FeedError::Validation {
            message: format!("unparseable float {value}"),
        })?;
        mantissa = mantissa
            .checked_mul(POW10[scale as usize] as i128)
            .ok_or_else(overflow)?;

        let scale = scale as usize;
        let kept: i128 = if frac_digits.len() <= scale {
            let padded = frac_digits.len()..scale;
            let mut v: i128 = if frac_digits.is_empty() {
                0
            } else {
                frac_digits.parse().map_err(|_| FeedError::Validation {
                    message: format!("unparseable float {value}"),
                })?
            };
            for _ in padded {
                v *= 10;
            }
            v
        } else {
            let keep: i128 = frac_digits[..scale].parse().unwrap_or(0);
            // Half-up on the first dropped digit; ties round away from
            // zero once the sign is applied below.
            let round_up = frac_digits.as_bytes()[scale] >= b'5';
            keep + i128::from(round_up)
        };
        mantissa = mantissa.checked_add(kept).ok_or_else(overflow)?;
        if value.is_sign_negative() {
            mantissa = -mantissa;
        }
        if mantissa > i64::MAX as i128 || mantissa < i64::MIN as i128 {
            return Err(overflow());
        }
        Ok(Self {
            scaled: mantissa as i64,
            scale: scale as u32,
        })
    }

    /// Re-scale to `target`, rounding half-up when dropping digits.
    pub fn rescale(&self, target: u32) -> Result<Self, FeedError> {
        if target > MAX_SCALE {
            return Err(FeedError::Validation {
                message: format!("decimal scale {target} out of range [0, {MAX_SCALE}]"),
            });
        }
        if target == self.scale {
            return Ok(*self);
        }
        if target > self.scale {
            let factor = POW10[(target - self.scale) as usize];
            let scaled = self.scaled.checked_mul(factor).ok_or_else(|| {
                FeedError::Validation {
                    message: format!("rescale of {} to scale {target} overflows", self.scaled),
                }
            })?;
            return Ok(Self {
                scaled,
                scale: target,
            });
        }
        let divisor = POW10[(self.scale - target) as usize] as i128;
        let scaled = div_half_up(self.scaled as i128, divisor);
        Ok(Self {
            scaled: scaled as i64,
            scale: target,
        })
    }

    /// Multiply by `rhs` producing a decimal at `target` scale. The i128
    /// integer product is divided (half-up) or multiplied by the power of
    /// ten bridging `self.scale + rhs.scale` and `target`.
    pub fn mul_round(&self, rhs: Decimal, target: u32) -> Result<Self, FeedError> {
        if target > MAX_SCALE {
            return Err(FeedError::Validation {
                message: format!("decimal scale {target} out of range [0, {MAX_SCALE}]"),
            });
        }
        let product = self.scaled as i128 * rhs.scaled as i128;
        let combined = self.scale + rhs.scale;
        let scaled = if combined >= target {
            div_half_up(product, POW10[(combined - target) as usize] as i128)
        } else {
            product
                .checked_mul(POW10[(target - combined) as usize] as i128)
                .ok_or_else(|| FeedError::Validation {
                    message: "decimal multiply overflows".to_string(),
                })?
        };
        if scaled > i64::MAX as i128 || scaled < i64::MIN as i128 {
            return Err(FeedError::Validation {
                message: "decimal multiply overflows i64 mantissa".to_string(),
            });
        }
        Ok(Self {
            scaled: scaled as i64,
            scale: target,
        })
    }

    pub fn to_f64(&self) -> f64 {
        self.scaled as f64 / POW10[self.scale as usize] as f64
    }

    pub fn is_negative(&self) -> bool {
        self.scaled < 0
    }
}

/// Integer division rounding half-up (ties away from zero). `divisor` must
/// be positive.
fn div_half_up(numerator: i128, divisor: i128) -> i128 {
    debug_assert!(divisor > 0);
    let quotient = numerator / divisor;
    let remainder = numerator % divisor;
    if remainder.abs() * 2 >= divisor {
        quotient + numerator.signum()
    } else {
        quotient
    }
}

impl std::fmt::Display for Decimal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.scaled);
        }
        let factor = POW10[self.scale as usize];
        let sign = if self.scaled < 0 { "-" } else { "" };
        let abs = self.scaled.unsigned_abs();
        let whole = abs / factor as u64;
        let frac = abs % factor as u64;
        write!(
            f,
            "{sign}{whole}.{frac:0width$}",
            width = self.scale as usize
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_f64_half_up() {
        let d = Decimal::from_f64(185.64, 2).unwrap();
        assert_eq!(d.scaled, 18564);
        assert_eq!(d.scale, 2);

        assert_eq!(Decimal::from_f64(1.005, 2).unwrap().scaled, 101);
        assert_eq!(Decimal::from_f64(-1.005, 2).unwrap().scaled, -101);
        assert_eq!(Decimal::from_f64(2.675, 2).unwrap().scaled, 268);
    }

    #[test]
    fn test_rejects_non_finite_and_bad_scale() {
        assert!(Decimal::from_f64(f64::NAN, 2).is_err());
        assert!(Decimal::from_f64(f64::INFINITY, 2).is_err());
        assert!(Decimal::from_f64(f64::NEG_INFINITY, 2).is_err());
        assert!(Decimal::from_f64(1.0, 9).is_err());
        assert!(Decimal::new(1, 9).is_err());
    }

    #[test]
    fn test_rescale_identity() {
        // Re-scaling to the same scale is the identity.
        for scale in 0..=MAX_SCALE {
            let d = Decimal::new(123_456, scale).unwrap();
            assert_eq!(d.rescale(scale).unwrap(), d);
        }
    }

    #[test]
    fn test_rescale_up_and_back() {
        // Going up then back down half-up moves at most half a ulp.
        let d = Decimal::new(18564, 2).unwrap();
        let up = d.rescale(6).unwrap();
        assert_eq!(up.scaled, 18_564_0000);
        assert_eq!(up.rescale(2).unwrap(), d);
    }

    #[test]
    fn test_rescale_down_rounds() {
        let d = Decimal::new(12345, 4).unwrap(); // 1.2345
        assert_eq!(d.rescale(2).unwrap().scaled, 123); // 1.23
        let d = Decimal::new(12355, 4).unwrap(); // 1.2355
        assert_eq!(d.rescale(2).unwrap().scaled, 124); // ties away from zero
        let d = Decimal::new(-12355, 4).unwrap();
        assert_eq!(d.rescale(2).unwrap().scaled, -124);
    }

    #[test]
    fn test_mul_round_fx_conversion() {
        // EUR 110.00 at rate 1.10 (scale 8) -> USD 121.00 at scale 2.
        let price = Decimal::new(11000, 2).unwrap();
        let rate = Decimal::new(110_000_000, 8).unwrap();
        let converted = price.mul_round(rate, 2).unwrap();
        assert_eq!(converted.scaled, 12100);
        assert_eq!(converted.scale, 2);
    }

    #[test]
    fn test_mul_round_half_up_on_drop() {
        // 1.25 * 0.1 = 0.125 -> 0.13 at scale 2.
        let a = Decimal::new(125, 2).unwrap();
        let b = Decimal::new(1, 1).unwrap();
        assert_eq!(a.mul_round(b, 2).unwrap().scaled, 13);
    }

    #[test]
    fn test_mul_round_scale_widening() {
        // 2 * 3 at target scale 4: integer product multiplied up.
        let a = Decimal::new(2, 0).unwrap();
        let b = Decimal::new(3, 0).unwrap();
        let r = a.mul_round(b, 4).unwrap();
        assert_eq!(r.scaled, 60000);
    }

    #[test]
    fn test_display() {
        assert_eq!(Decimal::new(18564, 2).unwrap().to_string(), "185.64");
        assert_eq!(Decimal::new(-5, 2).unwrap().to_string(), "-0.05");
        assert_eq!(Decimal::new(42, 0).unwrap().to_string(), "42");
    }
}
