//! Splitting a charge across its line items.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{AppError, AppResult};

/// Per-item minor-unit shares of one charge. The shares always sum to the total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub total_minor: i64,
    pub shares: Vec<i64>,
}

impl Allocation {
    pub fn split(total_minor: i64, items: usize) -> AppResult<Self> {
        if total_minor <= 0 {
            return Err(AppError::validation("amount", "must be greater than zero"));
        }
        if items == 0 {
            return Err(AppError::validation("items", "at least one line item is required"));
        }
        Ok(Self {
            total_minor,
            shares: split_minor(total_minor, items),
        })
    }

    pub fn total_major(&self) -> Decimal {
        to_major(self.total_minor)
    }

    pub fn share_major(&self, index: usize) -> Decimal {
        to_major(self.shares.get(index).copied().unwrap_or_default())
    }
}

/// `floor(total / n)` for the first `n - 1` items, the remainder for the last.
pub fn split_minor(total_minor: i64, items: usize) -> Vec<i64> {
    if items == 0 {
        return Vec::new();
    }
    let n = items as i64;
    let base = total_minor.div_euclid(n);
    let mut shares = vec![base; items];
    shares[items - 1] = total_minor - base * (n - 1);
    shares
}

/// Minor units to major units with two fractional digits. Exact, no rounding.
pub fn to_major(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// Major units back to minor units, truncating anything past two digits.
pub fn to_minor(major: Decimal) -> i64 {
    (major * Decimal::ONE_HUNDRED)
        .trunc()
        .to_i64()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_single_item_takes_everything() {
        assert_eq!(split_minor(5000, 1), vec![5000]);
    }

    #[test]
    fn test_one_cent_over_three_items() {
        let allocation = Allocation::split(1, 3).unwrap();
        assert_eq!(allocation.shares, vec![0, 0, 1]);
        assert_eq!(allocation.total_major(), Decimal::from_str("0.01").unwrap());
    }

    #[test]
    fn test_odd_split_sums_to_total() {
        let allocation = Allocation::split(1001, 2).unwrap();
        assert_eq!(allocation.shares, vec![500, 501]);
        let sum: Decimal = (0..2).map(|i| allocation.share_major(i)).sum();
        assert_eq!(sum, Decimal::from_str("10.01").unwrap());
        assert_eq!(allocation.total_major(), sum);
    }

    #[test]
    fn test_shares_always_sum_exactly() {
        for total in [1_i64, 7, 99, 100, 85000, 123457] {
            for n in 1..=7 {
                assert_eq!(split_minor(total, n).iter().sum::<i64>(), total);
            }
        }
    }

    #[test]
    fn test_rejects_non_positive_amounts() {
        assert!(Allocation::split(0, 1).is_err());
        assert!(Allocation::split(-5, 1).is_err());
        assert!(Allocation::split(100, 0).is_err());
    }

    #[test]
    fn test_minor_major_conversion() {
        assert_eq!(to_major(85000), Decimal::from_str("850.00").unwrap());
        assert_eq!(to_minor(Decimal::from_str("850.00").unwrap()), 85000);
        assert_eq!(to_minor(Decimal::from_str("10.019").unwrap()), 1001);
    }
}
