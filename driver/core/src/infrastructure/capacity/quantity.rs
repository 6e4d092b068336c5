// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Kubernetes resource quantities (`10Gi`, `500M`, `1.5e9`), converted to
//! whole bytes and rounded up.

use crate::domain::capacity::CapacityError;

const BINARY_SUFFIXES: &[(&str, u32)] = &[
    ("Ki", 1),
    ("Mi", 2),
    ("Gi", 3),
    ("Ti", 4),
    ("Pi", 5),
    ("Ei", 6),
];

/// Decimal suffixes as powers of ten.
const DECIMAL_SUFFIXES: &[(&str, i32)] = &[
    ("n", -9),
    ("u", -6),
    ("m", -3),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

pub fn parse_quantity(input: &str) -> Result<i64, CapacityError> {
    let invalid = || CapacityError::InvalidQuantity(input.to_string());
    let value = input.trim();
    if value.is_empty() {
        return Err(invalid());
    }

    let (number, scale) = split_suffix(value).ok_or_else(invalid)?;
    let (mantissa, exponent) = parse_decimal(number).ok_or_else(invalid)?;

    let (mantissa, exponent) = match scale {
        Scale::Binary(power) => {
            let factor = 1i128.checked_shl(10 * power).ok_or_else(invalid)?;
            (mantissa.checked_mul(factor).ok_or_else(invalid)?, exponent)
        }
        Scale::Decimal(power) => (mantissa, exponent + power),
    };

    let bytes = apply_exponent(mantissa, exponent).ok_or_else(invalid)?;
    i64::try_from(bytes).map_err(|_| invalid())
}

enum Scale {
    Binary(u32),
    Decimal(i32),
}

fn split_suffix(value: &str) -> Option<(&str, Scale)> {
    for (suffix, power) in BINARY_SUFFIXES {
        if let Some(number) = value.strip_suffix(suffix) {
            return Some((number, Scale::Binary(*power)));
        }
    }

    // `1e3` is an exponent, `1E` is exa
    if let Some(pos) = value.find(['e', 'E']) {
        let (number, exp) = (&value[..pos], &value[pos + 1..]);
        if !exp.is_empty() && !number.is_empty() {
            let power: i32 = exp.parse().ok()?;
            return Some((number, Scale::Decimal(power)));
        }
    }

    for (suffix, power) in DECIMAL_SUFFIXES {
        if let Some(number) = value.strip_suffix(suffix) {
            return Some((number, Scale::Decimal(*power)));
        }
    }
    Some((value, Scale::Decimal(0)))
}

/// Parse `[+-]digits[.digits]` into an integer mantissa and a power of ten.
fn parse_decimal(number: &str) -> Option<(i128, i32)> {
    let (negative, digits) = match number.as_bytes().first()? {
        b'-' => (true, &number[1..]),
        b'+' => (false, &number[1..]),
        _ => (false, number),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let mut mantissa: i128 = 0;
    for c in whole.chars().chain(fraction.chars()) {
        mantissa = mantissa.checked_mul(10)?.checked_add(i128::from(c as u8 - b'0'))?;
    }
    let exponent = -i32::try_from(fraction.len()).ok()?;
    Some((if negative { -mantissa } else { mantissa }, exponent))
}

/// `mantissa * 10^exponent`, rounded up to a whole number.
fn apply_exponent(mantissa: i128, exponent: i32) -> Option<i128> {
    if exponent >= 0 {
        let factor = 10i128.checked_pow(u32::try_from(exponent).ok()?)?;
        return mantissa.checked_mul(factor);
    }
    let divisor = 10i128.checked_pow(exponent.unsigned_abs())?;
    let quotient = mantissa / divisor;
    if mantissa % divisor > 0 {
        Some(quotient + 1)
    } else {
        Some(quotient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_suffixes() {
        assert_eq!(parse_quantity("1Ki").unwrap(), 1024);
        assert_eq!(parse_quantity("10Gi").unwrap(), 10 * 1024 * 1024 * 1024);
        assert_eq!(parse_quantity("1.5Mi").unwrap(), 1_572_864);
    }

    #[test]
    fn test_decimal_suffixes_and_exponents() {
        assert_eq!(parse_quantity("500M").unwrap(), 500_000_000);
        assert_eq!(parse_quantity("2k").unwrap(), 2000);
        assert_eq!(parse_quantity("1E").unwrap(), 1_000_000_000_000_000_000);
        assert_eq!(parse_quantity("1.5e9").unwrap(), 1_500_000_000);
        assert_eq!(parse_quantity("12345").unwrap(), 12345);
    }

    #[test]
    fn test_fractions_round_up() {
        assert_eq!(parse_quantity("1500m").unwrap(), 2);
        assert_eq!(parse_quantity("0.1").unwrap(), 1);
    }

    #[test]
    fn test_invalid_quantities() {
        for input in ["", "Gi", "ten", "1.2.3Gi", "1Zi", "100Ei"] {
            assert!(
                matches!(parse_quantity(input), Err(CapacityError::InvalidQuantity(_))),
                "{input} should be rejected"
            );
        }
    }
}
