// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Operator argument parsing: signed decimal, `0x` hex, and inclusive
//! `start:stop` ranges.

use anyhow::{anyhow, bail, Result};

/// Parse a decimal or `0x`-prefixed integer with an optional sign.
pub fn parse_i64(token: &str) -> Result<i64> {
    let (negative, rest) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token.strip_prefix('+').unwrap_or(token)),
    };
    let magnitude = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16)
    } else {
        rest.parse::<i64>()
    }
    .map_err(|_| anyhow!("invalid number '{}'", token))?;
    Ok(if negative { -magnitude } else { magnitude })
}

pub fn parse_u32(token: &str) -> Result<u32> {
    let value = parse_i64(token)?;
    u32::try_from(value).map_err(|_| anyhow!("'{}' out of range", token))
}

pub fn parse_u16(token: &str) -> Result<u16> {
    let value = parse_i64(token)?;
    u16::try_from(value).map_err(|_| anyhow!("'{}' out of range", token))
}

pub fn parse_u8(token: &str) -> Result<u8> {
    let value = parse_i64(token)?;
    u8::try_from(value).map_err(|_| anyhow!("'{}' out of range", token))
}

/// Parse a float; `0x` integers are accepted for bit-pattern parameters.
pub fn parse_f64(token: &str) -> Result<f64> {
    if token.contains("0x") || token.contains("0X") {
        return Ok(parse_i64(token)? as f64);
    }
    token
        .parse::<f64>()
        .map_err(|_| anyhow!("invalid number '{}'", token))
}

/// Parse an inclusive `start:stop` range; a bare value means
/// `start == stop`. Negative bounds and inverted ranges are errors.
pub fn parse_range(token: &str) -> Result<(u16, u16)> {
    let (start, stop) = match token.split_once(':') {
        Some((start, stop)) => (parse_i64(start)?, parse_i64(stop)?),
        None => {
            let value = parse_i64(token)?;
            (value, value)
        }
    };
    if start < 0 || stop < 0 {
        bail!("range '{}' has a negative bound", token);
    }
    if start > stop {
        bail!("range '{}' runs backwards", token);
    }
    Ok((
        u16::try_from(start).map_err(|_| anyhow!("'{}' out of range", token))?,
        u16::try_from(stop).map_err(|_| anyhow!("'{}' out of range", token))?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_decimal_sign_hex() {
        assert_eq!(parse_i64("42").unwrap(), 42);
        assert_eq!(parse_i64("+7").unwrap(), 7);
        assert_eq!(parse_i64("-19").unwrap(), -19);
        assert_eq!(parse_i64("0x10").unwrap(), 16);
        assert_eq!(parse_i64("0XfF").unwrap(), 255);
        assert_eq!(parse_i64("-0x8").unwrap(), -8);
        assert!(parse_i64("12abc").is_err());
        assert!(parse_i64("").is_err());
    }

    #[test]
    fn floats_accept_hex_patterns() {
        assert_eq!(parse_f64("1.5").unwrap(), 1.5);
        assert_eq!(parse_f64("0x20").unwrap(), 32.0);
        assert!(parse_f64("one").is_err());
    }

    #[test]
    fn ranges() {
        assert_eq!(parse_range("3").unwrap(), (3, 3));
        assert_eq!(parse_range("0:3").unwrap(), (0, 3));
        assert_eq!(parse_range("0x2:0x4").unwrap(), (2, 4));
        assert!(parse_range("3:1").is_err());
        assert!(parse_range("-1:2").is_err());
        assert!(parse_range("a:b").is_err());
    }
}
