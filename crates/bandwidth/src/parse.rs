//! Textual rate-limit parsing.
//!
//! Accepts a plain byte count or a value with a binary suffix: `k`/`K`
//! (KiB/s), `m`/`M` (MiB/s), `g`/`G` (GiB/s). Fractions are allowed
//! (`1.5M`); `0` and the empty string mean "no limit".

use thiserror::Error;

/// Errors produced while parsing a rate limit.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateParseError {
    /// The numeric part did not parse.
    #[error("invalid rate value {0:?}")]
    BadNumber(String),
    /// The suffix is not one of k/m/g.
    #[error("unknown rate suffix {0:?}")]
    BadSuffix(char),
    /// The value overflows a u64 of bytes per second.
    #[error("rate value {0:?} is out of range")]
    OutOfRange(String),
}

/// Parses a textual limit into bytes per second; `None` means unlimited.
pub fn parse_rate_limit(text: &str) -> Result<Option<u64>, RateParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let (number, factor) = match text.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => {
            let factor = match c.to_ascii_lowercase() {
                'k' => 1024.0,
                'm' => 1024.0 * 1024.0,
                'g' => 1024.0 * 1024.0 * 1024.0,
                other => return Err(RateParseError::BadSuffix(other)),
            };
            (&text[..text.len() - 1], factor)
        }
        _ => (text, 1.0),
    };
    let value: f64 = number
        .parse()
        .map_err(|_| RateParseError::BadNumber(text.to_owned()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(RateParseError::BadNumber(text.to_owned()));
    }
    let bytes = value * factor;
    if bytes > u64::MAX as f64 {
        return Err(RateParseError::OutOfRange(text.to_owned()));
    }
    let bytes = bytes.round() as u64;
    Ok((bytes > 0).then_some(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_bytes() {
        assert_eq!(parse_rate_limit("4096"), Ok(Some(4096)));
    }

    #[test]
    fn binary_suffixes() {
        assert_eq!(parse_rate_limit("8k"), Ok(Some(8 * 1024)));
        assert_eq!(parse_rate_limit("8K"), Ok(Some(8 * 1024)));
        assert_eq!(parse_rate_limit("2M"), Ok(Some(2 * 1024 * 1024)));
        assert_eq!(parse_rate_limit("1g"), Ok(Some(1024 * 1024 * 1024)));
    }

    #[test]
    fn fractional_values_round() {
        assert_eq!(parse_rate_limit("1.5k"), Ok(Some(1536)));
        assert_eq!(parse_rate_limit("0.5M"), Ok(Some(512 * 1024)));
    }

    #[test]
    fn zero_and_empty_mean_unlimited() {
        assert_eq!(parse_rate_limit("0"), Ok(None));
        assert_eq!(parse_rate_limit(""), Ok(None));
        assert_eq!(parse_rate_limit("  "), Ok(None));
    }

    #[test]
    fn bad_inputs_are_rejected() {
        assert_eq!(
            parse_rate_limit("fast"),
            Err(RateParseError::BadNumber("fast".into()))
        );
        assert_eq!(parse_rate_limit("1x"), Err(RateParseError::BadSuffix('x')));
        assert_eq!(
            parse_rate_limit("-1"),
            Err(RateParseError::BadNumber("-1".into()))
        );
        assert!(matches!(
            parse_rate_limit("999999999999g"),
            Err(RateParseError::OutOfRange(_))
        ));
    }

    proptest::proptest! {
        #[test]
        fn whole_kib_values_scale_exactly(kib in 1u64..1_000_000) {
            let parsed = parse_rate_limit(&format!("{kib}k")).expect("parses");
            proptest::prop_assert_eq!(parsed, Some(kib * 1024));
        }

        #[test]
        fn arbitrary_text_never_panics(text in ".{0,16}") {
            let _ = parse_rate_limit(&text);
        }
    }
}
