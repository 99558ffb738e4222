//! Kubernetes canonical resource quantity parsing, e.g. `200Mi`, `1.5G`, `500m`.
//!
//! Generalises `shipcat_definitions::structs::resources::parse_memory`'s
//! approach (split digits from a trailing unit, scale by a fixed factor) to
//! the full suffix table Kubernetes actually recognises, matching
//! `k8s.io/apimachinery/pkg/api/resource`.

use crate::{Error, ErrorKind, Result};

/// Binary (base-1024) and decimal (base-1000) SI suffix exponents.
///
/// `K`/`k` are both accepted as the base-1000 kilo suffix (Kubernetes allows
/// `k` for decimal, but tolerates the common typo `K` for the same
/// magnitude); only `Ki` is valid for the binary kibi suffix.
fn exponent_for(suffix_char: char) -> Option<i32> {
    match suffix_char {
        'n' => Some(-3),
        'u' => Some(-2),
        'm' => Some(-1),
        'k' | 'K' => Some(1),
        'M' => Some(2),
        'G' => Some(3),
        'T' => Some(4),
        'P' => Some(5),
        'E' => Some(6),
        _ => None,
    }
}

/// Parse a Kubernetes canonical quantity string into an exact `f64`.
///
/// Peels at most a two-character SI suffix off the end of the string. A
/// trailing `i` preceded by one of `K k M G T P E` (but never `ki`) is a
/// binary suffix with base 1024; a trailing `n u m K k M G T P E` alone is a
/// decimal suffix with base 1000; anything else is treated as a bare number.
pub fn parse_quantity(raw: &str) -> Result<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ErrorKind::InvalidQuantity(raw.to_string()).into());
    }

    let chars: Vec<char> = raw.chars().collect();
    let len = chars.len();

    // ki is not a valid suffix: the caller meant Ki.
    if len >= 2 && chars[len - 2] == 'k' && chars[len - 1] == 'i' {
        return Err(ErrorKind::InvalidQuantity(raw.to_string()).into());
    }

    if len >= 2 && chars[len - 1] == 'i' && exponent_for(chars[len - 2]).is_some() {
        let exponent = exponent_for(chars[len - 2]).unwrap();
        let number: &str = &raw[..raw.len() - 2];
        let value = parse_number(number, raw)?;
        return Ok(value * 1024f64.powi(exponent));
    }

    if len >= 1 && exponent_for(chars[len - 1]).is_some() {
        let exponent = exponent_for(chars[len - 1]).unwrap();
        let number: &str = &raw[..raw.len() - chars[len - 1].len_utf8()];
        let value = parse_number(number, raw)?;
        return Ok(value * 1000f64.powi(exponent));
    }

    parse_number(raw, raw)
}

fn parse_number(number: &str, original: &str) -> Result<f64> {
    number
        .parse::<f64>()
        .map_err(|_: std::num::ParseFloatError| -> Error {
            ErrorKind::InvalidQuantity(original.to_string()).into()
        })
}

#[cfg(test)]
mod tests {
    use super::parse_quantity;

    #[test]
    fn parses_bare_numbers() {
        assert_eq!(parse_quantity("42").unwrap(), 42.0);
        assert_eq!(parse_quantity("1.5").unwrap(), 1.5);
    }

    #[test]
    fn parses_binary_suffixes() {
        assert_eq!(parse_quantity("200Mi").unwrap(), 200.0 * 1024.0 * 1024.0);
        assert_eq!(parse_quantity("4Gi").unwrap(), 4.0 * 1024f64.powi(3));
        assert_eq!(parse_quantity("1Ki").unwrap(), 1024.0);
    }

    #[test]
    fn parses_decimal_suffixes() {
        assert_eq!(parse_quantity("1.5G").unwrap(), 1.5 * 1000f64.powi(3));
        assert_eq!(parse_quantity("500m").unwrap(), 0.5);
        assert_eq!(parse_quantity("2k").unwrap(), 2000.0);
        assert_eq!(parse_quantity("2K").unwrap(), 2000.0);
    }

    #[test]
    fn rejects_ki_suffix() {
        assert!(parse_quantity("5ki").is_err());
    }

    #[test]
    fn rejects_unknown_suffix() {
        assert!(parse_quantity("5Q").is_err());
        assert!(parse_quantity("5Qi").is_err());
    }

    #[test]
    fn rejects_malformed_number() {
        assert!(parse_quantity("abc").is_err());
        assert!(parse_quantity("").is_err());
    }

    #[test]
    fn round_trips_every_decimal_suffix() {
        let cases: Vec<(&str, i32)> = vec![
            ("n", -3),
            ("u", -2),
            ("m", -1),
            ("", 0),
            ("k", 1),
            ("M", 2),
            ("G", 3),
            ("T", 4),
            ("P", 5),
            ("E", 6),
        ];
        for (suffix, exponent) in cases {
            let input = format!("3{}", suffix);
            let expected = 3.0 * 1000f64.powi(exponent);
            assert_eq!(parse_quantity(&input).unwrap(), expected, "suffix {:?}", suffix);
        }
    }

    #[test]
    fn round_trips_every_binary_suffix() {
        let cases: Vec<(&str, i32)> = vec![("Ki", 1), ("Mi", 2), ("Gi", 3), ("Ti", 4), ("Pi", 5), ("Ei", 6)];
        for (suffix, exponent) in cases {
            let input = format!("3{}", suffix);
            let expected = 3.0 * 1024f64.powi(exponent);
            assert_eq!(parse_quantity(&input).unwrap(), expected, "suffix {:?}", suffix);
        }
    }
}
