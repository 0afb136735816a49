//! ASCII magnitude parsing for the size field of the filename packet.
//!
//! Accepted forms:
//!
//! - up to 10 decimal digits, optionally followed by `k`/`K` (x1024) or
//!   `m`/`M` (x1048576), which also end the number
//! - `0x`/`0X` followed by up to 8 hexadecimal digits
//!
//! The text ends at a NUL byte or at the end of the slice, whichever comes
//! first. Anything else is rejected.

/// Maximum number of decimal digits.
pub const MAX_DECIMAL_DIGITS: usize = 10;

/// Maximum number of hexadecimal digits after the `0x` prefix.
pub const MAX_HEX_DIGITS: usize = 8;

/// Parse an ASCII magnitude. Returns `None` for invalid input.
///
/// A bare `0x` prefix followed directly by the terminator parses as 0.
pub fn parse_magnitude(text: &[u8]) -> Option<u64> {
    // A NUL or the end of the slice both terminate.
    let at = |i: usize| text.get(i).copied().unwrap_or(0);

    if at(0) == b'0' && matches!(at(1), b'x' | b'X') {
        return parse_hex(&text[2..]);
    }

    let mut value: u64 = 0;
    for i in 0..=MAX_DECIMAL_DIGITS {
        match at(i) {
            0 => return Some(value),
            b'k' | b'K' if i > 0 => return Some(value << 10),
            b'm' | b'M' if i > 0 => return Some(value << 20),
            c @ b'0'..=b'9' if i < MAX_DECIMAL_DIGITS => {
                value = value * 10 + u64::from(c - b'0');
            },
            _ => return None,
        }
    }
    None
}

fn parse_hex(digits: &[u8]) -> Option<u64> {
    let at = |i: usize| digits.get(i).copied().unwrap_or(0);

    let mut value: u64 = 0;
    for i in 0..=MAX_HEX_DIGITS {
        let c = at(i);
        if c == 0 {
            return Some(value);
        }
        if i == MAX_HEX_DIGITS {
            return None;
        }
        let nibble = char::from(c).to_digit(16)?;
        value = (value << 4) | u64::from(nibble);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal() {
        assert_eq!(parse_magnitude(b"1024"), Some(1024));
        assert_eq!(parse_magnitude(b"0"), Some(0));
        assert_eq!(parse_magnitude(b"2048\0garbage"), Some(2048));
    }

    #[test]
    fn test_scaled_suffixes() {
        assert_eq!(parse_magnitude(b"4k"), Some(4096));
        assert_eq!(parse_magnitude(b"4K"), Some(4096));
        assert_eq!(parse_magnitude(b"2m"), Some(2_097_152));
        assert_eq!(parse_magnitude(b"2M"), Some(2_097_152));
        // The suffix terminates the scan.
        assert_eq!(parse_magnitude(b"1kXYZ"), Some(1024));
    }

    #[test]
    fn test_suffix_without_digits_is_invalid() {
        assert_eq!(parse_magnitude(b"k"), None);
        assert_eq!(parse_magnitude(b"M"), None);
    }

    #[test]
    fn test_decimal_digit_limit() {
        assert_eq!(parse_magnitude(b"9999999999"), Some(9_999_999_999));
        assert_eq!(parse_magnitude(b"99999999999"), None);
        // The suffix may follow a full 10 digits.
        assert_eq!(parse_magnitude(b"1234567890k"), Some(1_234_567_890 << 10));
    }

    #[test]
    fn test_decimal_rejects_other_bytes() {
        assert_eq!(parse_magnitude(b"12a4"), None);
        assert_eq!(parse_magnitude(b"12 "), None);
        assert_eq!(parse_magnitude(b"-1"), None);
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(parse_magnitude(b""), Some(0));
        assert_eq!(parse_magnitude(b"\0"), Some(0));
    }

    #[test]
    fn test_hex() {
        assert_eq!(parse_magnitude(b"0x1A"), Some(26));
        assert_eq!(parse_magnitude(b"0X1a"), Some(26));
        assert_eq!(parse_magnitude(b"0xFFFFFFFF"), Some(0xFFFF_FFFF));
    }

    #[test]
    fn test_hex_digit_limit() {
        assert_eq!(parse_magnitude(b"0x12345678"), Some(0x1234_5678));
        assert_eq!(parse_magnitude(b"0x123456789"), None);
    }

    #[test]
    fn test_hex_rejects_other_bytes() {
        assert_eq!(parse_magnitude(b"0x1G"), None);
        assert_eq!(parse_magnitude(b"0x10k"), None);
    }

    #[test]
    fn test_bare_hex_prefix_is_zero() {
        assert_eq!(parse_magnitude(b"0x"), Some(0));
        assert_eq!(parse_magnitude(b"0x\0"), Some(0));
    }
}
