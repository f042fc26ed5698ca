//! Modified UTF-8: UTF-16 code units encoded one at a time, NUL as two bytes,
//! supplementary characters as surrogate pairs.

use crate::error::MessageError;

pub(crate) fn encoded_len(s: &str) -> usize {
    s.encode_utf16().map(unit_len).sum()
}

#[inline]
fn unit_len(unit: u16) -> usize {
    match unit {
        0x0001..=0x007F => 1,
        0x0000 | 0x0080..=0x07FF => 2,
        _ => 3,
    }
}

pub(crate) fn encode(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(s));
    for unit in s.encode_utf16() {
        match unit_len(unit) {
            1 => out.push(unit as u8),
            2 => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

pub(crate) fn decode(bytes: &[u8]) -> Result<String, MessageError> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i] as u16;
        let (unit, width) = match bytes[i] >> 4 {
            0x0..=0x7 => (b0, 1),
            0xC | 0xD => {
                let b1 = continuation(bytes, i + 1)?;
                (((b0 & 0x1F) << 6) | b1, 2)
            }
            0xE => {
                let b1 = continuation(bytes, i + 1)?;
                let b2 = continuation(bytes, i + 2)?;
                (((b0 & 0x0F) << 12) | (b1 << 6) | b2, 3)
            }
            _ => return Err(MessageError::InvalidString),
        };
        units.push(unit);
        i += width;
    }
    String::from_utf16(&units).map_err(|_| MessageError::InvalidString)
}

#[inline]
fn continuation(bytes: &[u8], at: usize) -> Result<u16, MessageError> {
    match bytes.get(at) {
        Some(&b) if b & 0xC0 == 0x80 => Ok((b & 0x3F) as u16),
        _ => Err(MessageError::InvalidString),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_is_unchanged() {
        assert_eq!(encode("abc"), b"abc");
        assert_eq!(encoded_len("abc"), 3);
    }

    #[test]
    fn nul_and_supplementary_use_modified_forms() {
        assert_eq!(encode("\0"), [0xC0, 0x80]);
        // U+1F600 becomes a surrogate pair, three bytes each.
        let smile = encode("\u{1F600}");
        assert_eq!(smile.len(), 6);
        assert_eq!(decode(&smile).unwrap(), "\u{1F600}");
        assert_eq!(decode(&encode("é\0ß")).unwrap(), "é\0ß");
    }

    #[test]
    fn truncated_sequence_is_rejected() {
        assert!(matches!(decode(&[0xE2, 0x82]), Err(MessageError::InvalidString)));
        assert!(matches!(decode(&[0xFF]), Err(MessageError::InvalidString)));
    }
}
