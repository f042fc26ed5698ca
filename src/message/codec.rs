//! Fixed big-endian encodings for primitives.

use super::{Message, mutf8};
use crate::error::MessageError;

macro_rules! impl_primitive_codec {
    ($($ty:ty => $push:ident, $pop:ident, $peek:ident;)*) => {
        impl Message {
            $(
                #[inline]
                pub fn $push(&mut self, value: $ty) {
                    self.push(&value.to_be_bytes());
                }

                #[inline]
                pub fn $pop(&mut self) -> Result<$ty, MessageError> {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    self.pop_into(&mut raw)?;
                    Ok(<$ty>::from_be_bytes(raw))
                }

                #[inline]
                pub fn $peek(&self) -> Result<$ty, MessageError> {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    self.peek_into(&mut raw)?;
                    Ok(<$ty>::from_be_bytes(raw))
                }
            )*
        }
    };
}

impl_primitive_codec! {
    u8 => push_u8, pop_u8, peek_u8;
    i8 => push_i8, pop_i8, peek_i8;
    u16 => push_u16, pop_u16, peek_u16;
    i16 => push_i16, pop_i16, peek_i16;
    u32 => push_u32, pop_u32, peek_u32;
    i32 => push_i32, pop_i32, peek_i32;
    u64 => push_u64, pop_u64, peek_u64;
    i64 => push_i64, pop_i64, peek_i64;
}

/// Longest encoded string the 2-byte prefix can describe.
pub const MAX_STRING_BYTES: usize = u16::MAX as usize;

impl Message {
    pub fn push_f32(&mut self, value: f32) {
        self.push_u32(value.to_bits());
    }

    pub fn pop_f32(&mut self) -> Result<f32, MessageError> {
        self.pop_u32().map(f32::from_bits)
    }

    pub fn push_f64(&mut self, value: f64) {
        self.push_u64(value.to_bits());
    }

    pub fn pop_f64(&mut self) -> Result<f64, MessageError> {
        self.pop_u64().map(f64::from_bits)
    }

    pub fn push_bool(&mut self, value: bool) {
        self.push_u8(u8::from(value));
    }

    /// Any non-zero byte reads as `true`.
    pub fn pop_bool(&mut self) -> Result<bool, MessageError> {
        self.pop_u8().map(|b| b != 0)
    }

    /// Pushes `value` as a 2-byte length followed by its modified UTF-8
    /// encoding.
    pub fn push_string(&mut self, value: &str) -> Result<(), MessageError> {
        let encoded = mutf8::encode(value);
        if encoded.len() > MAX_STRING_BYTES {
            return Err(MessageError::MalformedLength(encoded.len()));
        }
        self.push(&encoded);
        self.push_u16(encoded.len() as u16);
        Ok(())
    }

    /// Pops a string pushed by [`push_string`](Self::push_string). Nothing is
    /// consumed unless the whole string is present and well formed.
    pub fn pop_string(&mut self) -> Result<String, MessageError> {
        let n = self.peek_u16()? as usize;
        if self.len() < 2 + n {
            return Err(MessageError::EndOfData {
                needed: 2 + n,
                available: self.len(),
            });
        }
        let mut raw = vec![0u8; 2 + n];
        self.peek_into(&mut raw)?;
        let value = mutf8::decode(&raw[2..])?;
        self.consume(2 + n);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip_and_restore_length() {
        let mut msg = Message::from(vec![0xAA, 0xBB]);
        let before = msg.len();

        msg.push_i32(-123_456);
        assert_eq!(msg.pop_i32().unwrap(), -123_456);
        msg.push_i16(-2);
        assert_eq!(msg.pop_i16().unwrap(), -2);
        msg.push_i64(i64::MIN + 7);
        assert_eq!(msg.pop_i64().unwrap(), i64::MIN + 7);
        msg.push_bool(true);
        assert!(msg.pop_bool().unwrap());
        msg.push_bool(false);
        assert!(!msg.pop_bool().unwrap());
        msg.push_f32(1.5);
        assert_eq!(msg.pop_f32().unwrap(), 1.5);
        msg.push_f64(-0.1);
        assert_eq!(msg.pop_f64().unwrap(), -0.1);
        msg.push_string("héllo\0wörld").unwrap();
        assert_eq!(msg.pop_string().unwrap(), "héllo\0wörld");

        assert_eq!(msg.len(), before);
        assert_eq!(msg.to_bytes().as_ref(), &[0xAA, 0xBB]);
    }

    #[test]
    fn integers_are_big_endian() {
        let mut msg = Message::new();
        msg.push_u32(0x0102_0304);
        msg.push_i16(-1);
        assert_eq!(msg.to_bytes().as_ref(), &[0xFF, 0xFF, 1, 2, 3, 4]);
        assert_eq!(msg.peek_i16().unwrap(), -1);
        assert_eq!(msg.len(), 6);
    }

    #[test]
    fn string_layout_and_limits() {
        let mut msg = Message::new();
        msg.push_string("ab").unwrap();
        assert_eq!(msg.to_bytes().as_ref(), &[0, 2, b'a', b'b']);

        let long = "x".repeat(MAX_STRING_BYTES + 1);
        assert!(matches!(
            msg.push_string(&long),
            Err(MessageError::MalformedLength(n)) if n == MAX_STRING_BYTES + 1
        ));
        assert_eq!(msg.len(), 4);
    }

    #[test]
    fn short_string_is_not_consumed() {
        let mut msg = Message::from(vec![b'a']);
        msg.push_u16(5);
        assert!(matches!(
            msg.pop_string(),
            Err(MessageError::EndOfData { needed: 7, available: 3 })
        ));
        assert_eq!(msg.len(), 3);
    }

    #[test]
    fn pop_on_short_buffer_fails() {
        let mut msg = Message::from(vec![1, 2]);
        assert!(matches!(
            msg.pop_u32(),
            Err(MessageError::EndOfData { needed: 4, available: 2 })
        ));
        assert_eq!(msg.len(), 2);
    }
}
