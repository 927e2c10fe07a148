//! Scalar attribute types and their buffer layout.

use crate::buffer::ByteBuffer;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// A scalar attribute a persistent type can declare.
///
/// Implementations define how the value is laid out in a [`ByteBuffer`]
/// and how it is presented to backends as a [`Value`].
pub trait Field: Sized {
    /// Append this value to the buffer.
    fn encode(&self, buffer: &mut ByteBuffer);

    /// Consume a value from the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is exhausted or malformed.
    fn decode(buffer: &mut ByteBuffer) -> CodecResult<Self>;

    /// The value as seen by a backend.
    fn to_value(&self) -> Value;

    /// Build the value from a surrogate object id.
    ///
    /// Only integer types can carry an id; everything else returns `None`.
    fn from_id(_id: u64) -> Option<Self> {
        None
    }
}

macro_rules! impl_native_field {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Field for $ty {
                fn encode(&self, buffer: &mut ByteBuffer) {
                    buffer.append(&self.to_ne_bytes());
                }

                fn decode(buffer: &mut ByteBuffer) -> CodecResult<Self> {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    buffer.release_into(&mut raw)?;
                    Ok(<$ty>::from_ne_bytes(raw))
                }

                fn to_value(&self) -> Value {
                    Value::$variant((*self).into())
                }

                fn from_id(id: u64) -> Option<Self> {
                    <$ty>::try_from(id).ok()
                }
            }
        )*
    };
}

impl_native_field! {
    i8 => Integer,
    i16 => Integer,
    i32 => Integer,
    i64 => Integer,
    u8 => Unsigned,
    u16 => Unsigned,
    u32 => Unsigned,
    u64 => Unsigned,
}

impl Field for f32 {
    fn encode(&self, buffer: &mut ByteBuffer) {
        buffer.append(&self.to_ne_bytes());
    }

    fn decode(buffer: &mut ByteBuffer) -> CodecResult<Self> {
        let mut raw = [0u8; 4];
        buffer.release_into(&mut raw)?;
        Ok(f32::from_ne_bytes(raw))
    }

    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }
}

impl Field for f64 {
    fn encode(&self, buffer: &mut ByteBuffer) {
        buffer.append(&self.to_ne_bytes());
    }

    fn decode(buffer: &mut ByteBuffer) -> CodecResult<Self> {
        let mut raw = [0u8; 8];
        buffer.release_into(&mut raw)?;
        Ok(f64::from_ne_bytes(raw))
    }

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }
}

impl Field for bool {
    fn encode(&self, buffer: &mut ByteBuffer) {
        buffer.append(&[u8::from(*self)]);
    }

    fn decode(buffer: &mut ByteBuffer) -> CodecResult<Self> {
        let mut raw = [0u8; 1];
        buffer.release_into(&mut raw)?;
        match raw[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidBool(other)),
        }
    }

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

impl Field for char {
    fn encode(&self, buffer: &mut ByteBuffer) {
        buffer.append(&u32::from(*self).to_ne_bytes());
    }

    fn decode(buffer: &mut ByteBuffer) -> CodecResult<Self> {
        let scalar = u32::decode(buffer)?;
        char::from_u32(scalar).ok_or(CodecError::InvalidChar(scalar))
    }

    fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }
}

impl Field for String {
    fn encode(&self, buffer: &mut ByteBuffer) {
        buffer.put_len(self.len());
        buffer.append(self.as_bytes());
    }

    fn decode(buffer: &mut ByteBuffer) -> CodecResult<Self> {
        let len = buffer.get_len()?;
        let bytes = buffer.release(len)?;
        String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

/// Blobs share the string layout.
impl Field for Vec<u8> {
    fn encode(&self, buffer: &mut ByteBuffer) {
        buffer.put_len(self.len());
        buffer.append(self);
    }

    fn decode(buffer: &mut ByteBuffer) -> CodecResult<Self> {
        let len = buffer.get_len()?;
        buffer.release(len)
    }

    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }
}
