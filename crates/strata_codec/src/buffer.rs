//! Append/consume byte buffer.

use crate::error::{CodecError, CodecResult};
use crate::field::Field;
use bytes::{Buf, BufMut, BytesMut};

/// A FIFO byte buffer.
///
/// Writers append at the back and readers consume from the front, so a
/// sequence of writes is read back in the same order. This is the format
/// object backups are kept in while a transaction is open:
///
/// - scalars are stored as raw native-endian bytes
/// - strings and blobs as `(usize length, length bytes)`
/// - object references as a `u64` id, `0` meaning null
/// - reference collections as `(usize count, count × u64 id)`
///
/// The layout is process-local; it is never written to disk or sent
/// anywhere, so native endianness and `usize` width are fine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    inner: BytesMut,
}

impl ByteBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(capacity),
        }
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if every written byte has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// The unread bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }

    /// Drop all unread bytes.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Append raw bytes.
    pub fn append(&mut self, bytes: &[u8]) {
        self.inner.put_slice(bytes);
    }

    /// Consume exactly `out.len()` bytes into `out`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] if fewer bytes are available;
    /// nothing is consumed in that case.
    pub fn release_into(&mut self, out: &mut [u8]) -> CodecResult<()> {
        self.ensure(out.len())?;
        self.inner.copy_to_slice(out);
        Ok(())
    }

    /// Consume `len` bytes and return them.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] if fewer bytes are available.
    pub fn release(&mut self, len: usize) -> CodecResult<Vec<u8>> {
        self.ensure(len)?;
        Ok(self.inner.split_to(len).to_vec())
    }

    /// Append a length or count prefix.
    pub fn put_len(&mut self, len: usize) {
        self.append(&len.to_ne_bytes());
    }

    /// Consume a length or count prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is exhausted.
    pub fn get_len(&mut self) -> CodecResult<usize> {
        let mut raw = [0u8; std::mem::size_of::<usize>()];
        self.release_into(&mut raw)?;
        Ok(usize::from_ne_bytes(raw))
    }

    /// Append an object reference; `None` is written as `0`.
    pub fn put_reference(&mut self, id: Option<u64>) {
        self.append(&id.unwrap_or(0).to_ne_bytes());
    }

    /// Consume an object reference; `0` reads back as `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is exhausted.
    pub fn get_reference(&mut self) -> CodecResult<Option<u64>> {
        let id = u64::decode(self)?;
        Ok((id != 0).then_some(id))
    }

    /// Append a field value.
    pub fn write<F: Field>(&mut self, value: &F) {
        value.encode(self);
    }

    /// Consume a field value.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is exhausted or the bytes do not form
    /// a valid `F`.
    pub fn read<F: Field>(&mut self) -> CodecResult<F> {
        F::decode(self)
    }

    fn ensure(&self, needed: usize) -> CodecResult<()> {
        if self.inner.remaining() < needed {
            return Err(CodecError::UnexpectedEof {
                needed,
                available: self.inner.remaining(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reads_back_in_write_order() {
        let mut buf = ByteBuffer::new();
        buf.write(&7u32);
        buf.write(&"track".to_string());
        buf.put_reference(Some(42));
        buf.put_reference(None);

        assert_eq!(buf.read::<u32>().unwrap(), 7);
        assert_eq!(buf.read::<String>().unwrap(), "track");
        assert_eq!(buf.get_reference().unwrap(), Some(42));
        assert_eq!(buf.get_reference().unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn string_layout_is_length_then_bytes() {
        let mut buf = ByteBuffer::new();
        buf.write(&"abc".to_string());

        let width = std::mem::size_of::<usize>();
        assert_eq!(buf.len(), width + 3);
        assert_eq!(&buf.as_bytes()[..width], &3usize.to_ne_bytes());
        assert_eq!(&buf.as_bytes()[width..], b"abc");
    }

    #[test]
    fn null_reference_is_zero() {
        let mut buf = ByteBuffer::new();
        buf.put_reference(None);
        assert_eq!(buf.as_bytes(), &0u64.to_ne_bytes());
    }

    #[test]
    fn short_read_fails_without_consuming() {
        let mut buf = ByteBuffer::new();
        buf.append(&[1, 2, 3]);

        let err = buf.read::<u64>().unwrap_err();
        assert_eq!(
            err,
            CodecError::UnexpectedEof {
                needed: 8,
                available: 3
            }
        );
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn release_returns_prefix() {
        let mut buf = ByteBuffer::with_capacity(16);
        buf.append(b"hello world");
        assert_eq!(buf.release(5).unwrap(), b"hello");
        assert_eq!(buf.as_bytes(), b" world");
    }

    #[test]
    fn clear_discards_unread() {
        let mut buf = ByteBuffer::new();
        buf.write(&1u64);
        buf.clear();
        assert!(buf.is_empty());
    }

    proptest! {
        #[test]
        fn mixed_fields_read_back(
            text in ".{0,32}",
            blob in proptest::collection::vec(any::<u8>(), 0..64),
            number in any::<i64>(),
            reference in proptest::option::of(1u64..),
        ) {
            let mut buf = ByteBuffer::new();
            buf.write(&text);
            buf.write(&number);
            buf.put_reference(reference);
            buf.write(&blob);

            prop_assert_eq!(buf.read::<String>().unwrap(), text);
            prop_assert_eq!(buf.read::<i64>().unwrap(), number);
            prop_assert_eq!(buf.get_reference().unwrap(), reference);
            prop_assert_eq!(buf.read::<Vec<u8>>().unwrap(), blob);
            prop_assert!(buf.is_empty());
        }
    }
}
