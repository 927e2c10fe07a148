//! # Strata Codec
//!
//! Byte-level building blocks for the Strata object store.
//!
//! This crate provides:
//! - [`ByteBuffer`], the append/consume buffer object backups live in
//! - [`Field`], the scalar attribute types a persistent type may declare
//!   and their buffer layout
//! - [`Value`] and [`Row`], the dynamically typed view of an object that
//!   backends bind into statements
//!
//! ## Usage
//!
//! ```
//! use strata_codec::ByteBuffer;
//!
//! let mut buffer = ByteBuffer::new();
//! buffer.write(&42u32);
//! buffer.write(&"Kind of Blue".to_string());
//!
//! assert_eq!(buffer.read::<u32>().unwrap(), 42);
//! assert_eq!(buffer.read::<String>().unwrap(), "Kind of Blue");
//! assert!(buffer.is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod buffer;
mod error;
mod field;
mod row;
mod value;

pub use buffer::ByteBuffer;
pub use error::{CodecError, CodecResult};
pub use field::Field;
pub use row::Row;
pub use value::Value;
