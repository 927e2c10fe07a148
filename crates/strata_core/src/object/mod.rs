//! Persistent types and the field visitor they describe themselves to.
//!
//! A persistent type lists its fields once, in [`Persistent::persist`].
//! Every engine operation that needs to look inside an object (backup,
//! restore, reference counting, row building, id sync) is a
//! [`FieldVisitor`] walking that list.

mod relation;

pub use relation::{HasMany, ObjectPtr, Ref};

use crate::error::CoreResult;
use crate::types::Cascade;
use strata_codec::Field;

/// A type whose instances live in an [`ObjectStore`](crate::ObjectStore).
///
/// `Default` is used to rebuild an instance when a removal is rolled back.
///
/// ```
/// use strata_core::{Cascade, CoreResult, FieldVisitor, Persistent, Ref};
///
/// #[derive(Default)]
/// struct Album {
///     id: u64,
///     title: String,
/// }
///
/// #[derive(Default)]
/// struct Track {
///     id: u64,
///     title: String,
///     album: Ref<Album>,
/// }
///
/// impl Persistent for Album {
///     fn persist<V: FieldVisitor>(&mut self, v: &mut V) -> CoreResult<()> {
///         v.on_primary_key("id", &mut self.id)?;
///         v.on_attribute("title", &mut self.title)
///     }
/// }
///
/// impl Persistent for Track {
///     fn persist<V: FieldVisitor>(&mut self, v: &mut V) -> CoreResult<()> {
///         v.on_primary_key("id", &mut self.id)?;
///         v.on_attribute("title", &mut self.title)?;
///         v.on_belongs_to("album", &mut self.album, Cascade::NONE)
///     }
/// }
/// ```
pub trait Persistent: Default + Send + 'static {
    /// Present every field, in declaration order, to the visitor.
    ///
    /// # Errors
    ///
    /// Propagates the first error a visitor returns.
    fn persist<V: FieldVisitor>(&mut self, visitor: &mut V) -> CoreResult<()>;
}

/// Receives the fields of a [`Persistent`] object.
pub trait FieldVisitor {
    /// The primary key attribute.
    ///
    /// # Errors
    ///
    /// Visitor-specific.
    fn on_primary_key<K: Field>(&mut self, name: &'static str, key: &mut K) -> CoreResult<()>;

    /// A plain attribute.
    ///
    /// # Errors
    ///
    /// Visitor-specific.
    fn on_attribute<F: Field>(&mut self, name: &'static str, value: &mut F) -> CoreResult<()>;

    /// A reference to an object this one belongs to.
    ///
    /// # Errors
    ///
    /// Visitor-specific.
    fn on_belongs_to<T: Persistent>(
        &mut self,
        name: &'static str,
        target: &mut Ref<T>,
        cascade: Cascade,
    ) -> CoreResult<()>;

    /// A reference to an object this one owns.
    ///
    /// # Errors
    ///
    /// Visitor-specific.
    fn on_has_one<T: Persistent>(
        &mut self,
        name: &'static str,
        target: &mut Ref<T>,
        cascade: Cascade,
    ) -> CoreResult<()>;

    /// A collection of references.
    ///
    /// # Errors
    ///
    /// Visitor-specific.
    fn on_has_many<T: Persistent>(
        &mut self,
        name: &'static str,
        items: &mut HasMany<T>,
        cascade: Cascade,
    ) -> CoreResult<()>;
}
