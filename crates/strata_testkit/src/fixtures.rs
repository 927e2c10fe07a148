//! Fixture persistent types.
//!
//! A small music catalogue exercises relations and cascades, a person
//! hierarchy exercises polymorphic views, and [`Gadget`] carries one field
//! of every scalar type the codec knows.

use strata_core::{Cascade, CoreResult, FieldVisitor, HasMany, ObjectPtr, Persistent, Ref};

/// A track, optionally credited to an artist.
#[derive(Debug, Default)]
pub struct Track {
    /// Surrogate id, synced by the store.
    pub id: u64,
    /// Title.
    pub title: String,
    /// Length in seconds.
    pub seconds: u32,
    /// Credited artist.
    pub artist: Ref<Artist>,
}

impl Track {
    /// A transient track with the given title.
    pub fn titled(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }

    /// A transient track credited to `artist`.
    pub fn by(title: &str, artist: ObjectPtr<Artist>) -> Self {
        Self {
            title: title.to_string(),
            artist: Ref::to(artist),
            ..Self::default()
        }
    }
}

impl Persistent for Track {
    fn persist<V: FieldVisitor>(&mut self, v: &mut V) -> CoreResult<()> {
        v.on_primary_key("id", &mut self.id)?;
        v.on_attribute("title", &mut self.title)?;
        v.on_attribute("seconds", &mut self.seconds)?;
        v.on_belongs_to("artist", &mut self.artist, Cascade::NONE)
    }
}

/// An album owning its tracks.
///
/// Tracks follow the album through every cascade: pushed transient tracks
/// are inserted with it and removing the album removes them.
#[derive(Debug, Default)]
pub struct Album {
    /// Surrogate id, synced by the store.
    pub id: u64,
    /// Title.
    pub title: String,
    /// Release year.
    pub year: i32,
    /// Owned tracks.
    pub tracks: HasMany<Track>,
    /// Main artist.
    pub artist: Ref<Artist>,
}

impl Album {
    /// A transient album holding transient tracks.
    pub fn with_tracks(title: &str, tracks: &[&str]) -> Self {
        let mut album = Self {
            title: title.to_string(),
            ..Self::default()
        };
        for track in tracks {
            album.tracks.push_pending(Track::titled(track));
        }
        album
    }
}

impl Persistent for Album {
    fn persist<V: FieldVisitor>(&mut self, v: &mut V) -> CoreResult<()> {
        v.on_primary_key("id", &mut self.id)?;
        v.on_attribute("title", &mut self.title)?;
        v.on_attribute("year", &mut self.year)?;
        v.on_has_many("tracks", &mut self.tracks, Cascade::ALL)?;
        v.on_belongs_to("artist", &mut self.artist, Cascade::NONE)
    }
}

/// A performing artist.
#[derive(Debug, Default)]
pub struct Artist {
    /// Surrogate id, synced by the store.
    pub id: u64,
    /// Stage name.
    pub name: String,
}

impl Artist {
    /// A transient artist.
    pub fn named(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
        }
    }
}

impl Persistent for Artist {
    fn persist<V: FieldVisitor>(&mut self, v: &mut V) -> CoreResult<()> {
        v.on_primary_key("id", &mut self.id)?;
        v.on_attribute("name", &mut self.name)
    }
}

/// Abstract root of the person hierarchy.
#[derive(Debug, Default)]
pub struct Person {
    /// Surrogate id, synced by the store.
    pub id: u64,
    /// Full name.
    pub name: String,
}

impl Persistent for Person {
    fn persist<V: FieldVisitor>(&mut self, v: &mut V) -> CoreResult<()> {
        v.on_primary_key("id", &mut self.id)?;
        v.on_attribute("name", &mut self.name)
    }
}

/// A person attending a school.
#[derive(Debug, Default)]
pub struct Student {
    /// Surrogate id, synced by the store.
    pub id: u64,
    /// Full name.
    pub name: String,
    /// School attended.
    pub school: String,
}

impl Student {
    /// A transient student.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

impl Persistent for Student {
    fn persist<V: FieldVisitor>(&mut self, v: &mut V) -> CoreResult<()> {
        v.on_primary_key("id", &mut self.id)?;
        v.on_attribute("name", &mut self.name)?;
        v.on_attribute("school", &mut self.school)
    }
}

/// A person drawing a salary, possibly mentoring a student.
#[derive(Debug, Default)]
pub struct Employee {
    /// Surrogate id, synced by the store.
    pub id: u64,
    /// Full name.
    pub name: String,
    /// Yearly salary in cents.
    pub salary: i64,
    /// Mentored student.
    pub mentee: Ref<Student>,
}

impl Employee {
    /// A transient employee.
    pub fn named(name: &str, salary: i64) -> Self {
        Self {
            name: name.to_string(),
            salary,
            ..Self::default()
        }
    }
}

impl Persistent for Employee {
    fn persist<V: FieldVisitor>(&mut self, v: &mut V) -> CoreResult<()> {
        v.on_primary_key("id", &mut self.id)?;
        v.on_attribute("name", &mut self.name)?;
        v.on_attribute("salary", &mut self.salary)?;
        v.on_has_one("mentee", &mut self.mentee, Cascade::NONE)
    }
}

/// One field of every scalar type.
///
/// The primary key is a text serial, so the store never overwrites it and
/// the logical identifier differs from the surrogate id.
#[derive(Debug, Default, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct Gadget {
    pub serial: String,
    pub tiny: i8,
    pub small: i16,
    pub medium: i32,
    pub large: i64,
    pub byte: u8,
    pub word: u16,
    pub dword: u32,
    pub qword: u64,
    pub ratio: f32,
    pub precise: f64,
    pub enabled: bool,
    pub grade: char,
    pub blob: Vec<u8>,
}

impl Persistent for Gadget {
    fn persist<V: FieldVisitor>(&mut self, v: &mut V) -> CoreResult<()> {
        v.on_primary_key("serial", &mut self.serial)?;
        v.on_attribute("tiny", &mut self.tiny)?;
        v.on_attribute("small", &mut self.small)?;
        v.on_attribute("medium", &mut self.medium)?;
        v.on_attribute("large", &mut self.large)?;
        v.on_attribute("byte", &mut self.byte)?;
        v.on_attribute("word", &mut self.word)?;
        v.on_attribute("dword", &mut self.dword)?;
        v.on_attribute("qword", &mut self.qword)?;
        v.on_attribute("ratio", &mut self.ratio)?;
        v.on_attribute("precise", &mut self.precise)?;
        v.on_attribute("enabled", &mut self.enabled)?;
        v.on_attribute("grade", &mut self.grade)?;
        v.on_attribute("blob", &mut self.blob)
    }
}
