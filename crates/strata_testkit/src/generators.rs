//! Property-based test generators using proptest.
//!
//! Provides strategies for generating fixture objects and random
//! sequences of store operations.

use crate::fixtures::{Gadget, Track};
use proptest::prelude::*;

/// Strategy for generating track titles.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9 ]{0,23}").expect("Invalid regex")
}

/// Strategy for generating transient tracks.
pub fn track_strategy() -> impl Strategy<Value = Track> {
    (title_strategy(), 0u32..3600).prop_map(|(title, seconds)| Track {
        title,
        seconds,
        ..Track::default()
    })
}

/// Strategy for generating gadgets covering the full range of every field.
pub fn gadget_strategy() -> impl Strategy<Value = Gadget> {
    (
        (
            prop::string::string_regex("[A-Z]{2}-[0-9]{4}").expect("Invalid regex"),
            any::<i8>(),
            any::<i16>(),
            any::<i32>(),
            any::<i64>(),
            any::<u8>(),
            any::<u16>(),
        ),
        (
            any::<u32>(),
            any::<u64>(),
            any::<f32>().prop_filter("NaN never compares equal", |v| !v.is_nan()),
            any::<f64>().prop_filter("NaN never compares equal", |v| !v.is_nan()),
            any::<bool>(),
            any::<char>(),
            prop::collection::vec(any::<u8>(), 0..64),
        ),
    )
        .prop_map(
            |(
                (serial, tiny, small, medium, large, byte, word),
                (dword, qword, ratio, precise, enabled, grade, blob),
            )| Gadget {
                serial,
                tiny,
                small,
                medium,
                large,
                byte,
                word,
                dword,
                qword,
                ratio,
                precise,
                enabled,
                grade,
                blob,
            },
        )
}

/// One step of a random transaction.
#[derive(Debug, Clone)]
pub enum TrackOp {
    /// Insert a new track with this title and length.
    Insert(String, u32),
    /// Retitle the live track at this position, modulo the live count.
    Retitle(usize, String),
    /// Remove the live track at this position, modulo the live count.
    Remove(usize),
}

/// Strategy for generating a single track operation.
pub fn track_op_strategy() -> impl Strategy<Value = TrackOp> {
    prop_oneof![
        3 => (title_strategy(), 0u32..3600).prop_map(|(title, seconds)| TrackOp::Insert(title, seconds)),
        2 => (any::<usize>(), title_strategy()).prop_map(|(at, title)| TrackOp::Retitle(at, title)),
        1 => any::<usize>().prop_map(TrackOp::Remove),
    ]
}

/// Strategy for generating a sequence of track operations.
pub fn track_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<TrackOp>> {
    prop::collection::vec(track_op_strategy(), 0..max_len)
}
