//! Core document types for midifur.
//!
//! This crate defines the loaded-song model shared by the format
//! loader, the export encoder, and any front-end: notes, tracks, the
//! document, and the two time maps (time-signature segmentation and
//! tempo segmentation) that convert between tick, beat, and
//! absolute-microsecond coordinates.

mod document;
mod time_map;

pub use document::{Document, Note, Track};
pub use time_map::{
    beat_to_us, build_tempo_segments, build_ts_segments, us_to_beat, TempoSegment, TsSegment,
    DEFAULT_US_PER_BEAT,
};
