//! Notes, tracks, and the loaded song document.

use crate::time_map::{self, TempoSegment, TsSegment, DEFAULT_US_PER_BEAT};

/// A single note event in absolute ticks.
///
/// Invariant: `end_tick > start_tick`. Zero-duration notes are dropped
/// during ingestion and never reach a `Track`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Note {
    /// Absolute start position in ticks
    pub start_tick: u64,
    /// Absolute end position in ticks, strictly after the start
    pub end_tick: u64,
    /// MIDI note number (0-127)
    pub pitch: u8,
    /// Note-on velocity (0-127)
    pub velocity: u8,
    /// Source MIDI channel
    pub channel: u8,
}

/// A named track holding its notes in note-off order.
#[derive(Clone, Debug)]
pub struct Track {
    /// Track name (from the track-name meta event, or "Track N")
    pub name: String,
    /// Notes in the order their note-offs were seen during parsing
    pub notes: Vec<Note>,
    /// Lowest pitch in the track; valid only when `notes` is non-empty
    pub pitch_min: u8,
    /// Highest pitch in the track; valid only when `notes` is non-empty
    pub pitch_max: u8,
}

impl Track {
    /// Create an empty track. Pitch bounds start inverted (127/0) and
    /// become meaningful once the first note is pushed.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            notes: Vec::new(),
            pitch_min: 127,
            pitch_max: 0,
        }
    }

    /// Append a note, widening the pitch bounds.
    pub fn push_note(&mut self, note: Note) {
        self.pitch_min = self.pitch_min.min(note.pitch);
        self.pitch_max = self.pitch_max.max(note.pitch);
        self.notes.push(note);
    }
}

/// A loaded MIDI document: tracks plus the two time maps.
///
/// Rebuilt wholesale on every load; all fields are read-only for
/// downstream consumers between loads.
#[derive(Clone, Debug)]
pub struct Document {
    /// PPQ from the MIDI header (ticks per quarter note), always > 0
    pub ticks_per_beat: u32,
    /// Tracks that contained at least one note
    pub tracks: Vec<Track>,
    /// Absolute end tick of the song across all tracks
    pub total_ticks: u64,
    /// Display time signature (the first sorted change event)
    pub time_sig_num: u32,
    /// Display time signature denominator
    pub time_sig_den: u32,
    /// Time-signature segmentation over `[0, total_beats)`
    pub ts_segments: Vec<TsSegment>,
    /// Tempo segmentation over `[0, total_us)`
    pub tempo_segments: Vec<TempoSegment>,
    /// Total song length in microseconds
    pub total_us: f64,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            ticks_per_beat: 480,
            tracks: Vec::new(),
            total_ticks: 0,
            time_sig_num: 4,
            time_sig_den: 4,
            ts_segments: Vec::new(),
            tempo_segments: Vec::new(),
            total_us: 0.0,
        }
    }
}

impl Document {
    /// Song length in quarter-note beats.
    pub fn total_beats(&self) -> f64 {
        self.total_ticks as f64 / self.ticks_per_beat.max(1) as f64
    }

    /// Tempo at beat 0 in BPM (120 when the file carries no tempo event
    /// and the document is empty).
    pub fn tempo_bpm(&self) -> f64 {
        match self.tempo_segments.first() {
            Some(seg) => 60_000_000.0 / seg.us_per_beat,
            None => 60_000_000.0 / DEFAULT_US_PER_BEAT,
        }
    }

    /// Map an absolute beat position to absolute microseconds.
    pub fn beat_to_us(&self, beat: f64) -> f64 {
        time_map::beat_to_us(&self.tempo_segments, beat)
    }

    /// Map absolute microseconds to an absolute beat position.
    pub fn us_to_beat(&self, us: f64) -> f64 {
        time_map::us_to_beat(&self.tempo_segments, us)
    }
}
