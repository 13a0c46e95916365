//! Furnace tracker clipboard writer.
//!
//! Quantizes a note selection onto a fixed-resolution line grid and
//! renders the fixed-width pattern text understood by Furnace's pattern
//! paste. Polyphony is resolved into output channels under one of two
//! policies: one channel per source track, or "spillover" packing of a
//! single track into a bounded number of subchannels.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use mf_ir::Document;

use crate::FormatError;

/// Clipboard payload header expected by Furnace's pattern paste.
const HEADER: &str = "org.tildearrow.furnace - Pattern Data (219)\n0\n";

/// Column separator appended after every cell.
const COLUMN_SEPARATOR: char = '|';

/// Rendered width of one cell, separator excluded.
const CELL_WIDTH: usize = 11;

/// Note names by semitone, as (letter, accidental) pairs.
const NOTE_NAMES: [(char, char); 12] = [
    ('C', '-'), ('C', '#'), ('D', '-'), ('D', '#'), ('E', '-'), ('F', '-'),
    ('F', '#'), ('G', '-'), ('G', '#'), ('A', '-'), ('A', '#'), ('B', '-'),
];

/// How a note's end is rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteOffMode {
    /// Hard cut (`OFF`)
    Off,
    /// Macro release (`REL`)
    #[default]
    Rel,
}

/// Polyphony resolution policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolyphonyMode {
    /// One output channel per source track
    #[default]
    PerTrack,
    /// Pack one track's overlapping notes into bounded subchannels
    Spillover,
}

/// Export settings, long-lived and user-editable.
///
/// [`sanitize`](ExportConfig::sanitize) clamps every field into range;
/// it never fails and is idempotent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Grid resolution: lines per quarter note, at least 1
    pub lines_per_quarter: u32,
    /// Octave transpose applied to every pitch, clamped to [-6, 6]
    pub transpose_octaves: i32,
    /// Instrument number written into note-on cells
    pub instrument_id: u8,
    /// Write the instrument field, or leave it blank (`..`)
    pub define_instrument: bool,
    /// Map velocity into the volume column, or leave it blank
    pub velocity_enabled: bool,
    /// Volume value a velocity of 127 maps to
    pub velocity_max: u8,
    /// Note-off rendering
    pub note_off_mode: NoteOffMode,
    /// Polyphony policy
    pub polyphony_mode: PolyphonyMode,
    /// Subchannel budget for spillover mode, clamped to [1, 16]
    pub spillover_channels: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            lines_per_quarter: 4,
            transpose_octaves: 0,
            instrument_id: 0,
            define_instrument: false,
            velocity_enabled: false,
            velocity_max: 0xFF,
            note_off_mode: NoteOffMode::default(),
            polyphony_mode: PolyphonyMode::default(),
            spillover_channels: 3,
        }
    }
}

impl ExportConfig {
    /// Clamp all fields into their valid ranges.
    pub fn sanitize(&mut self) {
        self.lines_per_quarter = self.lines_per_quarter.max(1);
        self.transpose_octaves = self.transpose_octaves.clamp(-6, 6);
        self.spillover_channels = self.spillover_channels.clamp(1, 16);
    }
}

/// A note reference: (track index, note index within the track).
pub type NoteRef = (usize, usize);

/// One channel's state at one grid line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Cell {
    #[default]
    Blank,
    On { pitch: u8, velocity: u8 },
    Off,
}

impl Cell {
    fn is_blank(self) -> bool {
        matches!(self, Cell::Blank)
    }

    /// Render the fixed-width cell text.
    fn render(self, cfg: &ExportConfig) -> String {
        match self {
            Cell::Blank => ".".repeat(CELL_WIDTH),
            Cell::Off => {
                let tag = match cfg.note_off_mode {
                    NoteOffMode::Off => "OFF",
                    NoteOffMode::Rel => "REL",
                };
                format!("{}{}", tag, ".".repeat(CELL_WIDTH - 3))
            }
            Cell::On { pitch, velocity } => {
                let (letter, accidental, octave) = pitch_name(pitch, cfg.transpose_octaves);
                let instrument = if cfg.define_instrument {
                    format!("{:02X}", cfg.instrument_id)
                } else {
                    "..".to_string()
                };
                let volume = if cfg.velocity_enabled {
                    let scaled = (velocity.min(127) as f64 / 127.0 * cfg.velocity_max as f64)
                        .round_ties_even();
                    format!("{:02X}", scaled as u8)
                } else {
                    "..".to_string()
                };
                format!("{letter}{accidental}{octave}{instrument}{volume}....")
            }
        }
    }
}

/// Transpose, clamp to the MIDI range, and derive (letter, accidental,
/// octave). Octave follows the MIDI convention: pitch 60 is C4.
fn pitch_name(pitch: u8, transpose_octaves: i32) -> (char, char, i32) {
    let pitch = (i32::from(pitch) + 12 * transpose_octaves).clamp(0, 127);
    let (letter, accidental) = NOTE_NAMES[(pitch % 12) as usize];
    (letter, accidental, pitch / 12 - 1)
}

/// A selected note quantized onto the line grid.
#[derive(Clone, Copy, Debug)]
struct GridItem {
    track: usize,
    start_line: i64,
    end_line: i64,
    pitch: u8,
    velocity: u8,
}

/// Row-major cell grid, rows x channels.
struct Grid {
    rows: usize,
    channels: usize,
    cells: Vec<Cell>,
}

impl Grid {
    fn new(rows: usize, channels: usize) -> Self {
        Self { rows, channels, cells: vec![Cell::Blank; rows * channels] }
    }

    fn cell(&self, row: usize, channel: usize) -> Cell {
        debug_assert!(row < self.rows && channel < self.channels);
        self.cells[row * self.channels + channel]
    }

    fn cell_mut(&mut self, row: usize, channel: usize) -> &mut Cell {
        debug_assert!(row < self.rows && channel < self.channels);
        &mut self.cells[row * self.channels + channel]
    }
}

/// Quantize a beat position to a grid line. Ties round to the even
/// line, so notes straddling a half-line boundary don't all drift late.
fn quantize(beat: f64, lines_per_quarter: u32) -> i64 {
    (beat * lines_per_quarter as f64).round_ties_even() as i64
}

/// Resolve the selection to quantized grid items. An empty selection
/// means every note in the document. Every item spans at least one
/// line.
fn gather_items(doc: &Document, selection: &[NoteRef], lines_per_quarter: u32) -> Vec<GridItem> {
    let tpq = doc.ticks_per_beat.max(1) as f64;

    let refs: Vec<NoteRef> = if selection.is_empty() {
        doc.tracks
            .iter()
            .enumerate()
            .flat_map(|(ti, track)| (0..track.notes.len()).map(move |ni| (ti, ni)))
            .collect()
    } else {
        selection.to_vec()
    };

    let mut items = Vec::with_capacity(refs.len());
    for (ti, ni) in refs {
        let Some(note) = doc.tracks.get(ti).and_then(|t| t.notes.get(ni)) else {
            continue;
        };
        let start_line = quantize(note.start_tick as f64 / tpq, lines_per_quarter);
        let mut end_line = quantize(note.end_tick as f64 / tpq, lines_per_quarter);
        if end_line <= start_line {
            end_line = start_line + 1;
        }
        items.push(GridItem {
            track: ti,
            start_line,
            end_line,
            pitch: note.pitch,
            velocity: note.velocity,
        });
    }
    items
}

/// Peak simultaneous overlap of `(start_line, end_line)` intervals.
fn peak_concurrency(intervals: &[(i64, i64)]) -> usize {
    let mut events = Vec::with_capacity(intervals.len() * 2);
    for &(start, end) in intervals {
        events.push((start, 1i32));
        events.push((end, -1i32));
    }
    events.sort_unstable();

    let mut current = 0i32;
    let mut peak = 0i32;
    for (_, delta) in events {
        current += delta;
        peak = peak.max(current);
    }
    peak.max(0) as usize
}

/// Write a note-off into `row`, clamping an off that lands exactly one
/// past the last row back into it so the pasted pattern always cuts its
/// final notes. Never overwrites a non-blank cell.
fn write_off(grid: &mut Grid, row: usize, channel: usize) {
    let row = row.min(grid.rows - 1);
    let cell = grid.cell_mut(row, channel);
    if cell.is_blank() {
        *cell = Cell::Off;
    }
}

/// One output channel per track present in the export set, ordered by
/// ascending track index. An off cell is emitted only when the last
/// still-active note on a track ends, so overlapping notes on one track
/// produce one off per contiguous cluster.
fn per_track_grid(items: &[GridItem], min_line: i64, rows: usize) -> Grid {
    let mut track_order: Vec<usize> = items.iter().map(|i| i.track).collect();
    track_order.sort_unstable();
    track_order.dedup();
    let channel_of: HashMap<usize, usize> =
        track_order.iter().enumerate().map(|(ch, &ti)| (ti, ch)).collect();

    let mut grid = Grid::new(rows, track_order.len());
    let mut active = vec![0usize; track_order.len()];
    // row -> channels whose active count drops there
    let mut releases: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

    let mut ordered: Vec<&GridItem> = items.iter().collect();
    ordered.sort_by_key(|i| (i.track, i.start_line, i.end_line, i.pitch));

    for item in ordered {
        let Some(&channel) = channel_of.get(&item.track) else {
            continue;
        };
        let row = (item.start_line - min_line) as usize;
        *grid.cell_mut(row, channel) = Cell::On { pitch: item.pitch, velocity: item.velocity };
        active[channel] += 1;
        releases
            .entry((item.end_line - min_line) as usize)
            .or_default()
            .push(channel);
    }

    // Resolve in ascending line order; a note-on already written at the
    // same line wins over a would-be off.
    for (&row, channels) in &releases {
        for &channel in channels {
            active[channel] = active[channel].saturating_sub(1);
            if active[channel] == 0 {
                write_off(&mut grid, row, channel);
            }
        }
    }

    grid
}

/// Pack a single track's notes into `min(budget, peak_concurrency)`
/// subchannels. Greedy single pass in (start, end, pitch) order:
/// first-fit on a free subchannel, otherwise stomp the occupant ending
/// soonest (lowest index on ties). Stomping cancels the evicted note's
/// pending off.
fn spillover_grid(
    items: &[GridItem],
    min_line: i64,
    rows: usize,
    cfg: &ExportConfig,
) -> Result<Grid, FormatError> {
    let mut tracks: Vec<usize> = items.iter().map(|i| i.track).collect();
    tracks.sort_unstable();
    tracks.dedup();
    if tracks.len() > 1 {
        return Err(FormatError::SpilloverMultiTrack(tracks.len()));
    }

    let intervals: Vec<(i64, i64)> = items.iter().map(|i| (i.start_line, i.end_line)).collect();
    let needed = peak_concurrency(&intervals).max(1);
    let channels = needed.min(cfg.spillover_channels as usize).max(1);

    let mut grid = Grid::new(rows, channels);
    // End line (grid-relative) of each subchannel's current occupant.
    let mut occupant_end = vec![i64::MIN; channels];
    // row -> subchannels to release there, resolved after placement
    let mut pending_offs: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

    let mut ordered: Vec<&GridItem> = items.iter().collect();
    ordered.sort_by_key(|i| (i.start_line, i.end_line, i.pitch));

    for item in ordered {
        let start = item.start_line - min_line;
        let end = item.end_line - min_line;

        let sub = match occupant_end.iter().position(|&e| e <= start) {
            Some(free) => free,
            None => {
                // All busy: evict the occupant ending soonest.
                let victim = (0..channels)
                    .min_by_key(|&s| occupant_end[s])
                    .unwrap_or(0);
                // The evicted note is cut here; its natural off must not
                // fire at its original end line.
                if let Some(subs) = pending_offs.get_mut(&(occupant_end[victim] as usize)) {
                    if let Some(pos) = subs.iter().position(|&s| s == victim) {
                        subs.remove(pos);
                    }
                }
                write_off(&mut grid, start as usize, victim);
                occupant_end[victim] = start;
                victim
            }
        };

        *grid.cell_mut(start as usize, sub) =
            Cell::On { pitch: item.pitch, velocity: item.velocity };
        pending_offs.entry(end as usize).or_default().push(sub);
        occupant_end[sub] = end;
    }

    for (&row, subs) in &pending_offs {
        for &sub in subs {
            write_off(&mut grid, row, sub);
        }
    }

    Ok(grid)
}

/// Render the header plus one text line per grid row.
fn compose(grid: &Grid, cfg: &ExportConfig) -> String {
    let mut out = String::from(HEADER);
    let lines: Vec<String> = (0..grid.rows)
        .map(|row| {
            (0..grid.channels)
                .map(|channel| {
                    let mut cell = grid.cell(row, channel).render(cfg);
                    cell.push(COLUMN_SEPARATOR);
                    cell
                })
                .collect()
        })
        .collect();
    out.push_str(&lines.join("\n"));
    out
}

/// Encode a note selection as Furnace pattern text.
///
/// An empty selection exports every note in the document; an empty
/// document (or a selection resolving to no notes) yields the header
/// alone. Spillover mode rejects selections spanning more than one
/// track.
pub fn write_furnace(
    doc: &Document,
    selection: &[NoteRef],
    cfg: &ExportConfig,
) -> Result<String, FormatError> {
    let mut cfg = *cfg;
    cfg.sanitize();

    let items = gather_items(doc, selection, cfg.lines_per_quarter);
    if items.is_empty() {
        return Ok(HEADER.to_string());
    }

    let min_line = items.iter().map(|i| i.start_line).min().unwrap_or(0);
    let max_line = items.iter().map(|i| i.end_line).max().unwrap_or(0);
    let rows = (max_line - min_line).max(1) as usize;

    let grid = match cfg.polyphony_mode {
        PolyphonyMode::Spillover => spillover_grid(&items, min_line, rows, &cfg)?,
        PolyphonyMode::PerTrack => per_track_grid(&items, min_line, rows),
    };

    Ok(compose(&grid, &cfg))
}
