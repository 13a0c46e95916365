//! Format support for midifur.
//!
//! Parses Standard MIDI Files into the document model and writes
//! Furnace tracker pattern text from a note selection.

mod furnace_format;
mod midi_format;

pub use furnace_format::{
    write_furnace, ExportConfig, NoteOffMode, NoteRef, PolyphonyMode,
};
pub use midi_format::{document_from_smf, load_midi};

use thiserror::Error;

/// Error type for format parsing and export.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Underlying SMF parse failure; no document is installed.
    #[error("failed to parse MIDI file: {0}")]
    Midi(#[from] midly::Error),
    /// Spillover export invoked with notes from more than one track.
    #[error(
        "Spillover export requires notes from a single track.\n\
         {0} tracks detected in the selection."
    )]
    SpilloverMultiTrack(usize),
}
