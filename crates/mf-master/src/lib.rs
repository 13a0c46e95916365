//! Headless controller for midifur.
//!
//! Provides a unified API for loading MIDI files, querying the
//! document's time maps, and exporting Furnace pattern text that both a
//! GUI and the CLI can share.

// Re-export common types so callers don't need mf-ir/mf-formats directly.
pub use mf_formats::{ExportConfig, FormatError, NoteOffMode, NoteRef, PolyphonyMode};
pub use mf_ir::{Document, Note, Track};

/// Headless controller — owns the current document and the export
/// settings.
pub struct Controller {
    document: Document,
    export_config: ExportConfig,
}

impl Controller {
    pub fn new() -> Self {
        Self {
            document: Document::default(),
            export_config: ExportConfig::default(),
        }
    }

    // --- Document management ---

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Parse a MIDI file and install it as the current document. On a
    /// parse error the previous document is left untouched.
    pub fn load_midi(&mut self, data: &[u8]) -> Result<(), FormatError> {
        let doc = mf_formats::load_midi(data)?;
        log::info!(
            "loaded MIDI file: {} tracks, {} ticks at {} PPQ",
            doc.tracks.len(),
            doc.total_ticks,
            doc.ticks_per_beat
        );
        self.document = doc;
        Ok(())
    }

    // --- Export settings ---

    pub fn export_config(&self) -> &ExportConfig {
        &self.export_config
    }

    /// Replace the export settings, clamping every field into range.
    pub fn set_export_config(&mut self, mut cfg: ExportConfig) {
        cfg.sanitize();
        self.export_config = cfg;
    }

    // --- Export ---

    /// Encode a note selection as Furnace pattern text using the stored
    /// settings. An empty selection exports the whole document.
    pub fn export_furnace(&self, selection: &[NoteRef]) -> Result<String, FormatError> {
        mf_formats::write_furnace(&self.document, selection, &self.export_config)
    }

    /// Encode with one-off settings instead of the stored ones.
    pub fn export_furnace_with(
        &self,
        selection: &[NoteRef],
        cfg: &ExportConfig,
    ) -> Result<String, FormatError> {
        mf_formats::write_furnace(&self.document, selection, cfg)
    }

    // --- Time queries ---

    pub fn beat_to_us(&self, beat: f64) -> f64 {
        self.document.beat_to_us(beat)
    }

    pub fn us_to_beat(&self, us: f64) -> f64 {
        self.document.us_to_beat(us)
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal one-note SMF: C4 for one beat at PPQ 480.
    fn one_note_smf() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(b"MThd");
        bytes.extend(6u32.to_be_bytes());
        bytes.extend(0u16.to_be_bytes());
        bytes.extend(1u16.to_be_bytes());
        bytes.extend(480u16.to_be_bytes());
        let track: &[u8] = &[
            0x00, 0x90, 60, 100, // note on
            0x83, 0x60, 0x80, 60, 64, // +480 ticks, note off
            0x00, 0xFF, 0x2F, 0x00, // end of track
        ];
        bytes.extend(b"MTrk");
        bytes.extend((track.len() as u32).to_be_bytes());
        bytes.extend(track);
        bytes
    }

    #[test]
    fn starts_with_an_empty_document() {
        let ctl = Controller::new();
        assert!(ctl.document().tracks.is_empty());
        assert_eq!(ctl.document().ticks_per_beat, 480);
    }

    #[test]
    fn load_installs_the_parsed_document() {
        let mut ctl = Controller::new();
        ctl.load_midi(&one_note_smf()).unwrap();
        assert_eq!(ctl.document().tracks.len(), 1);
        assert_eq!(ctl.document().total_ticks, 480);
    }

    #[test]
    fn failed_load_keeps_the_previous_document() {
        let mut ctl = Controller::new();
        ctl.load_midi(&one_note_smf()).unwrap();
        assert!(ctl.load_midi(b"not a midi file").is_err());
        assert_eq!(ctl.document().tracks.len(), 1);
    }

    #[test]
    fn exports_with_stored_settings() {
        let mut ctl = Controller::new();
        ctl.load_midi(&one_note_smf()).unwrap();
        ctl.set_export_config(ExportConfig {
            note_off_mode: NoteOffMode::Off,
            ..ExportConfig::default()
        });

        let text = ctl.export_furnace(&[]).unwrap();
        assert!(text.starts_with("org.tildearrow.furnace - Pattern Data (219)\n0\n"));
        assert!(text.contains("C-4........|"));
        assert!(text.ends_with("OFF........|"));
    }

    #[test]
    fn set_config_sanitizes() {
        let mut ctl = Controller::new();
        ctl.set_export_config(ExportConfig {
            lines_per_quarter: 0,
            spillover_channels: 99,
            ..ExportConfig::default()
        });
        assert_eq!(ctl.export_config().lines_per_quarter, 1);
        assert_eq!(ctl.export_config().spillover_channels, 16);
    }

    #[test]
    fn time_queries_follow_the_document_tempo() {
        let mut ctl = Controller::new();
        ctl.load_midi(&one_note_smf()).unwrap();
        // No tempo events: the 120 BPM default applies.
        assert_eq!(ctl.beat_to_us(1.0), 500_000.0);
        assert_eq!(ctl.us_to_beat(250_000.0), 0.5);
    }
}
