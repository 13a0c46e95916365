//! Standard MIDI File loader.
//!
//! Walks every track's delta-timed event stream, pairs note-ons with
//! note-offs, and builds the document's two time maps. Malformed input
//! is recovered, never fatal: dangling note-ons are force-closed at the
//! track's last tick, zero-duration notes are dropped, and missing
//! tempo/time-signature events fall back to defaults.

use std::collections::HashMap;

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

use mf_ir::{build_tempo_segments, build_ts_segments, Document, Note, Track};

use crate::FormatError;

/// Parse a Standard MIDI File from bytes.
pub fn load_midi(data: &[u8]) -> Result<Document, FormatError> {
    let smf = Smf::parse(data)?;
    Ok(document_from_smf(&smf))
}

/// Build a document from an already-parsed SMF.
pub fn document_from_smf(smf: &Smf) -> Document {
    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(tpb) => tpb.as_int() as u32,
        // Timecode timing has no beat grid; approximate a PPQ from the
        // frame rate so tick arithmetic stays usable.
        Timing::Timecode(fps, subframe) => (fps.as_f32() * subframe as f32 * 4.0) as u32,
    };
    let ticks_per_beat = ticks_per_beat.max(1);

    let mut tracks: Vec<Track> = Vec::new();
    let mut ts_changes: Vec<(u64, u32, u32)> = Vec::new();
    let mut tempo_events: Vec<(u64, u32)> = Vec::new();
    let mut total_ticks: u64 = 0;

    for smf_track in &smf.tracks {
        let mut abs_tick: u64 = 0;
        let mut name: Option<String> = None;
        // (pitch, channel) -> (start_tick, velocity). A note-off matches
        // the most recent unmatched note-on at its key; a second note-on
        // at an open key overwrites it (last-on-wins).
        let mut open: HashMap<(u8, u8), (u64, u8)> = HashMap::new();
        let mut track = Track::new("");

        for event in smf_track {
            abs_tick += u64::from(event.delta.as_int());

            match event.kind {
                TrackEventKind::Midi { channel, message } => match message {
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        open.insert((key.as_int(), channel.as_int()), (abs_tick, vel.as_int()));
                    }
                    // A note-on with velocity 0 is a note-off.
                    MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                        let key = (key.as_int(), channel.as_int());
                        if let Some((start_tick, velocity)) = open.remove(&key) {
                            if abs_tick > start_tick {
                                track.push_note(Note {
                                    start_tick,
                                    end_tick: abs_tick,
                                    pitch: key.0,
                                    velocity,
                                    channel: key.1,
                                });
                            }
                        }
                    }
                    _ => {}
                },
                TrackEventKind::Meta(MetaMessage::TrackName(raw)) => {
                    if name.is_none() {
                        let cleaned = String::from_utf8_lossy(raw)
                            .trim_end_matches('\0')
                            .trim()
                            .to_string();
                        if !cleaned.is_empty() {
                            name = Some(cleaned);
                        }
                    }
                }
                TrackEventKind::Meta(MetaMessage::TimeSignature(num, den_pow2, _, _)) => {
                    // The denominator byte is an exponent; corrupt files
                    // can carry one too large to shift.
                    let den = 1u32.checked_shl(u32::from(den_pow2)).unwrap_or_else(|| {
                        log::warn!(
                            "time signature at tick {} has denominator exponent {}; using 4/4 denominator",
                            abs_tick,
                            den_pow2
                        );
                        4
                    });
                    ts_changes.push((abs_tick, u32::from(num), den));
                }
                TrackEventKind::Meta(MetaMessage::Tempo(us_per_beat)) => {
                    tempo_events.push((abs_tick, us_per_beat.as_int()));
                }
                _ => {}
            }

            total_ticks = total_ticks.max(abs_tick);
        }

        // Force-close anything still open at the track's last tick
        // (truncated or malformed file). Sorted so the emitted order is
        // deterministic despite the hash map.
        if !open.is_empty() {
            log::warn!(
                "force-closing {} dangling note-on(s) at tick {}",
                open.len(),
                abs_tick
            );
            let mut dangling: Vec<_> = open.drain().collect();
            dangling.sort_by_key(|&((pitch, channel), (start_tick, _))| {
                (start_tick, pitch, channel)
            });
            for ((pitch, channel), (start_tick, velocity)) in dangling {
                if abs_tick > start_tick {
                    track.push_note(Note {
                        start_tick,
                        end_tick: abs_tick,
                        pitch,
                        velocity,
                        channel,
                    });
                }
            }
        }

        if !track.notes.is_empty() {
            track.name = name.unwrap_or_else(|| format!("Track {}", tracks.len() + 1));
            tracks.push(track);
        }
    }

    // total_ticks is the max tick observed anywhere; fold in note ends
    // defensively so the time maps always cover every note.
    let max_note_end = tracks
        .iter()
        .flat_map(|t| t.notes.iter().map(|n| n.end_tick))
        .max()
        .unwrap_or(0);
    let total_ticks = total_ticks.max(max_note_end);
    let total_beats = total_ticks as f64 / ticks_per_beat as f64;

    let ts_segments = build_ts_segments(&ts_changes, ticks_per_beat, total_ticks);
    let tempo_segments = build_tempo_segments(&tempo_events, ticks_per_beat, total_beats);
    let total_us = tempo_segments.last().map_or(0.0, |s| s.end_us);
    let (time_sig_num, time_sig_den) = ts_segments
        .first()
        .map_or((4, 4), |s| (s.numerator, s.denominator));

    Document {
        ticks_per_beat,
        tracks,
        total_ticks,
        time_sig_num,
        time_sig_den,
        ts_segments,
        tempo_segments,
        total_us,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Append a variable-length quantity.
    fn push_vlq(out: &mut Vec<u8>, mut value: u32) {
        let mut bytes = vec![(value & 0x7F) as u8];
        value >>= 7;
        while value > 0 {
            bytes.push(((value & 0x7F) as u8) | 0x80);
            value >>= 7;
        }
        bytes.reverse();
        out.extend(bytes);
    }

    /// Builder for one MTrk event stream (without the end-of-track).
    #[derive(Default)]
    struct TrackBytes(Vec<u8>);

    impl TrackBytes {
        fn note_on(mut self, delta: u32, channel: u8, key: u8, vel: u8) -> Self {
            push_vlq(&mut self.0, delta);
            self.0.extend([0x90 | channel, key, vel]);
            self
        }

        fn note_off(mut self, delta: u32, channel: u8, key: u8) -> Self {
            push_vlq(&mut self.0, delta);
            self.0.extend([0x80 | channel, key, 0x40]);
            self
        }

        fn tempo(mut self, delta: u32, us_per_beat: u32) -> Self {
            push_vlq(&mut self.0, delta);
            self.0.extend([0xFF, 0x51, 0x03]);
            self.0.extend(&us_per_beat.to_be_bytes()[1..]);
            self
        }

        fn time_signature(mut self, delta: u32, num: u8, den_pow2: u8) -> Self {
            push_vlq(&mut self.0, delta);
            self.0.extend([0xFF, 0x58, 0x04, num, den_pow2, 24, 8]);
            self
        }

        fn name(mut self, delta: u32, name: &str) -> Self {
            push_vlq(&mut self.0, delta);
            self.0.extend([0xFF, 0x03, name.len() as u8]);
            self.0.extend(name.as_bytes());
            self
        }
    }

    /// Assemble a format-1 SMF from track event streams.
    fn smf_bytes(ticks_per_beat: u16, tracks: &[TrackBytes]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(b"MThd");
        out.extend(6u32.to_be_bytes());
        out.extend(1u16.to_be_bytes());
        out.extend((tracks.len() as u16).to_be_bytes());
        out.extend(ticks_per_beat.to_be_bytes());
        for track in tracks {
            out.extend(b"MTrk");
            out.extend((track.0.len() as u32 + 4).to_be_bytes());
            out.extend(&track.0);
            out.extend([0x00, 0xFF, 0x2F, 0x00]); // end of track
        }
        out
    }

    #[test]
    fn single_note_parses() {
        let data = smf_bytes(
            480,
            &[TrackBytes::default()
                .note_on(0, 0, 60, 100)
                .note_off(480, 0, 60)],
        );
        let doc = load_midi(&data).unwrap();

        assert_eq!(doc.ticks_per_beat, 480);
        assert_eq!(doc.tracks.len(), 1);
        assert_eq!(doc.tracks[0].name, "Track 1");
        assert_eq!(
            doc.tracks[0].notes,
            vec![Note { start_tick: 0, end_tick: 480, pitch: 60, velocity: 100, channel: 0 }]
        );
        assert_eq!(doc.total_ticks, 480);
        assert_eq!((doc.tracks[0].pitch_min, doc.tracks[0].pitch_max), (60, 60));
    }

    #[test]
    fn note_on_velocity_zero_is_note_off() {
        let data = smf_bytes(
            480,
            &[TrackBytes::default()
                .note_on(0, 3, 64, 90)
                .note_on(240, 3, 64, 0)],
        );
        let doc = load_midi(&data).unwrap();
        let note = doc.tracks[0].notes[0];
        assert_eq!((note.start_tick, note.end_tick, note.channel), (0, 240, 3));
    }

    #[test]
    fn zero_duration_notes_are_dropped() {
        let data = smf_bytes(
            480,
            &[TrackBytes::default()
                .note_on(0, 0, 60, 100)
                .note_off(0, 0, 60)
                .note_on(0, 0, 62, 100)
                .note_off(120, 0, 62)],
        );
        let doc = load_midi(&data).unwrap();
        assert_eq!(doc.tracks[0].notes.len(), 1);
        assert_eq!(doc.tracks[0].notes[0].pitch, 62);
    }

    #[test]
    fn restruck_open_note_is_overwritten() {
        // Two note-ons at the same key: the off matches the most recent
        // one; the first note is discarded, not resurrected.
        let data = smf_bytes(
            480,
            &[TrackBytes::default()
                .note_on(0, 0, 60, 80)
                .note_on(240, 0, 60, 120)
                .note_off(240, 0, 60)],
        );
        let doc = load_midi(&data).unwrap();
        assert_eq!(doc.tracks[0].notes.len(), 1);
        let note = doc.tracks[0].notes[0];
        assert_eq!((note.start_tick, note.end_tick, note.velocity), (240, 480, 120));
    }

    #[test]
    fn dangling_note_is_closed_at_track_end() {
        // The note-off targets a different pitch, so pitch 60 stays open
        // until the track's last observed tick (480).
        let data = smf_bytes(
            480,
            &[TrackBytes::default()
                .note_on(0, 0, 60, 100)
                .note_off(480, 0, 61)],
        );
        let doc = load_midi(&data).unwrap();
        assert_eq!(doc.tracks[0].notes.len(), 1);
        let note = doc.tracks[0].notes[0];
        assert_eq!((note.start_tick, note.end_tick, note.pitch), (0, 480, 60));
    }

    #[test]
    fn noteless_tracks_are_dropped_and_numbering_skips_them() {
        let data = smf_bytes(
            480,
            &[
                TrackBytes::default().tempo(0, 500_000),
                TrackBytes::default().note_on(0, 0, 60, 100).note_off(480, 0, 60),
                TrackBytes::default().name(0, "bass").note_on(0, 1, 36, 100).note_off(960, 1, 36),
            ],
        );
        let doc = load_midi(&data).unwrap();
        assert_eq!(doc.tracks.len(), 2);
        assert_eq!(doc.tracks[0].name, "Track 1");
        assert_eq!(doc.tracks[1].name, "bass");
        assert_eq!(doc.total_ticks, 960);
    }

    #[test]
    fn tempo_and_time_signature_are_collected_across_tracks() {
        let data = smf_bytes(
            480,
            &[
                TrackBytes::default()
                    .time_signature(0, 3, 2) // 3/4
                    .tempo(0, 500_000)
                    .tempo(480 * 3, 250_000),
                TrackBytes::default().note_on(0, 0, 60, 100).note_off(480 * 6, 0, 60),
            ],
        );
        let doc = load_midi(&data).unwrap();

        assert_eq!((doc.time_sig_num, doc.time_sig_den), (3, 4));
        assert_eq!(doc.ts_segments.len(), 1);
        assert_eq!(doc.ts_segments[0].bar_len, 3.0);

        assert_eq!(doc.tempo_segments.len(), 2);
        assert_eq!(doc.tempo_segments[0].us_per_beat, 500_000.0);
        assert_eq!(doc.tempo_segments[1].us_per_beat, 250_000.0);
        assert_eq!(doc.total_us, 3.0 * 500_000.0 + 3.0 * 250_000.0);
        assert_eq!(doc.beat_to_us(4.0), 3.0 * 500_000.0 + 250_000.0);
    }

    #[test]
    fn oversized_denominator_exponent_falls_back_to_quarter_note() {
        // A denominator exponent of 0x32 cannot be shifted into a u32;
        // the event must degrade to a /4 signature, not crash the load.
        let data = smf_bytes(
            480,
            &[TrackBytes::default()
                .time_signature(0, 4, 0x32)
                .note_on(0, 0, 60, 100)
                .note_off(480, 0, 60)],
        );
        let doc = load_midi(&data).unwrap();
        assert_eq!((doc.time_sig_num, doc.time_sig_den), (4, 4));
        assert_eq!(doc.tracks[0].notes.len(), 1);
    }

    #[test]
    fn file_without_meta_events_gets_defaults() {
        let data = smf_bytes(
            480,
            &[TrackBytes::default().note_on(0, 0, 60, 100).note_off(1920, 0, 60)],
        );
        let doc = load_midi(&data).unwrap();

        assert_eq!((doc.time_sig_num, doc.time_sig_den), (4, 4));
        assert_eq!(doc.ts_segments.len(), 1);
        assert_eq!(doc.ts_segments[0].start_beats, 0.0);
        assert_eq!(doc.ts_segments[0].end_beats, 4.0);
        assert_eq!(doc.ts_segments[0].measure_start_index, 0);
        assert_eq!(doc.tempo_bpm(), 120.0);
    }

    #[test]
    fn garbage_input_is_a_load_failure() {
        assert!(matches!(load_midi(b"not a midi file"), Err(FormatError::Midi(_))));
    }
}
