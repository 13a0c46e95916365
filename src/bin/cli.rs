//! midifur CLI — inspect MIDI files and export Furnace pattern text.
//!
//! Usage:
//!   mf-cli song.mid
//!   mf-cli song.mid --export --output pattern.txt
//!   mf-cli song.mid --export --mode spillover --track 2

use anyhow::Context;
use clap::{Parser, ValueEnum};
use mf_master::{Controller, ExportConfig, NoteOffMode, NoteRef, PolyphonyMode};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mf-cli", about = "MIDI inspector and Furnace pattern exporter")]
struct Args {
    /// MIDI file to load
    midi: PathBuf,

    /// Export Furnace pattern text instead of printing file info
    #[arg(long)]
    export: bool,

    /// Write the exported pattern here instead of stdout
    #[arg(long, value_name = "PATH", requires = "export")]
    output: Option<PathBuf>,

    /// Restrict the export to these tracks (1-based, repeatable)
    #[arg(long, value_name = "N")]
    track: Vec<usize>,

    /// Grid resolution in lines per quarter note
    #[arg(long, default_value_t = 4)]
    lpq: u32,

    /// Octave transpose applied to every note
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    transpose: i32,

    /// Write this instrument number into note-on cells
    #[arg(long, value_name = "ID")]
    instrument: Option<u8>,

    /// Map note velocity into the volume column
    #[arg(long)]
    velocity: bool,

    /// Volume a velocity of 127 maps to
    #[arg(long, default_value_t = 0xFF)]
    velocity_max: u8,

    /// How note ends are rendered
    #[arg(long, value_enum, default_value = "rel")]
    note_off: NoteOffArg,

    /// Polyphony policy
    #[arg(long, value_enum, default_value = "per-track")]
    mode: ModeArg,

    /// Subchannel budget for spillover mode
    #[arg(long, default_value_t = 3)]
    spillover: u32,
}

#[derive(Clone, Copy, ValueEnum)]
enum NoteOffArg {
    Off,
    Rel,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    PerTrack,
    Spillover,
}

impl Args {
    fn export_config(&self) -> ExportConfig {
        ExportConfig {
            lines_per_quarter: self.lpq,
            transpose_octaves: self.transpose,
            instrument_id: self.instrument.unwrap_or(0),
            define_instrument: self.instrument.is_some(),
            velocity_enabled: self.velocity,
            velocity_max: self.velocity_max,
            note_off_mode: match self.note_off {
                NoteOffArg::Off => NoteOffMode::Off,
                NoteOffArg::Rel => NoteOffMode::Rel,
            },
            polyphony_mode: match self.mode {
                ModeArg::PerTrack => PolyphonyMode::PerTrack,
                ModeArg::Spillover => PolyphonyMode::Spillover,
            },
            spillover_channels: self.spillover,
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let data = fs::read(&args.midi)
        .with_context(|| format!("failed to read {}", args.midi.display()))?;

    let mut ctrl = Controller::new();
    ctrl.load_midi(&data)
        .with_context(|| format!("failed to load {}", args.midi.display()))?;

    if args.export {
        export(&mut ctrl, &args)
    } else {
        print_info(&ctrl);
        Ok(())
    }
}

fn export(ctrl: &mut Controller, args: &Args) -> anyhow::Result<()> {
    ctrl.set_export_config(args.export_config());
    let selection = track_selection(ctrl, &args.track)?;
    let text = ctrl.export_furnace(&selection)?;

    match &args.output {
        Some(path) => {
            fs::write(path, &text)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote {} bytes to {}", text.len(), path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}

/// Expand 1-based track numbers into a note selection. Empty input
/// selects everything.
fn track_selection(ctrl: &Controller, tracks: &[usize]) -> anyhow::Result<Vec<NoteRef>> {
    let doc = ctrl.document();
    let mut selection = Vec::new();
    for &number in tracks {
        let index = number
            .checked_sub(1)
            .filter(|&i| i < doc.tracks.len())
            .with_context(|| {
                format!("no track {} (file has {})", number, doc.tracks.len())
            })?;
        selection.extend((0..doc.tracks[index].notes.len()).map(|ni| (index, ni)));
    }
    Ok(selection)
}

fn print_info(ctrl: &Controller) {
    let doc = ctrl.document();
    println!("PPQ:      {}", doc.ticks_per_beat);
    println!("Tracks:   {}", doc.tracks.len());
    println!("Beats:    {:.2}", doc.total_beats());
    println!("Length:   {:.2}s", doc.total_us / 1_000_000.0);
    println!("Tempo:    {:.2} BPM", doc.tempo_bpm());
    println!("Time sig: {}/{}", doc.time_sig_num, doc.time_sig_den);
    println!();

    for (i, track) in doc.tracks.iter().enumerate() {
        let range = if track.notes.is_empty() {
            "-".to_string()
        } else {
            format!("{}..{}", track.pitch_min, track.pitch_max)
        };
        println!(
            "  {:>2}. {:<24} {:>5} notes  pitch {}",
            i + 1,
            track.name,
            track.notes.len(),
            range
        );
    }
}
