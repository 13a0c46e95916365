//! Time-signature and tempo segmentation.
//!
//! Both maps partition the song into maximal ranges over which one
//! value (signature or tempo) is constant. Lookups are linear scans:
//! real files carry at most a few dozen segments.

/// Microseconds per beat when a file carries no tempo event (120 BPM).
pub const DEFAULT_US_PER_BEAT: f64 = 500_000.0;

/// Tolerance absorbing float round-off at exact bar boundaries.
const BAR_EPSILON: f64 = 1e-9;

/// A maximal range with one constant time signature.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TsSegment {
    /// Segment start in quarter-note beats
    pub start_beats: f64,
    /// Segment end in quarter-note beats (exclusive)
    pub end_beats: f64,
    /// Signature numerator
    pub numerator: u32,
    /// Signature denominator
    pub denominator: u32,
    /// Length of one signature beat in quarter-note beats (4/denominator)
    pub beat_len: f64,
    /// Length of one bar in quarter-note beats
    pub bar_len: f64,
    /// Count of whole bars completed by all prior segments
    pub measure_start_index: u32,
}

/// A maximal range with one constant tempo.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TempoSegment {
    /// Segment start in ticks
    pub start_tick: u64,
    /// Segment end in ticks
    pub end_tick: u64,
    /// Segment start in quarter-note beats
    pub start_beats: f64,
    /// Segment end in quarter-note beats (exclusive)
    pub end_beats: f64,
    /// Tempo over this segment, microseconds per beat
    pub us_per_beat: f64,
    /// Segment start in absolute microseconds
    pub start_us: f64,
    /// Segment end in absolute microseconds (exclusive)
    pub end_us: f64,
}

/// Build time-signature segments from `(tick, numerator, denominator)`
/// change events.
///
/// Events may be unsorted, empty, or missing a tick-0 entry: an empty
/// set yields a single 4/4 segment, and time before the first real
/// change inherits that change's signature rather than defaulting.
/// When two events share a tick the later one wins.
pub fn build_ts_segments(
    changes: &[(u64, u32, u32)],
    ticks_per_beat: u32,
    total_ticks: u64,
) -> Vec<TsSegment> {
    let mut changes = changes.to_vec();
    if changes.is_empty() {
        changes.push((0, 4, 4));
    }
    changes.sort_by_key(|&(tick, _, _)| tick);
    if changes[0].0 > 0 {
        let (_, num, den) = changes[0];
        changes.insert(0, (0, num, den));
    }
    changes.dedup_by(|cur, prev| {
        if prev.0 == cur.0 {
            *prev = *cur;
            true
        } else {
            false
        }
    });

    let tpq = ticks_per_beat.max(1) as f64;
    let mut segments = Vec::with_capacity(changes.len());
    let mut measure_index: u32 = 0;

    for (i, &(tick, num, den)) in changes.iter().enumerate() {
        let end_tick = changes.get(i + 1).map_or(total_ticks, |&(t, _, _)| t);
        let start_beats = tick as f64 / tpq;
        let end_beats = end_tick as f64 / tpq;
        let beat_len = 4.0 / den.max(1) as f64;
        let bar_len = num as f64 * beat_len;

        let bars = if end_beats > start_beats && bar_len > BAR_EPSILON {
            ((end_beats - start_beats) / bar_len + BAR_EPSILON).floor() as u32
        } else {
            0
        };

        // Changes at or past the song end would create zero-width or
        // inverted segments; skip them. The degenerate [0, 0) segment of
        // an empty song is kept so the document still has a signature.
        if end_beats > start_beats || i == 0 {
            segments.push(TsSegment {
                start_beats,
                end_beats: end_beats.max(start_beats),
                numerator: num,
                denominator: den,
                beat_len,
                bar_len,
                measure_start_index: measure_index,
            });
        }
        measure_index += bars;
    }

    segments
}

/// Build tempo segments from `(tick, microseconds_per_beat)` events
/// gathered across all tracks, covering `[0, total_beats)`.
///
/// A missing tick-0 event is synthesized at the 120 BPM default. The
/// microsecond cursor accumulates across segments so that
/// `end_us - start_us == (end_beats - start_beats) * us_per_beat`.
pub fn build_tempo_segments(
    events: &[(u64, u32)],
    ticks_per_beat: u32,
    total_beats: f64,
) -> Vec<TempoSegment> {
    let tpq = ticks_per_beat.max(1) as f64;

    let mut events = events.to_vec();
    events.sort_by_key(|&(tick, _)| tick);

    let mut breakpoints = Vec::with_capacity(events.len() + 1);
    if events.first().map_or(true, |&(tick, _)| tick != 0) {
        breakpoints.push((0, DEFAULT_US_PER_BEAT as u32));
    }
    // A zero tempo would make the microsecond span degenerate and the
    // inverse conversion divide by zero.
    breakpoints.extend(events.iter().map(|&(tick, uspb)| (tick, uspb.max(1))));

    let mut segments = Vec::new();
    let mut us_cursor = 0.0;
    let (mut prev_tick, mut prev_uspb) = breakpoints[0];
    let mut prev_beats = 0.0;

    for &(tick, uspb) in &breakpoints[1..] {
        let beats = tick as f64 / tpq;
        let dbeats = (beats - prev_beats).max(0.0);
        if dbeats > 0.0 {
            let end_us = us_cursor + dbeats * prev_uspb as f64;
            segments.push(TempoSegment {
                start_tick: prev_tick,
                end_tick: tick,
                start_beats: prev_beats,
                end_beats: beats,
                us_per_beat: prev_uspb as f64,
                start_us: us_cursor,
                end_us,
            });
            us_cursor = end_us;
        }
        prev_tick = tick;
        prev_beats = beats;
        prev_uspb = uspb;
    }

    // Final segment at the last tempo, out to the song end.
    if total_beats > prev_beats {
        let dbeats = total_beats - prev_beats;
        segments.push(TempoSegment {
            start_tick: prev_tick,
            end_tick: (total_beats * tpq) as u64,
            start_beats: prev_beats,
            end_beats: total_beats,
            us_per_beat: prev_uspb as f64,
            start_us: us_cursor,
            end_us: us_cursor + dbeats * prev_uspb as f64,
        });
    }

    segments
}

/// Map an absolute beat position to absolute microseconds.
///
/// Past the last segment the last tempo extrapolates linearly (the
/// playback scheduler may run slightly beyond the nominal end); before
/// the first segment the result floors at zero. With no segments the
/// conversion is flat at the default tempo.
pub fn beat_to_us(segments: &[TempoSegment], beat: f64) -> f64 {
    let Some(first) = segments.first() else {
        return beat * DEFAULT_US_PER_BEAT;
    };
    for seg in segments {
        if seg.start_beats <= beat && beat < seg.end_beats {
            return seg.start_us + (beat - seg.start_beats) * seg.us_per_beat;
        }
    }
    let last = &segments[segments.len() - 1];
    if beat >= last.end_beats {
        return last.end_us + (beat - last.end_beats).max(0.0) * last.us_per_beat;
    }
    if beat < first.start_beats {
        return (first.start_us - (first.start_beats - beat) * first.us_per_beat).max(0.0);
    }
    0.0
}

/// Map absolute microseconds to an absolute beat position.
///
/// Inverse of [`beat_to_us`], with the same extrapolation rules.
pub fn us_to_beat(segments: &[TempoSegment], us: f64) -> f64 {
    let Some(first) = segments.first() else {
        return us / DEFAULT_US_PER_BEAT;
    };
    for seg in segments {
        if seg.start_us <= us && us < seg.end_us {
            return seg.start_beats + (us - seg.start_us) / seg.us_per_beat;
        }
    }
    let last = &segments[segments.len() - 1];
    if us >= last.end_us {
        return last.end_beats + (us - last.end_us).max(0.0) / last.us_per_beat;
    }
    if us < first.start_us {
        return (first.start_beats - (first.start_us - us) / first.us_per_beat).max(0.0);
    }
    0.0
}
