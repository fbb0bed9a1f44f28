use crate::models::FrequencyPoint;

/// Beat frequency used when a session ships an empty envelope.
pub const DEFAULT_BEAT_FREQ: f64 = 10.0;

/// Target beat frequency at `t` seconds.
///
/// Clamps to the first/last keyframe outside the envelope and interpolates
/// linearly between bracketing keyframes otherwise.
pub fn interpolate(envelope: &[FrequencyPoint], t: f64) -> f64 {
    let (first, last) = match (envelope.first(), envelope.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return DEFAULT_BEAT_FREQ,
    };
    if t <= first.time {
        return first.beat_freq;
    }
    if t >= last.time {
        return last.beat_freq;
    }
    // first index whose time is past t; guaranteed in 1..len by the clamps above
    let idx = envelope.partition_point(|p| p.time <= t);
    let prev = &envelope[idx - 1];
    let next = &envelope[idx];
    let span = next.time - prev.time;
    if span <= 0.0 {
        return prev.beat_freq;
    }
    prev.beat_freq + (next.beat_freq - prev.beat_freq) * (t - prev.time) / span
}
