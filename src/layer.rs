use crate::ambient::AmbientEngine;
use crate::automation::AudioParam;
use crate::narration::NarrationSequencer;
use crate::noise_bed::NoiseBed;
use crate::pulse::PulseScheduler;
use crate::spatial::SpatialEngine;
use crate::tone::ToneEngine;

/// Glide used for plain volume changes so they never click.
pub const VOLUME_GLIDE: f64 = 0.05;

/// What the orchestrator can ask of any sound layer.
///
/// `start` connects the layer's voices silent; the caller decides how it
/// fades in. Times are output-graph seconds.
pub trait AudioLayer {
    fn start(&mut self, now: f64);
    /// Disconnects everything. Safe to call repeatedly.
    fn stop(&mut self);
    fn set_volume(&mut self, volume: f32, now: f64);
    /// Fades the audible level without changing the stored volume.
    fn fade_volume(&mut self, target: f32, seconds: f64, now: f64);
    /// The level the layer returns to after a pause.
    fn volume(&self) -> f32;
    /// Runs deadlines that came due.
    fn poll(&mut self, _now: f64) {}
}

/// A layer's output gain plus the volume it was last asked to play at.
#[derive(Debug, Clone)]
pub struct LayerLevel {
    gain: AudioParam,
    volume: f32,
}

impl LayerLevel {
    pub fn new(volume: f32) -> Self {
        Self {
            gain: AudioParam::new(0.0),
            volume,
        }
    }

    pub fn param(&self) -> AudioParam {
        self.gain.clone()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Stores the volume without touching the gain.
    pub fn remember(&mut self, volume: f32) {
        self.volume = volume;
    }

    pub fn set_volume(&mut self, volume: f32, now: f64) {
        self.set_volume_over(volume, VOLUME_GLIDE, now);
    }

    pub fn set_volume_over(&mut self, volume: f32, seconds: f64, now: f64) {
        self.volume = volume;
        self.gain.fade_to(volume, now, seconds);
    }

    pub fn fade(&self, target: f32, seconds: f64, now: f64) {
        self.gain.fade_to(target, now, seconds);
    }

    pub fn silence(&self) {
        self.gain.set_value(0.0);
    }

    pub fn current(&self, now: f64) -> f32 {
        self.gain.value_at(now)
    }
}

pub enum LayerKind {
    Tone(ToneEngine),
    Noise(NoiseBed),
    Pulse(PulseScheduler),
    Spatial(SpatialEngine),
    Ambient(AmbientEngine),
    /// Fixed-beat tone faded in for the guidance resonant window.
    Resonant(ToneEngine),
    Narration(NarrationSequencer),
}

impl AudioLayer for LayerKind {
    fn start(&mut self, now: f64) {
        match self {
            LayerKind::Tone(l) => l.start(now),
            LayerKind::Noise(l) => l.start(now),
            LayerKind::Pulse(l) => l.start(now),
            LayerKind::Spatial(l) => l.start(now),
            LayerKind::Ambient(l) => l.start(now),
            LayerKind::Resonant(l) => l.start(now),
            LayerKind::Narration(l) => l.start(now),
        }
    }

    fn stop(&mut self) {
        match self {
            LayerKind::Tone(l) => l.stop(),
            LayerKind::Noise(l) => l.stop(),
            LayerKind::Pulse(l) => l.stop(),
            LayerKind::Spatial(l) => l.stop(),
            LayerKind::Ambient(l) => l.stop(),
            LayerKind::Resonant(l) => l.stop(),
            LayerKind::Narration(l) => l.stop(),
        }
    }

    fn set_volume(&mut self, volume: f32, now: f64) {
        match self {
            LayerKind::Tone(l) => l.set_volume(volume, now),
            LayerKind::Noise(l) => l.set_volume(volume, now),
            LayerKind::Pulse(l) => l.set_volume(volume, now),
            LayerKind::Spatial(l) => l.set_volume(volume, now),
            LayerKind::Ambient(l) => l.set_volume(volume, now),
            LayerKind::Resonant(l) => l.set_volume(volume, now),
            LayerKind::Narration(l) => l.set_volume(volume, now),
        }
    }

    fn fade_volume(&mut self, target: f32, seconds: f64, now: f64) {
        match self {
            LayerKind::Tone(l) => l.fade_volume(target, seconds, now),
            LayerKind::Noise(l) => l.fade_volume(target, seconds, now),
            LayerKind::Pulse(l) => l.fade_volume(target, seconds, now),
            LayerKind::Spatial(l) => l.fade_volume(target, seconds, now),
            LayerKind::Ambient(l) => l.fade_volume(target, seconds, now),
            LayerKind::Resonant(l) => l.fade_volume(target, seconds, now),
            LayerKind::Narration(l) => l.fade_volume(target, seconds, now),
        }
    }

    fn volume(&self) -> f32 {
        match self {
            LayerKind::Tone(l) => l.volume(),
            LayerKind::Noise(l) => l.volume(),
            LayerKind::Pulse(l) => l.volume(),
            LayerKind::Spatial(l) => l.volume(),
            LayerKind::Ambient(l) => l.volume(),
            LayerKind::Resonant(l) => l.volume(),
            LayerKind::Narration(l) => l.volume(),
        }
    }

    fn poll(&mut self, now: f64) {
        match self {
            LayerKind::Tone(l) => l.poll(now),
            LayerKind::Noise(l) => l.poll(now),
            LayerKind::Pulse(l) => l.poll(now),
            LayerKind::Spatial(l) => l.poll(now),
            LayerKind::Ambient(l) => l.poll(now),
            LayerKind::Resonant(l) => l.poll(now),
            LayerKind::Narration(l) => l.poll(now),
        }
    }
}
