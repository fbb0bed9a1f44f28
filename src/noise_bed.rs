use rand::Rng;
use std::sync::Arc;

use crate::decode::AudioBuffer;
use crate::dsp::{crossfade_loop, generate_brown_noise_samples, generate_pink_noise_samples};
use crate::graph::{Destination, NodeId};
use crate::layer::{AudioLayer, LayerLevel};
use crate::models::{NoiseFilter, NoiseKind};
use crate::voices::LoopedBufferVoice;

/// Length of the blended region at the loop seam.
const SEAM_SECONDS: f32 = 0.05;
const BREATHING_CENTRE: f32 = 0.88;
const BREATHING_SWING: f32 = 0.12;

/// Renders `seconds` of loopable stereo noise. Each channel is an
/// independent run of the generator.
pub fn render_noise<R: Rng>(rng: &mut R, kind: NoiseKind, sample_rate: u32, seconds: f32) -> AudioBuffer {
    let frames = ((seconds * sample_rate as f32) as usize).max(1);
    let seam = (SEAM_SECONDS * sample_rate as f32) as usize;
    let channel = |rng: &mut R| {
        let mut samples = match kind {
            NoiseKind::Pink => generate_pink_noise_samples(rng, frames + seam),
            NoiseKind::Brown => generate_brown_noise_samples(rng, frames + seam),
        };
        crossfade_loop(&mut samples, seam);
        samples
    };
    let left = channel(&mut *rng);
    let right = channel(&mut *rng);
    let mut samples = Vec::with_capacity(left.len() * 2);
    for (l, r) in left.iter().zip(right.iter()) {
        samples.push(*l);
        samples.push(*r);
    }
    AudioBuffer { samples, sample_rate }
}

/// Looping coloured noise. Guided sessions add the low-pass and the slow
/// breathing modulation.
pub struct NoiseBed {
    dest: Destination,
    buffer: Arc<AudioBuffer>,
    filter: Option<NoiseFilter>,
    level: LayerLevel,
    node: Option<NodeId>,
}

impl NoiseBed {
    pub fn new(dest: Destination, buffer: Arc<AudioBuffer>, filter: Option<NoiseFilter>, volume: f32) -> Self {
        Self {
            dest,
            buffer,
            filter,
            level: LayerLevel::new(volume),
            node: None,
        }
    }

    pub fn with_generated(dest: Destination, kind: NoiseKind, seconds: f32, filter: Option<NoiseFilter>, volume: f32) -> Self {
        let buffer = render_noise(&mut rand::thread_rng(), kind, dest.sample_rate(), seconds);
        Self::new(dest, Arc::new(buffer), filter, volume)
    }

    pub fn is_filtered(&self) -> bool {
        self.filter.is_some()
    }
}

impl AudioLayer for NoiseBed {
    fn start(&mut self, _now: f64) {
        self.level.silence();
        if self.node.is_some() {
            return;
        }
        let mut voice = LoopedBufferVoice::new(self.buffer.clone(), self.level.param());
        if let Some(filter) = &self.filter {
            voice = voice.with_lowpass(filter.cutoff_hz);
            if filter.breathing {
                voice = voice.with_breathing(filter.breathing_hz, BREATHING_CENTRE, BREATHING_SWING);
            }
        }
        self.node = Some(self.dest.connect(Box::new(voice)));
    }

    fn stop(&mut self) {
        if let Some(node) = self.node.take() {
            self.dest.disconnect(node);
        }
    }

    fn set_volume(&mut self, volume: f32, now: f64) {
        self.level.set_volume(volume, now);
    }

    fn fade_volume(&mut self, target: f32, seconds: f64, now: f64) {
        self.level.fade(target, seconds, now);
    }

    fn volume(&self) -> f32 {
        self.level.volume()
    }
}
